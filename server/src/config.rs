use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Real-time broadcast hub for chat and shared drawing
#[derive(Parser, Clone, Debug)]
#[command(name = "hub-server", version, about)]
pub struct Config {
    /// Bind address
    #[arg(long, env = "HUB_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Port to listen on
    #[arg(long, env = "HUB_PORT", default_value_t = 8787)]
    pub port: u16,

    /// Endpoint path accepting the websocket upgrade
    #[arg(long, env = "HUB_PATH", default_value = "/")]
    pub path: String,

    /// Contract file (JSON) replacing the built-in channel contract
    #[arg(long, env = "HUB_CONTRACT")]
    pub contract: Option<PathBuf>,

    /// Emit structured JSON logs
    #[arg(long, env = "HUB_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind_address, self.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_port() {
        let config = Config::try_parse_from(["hub-server"]).unwrap();
        assert_eq!(config.port, 8787);
        assert_eq!(config.path, "/");
        assert!(config.contract.is_none());
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:8787");
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "hub-server", "--port", "9000", "--bind-address", "127.0.0.1", "--contract", "c.json",
        ])
        .unwrap();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9000");
        assert_eq!(config.contract, Some(PathBuf::from("c.json")));
    }
}
