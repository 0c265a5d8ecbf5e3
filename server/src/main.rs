use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use protocol::{Contract, SchemaRegistry};
use server::config::Config;
use server::server_listener::{HubState, ServerListener};

const DEFAULT_FILTER: &str = "hub_server=info,server=info,protocol=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if config.json_logs {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt()
            .compact() // use abbreviated log format
            .with_env_filter(filter)
            .with_thread_ids(true) // display thread id where event happens
            .init();
    }

    let contract = match &config.contract {
        Some(path) => Contract::from_path(path)?,
        None => Contract::embedded()?,
    };
    info!("contract channels: {:?}", contract.channel_ids().collect::<Vec<_>>());

    let schemas: Arc<dyn SchemaRegistry> = Arc::new(contract);
    let state = HubState::new(schemas);

    // refuse to serve a path whose frames could never validate
    let channel = state.endpoint_channel(&config.path)
        .map_err(|e| { error!("{}", e); e })?;
    info!("path {} validates against channel {}", config.path, channel);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await
        .map_err(|e| { error!("Unable to bind to server address {}", addr); e })?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                trigger.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });

    ServerListener::serve(listener, state, &config.path, shutdown).await?;
    info!("Server stopped");

    Ok(())
}
