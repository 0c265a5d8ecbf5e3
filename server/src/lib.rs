pub mod config;
pub mod error;
pub mod server_types;

// identity admission
pub mod names;
pub mod registry;

// per-frame validation and fan out
pub mod gate;
pub mod delivery;

// connection lifecycle and transport
pub mod client_handler;
pub mod server_listener;
