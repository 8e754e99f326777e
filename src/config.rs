// src/config.rs
pub mod cli;
pub mod relay;

pub use cli::{Args, LogFormat};
pub use relay::{load_relay_config, RelayConfig};
