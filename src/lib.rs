#![allow(non_snake_case)]

// Declare the modules that form the library's public API.
// Using `pub mod` makes them accessible from the binary and the integration tests.
pub mod backoff;
pub mod config;
pub mod connection;
pub mod data_model;
pub mod error;
pub mod executor;
pub mod server;
pub mod utils;

pub use connection::{ConnectionManager, LapinConnector, LinkState};
pub use data_model::{ExecutionRequest, ExecutionResponse, PublishParameters};
pub use error::{RelayError, Result};
pub use executor::{Executor, PublishExecutor};
