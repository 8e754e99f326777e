use std::time::Duration;

use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, RelayError>;

/// The Error type for relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// A single failed attempt to dial the broker or open a channel on it.
    #[error("Broker connection error: {0}")]
    Connect(String),

    /// The connect loop ran out of its time budget. `last` is the rendered
    /// text of the final attempt's error so the outcome can be handed to
    /// every caller that waited on the same attempt.
    #[error("Gave up connecting to broker after {attempts} attempts over {elapsed:?}: {last}")]
    ConnectExhausted {
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    /// The channel or its connection is no longer usable and must be
    /// re-established before publishing again.
    #[error("channel/connection is not open: {0}")]
    ChannelClosed(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Serialization/Deserialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },
}

impl RelayError {
    /// Whether this error is the recoverable closed-channel signal.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, RelayError::ChannelClosed(_))
    }
}

/// Maps a lapin error raised while publishing. Errors that mean the channel
/// or connection is gone become [`RelayError::ChannelClosed`]; everything else
/// is a plain publish failure.
pub fn classify_publish_error(err: lapin::Error) -> RelayError {
    match err {
        lapin::Error::InvalidChannelState(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::IOError(_)
        | lapin::Error::MissingHeartbeatError => RelayError::ChannelClosed(err.to_string()),
        other => RelayError::Publish(other.to_string()),
    }
}
