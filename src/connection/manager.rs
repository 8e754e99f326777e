//! Ownership of the single broker connection/channel pair.
//!
//! The pair lives behind a read/write lock so publishers only hold the lock
//! long enough to clone an `Arc`. Establishing a new pair is serialized by a
//! separate async mutex: concurrent recoveries queue on it. A caller that
//! queued behind a finished attempt takes that attempt's outcome, success or
//! failure, instead of dialing again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{redact_uri, BrokerChannel, BrokerConnector};
use crate::backoff::{retry_notify, BackoffStrategy};
use crate::data_model::PublishParameters;
use crate::error::{RelayError, Result};
use crate::utils::prometheus_metrics::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// The give-up of the latest connect attempt, kept so callers that waited on
/// that attempt receive the same error.
#[derive(Debug, Clone)]
struct Exhausted {
    attempts: u32,
    elapsed: Duration,
    last: String,
}

impl Exhausted {
    fn to_error(&self) -> RelayError {
        RelayError::ConnectExhausted {
            attempts: self.attempts,
            elapsed: self.elapsed,
            last: self.last.clone(),
        }
    }
}

struct Slot<Ch> {
    state: LinkState,
    channel: Option<Arc<Ch>>,
    generation: u64,
    /// Bumped whenever a connect attempt finishes, successful or not.
    attempts_finished: u64,
    /// Set when the latest finished attempt gave up.
    last_failure: Option<Exhausted>,
}

pub struct ConnectionManager<C: BrokerConnector> {
    connector: C,
    uri: String,
    display_uri: String,
    backoff: Box<dyn BackoffStrategy>,
    slot: RwLock<Slot<C::Channel>>,
    connect_lock: Mutex<()>,
}

impl<C: BrokerConnector> ConnectionManager<C> {
    /// Creates a manager in the `Disconnected` state. Nothing is dialed until
    /// [`connect`](Self::connect) or [`reconnect`](Self::reconnect) runs.
    pub fn new(connector: C, uri: impl Into<String>, backoff: Box<dyn BackoffStrategy>) -> Self {
        let uri = uri.into();
        Self {
            connector,
            display_uri: redact_uri(&uri),
            uri,
            backoff,
            slot: RwLock::new(Slot {
                state: LinkState::Disconnected,
                channel: None,
                generation: 0,
                attempts_finished: 0,
                last_failure: None,
            }),
            connect_lock: Mutex::new(()),
        }
    }

    /// The broker URI with its password masked.
    pub fn uri(&self) -> &str {
        &self.display_uri
    }

    pub async fn state(&self) -> LinkState {
        self.slot.read().await.state
    }

    /// Number of successful connects so far.
    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    /// Establishes a fresh connection/channel pair, retrying with backoff
    /// until the strategy's time budget runs out. Any existing pair is
    /// replaced.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        self.connect_locked().await
    }

    /// Restores the link after a closed-channel failure.
    ///
    /// Nothing is dialed when the link is already `Connected`, or when a
    /// connect attempt finished while this caller waited for the lock. In the
    /// latter case a failed attempt's `ConnectExhausted` is returned as is, so
    /// any number of waiters share one backoff window.
    pub async fn reconnect(&self) -> Result<()> {
        let observed = self.slot.read().await.attempts_finished;
        let _guard = self.connect_lock.lock().await;
        {
            let slot = self.slot.read().await;
            if slot.state == LinkState::Connected {
                debug!("Link already restored by a concurrent reconnect");
                return Ok(());
            }
            if slot.attempts_finished != observed {
                if let Some(failure) = &slot.last_failure {
                    debug!(
                        attempts = failure.attempts,
                        "Concurrent reconnect gave up; sharing its error"
                    );
                    return Err(failure.to_error());
                }
            }
        }
        RECONNECTS_TOTAL.inc();
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<()> {
        self.slot.write().await.state = LinkState::Connecting;
        info!(uri = %self.display_uri, "Connecting to RabbitMQ");

        let result = retry_notify(
            self.backoff.as_ref(),
            || {
                CONNECT_ATTEMPTS_TOTAL.inc();
                self.connector.connect(&self.uri)
            },
            |err, attempt, delay| {
                CONNECT_FAILURES_TOTAL.inc();
                warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    uri = %self.display_uri,
                    "Failed setting up RabbitMQ connection. Trying again..."
                );
            },
        )
        .await;

        match result {
            Ok(channel) => {
                let previous = {
                    let mut slot = self.slot.write().await;
                    slot.generation += 1;
                    slot.attempts_finished += 1;
                    slot.last_failure = None;
                    slot.state = LinkState::Connected;
                    info!(uri = %self.display_uri, generation = slot.generation, "Connected to RabbitMQ");
                    slot.channel.replace(Arc::new(channel))
                };
                if let Some(old) = previous {
                    old.close().await;
                }
                Ok(())
            }
            Err(e) => {
                CONNECT_FAILURES_TOTAL.inc();
                error!(uri = %self.display_uri, error = %e, "Giving up connecting to RabbitMQ");
                let previous = {
                    let mut slot = self.slot.write().await;
                    slot.attempts_finished += 1;
                    slot.last_failure = match &e {
                        RelayError::ConnectExhausted {
                            attempts,
                            elapsed,
                            last,
                        } => Some(Exhausted {
                            attempts: *attempts,
                            elapsed: *elapsed,
                            last: last.clone(),
                        }),
                        _ => None,
                    };
                    slot.state = LinkState::Disconnected;
                    slot.channel.take()
                };
                if let Some(old) = previous {
                    old.close().await;
                }
                Err(e)
            }
        }
    }

    /// Publishes on the current channel. A closed-channel failure marks the
    /// link `Disconnected` unless a newer pair has already replaced the one
    /// that failed.
    pub async fn publish(&self, params: &PublishParameters) -> Result<()> {
        let (channel, generation) = {
            let slot = self.slot.read().await;
            match (&slot.channel, slot.state) {
                (Some(ch), LinkState::Connected) => (Arc::clone(ch), slot.generation),
                (_, state) => {
                    return Err(RelayError::ChannelClosed(format!(
                        "no open channel (link is {})",
                        state
                    )))
                }
            }
        };

        let result = channel.publish(params).await;
        if let Err(ref e) = result {
            if e.is_channel_closed() {
                self.mark_disconnected(generation).await;
            }
        }
        result
    }

    async fn mark_disconnected(&self, failed_generation: u64) {
        let mut slot = self.slot.write().await;
        if slot.generation == failed_generation && slot.state == LinkState::Connected {
            slot.state = LinkState::Disconnected;
            debug!(generation = failed_generation, "Marked broker link disconnected");
        }
    }
}
