// src/bin/relay.rs

//! # Relay Binary
//!
//! Serves job executions for the orchestrator. Each execution carries a
//! message description (exchange, queue name, payload, content type and the
//! mandatory/immediate flags) that is published to RabbitMQ.
//!
//! 1.  **Configuration**: defaults, then `rabbit-relay.yaml` (explicit
//!     `--config` or the standard search paths), then `RABBIT_RELAY_*`
//!     environment variables, then command-line flags.
//!
//! 2.  **Startup connect**: the broker connection is established with
//!     exponential backoff bounded by `connect_timeout_secs`. If that runs
//!     out the failure is logged and the process keeps going; the next
//!     execution reconnects on demand.
//!
//! 3.  **Serving**: `POST /execute` runs one execution, `/health` always
//!     answers so the orchestrator's handshake succeeds, `/metrics` exposes
//!     Prometheus metrics.

use anyhow::Context;
use clap::Parser;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{error, info};
use RabbitRelay::config::{load_relay_config, Args};
use RabbitRelay::connection::{ConnectionManager, LapinConnector};
use RabbitRelay::executor::PublishExecutor;
use RabbitRelay::server::{run_server, AppState};
use RabbitRelay::utils::common::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let mut config = load_relay_config(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let connections = Arc::new(ConnectionManager::new(
        LapinConnector,
        config.rabbit_host.clone(),
        Box::new(config.backoff()),
    ));

    info!(
        rabbit_host = %connections.uri(),
        connect_timeout_secs = config.connect_timeout_secs,
        "Relay starting"
    );

    if let Err(e) = connections.connect().await {
        error!(error = %e, "Failed to connect to RabbitMQ at startup; will retry on first execution");
    }

    let probe_target = Arc::clone(&connections);
    let app_state = Arc::new(AppState {
        executor: Arc::new(PublishExecutor::new(Arc::clone(&connections))),
        link_probe: Arc::new(move || {
            let connections = Arc::clone(&probe_target);
            async move { connections.state().await.to_string() }.boxed()
        }),
    });

    run_server(app_state, &config.listen_addr)
        .await
        .with_context(|| format!("HTTP server on {} failed", config.listen_addr))?;

    info!("Relay stopped.");
    Ok(())
}
