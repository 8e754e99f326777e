use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::connection::{BrokerConnector, ConnectionManager};
use crate::data_model::{ExecutionRequest, ExecutionResponse, PublishParameters};
use crate::error::Result;
use crate::utils::prometheus_metrics::*;

/// Runs one job execution for the orchestrator. Implementations never panic
/// on failure; errors come back inside the response.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResponse;
}

/// Publishes each request's message, recovering once from a closed channel.
pub struct PublishExecutor<C: BrokerConnector> {
    connections: Arc<ConnectionManager<C>>,
}

impl<C: BrokerConnector> PublishExecutor<C> {
    pub fn new(connections: Arc<ConnectionManager<C>>) -> Self {
        PublishExecutor { connections }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager<C>> {
        &self.connections
    }

    async fn publish(&self, params: &PublishParameters) -> Result<()> {
        PUBLISH_ATTEMPTS_TOTAL.inc();
        let result = self.connections.publish(params).await;
        if matches!(result, Err(ref e) if e.is_channel_closed()) {
            CLOSED_CHANNEL_ERRORS_TOTAL.inc();
        }
        result
    }

    async fn publish_with_recover(&self, job_name: &str, params: &PublishParameters) -> Result<()> {
        match self.publish(params).await {
            Err(e) if e.is_channel_closed() => {
                warn!(job = %job_name, error = %e, "Got closed error while trying to publish, trying to reconnect");
                if let Err(reconnect_err) = self.connections.reconnect().await {
                    error!(job = %job_name, error = %reconnect_err, "Failed to reconnect");
                    return Err(reconnect_err);
                }
                // Only retry. Whatever this returns is final.
                self.publish(params).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl<C: BrokerConnector> Executor for PublishExecutor<C> {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResponse {
        EXECUTIONS_TOTAL.inc();
        let timer = EXECUTION_DURATION_SECONDS.start_timer();

        let (params, warnings) = PublishParameters::from_config(&request.config);
        for warning in &warnings {
            FLAG_PARSE_WARNINGS_TOTAL.inc();
            warn!(job = %request.job_name, key = warning.key, value = %warning.value, "Flag has invalid value, using false");
        }
        info!(
            job = %request.job_name,
            queue = %params.routing_key,
            exchange = %params.exchange,
            "Will publish to queue"
        );

        let result = self.publish_with_recover(&request.job_name, &params).await;
        timer.observe_duration();

        match result {
            Ok(()) => {
                debug!(job = %request.job_name, "Published message");
                ExecutionResponse::ok()
            }
            Err(e) => {
                EXECUTION_FAILURES_TOTAL.inc();
                error!(job = %request.job_name, error = %e, "Execution failed");
                ExecutionResponse::failed(e)
            }
        }
    }
}
