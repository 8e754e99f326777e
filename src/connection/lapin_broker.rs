// src/connection/lapin_broker.rs

use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions, protocol::basic::AMQPProperties, Channel, Connection,
    ConnectionProperties,
};
use tracing::debug;

use super::{redact_uri, BrokerChannel, BrokerConnector};
use crate::data_model::PublishParameters;
use crate::error::{classify_publish_error, RelayError, Result};

/// Connects to RabbitMQ with lapin on the tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct LapinConnector;

/// The connection is kept next to its channel so both go away together.
pub struct LapinChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    type Channel = LapinChannel;

    async fn connect(&self, uri: &str) -> Result<LapinChannel> {
        let options = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        // The error text ends up in job output, so it never carries credentials.
        let connection = Connection::connect(uri, options).await.map_err(|e| {
            RelayError::Connect(format!("failed connecting to {}: {}", redact_uri(uri), e))
        })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| RelayError::Connect(format!("failed to open channel: {}", e)))?;

        Ok(LapinChannel {
            connection,
            channel,
        })
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn publish(&self, params: &PublishParameters) -> Result<()> {
        let properties =
            AMQPProperties::default().with_content_type(params.content_type.clone().into());

        // Broker acknowledgements are not tracked; the confirm is dropped.
        let _confirm = self
            .channel
            .basic_publish(
                &params.exchange,
                &params.routing_key,
                BasicPublishOptions {
                    mandatory: params.mandatory,
                    immediate: params.immediate,
                },
                &params.payload,
                properties,
            )
            .await
            .map_err(classify_publish_error)?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.connection.close(200, "replaced by new connection").await {
            debug!(error = %e, "Closing replaced broker connection failed");
        }
    }
}
