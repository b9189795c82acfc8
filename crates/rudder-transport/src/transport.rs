//! The `EventTransport` trait and its companion types.

use async_trait::async_trait;
use futures::future::BoxFuture;
use rudder_types::CloudEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Handler invoked for every event delivered on a subscription. The broker
/// client serializes invocations within one subscription; handlers across
/// subscriptions may run concurrently.
pub type EventHandler = Arc<dyn Fn(CloudEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Transport error type.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to subscribe to topic {topic:?}: {message}")]
    Subscribe { topic: String, message: String },

    #[error("unable to publish to topic {topic:?}: {message}")]
    Publish { topic: String, message: String },

    /// The transport connection is gone.
    #[error("transport connection: {0}")]
    Connection(String),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Which broker implementation backs the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Kafka,
    RabbitMq,
    /// In-process transport for development and testing.
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Kafka => "kafka",
            TransportKind::RabbitMq => "rabbitmq",
            TransportKind::Memory => "memory",
        };
        f.write_str(s)
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_lowercase().as_str() {
            "kafka" => Ok(TransportKind::Kafka),
            "rabbitmq" => Ok(TransportKind::RabbitMq),
            "memory" => Ok(TransportKind::Memory),
            other => Err(format!("unknown transport kind {other:?}")),
        }
    }
}

/// A live broker subscription. Dropping the handle does not tear the
/// subscription down; call [`unsubscribe`](ActiveSubscription::unsubscribe).
pub trait ActiveSubscription: Send + Sync {
    fn topic(&self) -> &str;

    fn organization_id(&self) -> &str;

    /// Stops delivery and releases the broker resources. Idempotent.
    fn unsubscribe(&self);
}

/// Pub/sub abstraction over the message broker, scoped per organization.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn publish(
        &self,
        event: &CloudEvent,
        topic: &str,
        organization_id: &str,
    ) -> Result<()>;

    /// Opens a subscription; `handler` runs for every delivered event.
    async fn subscribe(
        &self,
        topic: &str,
        organization_id: &str,
        handler: EventHandler,
    ) -> Result<Box<dyn ActiveSubscription>>;

    /// Releases the broker connection.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_parses_case_insensitively() {
        assert_eq!("Kafka".parse::<TransportKind>().unwrap(), TransportKind::Kafka);
        assert_eq!(
            "rabbitmq".parse::<TransportKind>().unwrap(),
            TransportKind::RabbitMq
        );
        assert!("zeromq".parse::<TransportKind>().is_err());
    }
}
