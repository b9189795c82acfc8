//! Event transport boundary for the rudder control plane.
//!
//! The wire protocols (Kafka, RabbitMQ) live outside this workspace; this
//! crate fixes the pub/sub contract the control plane consumes and provides
//! an in-memory transport for development and testing.

#![deny(unsafe_code)]

pub mod memory;
pub mod transport;

pub use memory::InMemoryTransport;
pub use transport::{
    ActiveSubscription, EventHandler, EventTransport, Result, TransportError, TransportKind,
};
