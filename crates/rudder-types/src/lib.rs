//! Rudder Types - Core types for the event control plane
//!
//! Rudder is the control plane of an event-driven serverless platform. It
//! turns declarative driver and subscription records into running workloads
//! and live broker subscriptions, and routes incoming events to function
//! invocations.
//!
//! ## Key Concepts
//!
//! - **Driver**: a deployed workload producing events from an external source
//! - **DriverType**: a template describing the image and default config for a
//!   class of drivers
//! - **Subscription**: a binding from an event type to a target function,
//!   realized as a live broker subscription while active
//! - **StoredEntity**: the tagged envelope moving any entity kind through the
//!   store and the reconciliation queue

#![deny(unsafe_code)]

pub mod entity;
pub mod event;
pub mod run;
pub mod validate;

// Re-export main types
pub use entity::{
    BaseEntity, Driver, DriverType, EntityKind, KindMismatch, Status, StoredEntity, Subscription,
    Tags,
};
pub use event::{CloudEvent, CLOUD_EVENTS_VERSION};
pub use run::FunctionRun;
pub use validate::FieldViolation;
