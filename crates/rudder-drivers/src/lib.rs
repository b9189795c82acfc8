//! Event driver management for the rudder control plane.
//!
//! A driver is a deployed workload producing events from an external source.
//! This crate owns the backend abstraction that deploys/updates/deletes those
//! workloads (container engine or cluster orchestrator), the built-in driver
//! catalog and its config validation, the entity handlers the reconciliation
//! controller dispatches to, and the service facade the API layer calls.

#![deny(unsafe_code)]

pub mod backend;
pub mod builtin;
pub mod cluster;
pub mod container;
pub mod error;
pub mod handler;
pub mod memory;
pub mod secrets;
pub mod service;

pub use backend::DriverBackend;
pub use cluster::{ClusterBackend, ClusterClient, ClusterConfig, ClusterError, RouteSpec, WorkloadSpec, WorkloadState};
pub use container::{ContainerBackend, ContainerEngine, ContainerSpec, EngineError};
pub use error::BackendError;
pub use handler::{DriverEntityHandler, DriverTypeEntityHandler};
pub use memory::{InMemoryClusterClient, InMemoryContainerEngine, StaticSecretReader};
pub use secrets::{resolve_secrets, SecretError, SecretReader};
pub use service::{DriverService, DriverServiceConfig, DriverTypeService, ServiceError};
