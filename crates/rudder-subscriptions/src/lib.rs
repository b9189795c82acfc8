//! Subscription management for the rudder control plane.
//!
//! A subscription binds an event type to a target function. While active it
//! is realized as a live broker subscription whose handler synchronously
//! invokes the function runner for every delivered event (at-most-once,
//! fire-and-forget). The in-memory active-subscription table is a cache, not
//! durable state: it is rebuilt from the store at process start.

#![deny(unsafe_code)]

pub mod handler;
pub mod manager;
pub mod runner;
pub mod service;

pub use handler::SubscriptionEntityHandler;
pub use manager::{DefaultManager, Manager, ManagerError};
pub use runner::{FunctionRunner, NoopFunctionRunner, RunnerError};
pub use service::{SubscriptionService, SubscriptionServiceError};
