//! Generic entity reconciliation controller.
//!
//! The controller watches entity mutations, dispatches each one to the
//! registered per-kind handler, and periodically resyncs every kind from the
//! store. Reconciliation is level-triggered: the resync pass heals missed or
//! failed event-driven updates, and doubles as the retry mechanism for
//! entities parked in an error state.

#![deny(unsafe_code)]

pub mod controller;
pub mod handler;

pub use controller::{Controller, Options, Watcher, WatchEvent, DEFAULT_WORKERS};
pub use handler::{default_sync, default_sync_filter, EntityHandler, HandlerError, HandlerResult};
