//! The subscription manager: a live, lock-guarded pool of active broker
//! subscriptions keyed by entity id.

use async_trait::async_trait;
use rudder_transport::{ActiveSubscription, EventHandler, EventTransport, TransportError};
use rudder_types::{CloudEvent, FunctionRun, Status, Subscription};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::runner::FunctionRunner;

/// Manager error type.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("unable to create a subscription for event {event_type} and function {function}: {source}")]
    Subscribe {
        event_type: String,
        function: String,
        #[source]
        source: TransportError,
    },
}

/// Subscription lifecycle operations.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Bulk create at process start: rehydrates live subscriptions from the
    /// persisted entities. Individual failures are logged and skipped.
    async fn run(&self, subscriptions: &[Subscription]) -> Result<(), ManagerError>;

    async fn create(&self, subscription: &Subscription) -> Result<(), ManagerError>;

    async fn update(&self, subscription: &Subscription) -> Result<(), ManagerError>;

    async fn delete(&self, subscription: &Subscription) -> Result<(), ManagerError>;
}

/// Default manager: mutex-guarded map from entity id to the live broker
/// subscription handle. Lifecycle mutations take the exclusive lock; event
/// delivery into established subscriptions never contends it.
pub struct DefaultManager {
    transport: Arc<dyn EventTransport>,
    runner: Arc<dyn FunctionRunner>,
    active: RwLock<HashMap<String, Box<dyn ActiveSubscription>>>,
}

impl DefaultManager {
    pub fn new(transport: Arc<dyn EventTransport>, runner: Arc<dyn FunctionRunner>) -> Self {
        Self {
            transport,
            runner,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live subscriptions, for tests and diagnostics.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Unsubscribes everything; the process is going down.
    pub async fn shutdown(&self) {
        info!("subscription manager shutting down");
        let mut active = self.active.write().await;
        for (_, subscription) in active.drain() {
            subscription.unsubscribe();
        }
    }

    /// Per-subscription handler closure bound to the target function and its
    /// secrets. Runs once per delivered event.
    fn event_handler(&self, subscription: &Subscription) -> EventHandler {
        let runner = self.runner.clone();
        let organization_id = subscription.base.organization_id.clone();
        let function = subscription.function.clone();
        let secrets = subscription.secrets.clone();

        Arc::new(move |event: CloudEvent| {
            let runner = runner.clone();
            let organization_id = organization_id.clone();
            let function = function.clone();
            let secrets = secrets.clone();
            Box::pin(async move {
                run_function(runner.as_ref(), &organization_id, &function, secrets, event).await;
            })
        })
    }
}

#[async_trait]
impl Manager for DefaultManager {
    async fn run(&self, subscriptions: &[Subscription]) -> Result<(), ManagerError> {
        debug!(count = subscriptions.len(), "rehydrating subscriptions");
        for subscription in subscriptions {
            if let Err(err) = self.create(subscription).await {
                error!(
                    subscription = %subscription.base.name,
                    error = %err,
                    "unable to rehydrate subscription"
                );
            }
        }
        Ok(())
    }

    async fn create(&self, subscription: &Subscription) -> Result<(), ManagerError> {
        let mut active = self.active.write().await;

        // Defensive idempotency: a live subscription for this id is torn down
        // before the replacement opens.
        if let Some(existing) = active.remove(&subscription.base.id) {
            debug!(
                event_type = %subscription.event_type,
                function = %subscription.function,
                "subscription already existed, unsubscribing"
            );
            existing.unsubscribe();
        }

        let handler = self.event_handler(subscription);
        let live = self
            .transport
            .subscribe(
                &subscription.event_type,
                &subscription.base.organization_id,
                handler,
            )
            .await
            .map_err(|err| {
                let wrapped = ManagerError::Subscribe {
                    event_type: subscription.event_type.clone(),
                    function: subscription.function.clone(),
                    source: err,
                };
                error!(error = %wrapped, "subscribe failed");
                wrapped
            })?;

        active.insert(subscription.base.id.clone(), live);
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), ManagerError> {
        {
            let active = self.active.read().await;
            // No-op guard: a live subscription for an already-READY entity
            // means there is nothing to re-establish.
            if active.contains_key(&subscription.base.id)
                && subscription.base.status == Status::Ready
            {
                debug!(
                    subscription = %subscription.base.name,
                    "subscription already active and ready, skipping resubscribe"
                );
                return Ok(());
            }
        }
        self.create(subscription).await
    }

    async fn delete(&self, subscription: &Subscription) -> Result<(), ManagerError> {
        let mut active = self.active.write().await;
        if let Some(live) = active.remove(&subscription.base.id) {
            live.unsubscribe();
        }
        // A missing entry is not an error: repeated or out-of-order deletes
        // are safe.
        debug!(
            topic = %subscription.event_type,
            subscription = %subscription.base.name,
            revision = subscription.base.revision,
            "subscription deleted"
        );
        Ok(())
    }
}

/// Invokes the function runner for one delivered event. Errors are logged and
/// the event is considered consumed either way: event delivery to functions
/// is at-most-once.
async fn run_function(
    runner: &dyn FunctionRunner,
    organization_id: &str,
    function: &str,
    secrets: Vec<String>,
    event: CloudEvent,
) {
    let input = process_event_data(&event);

    let run = FunctionRun {
        blocking: false,
        function_name: function.to_string(),
        input,
        event: Some(event.attributes_only()),
        secrets,
        output: Value::Null,
    };

    match runner.run_function(organization_id, run).await {
        Ok(result) => {
            debug!(function = %result.function_name, "function returned");
        }
        Err(err) => {
            error!(
                function = %function,
                event_type = %event.event_type,
                error = %err,
                "unable to run function"
            );
        }
    }
}

/// JSON payloads are parsed into a value; every other content type passes
/// through as the raw string.
fn process_event_data(event: &CloudEvent) -> Value {
    match event.content_type.as_deref() {
        Some("application/json") => match serde_json::from_str(&event.data) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "unable to parse event payload, passing raw data");
                Value::String(event.data.clone())
            }
        },
        _ => Value::String(event.data.clone()),
    }
}
