//! Service facade for subscription records.

use rudder_controller::Watcher;
use rudder_store::{EntityStore, Filter, StoreError};
use rudder_types::{validate, EntityKind, Status, StoredEntity, Subscription};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

/// Service error taxonomy, mapped onto API status codes at the boundary.
#[derive(Debug, Error)]
pub enum SubscriptionServiceError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SubscriptionServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            SubscriptionServiceError::Validation(_) => 400,
            SubscriptionServiceError::AlreadyExists(_) => 409,
            SubscriptionServiceError::NotFound(_) => 404,
            SubscriptionServiceError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for SubscriptionServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists { .. } => {
                SubscriptionServiceError::AlreadyExists(err.to_string())
            }
            StoreError::NotFound { .. } => SubscriptionServiceError::NotFound(err.to_string()),
            StoreError::InvalidName(violation) => {
                SubscriptionServiceError::Validation(violation.to_string())
            }
            other => SubscriptionServiceError::Internal(other.to_string()),
        }
    }
}

/// Validates and persists subscription records, and fast-paths them into the
/// reconciliation queue. Activation itself is the entity handler's job.
pub struct SubscriptionService {
    store: Arc<dyn EntityStore>,
    watcher: Watcher,
    organization_id: String,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        watcher: Watcher,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            watcher,
            organization_id: organization_id.into(),
        }
    }

    fn validate(subscription: &Subscription) -> Result<(), SubscriptionServiceError> {
        let checks = [
            validate::entity_name(&subscription.base.name),
            validate::event_type(&subscription.event_type),
            validate::source_type(&subscription.source_type),
            validate::function_name(&subscription.function),
        ];
        for check in checks {
            check.map_err(|v| SubscriptionServiceError::Validation(v.to_string()))?;
        }
        Ok(())
    }

    #[instrument(skip(self, subscription), fields(subscription = %subscription.base.name))]
    pub async fn create(
        &self,
        mut subscription: Subscription,
    ) -> Result<Subscription, SubscriptionServiceError> {
        Self::validate(&subscription)?;

        subscription.base.organization_id = self.organization_id.clone();
        subscription.base.status = Status::Creating;

        let mut entity = StoredEntity::from(subscription);
        self.store.add(&mut entity).await?;
        self.watcher.on_action(entity.clone());

        info!(subscription = %entity.name(), "subscription accepted for creation");
        Subscription::try_from(entity).map_err(|err| SubscriptionServiceError::Internal(err.to_string()))
    }

    pub async fn get(&self, name: &str) -> Result<Subscription, SubscriptionServiceError> {
        let entity = self
            .store
            .get(&self.organization_id, EntityKind::Subscription, name)
            .await?
            .ok_or_else(|| SubscriptionServiceError::NotFound(format!("subscription {name}")))?;
        Subscription::try_from(entity)
            .map_err(|err| SubscriptionServiceError::Internal(err.to_string()))
    }

    pub async fn list(&self, tags: &[String]) -> Result<Vec<Subscription>, SubscriptionServiceError> {
        let filter = Filter::everything()
            .with_tags(tags)
            .map_err(|err| SubscriptionServiceError::Validation(err.to_string()))?;
        let entities = self
            .store
            .list(&self.organization_id, EntityKind::Subscription, &filter)
            .await?;
        Ok(entities
            .into_iter()
            .filter_map(|e| Subscription::try_from(e).ok())
            .collect())
    }

    /// Marks the subscription for deletion and notifies the watcher; the
    /// entity handler unsubscribes and hard-deletes.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<Subscription, SubscriptionServiceError> {
        let mut subscription = self.get(name).await?;
        subscription.base.status = Status::Deleting;
        subscription.base.delete = true;

        let revision = subscription.base.revision;
        let mut entity = StoredEntity::from(subscription);
        self.store.update(revision, &mut entity).await?;
        self.watcher.on_action(entity.clone());

        info!(subscription = %entity.name(), "subscription marked for deletion");
        Subscription::try_from(entity)
            .map_err(|err| SubscriptionServiceError::Internal(err.to_string()))
    }

    /// Persisted subscriptions that should be live, for cold-start
    /// rehydration of the manager.
    pub async fn list_active(&self) -> Result<Vec<Subscription>, SubscriptionServiceError> {
        let subscriptions = self.list(&[]).await?;
        Ok(subscriptions
            .into_iter()
            .filter(|s| !s.base.delete && s.base.status != Status::Deleting)
            .collect())
    }
}
