//! Entity handler wiring subscription records to the manager.

use async_trait::async_trait;
use rudder_controller::{default_sync, EntityHandler, HandlerResult};
use rudder_store::EntityStore;
use rudder_types::{EntityKind, Status, StoredEntity, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::manager::Manager;

/// Reconciles `Subscription` entities against the live broker pool.
pub struct SubscriptionEntityHandler {
    store: Arc<dyn EntityStore>,
    manager: Arc<dyn Manager>,
}

impl SubscriptionEntityHandler {
    pub fn new(store: Arc<dyn EntityStore>, manager: Arc<dyn Manager>) -> Self {
        Self { store, manager }
    }
}

#[async_trait]
impl EntityHandler for SubscriptionEntityHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Subscription
    }

    async fn add(&self, entity: StoredEntity) -> HandlerResult {
        let mut subscription = Subscription::try_from(entity)?;

        match self.manager.create(&subscription).await {
            Ok(()) => {
                subscription.base.status = Status::Ready;
                let name = subscription.base.name.clone();
                let event_type = subscription.event_type.clone();
                let mut entity = StoredEntity::from(subscription);
                self.store.update_with_error(&mut entity, None).await;
                info!(
                    subscription = %name,
                    event_type = %event_type,
                    "subscription activated"
                );
                Ok(())
            }
            Err(err) => {
                let message = format!("error activating subscription: {err}");
                let mut entity = StoredEntity::from(subscription);
                self.store.update_with_error(&mut entity, Some(&message)).await;
                Err(message.into())
            }
        }
    }

    async fn update(&self, entity: StoredEntity) -> HandlerResult {
        let mut subscription = Subscription::try_from(entity)?;

        match self.manager.update(&subscription).await {
            Ok(()) => {
                subscription.base.status = Status::Ready;
                let mut entity = StoredEntity::from(subscription);
                self.store.update_with_error(&mut entity, None).await;
                Ok(())
            }
            Err(err) => {
                let message = format!("error updating subscription: {err}");
                let mut entity = StoredEntity::from(subscription);
                self.store.update_with_error(&mut entity, Some(&message)).await;
                Err(message.into())
            }
        }
    }

    async fn delete(&self, entity: StoredEntity) -> HandlerResult {
        let subscription = Subscription::try_from(entity)?;

        // Unsubscribe from the broker before touching the record; if this
        // fails the record stays and the next resync retries.
        self.manager
            .delete(&subscription)
            .await
            .map_err(|err| format!("error deactivating subscription: {err}"))?;

        self.store
            .delete(
                &subscription.base.organization_id,
                EntityKind::Subscription,
                &subscription.base.name,
            )
            .await?;
        info!(
            subscription = %subscription.base.name,
            "subscription deactivated and deleted from the entity store"
        );
        Ok(())
    }

    async fn sync(
        &self,
        organization_id: &str,
        resync_period: Duration,
    ) -> HandlerResult<Vec<StoredEntity>> {
        default_sync(
            &self.store,
            EntityKind::Subscription,
            organization_id,
            resync_period,
            None,
        )
        .await
    }

    async fn on_error(&self, entity: StoredEntity) -> HandlerResult {
        error!(
            subscription = %entity.name(),
            reasons = ?entity.base().reason,
            "subscription in error state"
        );
        Ok(())
    }
}
