//! Service facades for driver and driver-type records.
//!
//! The REST layer above is generated elsewhere; these facades own everything
//! directly above the store: payload validation, image resolution, built-in
//! config checks, conflict mapping, and the watcher fast path. Nothing is
//! persisted when validation fails.

use rudder_controller::Watcher;
use rudder_store::{EntityStore, Filter, StoreError};
use rudder_types::{validate, BaseEntity, Driver, DriverType, EntityKind, Status, StoredEntity};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::builtin;
use crate::secrets::{resolve_secrets, SecretReader};

/// Service error taxonomy, mapped onto API status codes at the boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// HTTP status the API layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::AlreadyExists(_) => 409,
            ServiceError::NotFound(_) => 404,
            ServiceError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists { .. } => ServiceError::AlreadyExists(err.to_string()),
            StoreError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StoreError::InvalidName(violation) => ServiceError::Validation(violation.to_string()),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// Driver facade configuration.
#[derive(Debug, Clone)]
pub struct DriverServiceConfig {
    /// Organization this process serves.
    pub organization_id: String,

    /// Shared image built-in drivers run.
    pub driver_image: String,
}

/// Validates and persists driver records, and fast-paths them into the
/// reconciliation queue.
pub struct DriverService {
    store: Arc<dyn EntityStore>,
    secrets: Arc<dyn SecretReader>,
    watcher: Watcher,
    config: DriverServiceConfig,
}

impl DriverService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        secrets: Arc<dyn SecretReader>,
        watcher: Watcher,
        config: DriverServiceConfig,
    ) -> Self {
        Self {
            store,
            secrets,
            watcher,
            config,
        }
    }

    /// Validates the payload, resolves the image, checks built-in required
    /// config, and persists the driver in `Creating` state. Nothing is left
    /// behind on a validation failure.
    #[instrument(skip(self, driver), fields(driver = %driver.base.name))]
    pub async fn create(&self, mut driver: Driver) -> Result<Driver, ServiceError> {
        validate::entity_name(&driver.base.name)
            .map_err(|v| ServiceError::Validation(v.to_string()))?;
        driver.base.organization_id = self.config.organization_id.clone();

        if builtin::is_built_in(&driver.driver_type) {
            driver.image = self.config.driver_image.clone();
        } else {
            let entity = self
                .store
                .get(
                    &self.config.organization_id,
                    EntityKind::DriverType,
                    &driver.driver_type,
                )
                .await?;
            match entity {
                Some(entity) => {
                    let driver_type = DriverType::try_from(entity)
                        .map_err(|err| ServiceError::Internal(err.to_string()))?;
                    driver.image = driver_type.image;
                }
                None => {
                    return Err(ServiceError::Validation(format!(
                        "specified driver type {} does not exist",
                        driver.driver_type
                    )))
                }
            }
        }

        let secrets = resolve_secrets(
            self.secrets.as_ref(),
            &self.config.organization_id,
            &driver.secrets,
        )
        .await
        .map_err(|err| ServiceError::Validation(err.to_string()))?;
        builtin::validate_config(&driver, &secrets)
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        driver.base.status = Status::Creating;
        let mut entity = StoredEntity::from(driver);
        self.store.add(&mut entity).await?;
        self.watcher.on_action(entity.clone());

        info!(driver = %entity.name(), "driver accepted for creation");
        Driver::try_from(entity).map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn get(&self, name: &str) -> Result<Driver, ServiceError> {
        let entity = self
            .store
            .get(&self.config.organization_id, EntityKind::Driver, name)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("driver {name}")))?;
        Driver::try_from(entity).map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Lists drivers, optionally narrowed by `key=value` tag selectors.
    pub async fn list(&self, tags: &[String]) -> Result<Vec<Driver>, ServiceError> {
        let filter = Filter::everything()
            .with_tags(tags)
            .map_err(|err| ServiceError::Validation(err.to_string()))?;
        let entities = self
            .store
            .list(&self.config.organization_id, EntityKind::Driver, &filter)
            .await?;
        Ok(entities
            .into_iter()
            .filter_map(|e| Driver::try_from(e).ok())
            .collect())
    }

    /// Marks the driver for deletion and notifies the watcher; the entity
    /// handler performs backend teardown and the hard delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<Driver, ServiceError> {
        let mut driver = self.get(name).await?;
        driver.base.status = Status::Deleting;
        driver.base.delete = true;

        let revision = driver.base.revision;
        let mut entity = StoredEntity::from(driver);
        self.store.update(revision, &mut entity).await?;
        self.watcher.on_action(entity.clone());

        info!(driver = %entity.name(), "driver marked for deletion");
        Driver::try_from(entity).map_err(|err| ServiceError::Internal(err.to_string()))
    }
}

/// Validates and persists driver-type records. Built-in types are hard-coded
/// and synthesized into reads rather than stored.
pub struct DriverTypeService {
    store: Arc<dyn EntityStore>,
    organization_id: String,
    driver_image: String,
}

impl DriverTypeService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        organization_id: impl Into<String>,
        driver_image: impl Into<String>,
    ) -> Self {
        Self {
            store,
            organization_id: organization_id.into(),
            driver_image: driver_image.into(),
        }
    }

    fn synthesize_built_in(&self, name: &str) -> DriverType {
        let mut base = BaseEntity::new(&self.organization_id, name);
        base.status = Status::Ready;
        DriverType {
            base,
            image: self.driver_image.clone(),
            built_in: true,
            config: Default::default(),
        }
    }

    #[instrument(skip(self, driver_type), fields(driver_type = %driver_type.base.name))]
    pub async fn create(&self, mut driver_type: DriverType) -> Result<DriverType, ServiceError> {
        validate::entity_name(&driver_type.base.name)
            .map_err(|v| ServiceError::Validation(v.to_string()))?;
        if builtin::is_built_in(&driver_type.base.name) {
            return Err(ServiceError::Validation(format!(
                "built-in event driver type {} already exists",
                driver_type.base.name
            )));
        }

        driver_type.base.organization_id = self.organization_id.clone();
        driver_type.built_in = false;
        driver_type.base.status = Status::Ready;

        let mut entity = StoredEntity::from(driver_type);
        self.store.add(&mut entity).await?;
        DriverType::try_from(entity).map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn get(&self, name: &str) -> Result<DriverType, ServiceError> {
        if builtin::is_built_in(name) {
            return Ok(self.synthesize_built_in(name));
        }
        let entity = self
            .store
            .get(&self.organization_id, EntityKind::DriverType, name)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("driver type {name}")))?;
        DriverType::try_from(entity).map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Lists stored driver types plus the synthesized built-ins.
    pub async fn list(&self, tags: &[String]) -> Result<Vec<DriverType>, ServiceError> {
        let filter = Filter::everything()
            .with_tags(tags)
            .map_err(|err| ServiceError::Validation(err.to_string()))?;
        let entities = self
            .store
            .list(&self.organization_id, EntityKind::DriverType, &filter)
            .await?;
        let mut types: Vec<DriverType> = entities
            .into_iter()
            .filter_map(|e| DriverType::try_from(e).ok())
            .collect();
        for name in builtin::built_in_names() {
            types.push(self.synthesize_built_in(name));
        }
        Ok(types)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<DriverType, ServiceError> {
        if builtin::is_built_in(name) {
            return Err(ServiceError::Validation(format!(
                "cannot delete built-in event driver type {name}"
            )));
        }
        let driver_type = self.get(name).await?;

        // Types own no external resource, so a plain store delete suffices.
        if let Err(err) = self
            .store
            .delete(&self.organization_id, EntityKind::DriverType, name)
            .await
        {
            warn!(driver_type = %name, error = %err, "store error deleting driver type");
            return Err(err.into());
        }
        Ok(driver_type)
    }
}
