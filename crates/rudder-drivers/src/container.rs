//! Container-engine backend: one container per driver.

use async_trait::async_trait;
use rudder_types::{Driver, Status};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{
    backoff, build_env, driver_args, workload_name, DriverBackend, APP_LABEL_KEY, APP_LABEL_VALUE,
    DRIVER_ID_LABEL,
};
use crate::error::BackendError;
use crate::secrets::{resolve_secrets, SecretReader};

const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(10);
const EXPOSED_CONTAINER_PORT: u16 = 80;

/// Container create request handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` environment entries.
    pub env: Vec<(String, String)>,
    pub args: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Container port to publish on a free host port.
    pub expose_port: Option<u16>,
}

/// Container engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// The container-engine SDK surface this backend consumes.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Creates the container and returns its id; the container is not
    /// running yet.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Host port a published container port landed on.
    async fn host_port(&self, id: &str, container_port: u16) -> Result<u16, EngineError>;

    /// Ids of containers carrying the label, running or not.
    async fn find_by_label(&self, key: &str, value: &str) -> Result<Vec<String>, EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;
}

/// Driver backend deploying each driver as a single engine container.
pub struct ContainerBackend {
    engine: Arc<dyn ContainerEngine>,
    secrets: Arc<dyn SecretReader>,
    deploy_timeout: Duration,
}

impl ContainerBackend {
    pub fn new(engine: Arc<dyn ContainerEngine>, secrets: Arc<dyn SecretReader>) -> Self {
        Self {
            engine,
            secrets,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }

    fn make_spec(&self, driver: &Driver, secrets: &BTreeMap<String, String>) -> ContainerSpec {
        ContainerSpec {
            name: workload_name(driver),
            image: driver.image.clone(),
            env: build_env(secrets),
            args: driver_args(driver),
            labels: BTreeMap::from([
                (APP_LABEL_KEY.to_string(), APP_LABEL_VALUE.to_string()),
                (DRIVER_ID_LABEL.to_string(), driver.base.id.clone()),
            ]),
            expose_port: driver.expose.then_some(EXPOSED_CONTAINER_PORT),
        }
    }

    async fn managed_containers(&self, driver: &Driver) -> Result<Vec<String>, BackendError> {
        self.engine
            .find_by_label(DRIVER_ID_LABEL, &driver.base.id)
            .await
            .map_err(|err| BackendError::Other(err.to_string()))
    }
}

#[async_trait]
impl DriverBackend for ContainerBackend {
    async fn deploy(&self, driver: &mut Driver) -> Result<(), BackendError> {
        // Re-running deploy for an already-materialized driver must not
        // create a second container.
        if !self.managed_containers(driver).await?.is_empty() {
            debug!(driver = %driver.base.name, "container already deployed");
            return Ok(());
        }

        let secrets = resolve_secrets(
            self.secrets.as_ref(),
            &driver.base.organization_id,
            &driver.secrets,
        )
        .await?;

        self.engine
            .pull_image(&driver.image)
            .await
            .map_err(|err| BackendError::Other(format!("pulling image {}: {err}", driver.image)))?;

        let spec = self.make_spec(driver, &secrets);
        let id = backoff(self.deploy_timeout, || async {
            let id = self
                .engine
                .create_container(&spec)
                .await
                .map_err(|err| BackendError::Other(format!("creating container: {err}")))?;
            self.engine
                .start_container(&id)
                .await
                .map_err(|err| BackendError::Other(format!("starting container: {err}")))?;
            Ok(id)
        })
        .await?;

        if driver.expose {
            let port = self
                .engine
                .host_port(&id, EXPOSED_CONTAINER_PORT)
                .await
                .map_err(|err| BackendError::Other(format!("resolving host port: {err}")))?;
            driver.url = Some(format!("http://127.0.0.1:{port}"));
        }

        info!(driver = %driver.base.name, container = %id, "driver container started");
        Ok(())
    }

    async fn update(&self, driver: &mut Driver) -> Result<(), BackendError> {
        // Engine containers are immutable: replace rather than mutate.
        if driver.base.status == Status::Updating {
            self.delete(driver).await?;
            self.deploy(driver).await?;
            info!(driver = %driver.base.name, "driver container replaced");
        }
        Ok(())
    }

    async fn delete(&self, driver: &Driver) -> Result<(), BackendError> {
        let containers = self.managed_containers(driver).await?;
        if containers.is_empty() {
            return Err(BackendError::ObjectNotFound {
                name: workload_name(driver),
            });
        }
        for id in containers {
            self.engine
                .remove_container(&id, true)
                .await
                .map_err(|err| BackendError::Other(format!("removing container {id}: {err}")))?;
        }
        info!(driver = %driver.base.name, "driver container removed");
        Ok(())
    }

    async fn expose(&self, _driver: &mut Driver) -> Result<(), BackendError> {
        // Port publishing happens at deploy time; nothing to provision here.
        Ok(())
    }
}
