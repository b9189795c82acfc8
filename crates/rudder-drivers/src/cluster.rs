//! Cluster-orchestrator backend: one Deployment-style workload per driver.
//!
//! The workload runs two containers: the driver image itself and a fixed
//! transport sidecar carrying broker connection parameters, so drivers emit
//! events without embedding broker logic.

use async_trait::async_trait;
use rudder_types::{Driver, Status};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{
    backoff, build_env, driver_args, workload_name, DriverBackend, APP_LABEL_KEY, APP_LABEL_VALUE,
    DRIVER_ID_LABEL,
};
use crate::error::BackendError;
use crate::secrets::{resolve_secrets, SecretReader};

const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(10);
const DRIVER_CONTAINER: &str = "driver";
const SIDECAR_CONTAINER: &str = "driver-sidecar";
const ROUTE_PORT: u16 = 80;

/// Cluster API error type.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster api: {0}")]
    Api(String),
}

/// One container of a workload template.
#[derive(Debug, Clone)]
pub struct ContainerTemplate {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// The namespaced deployment resource the cluster client manages.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub replicas: u32,
    pub containers: Vec<ContainerTemplate>,
}

/// Observed state of a workload.
#[derive(Debug, Clone)]
pub struct WorkloadState {
    pub labels: BTreeMap<String, String>,
    pub available_replicas: u32,
}

/// An externally reachable route (service + ingress collapsed at this
/// boundary) for an exposed driver.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub host: String,
    pub path: String,
    pub port: u16,
}

/// The cluster SDK surface this backend consumes.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError>;

    async fn update_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError>;

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<WorkloadState, ClusterError>;

    /// Foreground-cascading delete.
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn create_route(&self, route: &RouteSpec) -> Result<(), ClusterError>;

    async fn delete_route(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// Cluster backend configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Namespace driver workloads are created in.
    pub namespace: String,

    /// Shared image for built-in drivers.
    pub driver_image: String,

    /// Transport sidecar image.
    pub sidecar_image: String,

    /// Transport kind the sidecar connects with (`kafka`|`rabbitmq`).
    pub transport_kind: String,

    pub rabbitmq_url: String,

    pub kafka_brokers: Vec<String>,

    pub tracer_url: String,

    /// Hostname exposed drivers are routed under.
    pub ingress_host: String,
}

/// Driver backend managing a namespaced cluster deployment per driver.
pub struct ClusterBackend {
    client: Arc<dyn ClusterClient>,
    secrets: Arc<dyn SecretReader>,
    config: ClusterConfig,
    deploy_timeout: Duration,
}

impl ClusterBackend {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        secrets: Arc<dyn SecretReader>,
        config: ClusterConfig,
    ) -> Self {
        Self {
            client,
            secrets,
            config,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }

    fn labels(&self, driver: &Driver, fullname: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL_KEY.to_string(), APP_LABEL_VALUE.to_string()),
            ("name".to_string(), fullname.to_string()),
            (DRIVER_ID_LABEL.to_string(), driver.base.id.clone()),
        ])
    }

    fn sidecar_env(&self, driver: &Driver) -> Vec<(String, String)> {
        vec![
            (
                "RUDDER_KAFKA_BROKERS".to_string(),
                self.config.kafka_brokers.join(","),
            ),
            ("RUDDER_RABBITMQ_URL".to_string(), self.config.rabbitmq_url.clone()),
            (
                "RUDDER_ORGANIZATION".to_string(),
                driver.base.organization_id.clone(),
            ),
            ("RUDDER_TRANSPORT".to_string(), self.config.transport_kind.clone()),
            ("RUDDER_TRACER".to_string(), self.config.tracer_url.clone()),
            ("RUDDER_DRIVER_TYPE".to_string(), driver.driver_type.clone()),
        ]
    }

    fn make_workload_spec(
        &self,
        driver: &Driver,
        secrets: &BTreeMap<String, String>,
    ) -> WorkloadSpec {
        let fullname = workload_name(driver);
        WorkloadSpec {
            labels: self.labels(driver, &fullname),
            namespace: self.config.namespace.clone(),
            replicas: 1,
            containers: vec![
                ContainerTemplate {
                    name: DRIVER_CONTAINER.to_string(),
                    image: driver.image.clone(),
                    args: driver_args(driver),
                    env: build_env(secrets),
                },
                ContainerTemplate {
                    name: SIDECAR_CONTAINER.to_string(),
                    image: self.config.sidecar_image.clone(),
                    args: vec![],
                    env: self.sidecar_env(driver),
                },
            ],
            name: fullname,
        }
    }

    fn route_path(driver: &Driver) -> String {
        format!("/driver/{}/{}", driver.base.organization_id, driver.base.id)
    }

    async fn await_available(&self, fullname: &str) -> Result<(), BackendError> {
        backoff(self.deploy_timeout, || async {
            let state = match self.client.get_workload(&self.config.namespace, fullname).await {
                Ok(state) => state,
                Err(ClusterError::NotFound(_)) => {
                    return Err(BackendError::DeploymentNotFound {
                        name: fullname.to_string(),
                    })
                }
                Err(err) => return Err(BackendError::Other(err.to_string())),
            };
            if state.available_replicas > 0 {
                return Ok(());
            }
            Err(BackendError::DeploymentNotAvailable {
                name: fullname.to_string(),
                detail: "no available replicas".to_string(),
            })
        })
        .await
    }
}

fn is_event_driver(labels: &BTreeMap<String, String>) -> bool {
    labels.get(APP_LABEL_KEY).map(String::as_str) == Some(APP_LABEL_VALUE)
}

#[async_trait]
impl DriverBackend for ClusterBackend {
    async fn deploy(&self, driver: &mut Driver) -> Result<(), BackendError> {
        let secrets = resolve_secrets(
            self.secrets.as_ref(),
            &driver.base.organization_id,
            &driver.secrets,
        )
        .await?;
        let spec = self.make_workload_spec(driver, &secrets);

        match self.client.create_workload(&spec).await {
            Ok(()) => {}
            // Update-safe: re-applying an existing deployment is an update.
            Err(ClusterError::AlreadyExists(_)) => {
                debug!(workload = %spec.name, "workload exists, applying update");
                self.client
                    .update_workload(&spec)
                    .await
                    .map_err(|err| BackendError::Other(err.to_string()))?;
            }
            Err(err) => return Err(BackendError::Other(err.to_string())),
        }

        self.await_available(&spec.name).await?;
        info!(driver = %driver.base.name, workload = %spec.name, "driver workload deployed");
        Ok(())
    }

    async fn update(&self, driver: &mut Driver) -> Result<(), BackendError> {
        let fullname = workload_name(driver);

        if driver.base.status == Status::Updating {
            let secrets = resolve_secrets(
                self.secrets.as_ref(),
                &driver.base.organization_id,
                &driver.secrets,
            )
            .await?;
            let spec = self.make_workload_spec(driver, &secrets);
            match self.client.update_workload(&spec).await {
                Ok(()) => {}
                Err(ClusterError::NotFound(_)) => {
                    return Err(BackendError::DeploymentNotFound { name: fullname })
                }
                Err(err) => return Err(BackendError::Other(err.to_string())),
            }
        } else {
            // Resync path: verify the workload is still live and available.
            self.await_available(&fullname).await?;
        }

        debug!(workload = %fullname, "driver workload updated");
        Ok(())
    }

    async fn delete(&self, driver: &Driver) -> Result<(), BackendError> {
        let fullname = workload_name(driver);

        if driver.expose {
            match self.client.delete_route(&self.config.namespace, &fullname).await {
                Ok(()) | Err(ClusterError::NotFound(_)) => {}
                Err(err) => return Err(BackendError::Other(err.to_string())),
            }
        }

        let state = match self.client.get_workload(&self.config.namespace, &fullname).await {
            Ok(state) => state,
            Err(ClusterError::NotFound(_)) => {
                return Err(BackendError::ObjectNotFound { name: fullname })
            }
            Err(err) => return Err(BackendError::Other(err.to_string())),
        };

        // Never delete a same-named resource this control plane does not own.
        if !is_event_driver(&state.labels) {
            return Err(BackendError::Other(format!(
                "refusing to delete non-event-driver workload {fullname:?}"
            )));
        }

        match self.client.delete_workload(&self.config.namespace, &fullname).await {
            Ok(()) => {}
            Err(ClusterError::NotFound(_)) => {
                return Err(BackendError::ObjectNotFound { name: fullname })
            }
            Err(err) => return Err(BackendError::Other(err.to_string())),
        }

        info!(driver = %driver.base.name, workload = %fullname, "driver workload deleted");
        Ok(())
    }

    async fn expose(&self, driver: &mut Driver) -> Result<(), BackendError> {
        let fullname = workload_name(driver);
        let path = Self::route_path(driver);
        let route = RouteSpec {
            labels: self.labels(driver, &fullname),
            namespace: self.config.namespace.clone(),
            host: self.config.ingress_host.clone(),
            path: path.clone(),
            port: ROUTE_PORT,
            name: fullname,
        };

        match self.client.create_route(&route).await {
            Ok(()) => {}
            Err(ClusterError::AlreadyExists(name)) => {
                warn!(route = %name, "route already exists, keeping it");
            }
            Err(err) => return Err(BackendError::Other(err.to_string())),
        }

        driver.url = Some(format!("https://{}{}", self.config.ingress_host, path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryClusterClient, StaticSecretReader};
    use rudder_types::BaseEntity;

    fn config() -> ClusterConfig {
        ClusterConfig {
            namespace: "rudder".to_string(),
            driver_image: "rudder/driver:latest".to_string(),
            sidecar_image: "rudder/sidecar:latest".to_string(),
            transport_kind: "kafka".to_string(),
            rabbitmq_url: String::new(),
            kafka_brokers: vec!["kafka-0:9092".to_string(), "kafka-1:9092".to_string()],
            tracer_url: "http://tracer:9411".to_string(),
            ingress_host: "rudder.example.com".to_string(),
        }
    }

    fn driver(expose: bool) -> Driver {
        let mut base = BaseEntity::new("org1", "d1");
        base.id = "driver-id-1".to_string();
        base.status = Status::Creating;
        Driver {
            base,
            driver_type: "vcenter".to_string(),
            config: BTreeMap::from([("vcenterurl".to_string(), "vc.example.com".to_string())]),
            secrets: vec![],
            image: "rudder/driver:latest".to_string(),
            expose,
            url: None,
        }
    }

    fn backend_with(client: Arc<InMemoryClusterClient>) -> ClusterBackend {
        ClusterBackend::new(
            client,
            Arc::new(StaticSecretReader::new(BTreeMap::new())),
            config(),
        )
    }

    #[tokio::test]
    async fn deploy_builds_two_container_workload() {
        let client = Arc::new(InMemoryClusterClient::new());
        let backend = backend_with(client.clone());
        let mut d = driver(false);

        backend.deploy(&mut d).await.unwrap();

        let spec = client
            .workload("rudder", "event-driver-vcenter-d1")
            .expect("workload created");
        assert_eq!(spec.containers.len(), 2);
        assert_eq!(spec.containers[0].name, "driver");
        assert_eq!(spec.containers[1].name, "driver-sidecar");
        assert!(spec.containers[1]
            .env
            .contains(&("RUDDER_KAFKA_BROKERS".to_string(), "kafka-0:9092,kafka-1:9092".to_string())));
        assert_eq!(spec.labels.get("app").map(String::as_str), Some("event-driver"));
    }

    #[tokio::test]
    async fn deploy_twice_applies_update_instead_of_failing() {
        let client = Arc::new(InMemoryClusterClient::new());
        let backend = backend_with(client.clone());
        let mut d = driver(false);

        backend.deploy(&mut d).await.unwrap();
        backend.deploy(&mut d).await.unwrap();

        assert_eq!(client.workload_count(), 1);
    }

    #[tokio::test]
    async fn delete_refuses_foreign_workload() {
        let client = Arc::new(InMemoryClusterClient::new());
        let backend = backend_with(client.clone());
        let d = driver(false);

        // A same-named workload that rudder does not manage.
        client
            .create_workload(&WorkloadSpec {
                name: "event-driver-vcenter-d1".to_string(),
                namespace: "rudder".to_string(),
                labels: BTreeMap::from([("app".to_string(), "something-else".to_string())]),
                replicas: 1,
                containers: vec![],
            })
            .await
            .unwrap();

        let err = backend.delete(&d).await.unwrap_err();
        assert!(matches!(err, BackendError::Other(_)));
        assert_eq!(client.workload_count(), 1);
    }

    #[tokio::test]
    async fn delete_missing_workload_is_typed_not_found() {
        let client = Arc::new(InMemoryClusterClient::new());
        let backend = backend_with(client);
        let d = driver(false);

        let err = backend.delete(&d).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn expose_records_ingress_url() {
        let client = Arc::new(InMemoryClusterClient::new());
        let backend = backend_with(client.clone());
        let mut d = driver(true);

        backend.expose(&mut d).await.unwrap();

        assert_eq!(
            d.url.as_deref(),
            Some("https://rudder.example.com/driver/org1/driver-id-1")
        );
        assert_eq!(client.route_count(), 1);

        // Re-exposing keeps the existing route.
        backend.expose(&mut d).await.unwrap();
        assert_eq!(client.route_count(), 1);
    }
}
