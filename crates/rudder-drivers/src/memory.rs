//! In-memory implementations of the backend boundary traits.
//!
//! Suitable for development and testing. Production deployments back
//! [`ContainerEngine`]/[`ClusterClient`]/[`SecretReader`] with the real SDKs.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::cluster::{ClusterClient, ClusterError, RouteSpec, WorkloadSpec, WorkloadState};
use crate::container::{ContainerEngine, ContainerSpec, EngineError};
use crate::secrets::{SecretError, SecretReader};

const FIRST_HOST_PORT: u16 = 49000;

struct ContainerRecord {
    spec: ContainerSpec,
    running: bool,
    host_port: Option<u16>,
}

/// In-memory container engine tracking created containers by id.
pub struct InMemoryContainerEngine {
    containers: DashMap<String, ContainerRecord>,
    next_port: AtomicU16,
}

impl InMemoryContainerEngine {
    pub fn new() -> Self {
        Self {
            containers: DashMap::new(),
            next_port: AtomicU16::new(FIRST_HOST_PORT),
        }
    }

    /// Specs of every tracked container, for assertions.
    pub fn containers(&self) -> Vec<ContainerSpec> {
        self.containers.iter().map(|c| c.spec.clone()).collect()
    }
}

impl Default for InMemoryContainerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for InMemoryContainerEngine {
    async fn pull_image(&self, _image: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let id = uuid::Uuid::new_v4().to_string();
        let host_port = spec
            .expose_port
            .map(|_| self.next_port.fetch_add(1, Ordering::SeqCst));
        self.containers.insert(
            id.clone(),
            ContainerRecord {
                spec: spec.clone(),
                running: false,
                host_port,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut record = self
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        record.running = true;
        Ok(())
    }

    async fn host_port(&self, id: &str, _container_port: u16) -> Result<u16, EngineError> {
        let record = self
            .containers
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        record
            .host_port
            .ok_or_else(|| EngineError::Other(format!("container {id} has no published port")))
    }

    async fn find_by_label(&self, key: &str, value: &str) -> Result<Vec<String>, EngineError> {
        Ok(self
            .containers
            .iter()
            .filter(|c| c.spec.labels.get(key).map(String::as_str) == Some(value))
            .map(|c| c.key().clone())
            .collect())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        self.containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}

/// In-memory cluster client: workloads become available as soon as they are
/// created.
pub struct InMemoryClusterClient {
    workloads: DashMap<(String, String), WorkloadSpec>,
    routes: DashMap<(String, String), RouteSpec>,
}

impl InMemoryClusterClient {
    pub fn new() -> Self {
        Self {
            workloads: DashMap::new(),
            routes: DashMap::new(),
        }
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadSpec> {
        self.workloads
            .get(&(namespace.to_string(), name.to_string()))
            .map(|w| w.clone())
    }

    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl Default for InMemoryClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for InMemoryClusterClient {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        let key = (spec.namespace.clone(), spec.name.clone());
        if self.workloads.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(spec.name.clone()));
        }
        self.workloads.insert(key, spec.clone());
        Ok(())
    }

    async fn update_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        let key = (spec.namespace.clone(), spec.name.clone());
        if !self.workloads.contains_key(&key) {
            return Err(ClusterError::NotFound(spec.name.clone()));
        }
        self.workloads.insert(key, spec.clone());
        Ok(())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<WorkloadState, ClusterError> {
        let spec = self
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;
        Ok(WorkloadState {
            labels: spec.labels.clone(),
            available_replicas: spec.replicas,
        })
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.workloads
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }

    async fn create_route(&self, route: &RouteSpec) -> Result<(), ClusterError> {
        let key = (route.namespace.clone(), route.name.clone());
        if self.routes.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(route.name.clone()));
        }
        self.routes.insert(key, route.clone());
        Ok(())
    }

    async fn delete_route(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.routes
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }
}

/// Secret reader backed by a fixed map of secret payloads.
pub struct StaticSecretReader {
    secrets: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticSecretReader {
    pub fn new(secrets: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl SecretReader for StaticSecretReader {
    async fn get_secret(
        &self,
        _organization_id: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, SecretError> {
        self.secrets.get(name).cloned().ok_or_else(|| SecretError {
            name: name.to_string(),
            message: "not found in secret store".to_string(),
        })
    }
}
