//! Backend error taxonomy for driver workloads.

use thiserror::Error;

use crate::secrets::SecretError;

/// A backend call failed. The stable [`reason`](BackendError::reason) token
/// is recorded first on the entity, followed by the full message, so operators
/// and the error-state hook can pattern-match without parsing prose.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The workload should exist but the backend has no record of it.
    #[error("workload for driver {name:?} not found")]
    DeploymentNotFound { name: String },

    /// The workload exists but has no available replicas yet.
    #[error("workload for driver {name:?} not available: {detail}")]
    DeploymentNotAvailable { name: String, detail: String },

    #[error("workload for driver {name:?} already exists")]
    DeploymentAlreadyExists { name: String },

    /// The object addressed by a delete/update no longer exists. Distinct
    /// from `DeploymentNotFound` so callers can treat repeat deletes as
    /// already satisfied.
    #[error("object {name:?} not found on the backend")]
    ObjectNotFound { name: String },

    #[error(transparent)]
    Secrets(#[from] SecretError),

    #[error("backend: {0}")]
    Other(String),
}

impl BackendError {
    /// Stable reason token recorded on the entity.
    pub fn reason(&self) -> &'static str {
        match self {
            BackendError::DeploymentNotFound { .. } => "DeploymentNotFound",
            BackendError::DeploymentNotAvailable { .. } => "DeploymentNotAvailable",
            BackendError::DeploymentAlreadyExists { .. } => "DeploymentAlreadyExists",
            BackendError::ObjectNotFound { .. } => "ObjectNotFound",
            BackendError::Secrets(_) => "SecretResolution",
            BackendError::Other(_) => "Unknown",
        }
    }

    /// Whether a delete may treat the resource as already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::ObjectNotFound { .. })
    }
}
