//! Secret store boundary.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Read-side client of the secret store.
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Key/value payload of one named secret within an organization.
    async fn get_secret(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, SecretError>;
}

#[derive(Debug, Clone, Error)]
#[error("secret {name:?}: {message}")]
pub struct SecretError {
    pub name: String,
    pub message: String,
}

/// Resolves every named secret and merges the payloads into one map. Later
/// names win on key collisions. Values never land on the entity.
pub async fn resolve_secrets(
    reader: &dyn SecretReader,
    organization_id: &str,
    names: &[String],
) -> Result<BTreeMap<String, String>, SecretError> {
    let mut merged = BTreeMap::new();
    for name in names {
        let payload = reader.get_secret(organization_id, name).await?;
        merged.extend(payload);
    }
    Ok(merged)
}
