//! Persisted entity model
//!
//! Every record the control plane reconciles shares [`BaseEntity`] and the
//! status lifecycle. Entities move through the store and the reconciliation
//! queue inside the [`StoredEntity`] envelope, so dispatch is a plain match on
//! the kind tag rather than downcasting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Filterable metadata as key/value pairs.
pub type Tags = BTreeMap<String, String>;

/// Lifecycle status of a persisted entity.
///
/// `Initialized -> Creating -> Ready`; `Ready -> Updating -> Ready`; any state
/// may enter `Deleting` (hard removal follows backend teardown) or `Error`
/// (retried on the next resync). `Missing` marks an entity whose external
/// resource disappeared; the resync path treats it like `Creating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Initialized,
    Creating,
    Ready,
    Updating,
    Deleting,
    Error,
    Missing,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Initialized => "INITIALIZED",
            Status::Creating => "CREATING",
            Status::Ready => "READY",
            Status::Updating => "UPDATING",
            Status::Deleting => "DELETING",
            Status::Error => "ERROR",
            Status::Missing => "MISSING",
        };
        f.write_str(s)
    }
}

/// Entity kinds understood by the controller and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Driver,
    DriverType,
    Subscription,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Driver => "driver",
            EntityKind::DriverType => "drivertype",
            EntityKind::Subscription => "subscription",
        };
        f.write_str(s)
    }
}

/// Fields shared by every persisted entity.
///
/// `revision` implements optimistic concurrency: a write must carry the
/// revision it read, and a stale revision is rejected by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEntity {
    /// Opaque unique identifier, assigned by the store at creation.
    #[serde(default)]
    pub id: String,

    /// Human key, unique within organization + kind.
    pub name: String,

    /// Tenant scope.
    pub organization_id: String,

    #[serde(default = "Utc::now")]
    pub created_time: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_time: DateTime<Utc>,

    #[serde(default)]
    pub revision: u64,

    pub status: Status,

    /// Human-readable diagnostics, appended per failed reconciliation attempt.
    #[serde(default)]
    pub reason: Vec<String>,

    #[serde(default)]
    pub tags: Tags,

    /// Deletion marker; the controller routes flagged entities to the delete
    /// path regardless of status.
    #[serde(default)]
    pub delete: bool,
}

impl BaseEntity {
    /// New entity shell scoped to one organization. The store assigns the id
    /// and revision when the entity is added.
    pub fn new(organization_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            organization_id: organization_id.into(),
            created_time: now,
            modified_time: now,
            revision: 0,
            status: Status::Initialized,
            reason: Vec::new(),
            tags: Tags::new(),
            delete: false,
        }
    }
}

/// An event driver instance (e.g. a vCenter poller pointed at one endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    #[serde(flatten)]
    pub base: BaseEntity,

    /// Built-in or custom driver kind, resolved against [`DriverType`] records.
    #[serde(rename = "type")]
    pub driver_type: String,

    /// User-supplied key/value settings, passed to the workload as CLI args.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Secret-store reference names, resolved at deploy time. Plaintext values
    /// are never persisted on the entity.
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Container image; inherited from the driver type unless custom.
    #[serde(default)]
    pub image: String,

    /// Whether the workload receives an externally reachable ingress.
    #[serde(default)]
    pub expose: bool,

    /// Populated after expose provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A class of drivers (e.g. timer-driver): image plus default config template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverType {
    #[serde(flatten)]
    pub base: BaseEntity,

    pub image: String,

    #[serde(default)]
    pub built_in: bool,

    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// A binding from an event type to a target function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(flatten)]
    pub base: BaseEntity,

    /// Dot-delimited event type; doubles as the broker topic while active.
    pub event_type: String,

    #[serde(default)]
    pub source_type: String,

    /// Target function name. Resolved by name only at invocation time.
    pub function: String,

    /// Secret names injected into the function invocation context.
    #[serde(default)]
    pub secrets: Vec<String>,
}

/// Tagged envelope moving any entity kind through the store and the
/// reconciliation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredEntity {
    Driver(Driver),
    DriverType(DriverType),
    Subscription(Subscription),
}

impl StoredEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            StoredEntity::Driver(_) => EntityKind::Driver,
            StoredEntity::DriverType(_) => EntityKind::DriverType,
            StoredEntity::Subscription(_) => EntityKind::Subscription,
        }
    }

    pub fn base(&self) -> &BaseEntity {
        match self {
            StoredEntity::Driver(d) => &d.base,
            StoredEntity::DriverType(t) => &t.base,
            StoredEntity::Subscription(s) => &s.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseEntity {
        match self {
            StoredEntity::Driver(d) => &mut d.base,
            StoredEntity::DriverType(t) => &mut t.base,
            StoredEntity::Subscription(s) => &mut s.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn status(&self) -> Status {
        self.base().status
    }
}

impl From<Driver> for StoredEntity {
    fn from(d: Driver) -> Self {
        StoredEntity::Driver(d)
    }
}

impl From<DriverType> for StoredEntity {
    fn from(t: DriverType) -> Self {
        StoredEntity::DriverType(t)
    }
}

impl From<Subscription> for StoredEntity {
    fn from(s: Subscription) -> Self {
        StoredEntity::Subscription(s)
    }
}

/// An envelope carried a different kind than the receiver expected.
#[derive(Debug, Clone, thiserror::Error)]
#[error("expected a {expected} entity, got a {actual}")]
pub struct KindMismatch {
    pub expected: EntityKind,
    pub actual: EntityKind,
}

impl TryFrom<StoredEntity> for Driver {
    type Error = KindMismatch;

    fn try_from(entity: StoredEntity) -> Result<Self, KindMismatch> {
        match entity {
            StoredEntity::Driver(d) => Ok(d),
            other => Err(KindMismatch {
                expected: EntityKind::Driver,
                actual: other.kind(),
            }),
        }
    }
}

impl TryFrom<StoredEntity> for DriverType {
    type Error = KindMismatch;

    fn try_from(entity: StoredEntity) -> Result<Self, KindMismatch> {
        match entity {
            StoredEntity::DriverType(t) => Ok(t),
            other => Err(KindMismatch {
                expected: EntityKind::DriverType,
                actual: other.kind(),
            }),
        }
    }
}

impl TryFrom<StoredEntity> for Subscription {
    type Error = KindMismatch;

    fn try_from(entity: StoredEntity) -> Result<Self, KindMismatch> {
        match entity {
            StoredEntity::Subscription(s) => Ok(s),
            other => Err(KindMismatch {
                expected: EntityKind::Subscription,
                actual: other.kind(),
            }),
        }
    }
}
