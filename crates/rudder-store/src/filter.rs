//! List filters: field predicates and tag matching.

use chrono::{DateTime, Utc};
use rudder_types::{Status, StoredEntity};

use crate::error::{Result, StoreError};

/// A single list predicate.
#[derive(Debug, Clone)]
pub enum FilterCond {
    /// Entity status is one of the given set.
    StatusIn(Vec<Status>),
    /// Entity was last modified strictly before the instant.
    ModifiedBefore(DateTime<Utc>),
    NameEquals(String),
    /// Entity carries the tag key with exactly this value.
    TagEquals { key: String, value: String },
}

impl FilterCond {
    fn matches(&self, entity: &StoredEntity) -> bool {
        let base = entity.base();
        match self {
            FilterCond::StatusIn(statuses) => statuses.contains(&base.status),
            FilterCond::ModifiedBefore(instant) => base.modified_time < *instant,
            FilterCond::NameEquals(name) => &base.name == name,
            FilterCond::TagEquals { key, value } => {
                base.tags.get(key).map(|v| v == value).unwrap_or(false)
            }
        }
    }
}

/// Conjunction of predicates applied to list results. An empty filter matches
/// everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conds: Vec<FilterCond>,
}

impl Filter {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn add(mut self, cond: FilterCond) -> Self {
        self.conds.push(cond);
        self
    }

    /// Parses `key=value` tag selectors the way list endpoints accept them.
    pub fn with_tags(mut self, tags: &[String]) -> Result<Self> {
        for tag in tags {
            let (key, value) = tag
                .split_once('=')
                .ok_or_else(|| StoreError::Backend(format!("invalid tag selector {tag:?}")))?;
            self.conds.push(FilterCond::TagEquals {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(self)
    }

    pub fn matches(&self, entity: &StoredEntity) -> bool {
        self.conds.iter().all(|c| c.matches(entity))
    }
}
