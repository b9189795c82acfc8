//! CloudEvents 0.1 event shape used on the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CloudEvents specification version carried by every event.
pub const CLOUD_EVENTS_VERSION: &str = "0.1";

const DEFAULT_SOURCE: &str = "rudder";

/// An event as carried by the transport, following the CloudEvents 0.1 spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEvent {
    /// Mandatory, e.g. "user.created".
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type_version: Option<String>,

    pub cloud_events_version: String,

    /// Producer identity, e.g. "vcenter1.corp.local".
    pub source: String,

    /// Unique per source.
    pub event_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,

    /// Mime type of `data`, e.g. "application/json".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,

    /// Raw event payload.
    #[serde(default)]
    pub data: String,
}

impl CloudEvent {
    /// New event with reasonable defaults for all mandatory attributes,
    /// requiring only the event type.
    pub fn with_defaults(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_type_version: None,
            cloud_events_version: CLOUD_EVENTS_VERSION.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            event_id: uuid::Uuid::new_v4().to_string(),
            event_time: Some(Utc::now()),
            schema_url: None,
            content_type: None,
            extensions: BTreeMap::new(),
            data: String::new(),
        }
    }

    /// Copy of the event with the payload cleared, for attaching metadata to
    /// a function invocation without duplicating the body.
    pub fn attributes_only(&self) -> CloudEvent {
        let mut copy = self.clone();
        copy.data = String::new();
        copy
    }

    /// Default topic representation for messaging purposes.
    pub fn default_topic(&self) -> &str {
        &self.event_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_mandatory_attributes() {
        let event = CloudEvent::with_defaults("test.topic");
        assert_eq!(event.cloud_events_version, CLOUD_EVENTS_VERSION);
        assert_eq!(event.source, "rudder");
        assert!(!event.event_id.is_empty());
        assert_eq!(event.default_topic(), "test.topic");
    }

    #[test]
    fn attributes_only_drops_payload() {
        let mut event = CloudEvent::with_defaults("test.topic");
        event.data = "{\"a\":1}".to_string();

        let attrs = event.attributes_only();
        assert!(attrs.data.is_empty());
        assert_eq!(attrs.event_id, event.event_id);
    }
}
