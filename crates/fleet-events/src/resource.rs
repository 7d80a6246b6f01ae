//! Resource events
//!
//! A [`Resource`] carries only enough identity to re-fetch authoritative
//! state. Its JSON encoding (short field names, empty fields omitted) doubles
//! as the queue key.

use crate::error::EventError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceEventType {
    #[default]
    NotSet = 0,
    Create = 1,
    Update = 2,
    Delete = 3,
    UpdateStatus = 4,
}

impl ResourceEventType {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::NotSet),
            1 => Some(Self::Create),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            4 => Some(Self::UpdateStatus),
            _ => None,
        }
    }

    fn is_not_set(&self) -> bool {
        *self == Self::NotSet
    }
}

impl fmt::Display for ResourceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSet => "NotSet",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::UpdateStatus => "UpdateStatus",
        };
        f.write_str(s)
    }
}

impl Serialize for ResourceEventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for ResourceEventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown event type {}", code)))
    }
}

/// Identity of a changed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "pa", default, skip_serializing_if = "String::is_empty")]
    pub partner_id: String,

    #[serde(rename = "or", default, skip_serializing_if = "String::is_empty")]
    pub organization_id: String,

    #[serde(rename = "pr", default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,

    #[serde(rename = "id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(rename = "n", default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "t", default, skip_serializing_if = "ResourceEventType::is_not_set")]
    pub event_type: ResourceEventType,

    /// User that caused the change
    #[serde(rename = "un", default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Account that caused the change
    #[serde(rename = "acc", default, skip_serializing_if = "String::is_empty")]
    pub account: String,
}

impl Resource {
    /// Queue key of the event.
    pub fn key(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a key produced by [`Resource::key`].
    pub fn from_key(key: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(key)?)
    }

    /// Copy of the event with a different event type.
    pub fn with_event_type(&self, event_type: ResourceEventType) -> Self {
        Self {
            event_type,
            ..self.clone()
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}) {}",
            self.project_id, self.name, self.id, self.event_type
        )
    }
}

/// Receives resource change events.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Called for every change; must not block on reconciliation.
    async fn on_change(&self, resource: Resource);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_omits_empty_fields() {
        let resource = Resource {
            project_id: "p1".to_string(),
            id: "c-1".to_string(),
            event_type: ResourceEventType::Delete,
            ..Default::default()
        };
        assert_eq!(resource.key().unwrap(), r#"{"pr":"p1","id":"c-1","t":3}"#);
    }

    #[test]
    fn test_key_decodes_back() {
        let resource = Resource {
            partner_id: "pa".to_string(),
            organization_id: "org".to_string(),
            project_id: "p1".to_string(),
            name: "edge-1".to_string(),
            event_type: ResourceEventType::UpdateStatus,
            username: "admin".to_string(),
            ..Default::default()
        };
        let decoded = Resource::from_key(&resource.key().unwrap()).unwrap();
        assert_eq!(decoded, resource);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        assert!(Resource::from_key(r#"{"t":9}"#).is_err());
    }
}
