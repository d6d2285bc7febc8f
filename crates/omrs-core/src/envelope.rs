//! Common header shared by every cohort event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vocabulary::{EventDirection, EventProtocolVersion};
use crate::{OmrsError, Result};

/// Identity of the cohort member that produced an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Originator {
    /// Unique id of the sending repository's metadata collection.
    pub metadata_collection_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
}

impl Originator {
    pub fn new(metadata_collection_id: impl Into<String>) -> Self {
        Self {
            metadata_collection_id: metadata_collection_id.into(),
            server_name: None,
            server_type: None,
            organization_name: None,
        }
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    pub fn with_server_type(mut self, server_type: impl Into<String>) -> Self {
        self.server_type = Some(server_type.into());
        self
    }

    pub fn with_organization_name(mut self, organization_name: impl Into<String>) -> Self {
        self.organization_name = Some(organization_name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata_collection_id.trim().is_empty() {
            return Err(OmrsError::invalid_event(
                "originator must carry a metadata collection id",
            ));
        }
        Ok(())
    }
}

/// Envelope fields common to all categories: protocol level, direction,
/// originator and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct EventHeader {
    pub protocol_version: EventProtocolVersion,
    pub direction: EventDirection,
    pub originator: Originator,
    pub timestamp: DateTime<Utc>,
}

impl EventHeader {
    /// Header for an event this member is about to send.
    pub fn outbound(originator: Originator) -> Self {
        Self {
            protocol_version: EventProtocolVersion::V1,
            direction: EventDirection::Outbound,
            originator,
            timestamp: Utc::now(),
        }
    }

    /// Header for an event received from the cohort.
    pub fn inbound(originator: Originator, timestamp: DateTime<Utc>) -> Self {
        Self {
            protocol_version: EventProtocolVersion::V1,
            direction: EventDirection::Inbound,
            originator,
            timestamp,
        }
    }

    pub fn with_protocol_version(mut self, protocol_version: EventProtocolVersion) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn metadata_collection_id(&self) -> &str {
        &self.originator.metadata_collection_id
    }
}

/// Context handed to every processor operation: the cohort the event
/// arrived on and the member that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSource {
    pub cohort_name: String,
    pub originator: Originator,
}

impl EventSource {
    pub fn new(cohort_name: impl Into<String>, originator: Originator) -> Self {
        Self {
            cohort_name: cohort_name.into(),
            originator,
        }
    }

    pub fn metadata_collection_id(&self) -> &str {
        &self.originator.metadata_collection_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_originator_builder() {
        let originator = Originator::new("mc-A")
            .with_server_name("server-a")
            .with_server_type("Metadata Repository")
            .with_organization_name("Coco");

        assert_eq!(originator.metadata_collection_id, "mc-A");
        assert_eq!(originator.server_name.as_deref(), Some("server-a"));
        assert!(originator.validate().is_ok());
        assert!(Originator::new("  ").validate().is_err());
    }

    #[test]
    fn test_originator_optional_fields_are_omitted() {
        let json = serde_json::to_value(Originator::new("mc-A")).unwrap();
        assert_eq!(json, serde_json::json!({"metadataCollectionId": "mc-A"}));
    }

    #[test]
    fn test_outbound_header() {
        let header = EventHeader::outbound(Originator::new("mc-A"));
        assert_eq!(header.direction, EventDirection::Outbound);
        assert_eq!(header.protocol_version, EventProtocolVersion::V1);
        assert_eq!(header.metadata_collection_id(), "mc-A");
    }
}
