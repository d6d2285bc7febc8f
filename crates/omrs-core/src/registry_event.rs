//! Registry events: members joining, refreshing and leaving the cohort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::RegistryConflict;
use crate::envelope::{EventHeader, Originator};
use crate::vocabulary::{EventCategory, RegistryErrorCode, RegistryEventType, WireDescriptor};
use crate::{OmrsError, Result};

/// How other members reach this member's repository.
///
/// Opaque to the event layer; only the connector that consumes it
/// interprets the properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConnection {
    pub connector_provider: String,
    pub endpoint_address: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub configuration_properties: serde_json::Map<String, serde_json::Value>,
}

impl RemoteConnection {
    pub fn new(connector_provider: impl Into<String>, endpoint_address: impl Into<String>) -> Self {
        Self {
            connector_provider: connector_provider.into(),
            endpoint_address: endpoint_address.into(),
            configuration_properties: serde_json::Map::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration_properties.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.connector_provider.trim().is_empty() || self.endpoint_address.trim().is_empty() {
            return Err(OmrsError::invalid_event(
                "remote connection needs a connector provider and an endpoint address",
            ));
        }
        Ok(())
    }
}

/// Registration details a member publishes about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRegistration {
    pub registration_time: DateTime<Utc>,
    pub metadata_collection_name: Option<String>,
    pub remote_connection: Option<RemoteConnection>,
}

impl MemberRegistration {
    pub fn new(registration_time: DateTime<Utc>) -> Self {
        Self {
            registration_time,
            metadata_collection_name: None,
            remote_connection: None,
        }
    }

    pub fn with_metadata_collection_name(mut self, name: impl Into<String>) -> Self {
        self.metadata_collection_name = Some(name.into());
        self
    }

    pub fn with_remote_connection(mut self, connection: RemoteConnection) -> Self {
        self.remote_connection = Some(connection);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEventKind {
    Registration {
        registration: MemberRegistration,
    },
    RefreshRegistrationRequest,
    ReRegistration {
        registration: MemberRegistration,
    },
    UnRegistration {
        metadata_collection_name: Option<String>,
    },
    RegistryError {
        conflict: RegistryConflict,
    },
    Unknown {
        event_type: WireDescriptor,
    },
}

impl RegistryEventKind {
    pub fn event_type(&self) -> RegistryEventType {
        match self {
            RegistryEventKind::Registration { .. } => RegistryEventType::Registration,
            RegistryEventKind::RefreshRegistrationRequest => {
                RegistryEventType::RefreshRegistrationRequest
            }
            RegistryEventKind::ReRegistration { .. } => RegistryEventType::ReRegistration,
            RegistryEventKind::UnRegistration { .. } => RegistryEventType::UnRegistration,
            RegistryEventKind::RegistryError { .. } => RegistryEventType::RegistryError,
            RegistryEventKind::Unknown { .. } => RegistryEventType::UnknownRegistryEvent,
        }
    }

    pub fn registration(&self) -> Option<&MemberRegistration> {
        match self {
            RegistryEventKind::Registration { registration }
            | RegistryEventKind::ReRegistration { registration } => Some(registration),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            RegistryEventKind::Registration { registration }
            | RegistryEventKind::ReRegistration { registration } => {
                match &registration.remote_connection {
                    Some(connection) => connection.validate(),
                    None => Ok(()),
                }
            }
            RegistryEventKind::RegistryError { conflict } => conflict.validate(),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEvent {
    header: EventHeader,
    kind: RegistryEventKind,
}

impl RegistryEvent {
    pub fn new(header: EventHeader, kind: RegistryEventKind) -> Result<Self> {
        header.originator.validate()?;
        kind.validate()?;
        Ok(Self { header, kind })
    }

    pub fn outbound(originator: Originator, kind: RegistryEventKind) -> Result<Self> {
        Self::new(EventHeader::outbound(originator), kind)
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::Registry
    }

    pub fn event_type(&self) -> RegistryEventType {
        self.kind.event_type()
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn originator(&self) -> &Originator {
        &self.header.originator
    }

    pub fn kind(&self) -> &RegistryEventKind {
        &self.kind
    }

    pub fn error_code(&self) -> RegistryErrorCode {
        match &self.kind {
            RegistryEventKind::RegistryError { conflict } => conflict.error_code(),
            _ => RegistryErrorCode::NotInUse,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, RegistryEventKind::Unknown { .. })
    }
}
