//! Logical wire envelope and its JSON reference encoding.
//!
//! Decoding never fails on values this member does not recognize: an
//! unknown category or protocol level yields [`CohortEvent::Unknown`] and an
//! unknown event type yields the category's `Unknown` kind. Only bytes that
//! are not an envelope at all, or envelopes missing a payload the event type
//! requires, produce an error.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::conflict::{ConflictBlock, InstanceConflict, RegistryConflict, TypeDefConflict};
use crate::envelope::{EventHeader, Originator};
use crate::instance_event::{
    ClassificationTarget, InstanceEvent, InstanceEventKind, PurgeTarget, RefreshRequest,
};
use crate::model::{
    AttributeTypeDef, Classification, EntityDetail, EntityProxy, InstanceGraph,
    InstanceIdentifiers, Relationship, TypeDef, TypeDefPatch, TypeDefSummary,
};
use crate::registry_event::{MemberRegistration, RegistryEvent, RegistryEventKind, RemoteConnection};
use crate::typedef_event::{TypeDefEvent, TypeDefEventKind};
use crate::vocabulary::{
    EventCategory, EventProtocolVersion, EventVocabulary, InstanceEventType, RegistryEventType,
    TypeDefEventType, WireDescriptor,
};
use crate::{OmrsError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    pub protocol_version: WireDescriptor,
    pub category: WireDescriptor,
    pub direction: WireDescriptor,
    pub originator: Originator,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_section: Option<RegistrySection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_def_section: Option<TypeDefSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_section: Option<InstanceSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySection {
    pub event_type: WireDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_collection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_connection: Option<RemoteConnection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefSection {
    pub event_type: WireDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_def: Option<TypeDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_type_def: Option<AttributeTypeDef>,
    #[serde(
        rename = "typeDefGUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub type_def_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_def_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_def_patch: Option<TypeDefPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type_def_summary: Option<TypeDefSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_attribute_type_def: Option<AttributeTypeDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSection {
    pub event_type: WireDescriptor,
    #[serde(
        rename = "typeDefGUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub type_def_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_def_name: Option<String>,
    #[serde(
        rename = "instanceGUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub instance_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_entity: Option<EntityDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_proxy: Option<EntityProxy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_relationship: Option<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_batch: Option<InstanceGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_metadata_collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_home_metadata_collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type_def_summary: Option<TypeDefSummary>,
    #[serde(
        rename = "originalInstanceGUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_instance_guid: Option<String>,
}

/// An event whose category or protocol level this member cannot handle.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEvent {
    pub header: EventHeader,
    pub category: WireDescriptor,
    pub reason: String,
}

/// A decoded event of any category.
#[derive(Debug, Clone, PartialEq)]
pub enum CohortEvent {
    Registry(RegistryEvent),
    TypeDef(TypeDefEvent),
    Instance(InstanceEvent),
    Unknown(UnknownEvent),
}

impl CohortEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            CohortEvent::Registry(_) => EventCategory::Registry,
            CohortEvent::TypeDef(_) => EventCategory::TypeDef,
            CohortEvent::Instance(_) => EventCategory::Instance,
            CohortEvent::Unknown(event) => event.category.resolve(),
        }
    }

    pub fn header(&self) -> &EventHeader {
        match self {
            CohortEvent::Registry(event) => event.header(),
            CohortEvent::TypeDef(event) => event.header(),
            CohortEvent::Instance(event) => event.header(),
            CohortEvent::Unknown(event) => &event.header,
        }
    }

    pub fn originator(&self) -> &Originator {
        &self.header().originator
    }

    /// True when nothing in this member can act on the event.
    pub fn is_unknown(&self) -> bool {
        match self {
            CohortEvent::Registry(event) => event.is_unknown(),
            CohortEvent::TypeDef(event) => event.is_unknown(),
            CohortEvent::Instance(event) => event.is_unknown(),
            CohortEvent::Unknown(_) => true,
        }
    }

    /// Short name of the event type, for logs and metric labels.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            CohortEvent::Registry(event) => event.event_type().name(),
            CohortEvent::TypeDef(event) => event.event_type().name(),
            CohortEvent::Instance(event) => event.event_type().name(),
            CohortEvent::Unknown(_) => EventCategory::Unknown.name(),
        }
    }
}

impl From<InstanceEvent> for CohortEvent {
    fn from(event: InstanceEvent) -> Self {
        CohortEvent::Instance(event)
    }
}

impl From<TypeDefEvent> for CohortEvent {
    fn from(event: TypeDefEvent) -> Self {
        CohortEvent::TypeDef(event)
    }
}

impl From<RegistryEvent> for CohortEvent {
    fn from(event: RegistryEvent) -> Self {
        CohortEvent::Registry(event)
    }
}

fn need<T>(value: Option<T>, field: &str, event_type: impl fmt::Display) -> Result<T> {
    value.ok_or_else(|| OmrsError::DecodeError(format!("{} is missing {}", event_type, field)))
}

/// Fail on the first payload the transition does not carry.
fn reject_unused(
    present: &[&'static str],
    used: &[&str],
    event_type: impl fmt::Display,
) -> Result<()> {
    match present.iter().find(|field| !used.contains(*field)) {
        Some(field) => Err(OmrsError::DecodeError(format!(
            "{} does not carry {}",
            event_type, field
        ))),
        None => Ok(()),
    }
}

fn present_fields<const N: usize>(fields: [(&'static str, bool); N]) -> Vec<&'static str> {
    fields
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(field, _)| field)
        .collect()
}

impl WireEnvelope {
    fn for_header(header: &EventHeader, category: EventCategory) -> Self {
        Self {
            protocol_version: header.protocol_version.to_wire(),
            category: category.to_wire(),
            direction: header.direction.to_wire(),
            originator: header.originator.clone(),
            timestamp: header.timestamp,
            registry_section: None,
            type_def_section: None,
            instance_section: None,
            conflict: None,
        }
    }

    pub fn from_instance_event(event: &InstanceEvent) -> Self {
        let mut envelope = Self::for_header(event.header(), EventCategory::Instance);
        envelope.instance_section = Some(InstanceSection::from_event(event));
        envelope.conflict = event.conflict().map(InstanceConflict::to_block);
        envelope
    }

    pub fn from_type_def_event(event: &TypeDefEvent) -> Self {
        let mut envelope = Self::for_header(event.header(), EventCategory::TypeDef);
        envelope.type_def_section = Some(TypeDefSection::from_event(event));
        envelope.conflict = event.conflict().map(TypeDefConflict::to_block);
        envelope
    }

    pub fn from_registry_event(event: &RegistryEvent) -> Self {
        let mut envelope = Self::for_header(event.header(), EventCategory::Registry);
        envelope.registry_section = Some(RegistrySection::from_event(event));
        if let RegistryEventKind::RegistryError { conflict } = event.kind() {
            envelope.conflict = Some(conflict.to_block());
        }
        envelope
    }

    pub fn from_event(event: &CohortEvent) -> Result<Self> {
        match event {
            CohortEvent::Instance(event) => Ok(Self::from_instance_event(event)),
            CohortEvent::TypeDef(event) => Ok(Self::from_type_def_event(event)),
            CohortEvent::Registry(event) => Ok(Self::from_registry_event(event)),
            CohortEvent::Unknown(event) => Err(OmrsError::invalid_event(format!(
                "cannot encode an unrecognized event of category {}",
                event.category
            ))),
        }
    }

    /// Build the typed event. Unknown categories and protocol levels come
    /// back as [`CohortEvent::Unknown`].
    pub fn into_event(self) -> Result<CohortEvent> {
        let protocol_version: EventProtocolVersion = self.protocol_version.resolve();
        let header = EventHeader {
            protocol_version,
            direction: self.direction.resolve(),
            originator: self.originator,
            timestamp: self.timestamp,
        };

        if protocol_version.is_unknown() {
            return Ok(CohortEvent::Unknown(UnknownEvent {
                header,
                category: self.category,
                reason: format!("unsupported protocol version {}", self.protocol_version),
            }));
        }

        let sections = present_fields([
            ("registrySection", self.registry_section.is_some()),
            ("typeDefSection", self.type_def_section.is_some()),
            ("instanceSection", self.instance_section.is_some()),
        ]);
        if sections.len() > 1 {
            return Err(OmrsError::DecodeError(format!(
                "envelope carries more than one section: {}",
                sections.join(", ")
            )));
        }

        let conflict = self.conflict.filter(ConflictBlock::is_in_use);
        let category: EventCategory = self.category.resolve();
        match category {
            EventCategory::Instance => {
                let section = need(self.instance_section, "instanceSection", category)?;
                let kind = section.into_kind(conflict.as_ref())?;
                Ok(CohortEvent::Instance(InstanceEvent::new(header, kind)?))
            }
            EventCategory::TypeDef => {
                let section = need(self.type_def_section, "typeDefSection", category)?;
                let kind = section.into_kind(conflict.as_ref())?;
                Ok(CohortEvent::TypeDef(TypeDefEvent::new(header, kind)?))
            }
            EventCategory::Registry => {
                let section = need(self.registry_section, "registrySection", category)?;
                let kind = section.into_kind(conflict.as_ref())?;
                Ok(CohortEvent::Registry(RegistryEvent::new(header, kind)?))
            }
            EventCategory::Generic | EventCategory::Unknown => {
                Ok(CohortEvent::Unknown(UnknownEvent {
                    header,
                    reason: format!("no processor handles category {}", self.category),
                    category: self.category,
                }))
            }
        }
    }
}

// =============================================================================
// Instance section
// =============================================================================

impl InstanceSection {
    fn new(event_type: WireDescriptor) -> Self {
        Self {
            event_type,
            type_def_guid: None,
            type_def_name: None,
            instance_guid: None,
            original_entity: None,
            entity: None,
            entity_proxy: None,
            original_relationship: None,
            relationship: None,
            original_classification: None,
            classification: None,
            instance_batch: None,
            home_metadata_collection_id: None,
            original_home_metadata_collection_id: None,
            original_type_def_summary: None,
            original_instance_guid: None,
        }
    }

    fn payloads(&self) -> Vec<&'static str> {
        present_fields([
            ("entity", self.entity.is_some()),
            ("entityProxy", self.entity_proxy.is_some()),
            ("originalEntity", self.original_entity.is_some()),
            ("relationship", self.relationship.is_some()),
            ("originalRelationship", self.original_relationship.is_some()),
            ("classification", self.classification.is_some()),
            ("originalClassification", self.original_classification.is_some()),
            ("instanceBatch", self.instance_batch.is_some()),
        ])
    }

    fn set_target(&mut self, target: &ClassificationTarget) {
        match target {
            ClassificationTarget::Entity(entity) => self.entity = Some(entity.clone()),
            ClassificationTarget::Proxy(proxy) => self.entity_proxy = Some(proxy.clone()),
        }
    }

    pub fn from_event(event: &InstanceEvent) -> Self {
        use InstanceEventKind as K;

        let kind = event.kind();
        let event_type = match kind {
            K::Unknown { event_type } => event_type.clone(),
            other => other.event_type().to_wire(),
        };
        let mut section = Self::new(event_type);
        if let Some(ids) = kind.identifiers() {
            section.type_def_guid = Some(ids.type_def_guid);
            section.type_def_name = Some(ids.type_def_name);
            section.instance_guid = Some(ids.instance_guid);
        }
        section.home_metadata_collection_id = kind.home_metadata_collection_id().map(String::from);

        match kind {
            K::NewEntity { entity }
            | K::UndoneEntity { entity }
            | K::DeletedEntity { entity }
            | K::DeletePurgedEntity { entity }
            | K::RestoredEntity { entity }
            | K::RefreshedEntity { entity } => section.entity = Some(entity.clone()),
            K::UpdatedEntity {
                original_entity,
                entity,
            } => {
                section.original_entity = Some(original_entity.clone());
                section.entity = Some(entity.clone());
            }
            K::ClassifiedEntity {
                target,
                classification,
            } => {
                section.set_target(target);
                section.classification = Some(classification.clone());
            }
            K::DeclassifiedEntity {
                target,
                original_classification,
            } => {
                section.set_target(target);
                section.original_classification = Some(original_classification.clone());
            }
            K::ReclassifiedEntity {
                target,
                original_classification,
                classification,
            } => {
                section.set_target(target);
                section.original_classification = Some(original_classification.clone());
                section.classification = Some(classification.clone());
            }
            K::PurgedEntity { purged } => {
                if let PurgeTarget::Instance(entity) = purged {
                    section.entity = Some(entity.clone());
                }
            }
            K::ReIdentifiedEntity {
                original_instance_guid,
                entity,
            } => {
                section.original_instance_guid = Some(original_instance_guid.clone());
                section.entity = Some(entity.clone());
            }
            K::ReTypedEntity {
                original_type_def_summary,
                entity,
            } => {
                section.original_type_def_summary = Some(original_type_def_summary.clone());
                section.entity = Some(entity.clone());
            }
            K::ReHomedEntity {
                original_home_metadata_collection_id,
                entity,
            } => {
                section.original_home_metadata_collection_id =
                    Some(original_home_metadata_collection_id.clone());
                section.entity = Some(entity.clone());
            }

            K::NewRelationship { relationship }
            | K::UndoneRelationship { relationship }
            | K::DeletedRelationship { relationship }
            | K::DeletePurgedRelationship { relationship }
            | K::RestoredRelationship { relationship }
            | K::RefreshedRelationship { relationship } => {
                section.relationship = Some(relationship.clone())
            }
            K::UpdatedRelationship {
                original_relationship,
                relationship,
            } => {
                section.original_relationship = Some(original_relationship.clone());
                section.relationship = Some(relationship.clone());
            }
            K::PurgedRelationship { purged } => {
                if let PurgeTarget::Instance(relationship) = purged {
                    section.relationship = Some(relationship.clone());
                }
            }
            K::ReIdentifiedRelationship {
                original_instance_guid,
                relationship,
            } => {
                section.original_instance_guid = Some(original_instance_guid.clone());
                section.relationship = Some(relationship.clone());
            }
            K::ReTypedRelationship {
                original_type_def_summary,
                relationship,
            } => {
                section.original_type_def_summary = Some(original_type_def_summary.clone());
                section.relationship = Some(relationship.clone());
            }
            K::ReHomedRelationship {
                original_home_metadata_collection_id,
                relationship,
            } => {
                section.original_home_metadata_collection_id =
                    Some(original_home_metadata_collection_id.clone());
                section.relationship = Some(relationship.clone());
            }

            K::BatchInstances { batch } => section.instance_batch = Some(batch.clone()),
            K::RefreshEntityRequest { .. }
            | K::RefreshRelationshipRequest { .. }
            | K::InstanceError { .. }
            | K::Unknown { .. } => {}
        }
        section
    }

    pub fn into_kind(self, conflict: Option<&ConflictBlock>) -> Result<InstanceEventKind> {
        use InstanceEventKind as K;
        use InstanceEventType as T;

        let t: InstanceEventType = self.event_type.resolve();
        if t != T::UnknownInstanceEvent {
            reject_unused(&self.payloads(), instance_payloads(t), t)?;
        }
        let s = self;

        let kind = match t {
            T::NewEntity => K::NewEntity {
                entity: need(s.entity, "entity", t)?,
            },
            T::UpdatedEntity => K::UpdatedEntity {
                original_entity: need(s.original_entity, "originalEntity", t)?,
                entity: need(s.entity, "entity", t)?,
            },
            T::UndoneEntity => K::UndoneEntity {
                entity: need(s.entity, "entity", t)?,
            },
            T::ClassifiedEntity => K::ClassifiedEntity {
                target: classification_target(s.entity, s.entity_proxy, t)?,
                classification: need(s.classification, "classification", t)?,
            },
            T::DeclassifiedEntity => K::DeclassifiedEntity {
                target: classification_target(s.entity, s.entity_proxy, t)?,
                original_classification: need(
                    s.original_classification,
                    "originalClassification",
                    t,
                )?,
            },
            T::ReclassifiedEntity => K::ReclassifiedEntity {
                target: classification_target(s.entity, s.entity_proxy, t)?,
                original_classification: need(
                    s.original_classification,
                    "originalClassification",
                    t,
                )?,
                classification: need(s.classification, "classification", t)?,
            },
            T::DeletedEntity => K::DeletedEntity {
                entity: need(s.entity, "entity", t)?,
            },
            T::PurgedEntity => K::PurgedEntity {
                purged: match s.entity {
                    Some(entity) => PurgeTarget::Instance(entity),
                    None => PurgeTarget::Identifiers(identifiers(
                        s.type_def_guid,
                        s.type_def_name,
                        s.instance_guid,
                        t,
                    )?),
                },
            },
            T::DeletePurgedEntity => K::DeletePurgedEntity {
                entity: need(s.entity, "entity", t)?,
            },
            T::RestoredEntity => K::RestoredEntity {
                entity: need(s.entity, "entity", t)?,
            },
            T::ReIdentifiedEntity => K::ReIdentifiedEntity {
                original_instance_guid: need(s.original_instance_guid, "originalInstanceGUID", t)?,
                entity: need(s.entity, "entity", t)?,
            },
            T::ReTypedEntity => K::ReTypedEntity {
                original_type_def_summary: need(
                    s.original_type_def_summary,
                    "originalTypeDefSummary",
                    t,
                )?,
                entity: need(s.entity, "entity", t)?,
            },
            T::ReHomedEntity => K::ReHomedEntity {
                original_home_metadata_collection_id: need(
                    s.original_home_metadata_collection_id,
                    "originalHomeMetadataCollectionId",
                    t,
                )?,
                entity: need(s.entity, "entity", t)?,
            },
            T::RefreshEntityRequest => K::RefreshEntityRequest {
                request: refresh_request(
                    s.type_def_guid,
                    s.type_def_name,
                    s.instance_guid,
                    s.home_metadata_collection_id,
                    t,
                )?,
            },
            T::RefreshedEntity => K::RefreshedEntity {
                entity: need(s.entity, "entity", t)?,
            },

            T::NewRelationship => K::NewRelationship {
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::UpdatedRelationship => K::UpdatedRelationship {
                original_relationship: need(s.original_relationship, "originalRelationship", t)?,
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::UndoneRelationship => K::UndoneRelationship {
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::DeletedRelationship => K::DeletedRelationship {
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::PurgedRelationship => K::PurgedRelationship {
                purged: match s.relationship {
                    Some(relationship) => PurgeTarget::Instance(relationship),
                    None => PurgeTarget::Identifiers(identifiers(
                        s.type_def_guid,
                        s.type_def_name,
                        s.instance_guid,
                        t,
                    )?),
                },
            },
            T::DeletePurgedRelationship => K::DeletePurgedRelationship {
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::RestoredRelationship => K::RestoredRelationship {
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::ReIdentifiedRelationship => K::ReIdentifiedRelationship {
                original_instance_guid: need(s.original_instance_guid, "originalInstanceGUID", t)?,
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::ReTypedRelationship => K::ReTypedRelationship {
                original_type_def_summary: need(
                    s.original_type_def_summary,
                    "originalTypeDefSummary",
                    t,
                )?,
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::ReHomedRelationship => K::ReHomedRelationship {
                original_home_metadata_collection_id: need(
                    s.original_home_metadata_collection_id,
                    "originalHomeMetadataCollectionId",
                    t,
                )?,
                relationship: need(s.relationship, "relationship", t)?,
            },
            T::RefreshRelationshipRequest => K::RefreshRelationshipRequest {
                request: refresh_request(
                    s.type_def_guid,
                    s.type_def_name,
                    s.instance_guid,
                    s.home_metadata_collection_id,
                    t,
                )?,
            },
            T::RefreshedRelationship => K::RefreshedRelationship {
                relationship: need(s.relationship, "relationship", t)?,
            },

            T::BatchInstances => K::BatchInstances {
                batch: need(s.instance_batch, "instanceBatch", t)?,
            },
            T::InstanceError => {
                let block = need(conflict, "conflict block", t)?;
                match InstanceConflict::from_block(block)? {
                    Some(conflict) => K::InstanceError { conflict },
                    None => K::Unknown {
                        event_type: s.event_type,
                    },
                }
            }
            T::UnknownInstanceEvent => K::Unknown {
                event_type: s.event_type,
            },
        };
        Ok(kind)
    }
}

/// Payload fields each instance transition carries.
fn instance_payloads(event_type: InstanceEventType) -> &'static [&'static str] {
    use InstanceEventType as T;

    match event_type {
        T::NewEntity
        | T::UndoneEntity
        | T::DeletedEntity
        | T::PurgedEntity
        | T::DeletePurgedEntity
        | T::RestoredEntity
        | T::ReIdentifiedEntity
        | T::ReTypedEntity
        | T::ReHomedEntity
        | T::RefreshedEntity => &["entity"],
        T::UpdatedEntity => &["originalEntity", "entity"],
        T::ClassifiedEntity => &["entity", "entityProxy", "classification"],
        T::DeclassifiedEntity => &["entity", "entityProxy", "originalClassification"],
        T::ReclassifiedEntity => &[
            "entity",
            "entityProxy",
            "originalClassification",
            "classification",
        ],
        T::NewRelationship
        | T::UndoneRelationship
        | T::DeletedRelationship
        | T::PurgedRelationship
        | T::DeletePurgedRelationship
        | T::RestoredRelationship
        | T::ReIdentifiedRelationship
        | T::ReTypedRelationship
        | T::ReHomedRelationship
        | T::RefreshedRelationship => &["relationship"],
        T::UpdatedRelationship => &["originalRelationship", "relationship"],
        T::BatchInstances => &["instanceBatch"],
        T::RefreshEntityRequest
        | T::RefreshRelationshipRequest
        | T::InstanceError
        | T::UnknownInstanceEvent => &[],
    }
}

fn classification_target(
    entity: Option<EntityDetail>,
    proxy: Option<EntityProxy>,
    event_type: InstanceEventType,
) -> Result<ClassificationTarget> {
    match (entity, proxy) {
        (Some(entity), None) => Ok(ClassificationTarget::Entity(entity)),
        (None, Some(proxy)) => Ok(ClassificationTarget::Proxy(proxy)),
        (Some(_), Some(_)) => Err(OmrsError::DecodeError(format!(
            "{} carries both entity and entityProxy",
            event_type
        ))),
        (None, None) => Err(OmrsError::DecodeError(format!(
            "{} is missing both entity and entityProxy",
            event_type
        ))),
    }
}

fn identifiers(
    type_def_guid: Option<String>,
    type_def_name: Option<String>,
    instance_guid: Option<String>,
    event_type: InstanceEventType,
) -> Result<InstanceIdentifiers> {
    Ok(InstanceIdentifiers::new(
        need(type_def_guid, "typeDefGUID", event_type)?,
        need(type_def_name, "typeDefName", event_type)?,
        need(instance_guid, "instanceGUID", event_type)?,
    ))
}

fn refresh_request(
    type_def_guid: Option<String>,
    type_def_name: Option<String>,
    instance_guid: Option<String>,
    home_metadata_collection_id: Option<String>,
    event_type: InstanceEventType,
) -> Result<RefreshRequest> {
    Ok(RefreshRequest::new(
        identifiers(type_def_guid, type_def_name, instance_guid, event_type)?,
        need(
            home_metadata_collection_id,
            "homeMetadataCollectionId",
            event_type,
        )?,
    ))
}

// =============================================================================
// TypeDef section
// =============================================================================

impl TypeDefSection {
    fn new(event_type: WireDescriptor) -> Self {
        Self {
            event_type,
            type_def: None,
            attribute_type_def: None,
            type_def_guid: None,
            type_def_name: None,
            type_def_patch: None,
            original_type_def_summary: None,
            original_attribute_type_def: None,
        }
    }

    pub fn from_event(event: &TypeDefEvent) -> Self {
        use TypeDefEventKind as K;

        let kind = event.kind();
        let event_type = match kind {
            K::Unknown { event_type } => event_type.clone(),
            other => other.event_type().to_wire(),
        };
        let mut section = Self::new(event_type);
        match kind {
            K::NewTypeDef { type_def } => section.type_def = Some(type_def.clone()),
            K::NewAttributeTypeDef { attribute_type_def } => {
                section.attribute_type_def = Some(attribute_type_def.clone())
            }
            K::UpdatedTypeDef { patch } => {
                section.type_def_guid = Some(patch.type_def_guid.clone());
                section.type_def_name = Some(patch.type_def_name.clone());
                section.type_def_patch = Some(patch.clone());
            }
            K::DeletedTypeDef {
                type_def_guid,
                type_def_name,
            } => {
                section.type_def_guid = Some(type_def_guid.clone());
                section.type_def_name = Some(type_def_name.clone());
            }
            K::DeletedAttributeTypeDef {
                attribute_type_def_guid,
                attribute_type_def_name,
            } => {
                section.type_def_guid = Some(attribute_type_def_guid.clone());
                section.type_def_name = Some(attribute_type_def_name.clone());
            }
            K::ReIdentifiedTypeDef {
                original_type_def_summary,
                type_def,
            } => {
                section.original_type_def_summary = Some(original_type_def_summary.clone());
                section.type_def = Some(type_def.clone());
            }
            K::ReIdentifiedAttributeTypeDef {
                original_attribute_type_def,
                attribute_type_def,
            } => {
                section.original_attribute_type_def = Some(original_attribute_type_def.clone());
                section.attribute_type_def = Some(attribute_type_def.clone());
            }
            K::TypeDefError { .. } | K::Unknown { .. } => {}
        }
        section
    }

    pub fn into_kind(self, conflict: Option<&ConflictBlock>) -> Result<TypeDefEventKind> {
        use TypeDefEventKind as K;
        use TypeDefEventType as T;

        let t: TypeDefEventType = self.event_type.resolve();
        if t != T::UnknownTypeDefEvent {
            let present = present_fields([
                ("typeDef", self.type_def.is_some()),
                ("attributeTypeDef", self.attribute_type_def.is_some()),
                ("typeDefPatch", self.type_def_patch.is_some()),
                ("originalTypeDefSummary", self.original_type_def_summary.is_some()),
                ("originalAttributeTypeDef", self.original_attribute_type_def.is_some()),
            ]);
            let used: &[&str] = match t {
                T::NewTypeDef => &["typeDef"],
                T::NewAttributeTypeDef => &["attributeTypeDef"],
                T::UpdatedTypeDef => &["typeDefPatch"],
                T::ReIdentifiedTypeDef => &["originalTypeDefSummary", "typeDef"],
                T::ReIdentifiedAttributeTypeDef => {
                    &["originalAttributeTypeDef", "attributeTypeDef"]
                }
                _ => &[],
            };
            reject_unused(&present, used, t)?;
        }
        let s = self;

        let kind = match t {
            T::NewTypeDef => K::NewTypeDef {
                type_def: need(s.type_def, "typeDef", t)?,
            },
            T::NewAttributeTypeDef => K::NewAttributeTypeDef {
                attribute_type_def: need(s.attribute_type_def, "attributeTypeDef", t)?,
            },
            T::UpdatedTypeDef => K::UpdatedTypeDef {
                patch: need(s.type_def_patch, "typeDefPatch", t)?,
            },
            T::DeletedTypeDef => K::DeletedTypeDef {
                type_def_guid: need(s.type_def_guid, "typeDefGUID", t)?,
                type_def_name: need(s.type_def_name, "typeDefName", t)?,
            },
            T::DeletedAttributeTypeDef => K::DeletedAttributeTypeDef {
                attribute_type_def_guid: need(s.type_def_guid, "typeDefGUID", t)?,
                attribute_type_def_name: need(s.type_def_name, "typeDefName", t)?,
            },
            T::ReIdentifiedTypeDef => K::ReIdentifiedTypeDef {
                original_type_def_summary: need(
                    s.original_type_def_summary,
                    "originalTypeDefSummary",
                    t,
                )?,
                type_def: need(s.type_def, "typeDef", t)?,
            },
            T::ReIdentifiedAttributeTypeDef => K::ReIdentifiedAttributeTypeDef {
                original_attribute_type_def: need(
                    s.original_attribute_type_def,
                    "originalAttributeTypeDef",
                    t,
                )?,
                attribute_type_def: need(s.attribute_type_def, "attributeTypeDef", t)?,
            },
            T::TypeDefError => {
                let block = need(conflict, "conflict block", t)?;
                match TypeDefConflict::from_block(block)? {
                    Some(conflict) => K::TypeDefError { conflict },
                    None => K::Unknown {
                        event_type: s.event_type,
                    },
                }
            }
            T::UnknownTypeDefEvent => K::Unknown {
                event_type: s.event_type,
            },
        };
        Ok(kind)
    }
}

// =============================================================================
// Registry section
// =============================================================================

impl RegistrySection {
    pub fn from_event(event: &RegistryEvent) -> Self {
        let kind = event.kind();
        let event_type = match kind {
            RegistryEventKind::Unknown { event_type } => event_type.clone(),
            other => other.event_type().to_wire(),
        };
        let mut section = Self {
            event_type,
            registration_timestamp: None,
            metadata_collection_name: None,
            remote_connection: None,
        };
        match kind {
            RegistryEventKind::Registration { registration }
            | RegistryEventKind::ReRegistration { registration } => {
                section.registration_timestamp = Some(registration.registration_time);
                section.metadata_collection_name = registration.metadata_collection_name.clone();
                section.remote_connection = registration.remote_connection.clone();
            }
            RegistryEventKind::UnRegistration {
                metadata_collection_name,
            } => section.metadata_collection_name = metadata_collection_name.clone(),
            _ => {}
        }
        section
    }

    pub fn into_kind(self, conflict: Option<&ConflictBlock>) -> Result<RegistryEventKind> {
        let t: RegistryEventType = self.event_type.resolve();
        let kind = match t {
            RegistryEventType::Registration | RegistryEventType::ReRegistration => {
                let registration = MemberRegistration {
                    registration_time: need(
                        self.registration_timestamp,
                        "registrationTimestamp",
                        t,
                    )?,
                    metadata_collection_name: self.metadata_collection_name,
                    remote_connection: self.remote_connection,
                };
                if t == RegistryEventType::Registration {
                    RegistryEventKind::Registration { registration }
                } else {
                    RegistryEventKind::ReRegistration { registration }
                }
            }
            RegistryEventType::RefreshRegistrationRequest => {
                RegistryEventKind::RefreshRegistrationRequest
            }
            RegistryEventType::UnRegistration => RegistryEventKind::UnRegistration {
                metadata_collection_name: self.metadata_collection_name,
            },
            RegistryEventType::RegistryError => {
                let block = need(conflict, "conflict block", t)?;
                match RegistryConflict::from_block(block)? {
                    Some(conflict) => RegistryEventKind::RegistryError { conflict },
                    None => RegistryEventKind::Unknown {
                        event_type: self.event_type,
                    },
                }
            }
            RegistryEventType::UnknownRegistryEvent => RegistryEventKind::Unknown {
                event_type: self.event_type,
            },
        };
        Ok(kind)
    }
}

// =============================================================================
// Encoding
// =============================================================================

pub fn encode_envelope(envelope: &WireEnvelope) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

pub fn decode_envelope(bytes: &[u8]) -> Result<WireEnvelope> {
    serde_json::from_slice(bytes).map_err(|e| OmrsError::DecodeError(e.to_string()))
}

pub fn encode(event: &CohortEvent) -> Result<Bytes> {
    encode_envelope(&WireEnvelope::from_event(event)?)
}

pub fn decode(bytes: &[u8]) -> Result<CohortEvent> {
    decode_envelope(bytes)?.into_event()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictingInstances, TypeDefPatchMismatch};
    use crate::model::{InstanceProvenance, InstanceType};
    use crate::vocabulary::{EventDirection, InstanceErrorCode, TypeDefErrorCode};
    use serde_json::json;

    fn originator() -> Originator {
        Originator::new("mc-A").with_server_name("server-a")
    }

    fn asset(guid: &str) -> EntityDetail {
        EntityDetail::new(guid, InstanceType::new("t-asset", "Asset", 1), "mc-A")
            .with_property("qualifiedName", json!("asset-1"))
    }

    fn round_trip(event: CohortEvent) -> CohortEvent {
        let bytes = encode(&event).unwrap();
        decode(&bytes).unwrap()
    }

    #[test]
    fn test_new_entity_round_trip() {
        let event = InstanceEvent::outbound(
            originator(),
            InstanceEventKind::NewEntity { entity: asset("e1") },
        )
        .unwrap();

        let decoded = round_trip(event.clone().into());
        let CohortEvent::Instance(decoded) = decoded else {
            panic!("expected an instance event");
        };
        assert_eq!(decoded.event_type(), InstanceEventType::NewEntity);
        assert_eq!(decoded.instance_guid().as_deref(), Some("e1"));
        assert_eq!(
            decoded.type_def().map(|(_, name)| name).as_deref(),
            Some("Asset")
        );
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_wire_field_names() {
        let event = InstanceEvent::outbound(
            originator(),
            InstanceEventKind::NewEntity { entity: asset("e1") },
        )
        .unwrap();
        let json = serde_json::to_value(WireEnvelope::from_instance_event(&event)).unwrap();

        assert_eq!(json["category"]["ordinal"], 3);
        assert_eq!(json["category"]["name"], "InstanceEvent");
        assert_eq!(json["direction"]["ordinal"], 2);
        assert_eq!(json["protocolVersion"]["name"], "V1");
        assert_eq!(json["originator"]["metadataCollectionId"], "mc-A");
        assert_eq!(json["instanceSection"]["instanceGUID"], "e1");
        assert_eq!(json["instanceSection"]["typeDefName"], "Asset");
        assert_eq!(json["instanceSection"]["eventType"]["ordinal"], 1);
        assert!(json.get("typeDefSection").is_none());
        assert!(json.get("conflict").is_none());
    }

    fn raw_envelope(category: i32, event_type: i32) -> serde_json::Value {
        json!({
            "protocolVersion": {"ordinal": 1},
            "category": {"ordinal": category, "name": "Future", "description": "from a newer member"},
            "direction": {"ordinal": 2},
            "originator": {"metadataCollectionId": "mc-B"},
            "timestamp": "2024-05-01T10:00:00Z",
            "instanceSection": {
                "eventType": {"ordinal": event_type, "name": "SomethingNew"},
                "instanceGUID": "e1"
            }
        })
    }

    #[test]
    fn test_unknown_event_type_decodes() {
        let bytes = serde_json::to_vec(&raw_envelope(3, 250)).unwrap();
        let CohortEvent::Instance(event) = decode(&bytes).unwrap() else {
            panic!("expected an instance event");
        };
        assert_eq!(event.event_type(), InstanceEventType::UnknownInstanceEvent);
        assert!(event.is_unknown());
        match event.kind() {
            InstanceEventKind::Unknown { event_type } => assert_eq!(event_type.ordinal, 250),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_category_decodes() {
        let bytes = serde_json::to_vec(&raw_envelope(42, 1)).unwrap();
        let event = decode(&bytes).unwrap();
        assert!(event.is_unknown());
        assert_eq!(event.category(), EventCategory::Unknown);
        assert_eq!(event.originator().metadata_collection_id, "mc-B");
        assert_eq!(event.header().direction, EventDirection::Outbound);
    }

    #[test]
    fn test_unknown_protocol_version_decodes() {
        let mut raw = raw_envelope(3, 1);
        raw["protocolVersion"] = json!({"ordinal": 7, "name": "V7"});
        let event = decode(&serde_json::to_vec(&raw).unwrap()).unwrap();
        assert!(matches!(event, CohortEvent::Unknown(_)));
    }

    #[test]
    fn test_malformed_bytes() {
        assert!(matches!(
            decode(b"not an envelope"),
            Err(OmrsError::DecodeError(_))
        ));

        // NEW_ENTITY without the entity payload
        let bytes = serde_json::to_vec(&raw_envelope(3, 1)).unwrap();
        assert!(matches!(decode(&bytes), Err(OmrsError::DecodeError(_))));
    }

    fn new_entity_json() -> serde_json::Value {
        let event = InstanceEvent::outbound(
            originator(),
            InstanceEventKind::NewEntity { entity: asset("e1") },
        )
        .unwrap();
        serde_json::to_value(WireEnvelope::from_instance_event(&event)).unwrap()
    }

    #[test]
    fn test_payload_the_transition_does_not_use() {
        let mut raw = new_entity_json();
        raw["instanceSection"]["entityProxy"] =
            serde_json::to_value(EntityProxy::new("e2", InstanceType::new("t-asset", "Asset", 1), "mc-A"))
                .unwrap();

        let err = decode(&serde_json::to_vec(&raw).unwrap()).unwrap_err();
        assert!(matches!(err, OmrsError::DecodeError(ref msg) if msg.contains("entityProxy")));

        let mut raw = new_entity_json();
        raw["instanceSection"]["instanceBatch"] =
            serde_json::to_value(InstanceGraph::new(vec![asset("e3")], Vec::new())).unwrap();
        assert!(matches!(
            decode(&serde_json::to_vec(&raw).unwrap()),
            Err(OmrsError::DecodeError(_))
        ));
    }

    #[test]
    fn test_classification_with_entity_and_proxy() {
        let entity = asset("e1");
        let event = InstanceEvent::outbound(
            originator(),
            InstanceEventKind::ClassifiedEntity {
                target: ClassificationTarget::Entity(entity.clone()),
                classification: Classification::new("Confidential"),
            },
        )
        .unwrap();
        let mut raw = serde_json::to_value(WireEnvelope::from_instance_event(&event)).unwrap();
        assert!(decode(&serde_json::to_vec(&raw).unwrap()).is_ok());

        raw["instanceSection"]["entityProxy"] =
            serde_json::to_value(EntityProxy::new("e1", InstanceType::new("t-asset", "Asset", 1), "mc-A"))
                .unwrap();
        assert!(matches!(
            decode(&serde_json::to_vec(&raw).unwrap()),
            Err(OmrsError::DecodeError(_))
        ));
    }

    #[test]
    fn test_envelope_with_two_sections() {
        let mut raw = new_entity_json();
        raw["typeDefSection"] = json!({"eventType": {"ordinal": 1}});

        let err = decode(&serde_json::to_vec(&raw).unwrap()).unwrap_err();
        assert!(matches!(err, OmrsError::DecodeError(ref msg) if msg.contains("more than one section")));
    }

    #[test]
    fn test_conflicting_instances_round_trip() {
        let conflict = InstanceConflict::ConflictingInstances(ConflictingInstances {
            target_metadata_collection_id: "mc-A".to_string(),
            target_type_def: TypeDefSummary::new("t-asset", "Asset", 1),
            target_instance_guid: "e2".to_string(),
            other_metadata_collection_id: "mc-B".to_string(),
            other_origin: InstanceProvenance::LocalCohort,
            other_type_def: TypeDefSummary::new("t-process", "Process", 1),
            other_instance_guid: "e2".to_string(),
            error_message: "e2 is an Asset in mc-A and a Process in mc-B".to_string(),
        });
        let event =
            InstanceEvent::outbound(originator(), InstanceEventKind::InstanceError { conflict })
                .unwrap();

        let envelope = WireEnvelope::from_instance_event(&event);
        let block = envelope.conflict.clone().unwrap();
        assert_eq!(block.target_instance_guid.as_deref(), Some("e2"));
        assert_eq!(block.other_instance_guid.as_deref(), Some("e2"));
        assert_ne!(
            block.target_metadata_collection_id,
            block.other_metadata_collection_id
        );

        let CohortEvent::Instance(decoded) = round_trip(event.into()) else {
            panic!("expected an instance event");
        };
        assert_eq!(decoded.error_code(), InstanceErrorCode::ConflictingInstances);
        assert_eq!(
            decoded.error_code().to_generic(),
            crate::vocabulary::GenericErrorCode::ConflictingInstances
        );
    }

    #[test]
    fn test_purge_by_identifiers_round_trip() {
        let event = InstanceEvent::outbound(
            originator(),
            InstanceEventKind::PurgedRelationship {
                purged: PurgeTarget::Identifiers(InstanceIdentifiers::new(
                    "t-link", "AssetLink", "r1",
                )),
            },
        )
        .unwrap();
        assert_eq!(round_trip(event.clone().into()), CohortEvent::Instance(event));
    }

    #[test]
    fn test_patch_mismatch_round_trip() {
        let mismatch = TypeDefPatchMismatch::new(
            "mc-A",
            TypeDefSummary::new("t-asset", "Asset", 2),
            TypeDef::new(TypeDefSummary::new("t-asset", "Asset", 3)),
        );
        let event = TypeDefEvent::outbound(
            originator(),
            TypeDefEventKind::TypeDefError {
                conflict: TypeDefConflict::PatchMismatch(mismatch),
            },
        )
        .unwrap();

        let CohortEvent::TypeDef(decoded) = round_trip(event.clone().into()) else {
            panic!("expected a TypeDef event");
        };
        assert_eq!(decoded.event_type(), TypeDefEventType::TypeDefError);
        assert_eq!(decoded.error_code(), TypeDefErrorCode::TypeDefPatchMismatch);
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_unrecognized_error_code_is_unknown_kind() {
        let mut raw = raw_envelope(3, 99);
        raw["conflict"] = json!({
            "genericErrorCode": {"ordinal": 42, "name": "FutureConflict"},
            "errorMessage": "something new",
            "targetInstanceGUID": "e1"
        });
        let CohortEvent::Instance(event) = decode(&serde_json::to_vec(&raw).unwrap()).unwrap()
        else {
            panic!("expected an instance event");
        };
        assert!(event.is_unknown());
    }

    #[test]
    fn test_registry_round_trip() {
        let registration = MemberRegistration::new(Utc::now())
            .with_metadata_collection_name("Repository A")
            .with_remote_connection(RemoteConnection::new(
                "rest-repository-connector",
                "https://a.example:9443",
            ));
        let event = RegistryEvent::outbound(
            originator(),
            RegistryEventKind::Registration { registration },
        )
        .unwrap();
        assert_eq!(round_trip(event.clone().into()), CohortEvent::Registry(event));
    }

    #[test]
    fn test_unknown_event_cannot_be_encoded() {
        let bytes = serde_json::to_vec(&raw_envelope(99, 1)).unwrap();
        let event = decode(&bytes).unwrap();
        assert!(encode(&event).is_err());
    }
}
