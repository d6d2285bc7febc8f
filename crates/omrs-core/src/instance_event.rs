//! Instance events: lifecycle transitions of entities and relationships.

use serde::{Deserialize, Serialize};

use crate::conflict::InstanceConflict;
use crate::envelope::{EventHeader, Originator};
use crate::model::{
    Classification, EntityDetail, EntityProxy, InstanceGraph, InstanceHeader, InstanceIdentifiers,
    InstanceIdentity, Relationship, TypeDefSummary,
};
use crate::vocabulary::{EventCategory, InstanceErrorCode, InstanceEventType, WireDescriptor};
use crate::{OmrsError, Result};

/// The entity a classification change applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationTarget {
    Entity(EntityDetail),
    Proxy(EntityProxy),
}

impl InstanceIdentity for ClassificationTarget {
    fn header(&self) -> &InstanceHeader {
        match self {
            ClassificationTarget::Entity(entity) => &entity.header,
            ClassificationTarget::Proxy(proxy) => &proxy.header,
        }
    }
}

/// A purge names the instance either by its identifiers or by its last
/// known state.
#[derive(Debug, Clone, PartialEq)]
pub enum PurgeTarget<T> {
    Identifiers(InstanceIdentifiers),
    Instance(T),
}

impl<T: InstanceIdentity> PurgeTarget<T> {
    pub fn identifiers(&self) -> InstanceIdentifiers {
        match self {
            PurgeTarget::Identifiers(ids) => ids.clone(),
            PurgeTarget::Instance(instance) => instance.identifiers(),
        }
    }
}

/// Ask the home repository to resend the current state of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub identifiers: InstanceIdentifiers,
    pub home_metadata_collection_id: String,
}

impl RefreshRequest {
    pub fn new(identifiers: InstanceIdentifiers, home_metadata_collection_id: impl Into<String>) -> Self {
        Self {
            identifiers,
            home_metadata_collection_id: home_metadata_collection_id.into(),
        }
    }
}

/// One variant per transition; each carries exactly the payload that
/// transition needs.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceEventKind {
    NewEntity {
        entity: EntityDetail,
    },
    UpdatedEntity {
        original_entity: EntityDetail,
        entity: EntityDetail,
    },
    UndoneEntity {
        entity: EntityDetail,
    },
    ClassifiedEntity {
        target: ClassificationTarget,
        classification: Classification,
    },
    DeclassifiedEntity {
        target: ClassificationTarget,
        original_classification: Classification,
    },
    ReclassifiedEntity {
        target: ClassificationTarget,
        original_classification: Classification,
        classification: Classification,
    },
    DeletedEntity {
        entity: EntityDetail,
    },
    PurgedEntity {
        purged: PurgeTarget<EntityDetail>,
    },
    DeletePurgedEntity {
        entity: EntityDetail,
    },
    RestoredEntity {
        entity: EntityDetail,
    },
    ReIdentifiedEntity {
        original_instance_guid: String,
        entity: EntityDetail,
    },
    ReTypedEntity {
        original_type_def_summary: TypeDefSummary,
        entity: EntityDetail,
    },
    ReHomedEntity {
        original_home_metadata_collection_id: String,
        entity: EntityDetail,
    },
    RefreshEntityRequest {
        request: RefreshRequest,
    },
    RefreshedEntity {
        entity: EntityDetail,
    },

    NewRelationship {
        relationship: Relationship,
    },
    UpdatedRelationship {
        original_relationship: Relationship,
        relationship: Relationship,
    },
    UndoneRelationship {
        relationship: Relationship,
    },
    DeletedRelationship {
        relationship: Relationship,
    },
    PurgedRelationship {
        purged: PurgeTarget<Relationship>,
    },
    DeletePurgedRelationship {
        relationship: Relationship,
    },
    RestoredRelationship {
        relationship: Relationship,
    },
    ReIdentifiedRelationship {
        original_instance_guid: String,
        relationship: Relationship,
    },
    ReTypedRelationship {
        original_type_def_summary: TypeDefSummary,
        relationship: Relationship,
    },
    ReHomedRelationship {
        original_home_metadata_collection_id: String,
        relationship: Relationship,
    },
    RefreshRelationshipRequest {
        request: RefreshRequest,
    },
    RefreshedRelationship {
        relationship: Relationship,
    },

    BatchInstances {
        batch: InstanceGraph,
    },
    InstanceError {
        conflict: InstanceConflict,
    },
    /// A transition this member does not recognize; carried only so it can
    /// be logged.
    Unknown {
        event_type: WireDescriptor,
    },
}

impl InstanceEventKind {
    pub fn event_type(&self) -> InstanceEventType {
        use InstanceEventKind as K;
        match self {
            K::NewEntity { .. } => InstanceEventType::NewEntity,
            K::UpdatedEntity { .. } => InstanceEventType::UpdatedEntity,
            K::UndoneEntity { .. } => InstanceEventType::UndoneEntity,
            K::ClassifiedEntity { .. } => InstanceEventType::ClassifiedEntity,
            K::DeclassifiedEntity { .. } => InstanceEventType::DeclassifiedEntity,
            K::ReclassifiedEntity { .. } => InstanceEventType::ReclassifiedEntity,
            K::DeletedEntity { .. } => InstanceEventType::DeletedEntity,
            K::PurgedEntity { .. } => InstanceEventType::PurgedEntity,
            K::DeletePurgedEntity { .. } => InstanceEventType::DeletePurgedEntity,
            K::RestoredEntity { .. } => InstanceEventType::RestoredEntity,
            K::ReIdentifiedEntity { .. } => InstanceEventType::ReIdentifiedEntity,
            K::ReTypedEntity { .. } => InstanceEventType::ReTypedEntity,
            K::ReHomedEntity { .. } => InstanceEventType::ReHomedEntity,
            K::RefreshEntityRequest { .. } => InstanceEventType::RefreshEntityRequest,
            K::RefreshedEntity { .. } => InstanceEventType::RefreshedEntity,
            K::NewRelationship { .. } => InstanceEventType::NewRelationship,
            K::UpdatedRelationship { .. } => InstanceEventType::UpdatedRelationship,
            K::UndoneRelationship { .. } => InstanceEventType::UndoneRelationship,
            K::DeletedRelationship { .. } => InstanceEventType::DeletedRelationship,
            K::PurgedRelationship { .. } => InstanceEventType::PurgedRelationship,
            K::DeletePurgedRelationship { .. } => InstanceEventType::DeletePurgedRelationship,
            K::RestoredRelationship { .. } => InstanceEventType::RestoredRelationship,
            K::ReIdentifiedRelationship { .. } => InstanceEventType::ReIdentifiedRelationship,
            K::ReTypedRelationship { .. } => InstanceEventType::ReTypedRelationship,
            K::ReHomedRelationship { .. } => InstanceEventType::ReHomedRelationship,
            K::RefreshRelationshipRequest { .. } => InstanceEventType::RefreshRelationshipRequest,
            K::RefreshedRelationship { .. } => InstanceEventType::RefreshedRelationship,
            K::BatchInstances { .. } => InstanceEventType::BatchInstances,
            K::InstanceError { .. } => InstanceEventType::InstanceError,
            K::Unknown { .. } => InstanceEventType::UnknownInstanceEvent,
        }
    }

    /// The instance the transition applies to, when there is a single one.
    pub fn identity(&self) -> Option<&dyn InstanceIdentity> {
        use InstanceEventKind as K;
        match self {
            K::NewEntity { entity }
            | K::UpdatedEntity { entity, .. }
            | K::UndoneEntity { entity }
            | K::DeletedEntity { entity }
            | K::DeletePurgedEntity { entity }
            | K::RestoredEntity { entity }
            | K::ReIdentifiedEntity { entity, .. }
            | K::ReTypedEntity { entity, .. }
            | K::ReHomedEntity { entity, .. }
            | K::RefreshedEntity { entity } => Some(entity),
            K::ClassifiedEntity { target, .. }
            | K::DeclassifiedEntity { target, .. }
            | K::ReclassifiedEntity { target, .. } => Some(target),
            K::PurgedEntity {
                purged: PurgeTarget::Instance(entity),
            } => Some(entity),
            K::NewRelationship { relationship }
            | K::UpdatedRelationship { relationship, .. }
            | K::UndoneRelationship { relationship }
            | K::DeletedRelationship { relationship }
            | K::DeletePurgedRelationship { relationship }
            | K::RestoredRelationship { relationship }
            | K::ReIdentifiedRelationship { relationship, .. }
            | K::ReTypedRelationship { relationship, .. }
            | K::ReHomedRelationship { relationship, .. }
            | K::RefreshedRelationship { relationship } => Some(relationship),
            K::PurgedRelationship {
                purged: PurgeTarget::Instance(relationship),
            } => Some(relationship),
            _ => None,
        }
    }

    /// `(typeDefGUID, typeDefName, instanceGUID)` of the affected instance.
    pub fn identifiers(&self) -> Option<InstanceIdentifiers> {
        use InstanceEventKind as K;
        match self {
            K::PurgedEntity {
                purged: PurgeTarget::Identifiers(ids),
            }
            | K::PurgedRelationship {
                purged: PurgeTarget::Identifiers(ids),
            } => Some(ids.clone()),
            K::RefreshEntityRequest { request } | K::RefreshRelationshipRequest { request } => {
                Some(request.identifiers.clone())
            }
            _ => self.identity().map(|instance| instance.identifiers()),
        }
    }

    pub fn home_metadata_collection_id(&self) -> Option<&str> {
        use InstanceEventKind as K;
        match self {
            K::RefreshEntityRequest { request } | K::RefreshRelationshipRequest { request } => {
                Some(&request.home_metadata_collection_id)
            }
            _ => self
                .identity()
                .map(|instance| instance.home_metadata_collection_id()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        use InstanceEventKind as K;
        let event_type = self.event_type();

        if let Some(instance) = self.identity() {
            if instance.guid().trim().is_empty() {
                return Err(OmrsError::invalid_event(format!(
                    "{} carries an instance without a GUID",
                    event_type
                )));
            }
        }

        match self {
            K::UpdatedEntity {
                original_entity,
                entity,
            } => same_guid(event_type, original_entity, entity),
            K::UpdatedRelationship {
                original_relationship,
                relationship,
            } => same_guid(event_type, original_relationship, relationship),
            K::ReIdentifiedEntity {
                original_instance_guid,
                entity,
            } => changed(event_type, "GUID", original_instance_guid, entity.guid()),
            K::ReIdentifiedRelationship {
                original_instance_guid,
                relationship,
            } => changed(event_type, "GUID", original_instance_guid, relationship.guid()),
            K::ReHomedEntity {
                original_home_metadata_collection_id,
                entity,
            } => changed(
                event_type,
                "home metadata collection",
                original_home_metadata_collection_id,
                entity.home_metadata_collection_id(),
            ),
            K::ReHomedRelationship {
                original_home_metadata_collection_id,
                relationship,
            } => changed(
                event_type,
                "home metadata collection",
                original_home_metadata_collection_id,
                relationship.home_metadata_collection_id(),
            ),
            K::ReTypedEntity {
                original_type_def_summary,
                entity,
            } => retyped(event_type, original_type_def_summary, entity),
            K::ReTypedRelationship {
                original_type_def_summary,
                relationship,
            } => retyped(event_type, original_type_def_summary, relationship),
            K::PurgedEntity {
                purged: PurgeTarget::Identifiers(ids),
            }
            | K::PurgedRelationship {
                purged: PurgeTarget::Identifiers(ids),
            } => complete(event_type, ids),
            K::RefreshEntityRequest { request } | K::RefreshRelationshipRequest { request } => {
                complete(event_type, &request.identifiers)?;
                if request.home_metadata_collection_id.trim().is_empty() {
                    return Err(OmrsError::invalid_event(format!(
                        "{} must name the home metadata collection",
                        event_type
                    )));
                }
                Ok(())
            }
            K::BatchInstances { batch } => {
                if batch.is_empty() {
                    return Err(OmrsError::invalid_event("instance batch is empty"));
                }
                Ok(())
            }
            K::InstanceError { conflict } => conflict.validate(),
            _ => Ok(()),
        }
    }
}

fn same_guid(
    event_type: InstanceEventType,
    original: &dyn InstanceIdentity,
    current: &dyn InstanceIdentity,
) -> Result<()> {
    if original.guid() != current.guid() {
        return Err(OmrsError::invalid_event(format!(
            "{} original {} and new {} describe different instances",
            event_type,
            original.guid(),
            current.guid()
        )));
    }
    Ok(())
}

fn changed(event_type: InstanceEventType, what: &str, original: &str, current: &str) -> Result<()> {
    if original.trim().is_empty() {
        return Err(OmrsError::invalid_event(format!(
            "{} must carry the original {}",
            event_type, what
        )));
    }
    if original == current {
        return Err(OmrsError::invalid_event(format!(
            "{} does not change the {} {}",
            event_type, what, original
        )));
    }
    Ok(())
}

fn retyped(
    event_type: InstanceEventType,
    original: &TypeDefSummary,
    instance: &dyn InstanceIdentity,
) -> Result<()> {
    let current = &instance.header().instance_type;
    if current.matches_summary(original) && current.type_def_version == original.version {
        return Err(OmrsError::invalid_event(format!(
            "{} leaves {} at type {}",
            event_type,
            instance.guid(),
            original.name
        )));
    }
    Ok(())
}

fn complete(event_type: InstanceEventType, ids: &InstanceIdentifiers) -> Result<()> {
    if !ids.is_complete() {
        return Err(OmrsError::invalid_event(format!(
            "{} needs the TypeDef GUID, TypeDef name and instance GUID",
            event_type
        )));
    }
    Ok(())
}

/// An immutable instance event. Construct with [`InstanceEvent::new`], which
/// rejects payloads that do not fit the transition.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceEvent {
    header: EventHeader,
    kind: InstanceEventKind,
}

impl InstanceEvent {
    pub fn new(header: EventHeader, kind: InstanceEventKind) -> Result<Self> {
        header.originator.validate()?;
        kind.validate()?;
        Ok(Self { header, kind })
    }

    /// Event about to be sent by the given member.
    pub fn outbound(originator: Originator, kind: InstanceEventKind) -> Result<Self> {
        Self::new(EventHeader::outbound(originator), kind)
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::Instance
    }

    pub fn event_type(&self) -> InstanceEventType {
        self.kind.event_type()
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn originator(&self) -> &Originator {
        &self.header.originator
    }

    pub fn kind(&self) -> &InstanceEventKind {
        &self.kind
    }

    pub fn into_kind(self) -> InstanceEventKind {
        self.kind
    }

    pub fn instance_guid(&self) -> Option<String> {
        match &self.kind {
            InstanceEventKind::InstanceError { conflict } => {
                conflict.target_instance_guid().map(String::from)
            }
            kind => kind.identifiers().map(|ids| ids.instance_guid),
        }
    }

    /// The `(typeDefGUID, typeDefName)` pair; both or neither are present.
    pub fn type_def(&self) -> Option<(String, String)> {
        match &self.kind {
            InstanceEventKind::InstanceError { conflict } => conflict
                .target_type_def()
                .map(|summary| (summary.guid.clone(), summary.name.clone())),
            kind => kind
                .identifiers()
                .map(|ids| (ids.type_def_guid, ids.type_def_name)),
        }
    }

    pub fn home_metadata_collection_id(&self) -> Option<&str> {
        self.kind.home_metadata_collection_id()
    }

    pub fn error_code(&self) -> InstanceErrorCode {
        match &self.kind {
            InstanceEventKind::InstanceError { conflict } => conflict.error_code(),
            _ => InstanceErrorCode::NotInUse,
        }
    }

    pub fn conflict(&self) -> Option<&InstanceConflict> {
        match &self.kind {
            InstanceEventKind::InstanceError { conflict } => Some(conflict),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, InstanceEventKind::Unknown { .. })
    }
}
