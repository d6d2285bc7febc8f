//! Event processor contracts and dispatch
//!
//! A repository reacts to cohort events by implementing one or more of the
//! processor traits. Every operation has a default so implementations only
//! override the transitions they care about. The same traits are used on the
//! outbound side: a publisher implements them to turn local changes into
//! events.

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::conflict::{
    ConflictingAttributeTypeDefs, ConflictingInstances, ConflictingType, ConflictingTypeDefs,
    InstanceConflict, InvalidInstanceEvent, InvalidTypeDefEvent, RegistryConflict, TypeDefConflict,
    TypeDefPatchMismatch,
};
use crate::envelope::EventSource;
use crate::instance_event::{ClassificationTarget, InstanceEvent, InstanceEventKind, PurgeTarget};
use crate::model::{
    AttributeTypeDef, Classification, EntityDetail, EntityProxy, InstanceGraph,
    InstanceIdentifiers, InstanceIdentity, Relationship, TypeDef, TypeDefPatch, TypeDefSummary,
};
use crate::registry_event::{MemberRegistration, RegistryEvent, RegistryEventKind, RemoteConnection};
use crate::typedef_event::{TypeDefEvent, TypeDefEventKind};
use crate::Result;

/// Whether an event reached a processor operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// Unrecognized event; no operation was invoked.
    Discarded,
}

/// Reacts to entity and relationship transitions.
///
/// Implementations are shared across tasks and may be called concurrently
/// for different instances.
#[async_trait]
pub trait InstanceEventProcessor: Send + Sync {
    /// Hand a complete event to this processor. By default the event is
    /// dispatched to the matching operation below.
    async fn send_instance_event(&self, cohort_name: &str, event: InstanceEvent) -> Result<()> {
        dispatch_instance_event(self, cohort_name, &event)
            .await
            .map(|_| ())
    }

    // ---- entities ----

    async fn process_new_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_updated_entity_event(
        &self,
        _source: &EventSource,
        _original_entity: &EntityDetail,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_undone_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    /// Older form without the classification value.
    async fn process_classified_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_classified_entity_event_with_classification(
        &self,
        source: &EventSource,
        entity: &EntityDetail,
        _classification: &Classification,
    ) -> Result<()> {
        self.process_classified_entity_event(source, entity).await
    }

    async fn process_classified_entity_proxy_event(
        &self,
        _source: &EventSource,
        _entity: &EntityProxy,
        _classification: &Classification,
    ) -> Result<()> {
        Ok(())
    }

    /// Older form without the removed classification.
    async fn process_declassified_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_declassified_entity_event_with_classification(
        &self,
        source: &EventSource,
        entity: &EntityDetail,
        _original_classification: &Classification,
    ) -> Result<()> {
        self.process_declassified_entity_event(source, entity).await
    }

    async fn process_declassified_entity_proxy_event(
        &self,
        _source: &EventSource,
        _entity: &EntityProxy,
        _original_classification: &Classification,
    ) -> Result<()> {
        Ok(())
    }

    /// Older form without the classification values.
    async fn process_reclassified_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_reclassified_entity_event_with_classification(
        &self,
        source: &EventSource,
        entity: &EntityDetail,
        _original_classification: &Classification,
        _classification: &Classification,
    ) -> Result<()> {
        self.process_reclassified_entity_event(source, entity).await
    }

    async fn process_reclassified_entity_proxy_event(
        &self,
        _source: &EventSource,
        _entity: &EntityProxy,
        _original_classification: &Classification,
        _classification: &Classification,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_deleted_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    /// Purges are idempotent: purging an unknown or already purged GUID is
    /// not an error.
    async fn process_purged_entity_event(
        &self,
        _source: &EventSource,
        _identifiers: &InstanceIdentifiers,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_purged_entity_detail_event(
        &self,
        source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.process_purged_entity_event(source, &entity.identifiers())
            .await
    }

    /// Runs the delete and then the purge operation.
    async fn process_delete_purged_entity_event(
        &self,
        source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.process_deleted_entity_event(source, entity).await?;
        self.process_purged_entity_detail_event(source, entity)
            .await
    }

    async fn process_restored_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_identified_entity_event(
        &self,
        _source: &EventSource,
        _original_entity_guid: &str,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_typed_entity_event(
        &self,
        _source: &EventSource,
        _original_type_def_summary: &TypeDefSummary,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_homed_entity_event(
        &self,
        _source: &EventSource,
        _original_home_metadata_collection_id: &str,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    /// Only the home repository is expected to answer with a refreshed event.
    async fn process_refresh_entity_request(
        &self,
        _source: &EventSource,
        _identifiers: &InstanceIdentifiers,
        _home_metadata_collection_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_refreshed_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Ok(())
    }

    // ---- relationships ----

    async fn process_new_relationship_event(
        &self,
        _source: &EventSource,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_updated_relationship_event(
        &self,
        _source: &EventSource,
        _original_relationship: &Relationship,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_undone_relationship_event(
        &self,
        _source: &EventSource,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_deleted_relationship_event(
        &self,
        _source: &EventSource,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_purged_relationship_event(
        &self,
        _source: &EventSource,
        _identifiers: &InstanceIdentifiers,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_purged_relationship_detail_event(
        &self,
        source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.process_purged_relationship_event(source, &relationship.identifiers())
            .await
    }

    async fn process_delete_purged_relationship_event(
        &self,
        source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.process_deleted_relationship_event(source, relationship)
            .await?;
        self.process_purged_relationship_detail_event(source, relationship)
            .await
    }

    async fn process_restored_relationship_event(
        &self,
        _source: &EventSource,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_identified_relationship_event(
        &self,
        _source: &EventSource,
        _original_relationship_guid: &str,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_typed_relationship_event(
        &self,
        _source: &EventSource,
        _original_type_def_summary: &TypeDefSummary,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_homed_relationship_event(
        &self,
        _source: &EventSource,
        _original_home_metadata_collection_id: &str,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_refresh_relationship_request(
        &self,
        _source: &EventSource,
        _identifiers: &InstanceIdentifiers,
        _home_metadata_collection_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_refreshed_relationship_event(
        &self,
        _source: &EventSource,
        _relationship: &Relationship,
    ) -> Result<()> {
        Ok(())
    }

    // ---- batches and conflicts ----

    async fn process_instance_batch_event(
        &self,
        _source: &EventSource,
        _batch: &InstanceGraph,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_conflicting_instances_event(
        &self,
        _source: &EventSource,
        _conflict: &ConflictingInstances,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_conflicting_type_event(
        &self,
        _source: &EventSource,
        _conflict: &ConflictingType,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_invalid_instance_event(
        &self,
        _source: &EventSource,
        _report: &InvalidInstanceEvent,
    ) -> Result<()> {
        Ok(())
    }
}

/// Reacts to changes in the cohort's type system.
#[async_trait]
pub trait TypeDefEventProcessor: Send + Sync {
    async fn send_type_def_event(&self, cohort_name: &str, event: TypeDefEvent) -> Result<()> {
        dispatch_type_def_event(self, cohort_name, &event)
            .await
            .map(|_| ())
    }

    async fn process_new_type_def_event(
        &self,
        _source: &EventSource,
        _type_def: &TypeDef,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_new_attribute_type_def_event(
        &self,
        _source: &EventSource,
        _attribute_type_def: &AttributeTypeDef,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_updated_type_def_event(
        &self,
        _source: &EventSource,
        _patch: &TypeDefPatch,
    ) -> Result<()> {
        Ok(())
    }

    /// The TypeDef is only matched when both the GUID and the name agree.
    async fn process_deleted_type_def_event(
        &self,
        _source: &EventSource,
        _type_def_guid: &str,
        _type_def_name: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_deleted_attribute_type_def_event(
        &self,
        _source: &EventSource,
        _attribute_type_def_guid: &str,
        _attribute_type_def_name: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_identified_type_def_event(
        &self,
        _source: &EventSource,
        _original_type_def_summary: &TypeDefSummary,
        _type_def: &TypeDef,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_re_identified_attribute_type_def_event(
        &self,
        _source: &EventSource,
        _original_attribute_type_def: &AttributeTypeDef,
        _attribute_type_def: &AttributeTypeDef,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_type_def_conflict_event(
        &self,
        _source: &EventSource,
        _conflict: &ConflictingTypeDefs,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_attribute_type_def_conflict_event(
        &self,
        _source: &EventSource,
        _conflict: &ConflictingAttributeTypeDefs,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_type_def_patch_mismatch_event(
        &self,
        _source: &EventSource,
        _mismatch: &TypeDefPatchMismatch,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_invalid_type_def_event(
        &self,
        _source: &EventSource,
        _report: &InvalidTypeDefEvent,
    ) -> Result<()> {
        Ok(())
    }
}

/// Reacts to members joining and leaving the cohort.
#[async_trait]
pub trait RegistryEventProcessor: Send + Sync {
    async fn send_registry_event(&self, cohort_name: &str, event: RegistryEvent) -> Result<()> {
        dispatch_registry_event(self, cohort_name, &event)
            .await
            .map(|_| ())
    }

    async fn process_registration_event(
        &self,
        _source: &EventSource,
        _registration: &MemberRegistration,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_registration_refresh_request(&self, _source: &EventSource) -> Result<()> {
        Ok(())
    }

    async fn process_re_registration_event(
        &self,
        _source: &EventSource,
        _registration: &MemberRegistration,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_un_registration_event(
        &self,
        _source: &EventSource,
        _metadata_collection_name: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_conflicting_collection_id_event(
        &self,
        _source: &EventSource,
        _target_metadata_collection_id: &str,
        _error_message: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_bad_connection_event(
        &self,
        _source: &EventSource,
        _target_metadata_collection_id: &str,
        _remote_connection: Option<&RemoteConnection>,
        _error_message: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn process_invalid_registry_event(
        &self,
        _source: &EventSource,
        _target_metadata_collection_id: Option<&str>,
        _error_message: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// A processor for both instance and type events.
pub trait CohortEventProcessor: InstanceEventProcessor + TypeDefEventProcessor {}

impl<T> CohortEventProcessor for T where T: InstanceEventProcessor + TypeDefEventProcessor + ?Sized {}

/// Call the operation that matches the event's transition.
#[instrument(skip(processor, event), fields(event_type = %event.event_type()))]
pub async fn dispatch_instance_event<P>(
    processor: &P,
    cohort_name: &str,
    event: &InstanceEvent,
) -> Result<DispatchOutcome>
where
    P: InstanceEventProcessor + ?Sized,
{
    use InstanceEventKind as K;

    let source = EventSource::new(cohort_name, event.originator().clone());
    let s = &source;

    match event.kind() {
        K::NewEntity { entity } => processor.process_new_entity_event(s, entity).await?,
        K::UpdatedEntity {
            original_entity,
            entity,
        } => {
            processor
                .process_updated_entity_event(s, original_entity, entity)
                .await?
        }
        K::UndoneEntity { entity } => processor.process_undone_entity_event(s, entity).await?,
        K::ClassifiedEntity {
            target,
            classification,
        } => match target {
            ClassificationTarget::Entity(entity) => {
                processor
                    .process_classified_entity_event_with_classification(s, entity, classification)
                    .await?
            }
            ClassificationTarget::Proxy(proxy) => {
                processor
                    .process_classified_entity_proxy_event(s, proxy, classification)
                    .await?
            }
        },
        K::DeclassifiedEntity {
            target,
            original_classification,
        } => match target {
            ClassificationTarget::Entity(entity) => {
                processor
                    .process_declassified_entity_event_with_classification(
                        s,
                        entity,
                        original_classification,
                    )
                    .await?
            }
            ClassificationTarget::Proxy(proxy) => {
                processor
                    .process_declassified_entity_proxy_event(s, proxy, original_classification)
                    .await?
            }
        },
        K::ReclassifiedEntity {
            target,
            original_classification,
            classification,
        } => match target {
            ClassificationTarget::Entity(entity) => {
                processor
                    .process_reclassified_entity_event_with_classification(
                        s,
                        entity,
                        original_classification,
                        classification,
                    )
                    .await?
            }
            ClassificationTarget::Proxy(proxy) => {
                processor
                    .process_reclassified_entity_proxy_event(
                        s,
                        proxy,
                        original_classification,
                        classification,
                    )
                    .await?
            }
        },
        K::DeletedEntity { entity } => processor.process_deleted_entity_event(s, entity).await?,
        K::PurgedEntity { purged } => match purged {
            PurgeTarget::Identifiers(ids) => processor.process_purged_entity_event(s, ids).await?,
            PurgeTarget::Instance(entity) => {
                processor
                    .process_purged_entity_detail_event(s, entity)
                    .await?
            }
        },
        K::DeletePurgedEntity { entity } => {
            processor
                .process_delete_purged_entity_event(s, entity)
                .await?
        }
        K::RestoredEntity { entity } => processor.process_restored_entity_event(s, entity).await?,
        K::ReIdentifiedEntity {
            original_instance_guid,
            entity,
        } => {
            processor
                .process_re_identified_entity_event(s, original_instance_guid, entity)
                .await?
        }
        K::ReTypedEntity {
            original_type_def_summary,
            entity,
        } => {
            processor
                .process_re_typed_entity_event(s, original_type_def_summary, entity)
                .await?
        }
        K::ReHomedEntity {
            original_home_metadata_collection_id,
            entity,
        } => {
            processor
                .process_re_homed_entity_event(s, original_home_metadata_collection_id, entity)
                .await?
        }
        K::RefreshEntityRequest { request } => {
            processor
                .process_refresh_entity_request(
                    s,
                    &request.identifiers,
                    &request.home_metadata_collection_id,
                )
                .await?
        }
        K::RefreshedEntity { entity } => {
            processor.process_refreshed_entity_event(s, entity).await?
        }

        K::NewRelationship { relationship } => {
            processor
                .process_new_relationship_event(s, relationship)
                .await?
        }
        K::UpdatedRelationship {
            original_relationship,
            relationship,
        } => {
            processor
                .process_updated_relationship_event(s, original_relationship, relationship)
                .await?
        }
        K::UndoneRelationship { relationship } => {
            processor
                .process_undone_relationship_event(s, relationship)
                .await?
        }
        K::DeletedRelationship { relationship } => {
            processor
                .process_deleted_relationship_event(s, relationship)
                .await?
        }
        K::PurgedRelationship { purged } => match purged {
            PurgeTarget::Identifiers(ids) => {
                processor.process_purged_relationship_event(s, ids).await?
            }
            PurgeTarget::Instance(relationship) => {
                processor
                    .process_purged_relationship_detail_event(s, relationship)
                    .await?
            }
        },
        K::DeletePurgedRelationship { relationship } => {
            processor
                .process_delete_purged_relationship_event(s, relationship)
                .await?
        }
        K::RestoredRelationship { relationship } => {
            processor
                .process_restored_relationship_event(s, relationship)
                .await?
        }
        K::ReIdentifiedRelationship {
            original_instance_guid,
            relationship,
        } => {
            processor
                .process_re_identified_relationship_event(s, original_instance_guid, relationship)
                .await?
        }
        K::ReTypedRelationship {
            original_type_def_summary,
            relationship,
        } => {
            processor
                .process_re_typed_relationship_event(s, original_type_def_summary, relationship)
                .await?
        }
        K::ReHomedRelationship {
            original_home_metadata_collection_id,
            relationship,
        } => {
            processor
                .process_re_homed_relationship_event(
                    s,
                    original_home_metadata_collection_id,
                    relationship,
                )
                .await?
        }
        K::RefreshRelationshipRequest { request } => {
            processor
                .process_refresh_relationship_request(
                    s,
                    &request.identifiers,
                    &request.home_metadata_collection_id,
                )
                .await?
        }
        K::RefreshedRelationship { relationship } => {
            processor
                .process_refreshed_relationship_event(s, relationship)
                .await?
        }

        K::BatchInstances { batch } => processor.process_instance_batch_event(s, batch).await?,
        K::InstanceError { conflict } => match conflict {
            InstanceConflict::ConflictingInstances(c) => {
                processor.process_conflicting_instances_event(s, c).await?
            }
            InstanceConflict::ConflictingType(c) => {
                processor.process_conflicting_type_event(s, c).await?
            }
            InstanceConflict::InvalidEvent(c) => {
                processor.process_invalid_instance_event(s, c).await?
            }
        },
        K::Unknown { event_type } => {
            debug!(
                cohort = cohort_name,
                event_type = %event_type,
                originator = %s.metadata_collection_id(),
                "Ignoring unrecognized instance event"
            );
            return Ok(DispatchOutcome::Discarded);
        }
    }

    Ok(DispatchOutcome::Dispatched)
}

#[instrument(skip(processor, event), fields(event_type = %event.event_type()))]
pub async fn dispatch_type_def_event<P>(
    processor: &P,
    cohort_name: &str,
    event: &TypeDefEvent,
) -> Result<DispatchOutcome>
where
    P: TypeDefEventProcessor + ?Sized,
{
    use TypeDefEventKind as K;

    let source = EventSource::new(cohort_name, event.originator().clone());
    let s = &source;

    match event.kind() {
        K::NewTypeDef { type_def } => processor.process_new_type_def_event(s, type_def).await?,
        K::NewAttributeTypeDef { attribute_type_def } => {
            processor
                .process_new_attribute_type_def_event(s, attribute_type_def)
                .await?
        }
        K::UpdatedTypeDef { patch } => processor.process_updated_type_def_event(s, patch).await?,
        K::DeletedTypeDef {
            type_def_guid,
            type_def_name,
        } => {
            processor
                .process_deleted_type_def_event(s, type_def_guid, type_def_name)
                .await?
        }
        K::DeletedAttributeTypeDef {
            attribute_type_def_guid,
            attribute_type_def_name,
        } => {
            processor
                .process_deleted_attribute_type_def_event(
                    s,
                    attribute_type_def_guid,
                    attribute_type_def_name,
                )
                .await?
        }
        K::ReIdentifiedTypeDef {
            original_type_def_summary,
            type_def,
        } => {
            processor
                .process_re_identified_type_def_event(s, original_type_def_summary, type_def)
                .await?
        }
        K::ReIdentifiedAttributeTypeDef {
            original_attribute_type_def,
            attribute_type_def,
        } => {
            processor
                .process_re_identified_attribute_type_def_event(
                    s,
                    original_attribute_type_def,
                    attribute_type_def,
                )
                .await?
        }
        K::TypeDefError { conflict } => match conflict {
            TypeDefConflict::ConflictingTypeDefs(c) => {
                processor.process_type_def_conflict_event(s, c).await?
            }
            TypeDefConflict::ConflictingAttributeTypeDefs(c) => {
                processor
                    .process_attribute_type_def_conflict_event(s, c)
                    .await?
            }
            TypeDefConflict::PatchMismatch(c) => {
                processor.process_type_def_patch_mismatch_event(s, c).await?
            }
            TypeDefConflict::InvalidEvent(c) => {
                processor.process_invalid_type_def_event(s, c).await?
            }
        },
        K::Unknown { event_type } => {
            debug!(
                cohort = cohort_name,
                event_type = %event_type,
                originator = %s.metadata_collection_id(),
                "Ignoring unrecognized TypeDef event"
            );
            return Ok(DispatchOutcome::Discarded);
        }
    }

    Ok(DispatchOutcome::Dispatched)
}

#[instrument(skip(processor, event), fields(event_type = %event.event_type()))]
pub async fn dispatch_registry_event<P>(
    processor: &P,
    cohort_name: &str,
    event: &RegistryEvent,
) -> Result<DispatchOutcome>
where
    P: RegistryEventProcessor + ?Sized,
{
    let source = EventSource::new(cohort_name, event.originator().clone());
    let s = &source;

    match event.kind() {
        RegistryEventKind::Registration { registration } => {
            processor.process_registration_event(s, registration).await?
        }
        RegistryEventKind::RefreshRegistrationRequest => {
            processor.process_registration_refresh_request(s).await?
        }
        RegistryEventKind::ReRegistration { registration } => {
            processor
                .process_re_registration_event(s, registration)
                .await?
        }
        RegistryEventKind::UnRegistration {
            metadata_collection_name,
        } => {
            processor
                .process_un_registration_event(s, metadata_collection_name.as_deref())
                .await?
        }
        RegistryEventKind::RegistryError { conflict } => match conflict {
            RegistryConflict::ConflictingCollectionId {
                target_metadata_collection_id,
                error_message,
            } => {
                processor
                    .process_conflicting_collection_id_event(
                        s,
                        target_metadata_collection_id,
                        error_message,
                    )
                    .await?
            }
            RegistryConflict::BadRemoteConnection {
                target_metadata_collection_id,
                target_remote_connection,
                error_message,
            } => {
                processor
                    .process_bad_connection_event(
                        s,
                        target_metadata_collection_id,
                        target_remote_connection.as_ref(),
                        error_message,
                    )
                    .await?
            }
            RegistryConflict::InvalidEvent {
                target_metadata_collection_id,
                error_message,
            } => {
                processor
                    .process_invalid_registry_event(
                        s,
                        target_metadata_collection_id.as_deref(),
                        error_message,
                    )
                    .await?
            }
        },
        RegistryEventKind::Unknown { event_type } => {
            debug!(
                cohort = cohort_name,
                event_type = %event_type,
                originator = %s.metadata_collection_id(),
                "Ignoring unrecognized registry event"
            );
            return Ok(DispatchOutcome::Discarded);
        }
    }

    Ok(DispatchOutcome::Dispatched)
}

/// Logs every event it receives. Useful as a diagnostic listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProcessor;

#[async_trait]
impl InstanceEventProcessor for LoggingProcessor {
    async fn send_instance_event(&self, cohort_name: &str, event: InstanceEvent) -> Result<()> {
        info!(
            cohort = cohort_name,
            event_type = %event.event_type(),
            instance_guid = event.instance_guid().as_deref().unwrap_or("-"),
            originator = %event.originator().metadata_collection_id,
            "Instance event"
        );
        Ok(())
    }
}

#[async_trait]
impl TypeDefEventProcessor for LoggingProcessor {
    async fn send_type_def_event(&self, cohort_name: &str, event: TypeDefEvent) -> Result<()> {
        let (guid, name) = event.kind().identity().unwrap_or(("-", "-"));
        info!(
            cohort = cohort_name,
            event_type = %event.event_type(),
            type_def_guid = guid,
            type_def_name = name,
            originator = %event.originator().metadata_collection_id,
            "TypeDef event"
        );
        Ok(())
    }
}

#[async_trait]
impl RegistryEventProcessor for LoggingProcessor {
    async fn send_registry_event(&self, cohort_name: &str, event: RegistryEvent) -> Result<()> {
        info!(
            cohort = cohort_name,
            event_type = %event.event_type(),
            originator = %event.originator().metadata_collection_id,
            "Registry event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Originator;
    use crate::model::{InstanceProvenance, InstanceType};
    use crate::vocabulary::WireDescriptor;
    use crate::OmrsError;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio_test::assert_ok;

    /// Records the operations it receives, in order.
    #[derive(Default)]
    struct RecordingProcessor {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on_new: bool,
    }

    impl RecordingProcessor {
        async fn record(&self, call: String) {
            self.calls.lock().await.push(call);
        }

        async fn calls(&self) -> Vec<String> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl InstanceEventProcessor for RecordingProcessor {
        async fn process_new_entity_event(
            &self,
            _source: &EventSource,
            entity: &EntityDetail,
        ) -> Result<()> {
            if self.fail_on_new {
                return Err(OmrsError::processing("store unavailable"));
            }
            self.record(format!("new:{}", entity.guid())).await;
            Ok(())
        }

        async fn process_classified_entity_event(
            &self,
            _source: &EventSource,
            entity: &EntityDetail,
        ) -> Result<()> {
            self.record(format!("classified:{}", entity.guid())).await;
            Ok(())
        }

        async fn process_deleted_entity_event(
            &self,
            _source: &EventSource,
            entity: &EntityDetail,
        ) -> Result<()> {
            self.record(format!("deleted:{}", entity.guid())).await;
            Ok(())
        }

        async fn process_purged_entity_event(
            &self,
            _source: &EventSource,
            identifiers: &InstanceIdentifiers,
        ) -> Result<()> {
            self.record(format!("purged:{}", identifiers.instance_guid))
                .await;
            Ok(())
        }

        async fn process_conflicting_instances_event(
            &self,
            source: &EventSource,
            conflict: &ConflictingInstances,
        ) -> Result<()> {
            self.record(format!(
                "conflict:{}:{}",
                source.metadata_collection_id(),
                conflict.target_instance_guid
            ))
            .await;
            Ok(())
        }
    }

    #[async_trait]
    impl TypeDefEventProcessor for RecordingProcessor {
        async fn process_type_def_patch_mismatch_event(
            &self,
            _source: &EventSource,
            mismatch: &TypeDefPatchMismatch,
        ) -> Result<()> {
            self.record(format!("mismatch:{}", mismatch.error_message))
                .await;
            Ok(())
        }
    }

    #[async_trait]
    impl RegistryEventProcessor for RecordingProcessor {
        async fn process_un_registration_event(
            &self,
            source: &EventSource,
            _metadata_collection_name: Option<&str>,
        ) -> Result<()> {
            self.record(format!("left:{}", source.metadata_collection_id()))
                .await;
            Ok(())
        }
    }

    fn asset(guid: &str) -> EntityDetail {
        EntityDetail::new(guid, InstanceType::new("t-asset", "Asset", 1), "mc-B")
    }

    fn inbound(kind: InstanceEventKind) -> InstanceEvent {
        InstanceEvent::outbound(Originator::new("mc-B"), kind).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_new_entity() {
        let processor = RecordingProcessor::default();
        let event = inbound(InstanceEventKind::NewEntity { entity: asset("e1") });

        let outcome = assert_ok!(dispatch_instance_event(&processor, "cohort", &event).await);

        assert_eq!(outcome, DispatchOutcome::Dispatched);
        assert_eq!(processor.calls().await, vec!["new:e1"]);
    }

    #[tokio::test]
    async fn test_unknown_event_invokes_nothing() {
        let processor = RecordingProcessor::default();
        let event = inbound(InstanceEventKind::Unknown {
            event_type: WireDescriptor {
                ordinal: 250,
                name: "Future".to_string(),
                description: String::new(),
            },
        });

        let outcome = assert_ok!(dispatch_instance_event(&processor, "cohort", &event).await);

        assert_eq!(outcome, DispatchOutcome::Discarded);
        assert!(processor.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_purge_runs_delete_then_purge() {
        let processor = RecordingProcessor::default();
        let event = inbound(InstanceEventKind::DeletePurgedEntity { entity: asset("e1") });

        assert_ok!(processor.send_instance_event("cohort", event).await);

        assert_eq!(processor.calls().await, vec!["deleted:e1", "purged:e1"]);
    }

    #[tokio::test]
    async fn test_purge_twice_is_not_an_error() {
        let processor = RecordingProcessor::default();
        let event = inbound(InstanceEventKind::PurgedEntity {
            purged: PurgeTarget::Identifiers(InstanceIdentifiers::new("t-asset", "Asset", "e1")),
        });

        assert_ok!(dispatch_instance_event(&processor, "cohort", &event).await);
        assert_ok!(dispatch_instance_event(&processor, "cohort", &event).await);

        assert_eq!(processor.calls().await, vec!["purged:e1", "purged:e1"]);
    }

    #[tokio::test]
    async fn test_purge_by_detail_reaches_identifier_form() {
        let processor = RecordingProcessor::default();
        let event = inbound(InstanceEventKind::PurgedEntity {
            purged: PurgeTarget::Instance(asset("e7")),
        });

        assert_ok!(dispatch_instance_event(&processor, "cohort", &event).await);

        assert_eq!(processor.calls().await, vec!["purged:e7"]);
    }

    #[tokio::test]
    async fn test_classification_reaches_older_operation() {
        let processor = RecordingProcessor::default();
        let event = inbound(InstanceEventKind::ClassifiedEntity {
            target: ClassificationTarget::Entity(asset("e1")),
            classification: Classification::new("Confidentiality"),
        });

        assert_ok!(dispatch_instance_event(&processor, "cohort", &event).await);

        assert_eq!(processor.calls().await, vec!["classified:e1"]);
    }

    #[tokio::test]
    async fn test_conflict_dispatch() {
        let processor = RecordingProcessor::default();
        let conflict = InstanceConflict::ConflictingInstances(ConflictingInstances {
            target_metadata_collection_id: "mc-A".to_string(),
            target_type_def: TypeDefSummary::new("t-asset", "Asset", 1),
            target_instance_guid: "e2".to_string(),
            other_metadata_collection_id: "mc-B".to_string(),
            other_origin: InstanceProvenance::LocalCohort,
            other_type_def: TypeDefSummary::new("t-process", "Process", 1),
            other_instance_guid: "e2".to_string(),
            error_message: "duplicate GUID".to_string(),
        });
        let event = inbound(InstanceEventKind::InstanceError { conflict });

        assert_ok!(dispatch_instance_event(&processor, "cohort", &event).await);

        assert_eq!(processor.calls().await, vec!["conflict:mc-B:e2"]);
    }

    #[tokio::test]
    async fn test_processor_error_is_returned() {
        let processor = RecordingProcessor {
            fail_on_new: true,
            ..Default::default()
        };
        let event = inbound(InstanceEventKind::NewEntity { entity: asset("e1") });

        let result = dispatch_instance_event(&processor, "cohort", &event).await;
        assert!(matches!(result, Err(OmrsError::ProcessingError(_))));
    }

    #[tokio::test]
    async fn test_patch_mismatch_dispatch() {
        let processor = RecordingProcessor::default();
        let mismatch = TypeDefPatchMismatch::new(
            "mc-A",
            TypeDefSummary::new("t-asset", "Asset", 2),
            TypeDef::new(TypeDefSummary::new("t-asset", "Asset", 3)),
        );
        let event = TypeDefEvent::outbound(
            Originator::new("mc-B"),
            TypeDefEventKind::TypeDefError {
                conflict: TypeDefConflict::PatchMismatch(mismatch),
            },
        )
        .unwrap();

        assert_ok!(processor.send_type_def_event("cohort", event).await);

        let calls = processor.calls().await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("mismatch:"));
        assert!(calls[0].len() > "mismatch:".len());
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let processor = RecordingProcessor::default();
        let event = RegistryEvent::outbound(
            Originator::new("mc-C"),
            RegistryEventKind::UnRegistration {
                metadata_collection_name: None,
            },
        )
        .unwrap();

        let outcome = assert_ok!(dispatch_registry_event(&processor, "cohort", &event).await);

        assert_eq!(outcome, DispatchOutcome::Dispatched);
        assert_eq!(processor.calls().await, vec!["left:mc-C"]);
    }

    #[tokio::test]
    async fn test_cohort_processor_as_trait_object() {
        let processor: Arc<dyn CohortEventProcessor> = Arc::new(LoggingProcessor);
        let event = inbound(InstanceEventKind::NewEntity { entity: asset("e1") });
        assert_ok!(processor.send_instance_event("cohort", event).await);
    }
}
