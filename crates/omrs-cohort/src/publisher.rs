//! Outbound event publisher
//!
//! Local changes are announced by calling processor operations on the
//! publisher. Each call builds the event, runs the outbound security filter
//! and queues the envelope for a background worker that hands it to the
//! topic. Queueing never blocks and transport failures never reach the
//! caller; they are logged and counted.

use async_trait::async_trait;
use omrs_core::{
    AttributeTypeDef, Classification, ClassificationTarget, ConflictingAttributeTypeDefs,
    ConflictingInstances, ConflictingType, ConflictingTypeDefs, EntityDetail, EntityProxy,
    EventSource, EventsSecurityFilter, InstanceConflict, InstanceEvent, InstanceEventKind,
    InstanceEventProcessor, InstanceGraph, InstanceIdentifiers, InvalidInstanceEvent,
    InvalidTypeDefEvent, MemberRegistration, OmrsError, Originator, PassThroughFilter,
    PurgeTarget, RefreshRequest, RegistryConflict, RegistryEvent, RegistryEventKind,
    RegistryEventProcessor, Relationship, RemoteConnection, Result, TypeDef, TypeDefConflict,
    TypeDefEvent, TypeDefEventKind, TypeDefEventProcessor, TypeDefPatch, TypeDefPatchMismatch,
    TypeDefSummary, WireEnvelope,
};
use omrs_shared::{CohortConfig, EventMetrics};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::topic::CohortTopic;

/// What happened to an event handed to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Queued for the topic.
    Queued,
    /// Suppressed by the outbound security filter.
    Filtered,
    /// Could not be queued; the reason has been logged.
    Dropped,
}

pub struct OutboundEventPublisher {
    cohort_name: String,
    originator: Originator,
    filter: Arc<dyn EventsSecurityFilter>,
    event_tx: mpsc::Sender<WireEnvelope>,
    worker: JoinHandle<()>,
}

impl OutboundEventPublisher {
    /// Start a publisher for `cohort_name`. Must be called from within a
    /// tokio runtime.
    pub fn new(
        cohort_name: impl Into<String>,
        originator: Originator,
        topic: Arc<dyn CohortTopic>,
        queue_capacity: usize,
    ) -> Self {
        let cohort_name = cohort_name.into();
        let (event_tx, event_rx) = mpsc::channel(queue_capacity.max(1));

        info!(
            cohort = %cohort_name,
            metadata_collection_id = %originator.metadata_collection_id,
            queue_capacity,
            "Starting outbound event publisher"
        );

        let worker = tokio::spawn(Self::publish_worker(cohort_name.clone(), topic, event_rx));

        Self {
            cohort_name,
            originator,
            filter: Arc::new(PassThroughFilter),
            event_tx,
            worker,
        }
    }

    pub fn from_config(config: &CohortConfig, topic: Arc<dyn CohortTopic>) -> Self {
        Self::new(
            config.cohort_name.clone(),
            config.originator(),
            topic,
            config.publisher.queue_capacity,
        )
    }

    pub fn with_filter(mut self, filter: Arc<dyn EventsSecurityFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn cohort_name(&self) -> &str {
        &self.cohort_name
    }

    pub fn originator(&self) -> &Originator {
        &self.originator
    }

    async fn publish_worker(
        cohort_name: String,
        topic: Arc<dyn CohortTopic>,
        mut event_rx: mpsc::Receiver<WireEnvelope>,
    ) {
        while let Some(envelope) = event_rx.recv().await {
            let category = envelope.category.name.clone();
            match topic.publish(envelope).await {
                Ok(()) => EventMetrics::event_published(&category),
                Err(e) => {
                    error!(cohort = %cohort_name, category = %category, error = %e, "Failed to publish event");
                    EventMetrics::publish_failed("topic");
                }
            }
        }
        debug!(cohort = %cohort_name, "Publisher queue closed, worker stopping");
    }

    fn enqueue(&self, envelope: WireEnvelope) -> PublishOutcome {
        match self.event_tx.try_send(envelope) {
            Ok(()) => PublishOutcome::Queued,
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    cohort = %self.cohort_name,
                    category = %envelope.category,
                    "Publisher queue full, event dropped"
                );
                EventMetrics::publish_failed("queue_full");
                PublishOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                error!(cohort = %self.cohort_name, "Publisher queue closed, event dropped");
                EventMetrics::publish_failed("closed");
                PublishOutcome::Dropped
            }
        }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type()))]
    pub fn publish_instance_event(&self, event: InstanceEvent) -> PublishOutcome {
        match self
            .filter
            .validate_outbound_instance_event(&self.cohort_name, event)
        {
            Some(event) => self.enqueue(WireEnvelope::from_instance_event(&event)),
            None => {
                debug!("Outbound instance event suppressed by security filter");
                EventMetrics::event_filtered("outbound", "instance");
                PublishOutcome::Filtered
            }
        }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type()))]
    pub fn publish_type_def_event(&self, event: TypeDefEvent) -> PublishOutcome {
        match self
            .filter
            .validate_outbound_type_def_event(&self.cohort_name, event)
        {
            Some(event) => self.enqueue(WireEnvelope::from_type_def_event(&event)),
            None => {
                debug!("Outbound TypeDef event suppressed by security filter");
                EventMetrics::event_filtered("outbound", "typedef");
                PublishOutcome::Filtered
            }
        }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type()))]
    pub fn publish_registry_event(&self, event: RegistryEvent) -> PublishOutcome {
        match self
            .filter
            .validate_outbound_registry_event(&self.cohort_name, event)
        {
            Some(event) => self.enqueue(WireEnvelope::from_registry_event(&event)),
            None => {
                debug!("Outbound registry event suppressed by security filter");
                EventMetrics::event_filtered("outbound", "registry");
                PublishOutcome::Filtered
            }
        }
    }

    fn instance(&self, kind: InstanceEventKind) -> Result<()> {
        let event = InstanceEvent::outbound(self.originator.clone(), kind)?;
        self.publish_instance_event(event);
        Ok(())
    }

    fn type_def(&self, kind: TypeDefEventKind) -> Result<()> {
        let event = TypeDefEvent::outbound(self.originator.clone(), kind)?;
        self.publish_type_def_event(event);
        Ok(())
    }

    fn registry(&self, kind: RegistryEventKind) -> Result<()> {
        let event = RegistryEvent::outbound(self.originator.clone(), kind)?;
        self.publish_registry_event(event);
        Ok(())
    }

    /// Stop accepting events and wait for the queue to drain.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            cohort_name,
            event_tx,
            worker,
            ..
        } = self;
        drop(event_tx);
        worker
            .await
            .map_err(|e| OmrsError::InternalError(format!("publisher worker failed: {}", e)))?;
        info!(cohort = %cohort_name, "Outbound event publisher stopped");
        Ok(())
    }
}

fn missing_classification(operation: &str) -> OmrsError {
    OmrsError::invalid_event(format!(
        "{} cannot be sent without the classification; use the form that carries it",
        operation
    ))
}

#[async_trait]
impl InstanceEventProcessor for OutboundEventPublisher {
    async fn send_instance_event(&self, _cohort_name: &str, event: InstanceEvent) -> Result<()> {
        self.publish_instance_event(event);
        Ok(())
    }

    async fn process_new_entity_event(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::NewEntity {
            entity: entity.clone(),
        })
    }

    async fn process_updated_entity_event(
        &self,
        _source: &EventSource,
        original_entity: &EntityDetail,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::UpdatedEntity {
            original_entity: original_entity.clone(),
            entity: entity.clone(),
        })
    }

    async fn process_undone_entity_event(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::UndoneEntity {
            entity: entity.clone(),
        })
    }

    async fn process_classified_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Err(missing_classification("Classified entity event"))
    }

    async fn process_classified_entity_event_with_classification(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
        classification: &Classification,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ClassifiedEntity {
            target: ClassificationTarget::Entity(entity.clone()),
            classification: classification.clone(),
        })
    }

    async fn process_classified_entity_proxy_event(
        &self,
        _source: &EventSource,
        entity: &EntityProxy,
        classification: &Classification,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ClassifiedEntity {
            target: ClassificationTarget::Proxy(entity.clone()),
            classification: classification.clone(),
        })
    }

    async fn process_declassified_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Err(missing_classification("Declassified entity event"))
    }

    async fn process_declassified_entity_event_with_classification(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
        original_classification: &Classification,
    ) -> Result<()> {
        self.instance(InstanceEventKind::DeclassifiedEntity {
            target: ClassificationTarget::Entity(entity.clone()),
            original_classification: original_classification.clone(),
        })
    }

    async fn process_declassified_entity_proxy_event(
        &self,
        _source: &EventSource,
        entity: &EntityProxy,
        original_classification: &Classification,
    ) -> Result<()> {
        self.instance(InstanceEventKind::DeclassifiedEntity {
            target: ClassificationTarget::Proxy(entity.clone()),
            original_classification: original_classification.clone(),
        })
    }

    async fn process_reclassified_entity_event(
        &self,
        _source: &EventSource,
        _entity: &EntityDetail,
    ) -> Result<()> {
        Err(missing_classification("Reclassified entity event"))
    }

    async fn process_reclassified_entity_event_with_classification(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
        original_classification: &Classification,
        classification: &Classification,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReclassifiedEntity {
            target: ClassificationTarget::Entity(entity.clone()),
            original_classification: original_classification.clone(),
            classification: classification.clone(),
        })
    }

    async fn process_reclassified_entity_proxy_event(
        &self,
        _source: &EventSource,
        entity: &EntityProxy,
        original_classification: &Classification,
        classification: &Classification,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReclassifiedEntity {
            target: ClassificationTarget::Proxy(entity.clone()),
            original_classification: original_classification.clone(),
            classification: classification.clone(),
        })
    }

    async fn process_deleted_entity_event(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::DeletedEntity {
            entity: entity.clone(),
        })
    }

    async fn process_purged_entity_event(
        &self,
        _source: &EventSource,
        identifiers: &InstanceIdentifiers,
    ) -> Result<()> {
        self.instance(InstanceEventKind::PurgedEntity {
            purged: PurgeTarget::Identifiers(identifiers.clone()),
        })
    }

    async fn process_purged_entity_detail_event(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::PurgedEntity {
            purged: PurgeTarget::Instance(entity.clone()),
        })
    }

    async fn process_delete_purged_entity_event(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::DeletePurgedEntity {
            entity: entity.clone(),
        })
    }

    async fn process_restored_entity_event(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::RestoredEntity {
            entity: entity.clone(),
        })
    }

    async fn process_re_identified_entity_event(
        &self,
        _source: &EventSource,
        original_entity_guid: &str,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReIdentifiedEntity {
            original_instance_guid: original_entity_guid.to_string(),
            entity: entity.clone(),
        })
    }

    async fn process_re_typed_entity_event(
        &self,
        _source: &EventSource,
        original_type_def_summary: &TypeDefSummary,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReTypedEntity {
            original_type_def_summary: original_type_def_summary.clone(),
            entity: entity.clone(),
        })
    }

    async fn process_re_homed_entity_event(
        &self,
        _source: &EventSource,
        original_home_metadata_collection_id: &str,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReHomedEntity {
            original_home_metadata_collection_id: original_home_metadata_collection_id.to_string(),
            entity: entity.clone(),
        })
    }

    async fn process_refresh_entity_request(
        &self,
        _source: &EventSource,
        identifiers: &InstanceIdentifiers,
        home_metadata_collection_id: &str,
    ) -> Result<()> {
        self.instance(InstanceEventKind::RefreshEntityRequest {
            request: RefreshRequest::new(identifiers.clone(), home_metadata_collection_id),
        })
    }

    async fn process_refreshed_entity_event(
        &self,
        _source: &EventSource,
        entity: &EntityDetail,
    ) -> Result<()> {
        self.instance(InstanceEventKind::RefreshedEntity {
            entity: entity.clone(),
        })
    }

    async fn process_new_relationship_event(
        &self,
        _source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::NewRelationship {
            relationship: relationship.clone(),
        })
    }

    async fn process_updated_relationship_event(
        &self,
        _source: &EventSource,
        original_relationship: &Relationship,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::UpdatedRelationship {
            original_relationship: original_relationship.clone(),
            relationship: relationship.clone(),
        })
    }

    async fn process_undone_relationship_event(
        &self,
        _source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::UndoneRelationship {
            relationship: relationship.clone(),
        })
    }

    async fn process_deleted_relationship_event(
        &self,
        _source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::DeletedRelationship {
            relationship: relationship.clone(),
        })
    }

    async fn process_purged_relationship_event(
        &self,
        _source: &EventSource,
        identifiers: &InstanceIdentifiers,
    ) -> Result<()> {
        self.instance(InstanceEventKind::PurgedRelationship {
            purged: PurgeTarget::Identifiers(identifiers.clone()),
        })
    }

    async fn process_purged_relationship_detail_event(
        &self,
        _source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::PurgedRelationship {
            purged: PurgeTarget::Instance(relationship.clone()),
        })
    }

    async fn process_delete_purged_relationship_event(
        &self,
        _source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::DeletePurgedRelationship {
            relationship: relationship.clone(),
        })
    }

    async fn process_restored_relationship_event(
        &self,
        _source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::RestoredRelationship {
            relationship: relationship.clone(),
        })
    }

    async fn process_re_identified_relationship_event(
        &self,
        _source: &EventSource,
        original_relationship_guid: &str,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReIdentifiedRelationship {
            original_instance_guid: original_relationship_guid.to_string(),
            relationship: relationship.clone(),
        })
    }

    async fn process_re_typed_relationship_event(
        &self,
        _source: &EventSource,
        original_type_def_summary: &TypeDefSummary,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReTypedRelationship {
            original_type_def_summary: original_type_def_summary.clone(),
            relationship: relationship.clone(),
        })
    }

    async fn process_re_homed_relationship_event(
        &self,
        _source: &EventSource,
        original_home_metadata_collection_id: &str,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::ReHomedRelationship {
            original_home_metadata_collection_id: original_home_metadata_collection_id.to_string(),
            relationship: relationship.clone(),
        })
    }

    async fn process_refresh_relationship_request(
        &self,
        _source: &EventSource,
        identifiers: &InstanceIdentifiers,
        home_metadata_collection_id: &str,
    ) -> Result<()> {
        self.instance(InstanceEventKind::RefreshRelationshipRequest {
            request: RefreshRequest::new(identifiers.clone(), home_metadata_collection_id),
        })
    }

    async fn process_refreshed_relationship_event(
        &self,
        _source: &EventSource,
        relationship: &Relationship,
    ) -> Result<()> {
        self.instance(InstanceEventKind::RefreshedRelationship {
            relationship: relationship.clone(),
        })
    }

    async fn process_instance_batch_event(
        &self,
        _source: &EventSource,
        batch: &InstanceGraph,
    ) -> Result<()> {
        self.instance(InstanceEventKind::BatchInstances {
            batch: batch.clone(),
        })
    }

    async fn process_conflicting_instances_event(
        &self,
        _source: &EventSource,
        conflict: &ConflictingInstances,
    ) -> Result<()> {
        self.instance(InstanceEventKind::InstanceError {
            conflict: InstanceConflict::ConflictingInstances(conflict.clone()),
        })
    }

    async fn process_conflicting_type_event(
        &self,
        _source: &EventSource,
        conflict: &ConflictingType,
    ) -> Result<()> {
        self.instance(InstanceEventKind::InstanceError {
            conflict: InstanceConflict::ConflictingType(conflict.clone()),
        })
    }

    async fn process_invalid_instance_event(
        &self,
        _source: &EventSource,
        report: &InvalidInstanceEvent,
    ) -> Result<()> {
        self.instance(InstanceEventKind::InstanceError {
            conflict: InstanceConflict::InvalidEvent(report.clone()),
        })
    }
}

#[async_trait]
impl TypeDefEventProcessor for OutboundEventPublisher {
    async fn send_type_def_event(&self, _cohort_name: &str, event: TypeDefEvent) -> Result<()> {
        self.publish_type_def_event(event);
        Ok(())
    }

    async fn process_new_type_def_event(
        &self,
        _source: &EventSource,
        type_def: &TypeDef,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::NewTypeDef {
            type_def: type_def.clone(),
        })
    }

    async fn process_new_attribute_type_def_event(
        &self,
        _source: &EventSource,
        attribute_type_def: &AttributeTypeDef,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::NewAttributeTypeDef {
            attribute_type_def: attribute_type_def.clone(),
        })
    }

    async fn process_updated_type_def_event(
        &self,
        _source: &EventSource,
        patch: &TypeDefPatch,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::UpdatedTypeDef {
            patch: patch.clone(),
        })
    }

    async fn process_deleted_type_def_event(
        &self,
        _source: &EventSource,
        type_def_guid: &str,
        type_def_name: &str,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::DeletedTypeDef {
            type_def_guid: type_def_guid.to_string(),
            type_def_name: type_def_name.to_string(),
        })
    }

    async fn process_deleted_attribute_type_def_event(
        &self,
        _source: &EventSource,
        attribute_type_def_guid: &str,
        attribute_type_def_name: &str,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::DeletedAttributeTypeDef {
            attribute_type_def_guid: attribute_type_def_guid.to_string(),
            attribute_type_def_name: attribute_type_def_name.to_string(),
        })
    }

    async fn process_re_identified_type_def_event(
        &self,
        _source: &EventSource,
        original_type_def_summary: &TypeDefSummary,
        type_def: &TypeDef,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::ReIdentifiedTypeDef {
            original_type_def_summary: original_type_def_summary.clone(),
            type_def: type_def.clone(),
        })
    }

    async fn process_re_identified_attribute_type_def_event(
        &self,
        _source: &EventSource,
        original_attribute_type_def: &AttributeTypeDef,
        attribute_type_def: &AttributeTypeDef,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::ReIdentifiedAttributeTypeDef {
            original_attribute_type_def: original_attribute_type_def.clone(),
            attribute_type_def: attribute_type_def.clone(),
        })
    }

    async fn process_type_def_conflict_event(
        &self,
        _source: &EventSource,
        conflict: &ConflictingTypeDefs,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::TypeDefError {
            conflict: TypeDefConflict::ConflictingTypeDefs(conflict.clone()),
        })
    }

    async fn process_attribute_type_def_conflict_event(
        &self,
        _source: &EventSource,
        conflict: &ConflictingAttributeTypeDefs,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::TypeDefError {
            conflict: TypeDefConflict::ConflictingAttributeTypeDefs(conflict.clone()),
        })
    }

    async fn process_type_def_patch_mismatch_event(
        &self,
        _source: &EventSource,
        mismatch: &TypeDefPatchMismatch,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::TypeDefError {
            conflict: TypeDefConflict::PatchMismatch(mismatch.clone()),
        })
    }

    async fn process_invalid_type_def_event(
        &self,
        _source: &EventSource,
        report: &InvalidTypeDefEvent,
    ) -> Result<()> {
        self.type_def(TypeDefEventKind::TypeDefError {
            conflict: TypeDefConflict::InvalidEvent(report.clone()),
        })
    }
}

#[async_trait]
impl RegistryEventProcessor for OutboundEventPublisher {
    async fn send_registry_event(&self, _cohort_name: &str, event: RegistryEvent) -> Result<()> {
        self.publish_registry_event(event);
        Ok(())
    }

    async fn process_registration_event(
        &self,
        _source: &EventSource,
        registration: &MemberRegistration,
    ) -> Result<()> {
        self.registry(RegistryEventKind::Registration {
            registration: registration.clone(),
        })
    }

    async fn process_registration_refresh_request(&self, _source: &EventSource) -> Result<()> {
        self.registry(RegistryEventKind::RefreshRegistrationRequest)
    }

    async fn process_re_registration_event(
        &self,
        _source: &EventSource,
        registration: &MemberRegistration,
    ) -> Result<()> {
        self.registry(RegistryEventKind::ReRegistration {
            registration: registration.clone(),
        })
    }

    async fn process_un_registration_event(
        &self,
        _source: &EventSource,
        metadata_collection_name: Option<&str>,
    ) -> Result<()> {
        self.registry(RegistryEventKind::UnRegistration {
            metadata_collection_name: metadata_collection_name.map(str::to_string),
        })
    }

    async fn process_conflicting_collection_id_event(
        &self,
        _source: &EventSource,
        target_metadata_collection_id: &str,
        error_message: &str,
    ) -> Result<()> {
        self.registry(RegistryEventKind::RegistryError {
            conflict: RegistryConflict::ConflictingCollectionId {
                target_metadata_collection_id: target_metadata_collection_id.to_string(),
                error_message: error_message.to_string(),
            },
        })
    }

    async fn process_bad_connection_event(
        &self,
        _source: &EventSource,
        target_metadata_collection_id: &str,
        remote_connection: Option<&RemoteConnection>,
        error_message: &str,
    ) -> Result<()> {
        self.registry(RegistryEventKind::RegistryError {
            conflict: RegistryConflict::BadRemoteConnection {
                target_metadata_collection_id: target_metadata_collection_id.to_string(),
                target_remote_connection: remote_connection.cloned(),
                error_message: error_message.to_string(),
            },
        })
    }

    async fn process_invalid_registry_event(
        &self,
        _source: &EventSource,
        target_metadata_collection_id: Option<&str>,
        error_message: &str,
    ) -> Result<()> {
        self.registry(RegistryEventKind::RegistryError {
            conflict: RegistryConflict::InvalidEvent {
                target_metadata_collection_id: target_metadata_collection_id.map(str::to_string),
                error_message: error_message.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::MockCohortTopic;
    use omrs_core::{
        EventCategory, InstanceEventType, InstanceType, TypeDefEventType, WireDescriptor,
    };
    use tokio_test::{assert_err, assert_ok};

    /// Refuses to let relationships leave the member.
    struct NoRelationships;

    impl EventsSecurityFilter for NoRelationships {
        fn validate_outbound_instance_event(
            &self,
            _cohort_name: &str,
            event: InstanceEvent,
        ) -> Option<InstanceEvent> {
            if event.event_type().is_relationship_event() {
                None
            } else {
                Some(event)
            }
        }
    }

    fn source() -> EventSource {
        EventSource::new("cohort", Originator::new("mc-A"))
    }

    fn asset(guid: &str) -> EntityDetail {
        EntityDetail::new(guid, InstanceType::new("t-asset", "Asset", 1), "mc-A")
    }

    fn link(guid: &str) -> Relationship {
        let one = asset("e1").to_proxy();
        let two = asset("e2").to_proxy();
        Relationship::new(guid, InstanceType::new("t-link", "Link", 1), "mc-A", one, two)
    }

    fn event_type(envelope: &WireEnvelope) -> Option<WireDescriptor> {
        envelope
            .instance_section
            .as_ref()
            .map(|section| section.event_type.clone())
    }

    fn start(topic: Arc<MockCohortTopic>) -> OutboundEventPublisher {
        OutboundEventPublisher::new("cohort", Originator::new("mc-A"), topic, 16)
    }

    fn finish(topic: Arc<MockCohortTopic>) {
        let mut topic = Arc::try_unwrap(topic)
            .ok()
            .expect("worker still holds the topic");
        topic.checkpoint();
    }

    #[tokio::test]
    async fn test_new_entity_is_published() {
        let mut topic = MockCohortTopic::new();
        topic
            .expect_publish()
            .withf(|envelope| {
                envelope.category.resolve::<EventCategory>() == EventCategory::Instance
                    && envelope.originator.metadata_collection_id == "mc-A"
                    && event_type(envelope).map(|t| t.resolve::<InstanceEventType>())
                        == Some(InstanceEventType::NewEntity)
            })
            .times(1)
            .returning(|_| Ok(()));
        let topic = Arc::new(topic);

        let publisher = start(topic.clone());
        publisher
            .process_new_entity_event(&source(), &asset("e1"))
            .await
            .unwrap();
        assert_ok!(publisher.shutdown().await);

        finish(topic);
    }

    #[tokio::test]
    async fn test_filtered_relationship_is_never_published() {
        let mut topic = MockCohortTopic::new();
        topic.expect_publish().times(0);
        let topic = Arc::new(topic);

        let publisher = start(topic.clone()).with_filter(Arc::new(NoRelationships));
        let outcome = publisher.publish_instance_event(
            InstanceEvent::outbound(
                Originator::new("mc-A"),
                InstanceEventKind::NewRelationship {
                    relationship: link("r1"),
                },
            )
            .unwrap(),
        );
        assert_eq!(outcome, PublishOutcome::Filtered);

        publisher
            .process_new_relationship_event(&source(), &link("r2"))
            .await
            .unwrap();
        assert_ok!(publisher.shutdown().await);

        finish(topic);
    }

    #[tokio::test]
    async fn test_topic_failure_does_not_reach_caller() {
        let mut topic = MockCohortTopic::new();
        topic
            .expect_publish()
            .times(1)
            .returning(|_| Err(OmrsError::TransportError("broker unavailable".to_string())));
        let topic = Arc::new(topic);

        let publisher = start(topic.clone());
        assert_ok!(
            publisher
                .process_deleted_entity_event(&source(), &asset("e1"))
                .await
        );
        assert_ok!(publisher.shutdown().await);

        finish(topic);
    }

    #[tokio::test]
    async fn test_delete_purge_is_one_event() {
        let mut topic = MockCohortTopic::new();
        topic
            .expect_publish()
            .withf(|envelope| {
                event_type(envelope).map(|t| t.resolve::<InstanceEventType>())
                    == Some(InstanceEventType::DeletePurgedEntity)
            })
            .times(1)
            .returning(|_| Ok(()));
        let topic = Arc::new(topic);

        let publisher = start(topic.clone());
        publisher
            .process_delete_purged_entity_event(&source(), &asset("e1"))
            .await
            .unwrap();
        assert_ok!(publisher.shutdown().await);

        finish(topic);
    }

    #[tokio::test]
    async fn test_patch_mismatch_is_published_as_type_def_error() {
        let mut topic = MockCohortTopic::new();
        topic
            .expect_publish()
            .withf(|envelope| {
                let section = match &envelope.type_def_section {
                    Some(section) => section,
                    None => return false,
                };
                section.event_type.resolve::<TypeDefEventType>() == TypeDefEventType::TypeDefError
                    && envelope
                        .conflict
                        .as_ref()
                        .and_then(|c| c.error_message.as_ref())
                        .map_or(false, |m| !m.is_empty())
            })
            .times(1)
            .returning(|_| Ok(()));
        let topic = Arc::new(topic);

        let publisher = start(topic.clone());
        let mismatch = TypeDefPatchMismatch::new(
            "mc-B",
            TypeDefSummary::new("t-asset", "Asset", 2),
            TypeDef::new(TypeDefSummary::new("t-asset", "Asset", 3)),
        );
        publisher
            .process_type_def_patch_mismatch_event(&source(), &mismatch)
            .await
            .unwrap();
        assert_ok!(publisher.shutdown().await);

        finish(topic);
    }

    #[tokio::test]
    async fn test_classification_requires_value() {
        let topic = Arc::new(MockCohortTopic::new());
        let publisher = start(topic.clone());

        let err = assert_err!(
            publisher
                .process_classified_entity_event(&source(), &asset("e1"))
                .await
        );
        assert!(matches!(err, OmrsError::InvalidEvent(_)));

        assert_ok!(publisher.shutdown().await);
        finish(topic);
    }

    #[tokio::test]
    async fn test_full_queue_drops_event() {
        let (event_tx, _event_rx) = mpsc::channel(1);
        let publisher = OutboundEventPublisher {
            cohort_name: "cohort".to_string(),
            originator: Originator::new("mc-A"),
            filter: Arc::new(PassThroughFilter),
            event_tx,
            worker: tokio::spawn(async {}),
        };
        let event = InstanceEvent::outbound(
            Originator::new("mc-A"),
            InstanceEventKind::NewEntity {
                entity: asset("e1"),
            },
        )
        .unwrap();

        assert_eq!(
            publisher.publish_instance_event(event.clone()),
            PublishOutcome::Queued
        );
        assert_eq!(
            publisher.publish_instance_event(event),
            PublishOutcome::Dropped
        );
    }
}
