//! Inbound event manager
//!
//! Receives encoded envelopes from the cohort topic, turns them into typed
//! events, applies the inbound security filter and hands each event to every
//! registered processor of its category.

use futures::StreamExt;
use omrs_core::wire::decode_envelope;
use omrs_core::{
    CohortEvent, EventsSecurityFilter, InstanceEvent, InstanceEventProcessor, InstanceLifecycle,
    LifecycleVerdict, PassThroughFilter, RegistryEvent, RegistryEventProcessor, Result,
    TypeDefEvent, TypeDefEventProcessor, WireEnvelope,
};
use omrs_shared::{CohortConfig, EventMetrics, PerfTimer};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::topic::CohortTopic;

/// Why an inbound envelope never reached a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The bytes could not be decoded into an event.
    Malformed,
    /// Category, protocol level or event type not recognized.
    UnknownEvent,
    /// Sent by this member.
    SelfOriginated,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::UnknownEvent => "unknown_event",
            DropReason::SelfOriginated => "self_originated",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Handed to `processors` processors, `failures` of which returned an
    /// error.
    Dispatched { processors: usize, failures: usize },
    /// Suppressed by the inbound security filter.
    Filtered,
    Dropped(DropReason),
}

pub struct InboundEventManager {
    cohort_name: String,
    local_metadata_collection_id: String,
    filter: Arc<dyn EventsSecurityFilter>,
    lifecycle: Option<Arc<InstanceLifecycle>>,
    instance_processors: Vec<Arc<dyn InstanceEventProcessor>>,
    type_def_processors: Vec<Arc<dyn TypeDefEventProcessor>>,
    registry_processors: Vec<Arc<dyn RegistryEventProcessor>>,
}

impl InboundEventManager {
    pub fn new(
        cohort_name: impl Into<String>,
        local_metadata_collection_id: impl Into<String>,
    ) -> Self {
        Self {
            cohort_name: cohort_name.into(),
            local_metadata_collection_id: local_metadata_collection_id.into(),
            filter: Arc::new(PassThroughFilter),
            lifecycle: None,
            instance_processors: Vec::new(),
            type_def_processors: Vec::new(),
            registry_processors: Vec::new(),
        }
    }

    pub fn from_config(config: &CohortConfig) -> Self {
        Self::new(
            config.cohort_name.clone(),
            config.local_member.metadata_collection_id.clone(),
        )
    }

    pub fn with_filter(mut self, filter: Arc<dyn EventsSecurityFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Track instance states and report transitions that contradict them.
    /// Contradictions are logged; the event is still dispatched. A transition
    /// is recorded once at least one processor accepts it, or when no
    /// instance processor is registered.
    pub fn with_lifecycle(mut self, lifecycle: Arc<InstanceLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn add_instance_processor(mut self, processor: Arc<dyn InstanceEventProcessor>) -> Self {
        self.instance_processors.push(processor);
        self
    }

    pub fn add_type_def_processor(mut self, processor: Arc<dyn TypeDefEventProcessor>) -> Self {
        self.type_def_processors.push(processor);
        self
    }

    pub fn add_registry_processor(mut self, processor: Arc<dyn RegistryEventProcessor>) -> Self {
        self.registry_processors.push(processor);
        self
    }

    /// Register a processor for both instance and TypeDef events.
    pub fn add_cohort_processor<P>(self, processor: Arc<P>) -> Self
    where
        P: InstanceEventProcessor + TypeDefEventProcessor + 'static,
    {
        let instance: Arc<dyn InstanceEventProcessor> = processor.clone();
        let type_def: Arc<dyn TypeDefEventProcessor> = processor;
        self.add_instance_processor(instance)
            .add_type_def_processor(type_def)
    }

    pub fn cohort_name(&self) -> &str {
        &self.cohort_name
    }

    pub fn processor_count(&self) -> usize {
        self.instance_processors.len()
            + self.type_def_processors.len()
            + self.registry_processors.len()
    }

    /// Decode and deliver one envelope. Never fails: anything that cannot be
    /// handled is logged and reported in the outcome.
    pub async fn receive(&self, bytes: &[u8]) -> ReceiveOutcome {
        match decode_envelope(bytes) {
            Ok(envelope) => self.receive_envelope(envelope).await,
            Err(e) => {
                warn!(cohort = %self.cohort_name, error = %e, "Dropping undecodable envelope");
                self.dropped(DropReason::Malformed)
            }
        }
    }

    pub async fn receive_envelope(&self, envelope: WireEnvelope) -> ReceiveOutcome {
        EventMetrics::event_received(&envelope.category.name);
        match envelope.into_event() {
            Ok(event) => self.deliver(event).await,
            Err(e) => {
                warn!(cohort = %self.cohort_name, error = %e, "Dropping malformed envelope");
                self.dropped(DropReason::Malformed)
            }
        }
    }

    #[instrument(skip(self, event), fields(cohort = %self.cohort_name, event_type = event.event_type_name()))]
    pub async fn deliver(&self, event: CohortEvent) -> ReceiveOutcome {
        if event.header().metadata_collection_id() == self.local_metadata_collection_id {
            debug!("Ignoring event sent by this member");
            return self.dropped(DropReason::SelfOriginated);
        }

        if event.is_unknown() {
            if let CohortEvent::Unknown(unknown) = &event {
                debug!(
                    category = %unknown.category,
                    reason = %unknown.reason,
                    originator = %unknown.header.metadata_collection_id(),
                    "Ignoring event this member cannot handle"
                );
            } else {
                debug!(
                    originator = %event.originator().metadata_collection_id,
                    "Ignoring unrecognized event type"
                );
            }
            return self.dropped(DropReason::UnknownEvent);
        }

        match event {
            CohortEvent::Instance(event) => self.deliver_instance_event(event).await,
            CohortEvent::TypeDef(event) => self.deliver_type_def_event(event).await,
            CohortEvent::Registry(event) => self.deliver_registry_event(event).await,
            CohortEvent::Unknown(_) => self.dropped(DropReason::UnknownEvent),
        }
    }

    async fn deliver_instance_event(&self, event: InstanceEvent) -> ReceiveOutcome {
        let event = match self
            .filter
            .validate_inbound_instance_event(&self.cohort_name, event)
        {
            Some(event) => event,
            None => return self.filtered("instance"),
        };

        let event_type = event.event_type().name();
        let _timer = PerfTimer::new("omrs_inbound_dispatch_duration_seconds")
            .with_label("event_type", event_type);

        let mut failures = 0;
        for processor in &self.instance_processors {
            if let Err(e) = processor
                .send_instance_event(&self.cohort_name, event.clone())
                .await
            {
                failures += 1;
                self.processor_failed(event_type, &e);
            }
        }

        let processors = self.instance_processors.len();
        if let Some(lifecycle) = &self.lifecycle {
            if processors > 0 && failures == processors {
                debug!("No processor applied the event, lifecycle left unchanged");
            } else if let LifecycleVerdict::Conflict(conflict) = lifecycle.apply(&event) {
                warn!(
                    originator = %event.originator().metadata_collection_id,
                    "{}",
                    conflict
                );
            }
        }
        self.dispatched(event_type, processors, failures)
    }

    async fn deliver_type_def_event(&self, event: TypeDefEvent) -> ReceiveOutcome {
        let event = match self
            .filter
            .validate_inbound_type_def_event(&self.cohort_name, event)
        {
            Some(event) => event,
            None => return self.filtered("typedef"),
        };

        let event_type = event.event_type().name();
        let _timer = PerfTimer::new("omrs_inbound_dispatch_duration_seconds")
            .with_label("event_type", event_type);

        let mut failures = 0;
        for processor in &self.type_def_processors {
            if let Err(e) = processor
                .send_type_def_event(&self.cohort_name, event.clone())
                .await
            {
                failures += 1;
                self.processor_failed(event_type, &e);
            }
        }
        self.dispatched(event_type, self.type_def_processors.len(), failures)
    }

    async fn deliver_registry_event(&self, event: RegistryEvent) -> ReceiveOutcome {
        let event = match self
            .filter
            .validate_inbound_registry_event(&self.cohort_name, event)
        {
            Some(event) => event,
            None => return self.filtered("registry"),
        };

        let event_type = event.event_type().name();
        let mut failures = 0;
        for processor in &self.registry_processors {
            if let Err(e) = processor
                .send_registry_event(&self.cohort_name, event.clone())
                .await
            {
                failures += 1;
                self.processor_failed(event_type, &e);
            }
        }
        self.dispatched(event_type, self.registry_processors.len(), failures)
    }

    fn dropped(&self, reason: DropReason) -> ReceiveOutcome {
        EventMetrics::event_dropped(reason.as_str());
        ReceiveOutcome::Dropped(reason)
    }

    fn filtered(&self, category: &str) -> ReceiveOutcome {
        debug!(category, "Inbound event suppressed by security filter");
        EventMetrics::event_filtered("inbound", category);
        ReceiveOutcome::Filtered
    }

    fn processor_failed(&self, event_type: &str, error: &omrs_core::OmrsError) {
        error!(
            cohort = %self.cohort_name,
            event_type,
            error = %error,
            "Event processor failed"
        );
        EventMetrics::processor_failed(event_type);
    }

    fn dispatched(&self, event_type: &str, processors: usize, failures: usize) -> ReceiveOutcome {
        EventMetrics::event_dispatched(event_type);
        ReceiveOutcome::Dispatched {
            processors,
            failures,
        }
    }

    /// Subscribe to `topic` and deliver everything it carries until the
    /// stream ends.
    pub async fn listen(self: Arc<Self>, topic: &dyn CohortTopic) -> Result<JoinHandle<()>> {
        let mut stream = topic.subscribe().await?;
        info!(cohort = %self.cohort_name, "Inbound event manager listening");

        Ok(tokio::spawn(async move {
            while let Some(bytes) = stream.next().await {
                self.receive(&bytes).await;
            }
            info!(cohort = %self.cohort_name, "Cohort topic closed, inbound event manager stopping");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::OutboundEventPublisher;
    use crate::topic::InMemoryTopic;
    use async_trait::async_trait;
    use omrs_core::wire::{encode, encode_envelope};
    use omrs_core::{
        EntityDetail, EventSource, InstanceEventKind, InstanceIdentifiers, InstanceState,
        InstanceType, OmrsError, Originator, PurgeTarget, RegistryEventKind, TypeDef,
        TypeDefConflict, TypeDefEventKind, TypeDefPatchMismatch, TypeDefSummary,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Forwards the name of every operation it receives.
    struct ChannelProcessor {
        calls: mpsc::UnboundedSender<String>,
        fail: bool,
    }

    impl ChannelProcessor {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (calls, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { calls, fail: false }), rx)
        }

        fn failing() -> Arc<Self> {
            let (calls, _) = mpsc::unbounded_channel();
            Arc::new(Self { calls, fail: true })
        }

        fn record(&self, call: String) -> Result<()> {
            if self.fail {
                return Err(OmrsError::processing("repository offline"));
            }
            let _ = self.calls.send(call);
            Ok(())
        }
    }

    #[async_trait]
    impl InstanceEventProcessor for ChannelProcessor {
        async fn process_new_entity_event(
            &self,
            source: &EventSource,
            entity: &EntityDetail,
        ) -> Result<()> {
            self.record(format!(
                "new:{}:{}",
                entity.header.guid,
                source.metadata_collection_id()
            ))
        }

        async fn process_purged_entity_event(
            &self,
            _source: &EventSource,
            identifiers: &InstanceIdentifiers,
        ) -> Result<()> {
            self.record(format!("purged:{}", identifiers.instance_guid))
        }
    }

    #[async_trait]
    impl TypeDefEventProcessor for ChannelProcessor {
        async fn process_type_def_patch_mismatch_event(
            &self,
            _source: &EventSource,
            mismatch: &TypeDefPatchMismatch,
        ) -> Result<()> {
            self.record(format!("mismatch:{}", mismatch.target_type_def.name))
        }
    }

    #[async_trait]
    impl RegistryEventProcessor for ChannelProcessor {
        async fn process_registration_refresh_request(&self, source: &EventSource) -> Result<()> {
            self.record(format!("refresh:{}", source.metadata_collection_id()))
        }
    }

    fn asset(guid: &str) -> EntityDetail {
        EntityDetail::new(guid, InstanceType::new("t-asset", "Asset", 1), "mc-B")
    }

    fn instance_bytes(originator: &str, kind: InstanceEventKind) -> Vec<u8> {
        let event = InstanceEvent::outbound(Originator::new(originator), kind).unwrap();
        encode(&CohortEvent::Instance(event)).unwrap().to_vec()
    }

    fn new_entity_bytes(guid: &str) -> Vec<u8> {
        instance_bytes("mc-B", InstanceEventKind::NewEntity { entity: asset(guid) })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut calls = Vec::new();
        while let Ok(call) = rx.try_recv() {
            calls.push(call);
        }
        calls
    }

    #[tokio::test]
    async fn test_receive_dispatches_new_entity() {
        let (processor, mut calls) = ChannelProcessor::new();
        let manager = InboundEventManager::new("cohort", "mc-A").add_cohort_processor(processor);

        let outcome = manager.receive(&new_entity_bytes("e1")).await;

        assert_eq!(
            outcome,
            ReceiveOutcome::Dispatched {
                processors: 1,
                failures: 0
            }
        );
        assert_eq!(drain(&mut calls), vec!["new:e1:mc-B"]);
    }

    #[tokio::test]
    async fn test_unknown_event_type_reaches_no_processor() {
        let (processor, mut calls) = ChannelProcessor::new();
        let manager = InboundEventManager::new("cohort", "mc-A").add_cohort_processor(processor);

        let mut envelope = decode_envelope(&new_entity_bytes("e1")).unwrap();
        if let Some(section) = envelope.instance_section.as_mut() {
            section.event_type.ordinal = 250;
            section.event_type.name = "FutureEvent".to_string();
        }
        let bytes = encode_envelope(&envelope).unwrap();

        let outcome = manager.receive(&bytes).await;

        assert_eq!(outcome, ReceiveOutcome::Dropped(DropReason::UnknownEvent));
        assert!(drain(&mut calls).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_category_is_dropped() {
        let manager = InboundEventManager::new("cohort", "mc-A");
        let mut envelope = decode_envelope(&new_entity_bytes("e1")).unwrap();
        envelope.category.ordinal = 42;

        let outcome = manager.receive_envelope(envelope).await;
        assert_eq!(outcome, ReceiveOutcome::Dropped(DropReason::UnknownEvent));
    }

    #[tokio::test]
    async fn test_malformed_bytes_are_dropped() {
        let manager = InboundEventManager::new("cohort", "mc-A");
        assert_eq!(
            manager.receive(b"not an envelope").await,
            ReceiveOutcome::Dropped(DropReason::Malformed)
        );
    }

    #[tokio::test]
    async fn test_own_events_are_ignored() {
        let (processor, mut calls) = ChannelProcessor::new();
        let manager = InboundEventManager::new("cohort", "mc-B").add_cohort_processor(processor);

        let outcome = manager.receive(&new_entity_bytes("e1")).await;

        assert_eq!(outcome, ReceiveOutcome::Dropped(DropReason::SelfOriginated));
        assert!(drain(&mut calls).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_filter_can_drop() {
        struct DenyAll;
        impl EventsSecurityFilter for DenyAll {
            fn validate_inbound_instance_event(
                &self,
                _cohort_name: &str,
                _event: InstanceEvent,
            ) -> Option<InstanceEvent> {
                None
            }
        }

        let (processor, mut calls) = ChannelProcessor::new();
        let manager = InboundEventManager::new("cohort", "mc-A")
            .with_filter(Arc::new(DenyAll))
            .add_cohort_processor(processor);

        assert_eq!(
            manager.receive(&new_entity_bytes("e1")).await,
            ReceiveOutcome::Filtered
        );
        assert!(drain(&mut calls).is_empty());
    }

    #[tokio::test]
    async fn test_failing_processor_does_not_stop_others() {
        let (processor, mut calls) = ChannelProcessor::new();
        let manager = InboundEventManager::new("cohort", "mc-A")
            .add_cohort_processor(ChannelProcessor::failing())
            .add_cohort_processor(processor);

        let outcome = manager.receive(&new_entity_bytes("e1")).await;

        assert_eq!(
            outcome,
            ReceiveOutcome::Dispatched {
                processors: 2,
                failures: 1
            }
        );
        assert_eq!(drain(&mut calls), vec!["new:e1:mc-B"]);
    }

    #[tokio::test]
    async fn test_purge_twice_is_accepted() {
        let (processor, mut calls) = ChannelProcessor::new();
        let lifecycle = Arc::new(InstanceLifecycle::new());
        let manager = InboundEventManager::new("cohort", "mc-A")
            .with_lifecycle(lifecycle.clone())
            .add_cohort_processor(processor);
        let bytes = instance_bytes(
            "mc-B",
            InstanceEventKind::PurgedEntity {
                purged: PurgeTarget::Identifiers(InstanceIdentifiers::new(
                    "t-asset", "Asset", "e1",
                )),
            },
        );

        for _ in 0..2 {
            assert_eq!(
                manager.receive(&bytes).await,
                ReceiveOutcome::Dispatched {
                    processors: 1,
                    failures: 0
                }
            );
        }

        assert_eq!(drain(&mut calls), vec!["purged:e1", "purged:e1"]);
        assert_eq!(lifecycle.state("e1"), Some(InstanceState::Purged));
    }

    #[tokio::test]
    async fn test_lifecycle_ignores_event_every_processor_rejected() {
        let lifecycle = Arc::new(InstanceLifecycle::new());
        let manager = InboundEventManager::new("cohort", "mc-A")
            .with_lifecycle(lifecycle.clone())
            .add_cohort_processor(ChannelProcessor::failing());

        assert_eq!(
            manager.receive(&new_entity_bytes("e1")).await,
            ReceiveOutcome::Dispatched {
                processors: 1,
                failures: 1
            }
        );
        assert_eq!(lifecycle.state("e1"), None);

        let (processor, _calls) = ChannelProcessor::new();
        let manager = InboundEventManager::new("cohort", "mc-A")
            .with_lifecycle(lifecycle.clone())
            .add_cohort_processor(ChannelProcessor::failing())
            .add_cohort_processor(processor);
        manager.receive(&new_entity_bytes("e1")).await;
        assert_eq!(lifecycle.state("e1"), Some(InstanceState::Active));
    }

    #[tokio::test]
    async fn test_type_def_and_registry_routing() {
        let (processor, mut calls) = ChannelProcessor::new();
        let manager = InboundEventManager::new("cohort", "mc-A")
            .add_cohort_processor(processor.clone())
            .add_registry_processor(processor);
        assert_eq!(manager.processor_count(), 3);

        let mismatch = TypeDefPatchMismatch::new(
            "mc-A",
            TypeDefSummary::new("t-asset", "Asset", 2),
            TypeDef::new(TypeDefSummary::new("t-asset", "Asset", 3)),
        );
        let type_def_event = TypeDefEvent::outbound(
            Originator::new("mc-B"),
            TypeDefEventKind::TypeDefError {
                conflict: TypeDefConflict::PatchMismatch(mismatch),
            },
        )
        .unwrap();
        let registry_event = RegistryEvent::outbound(
            Originator::new("mc-C"),
            RegistryEventKind::RefreshRegistrationRequest,
        )
        .unwrap();

        manager.deliver(CohortEvent::TypeDef(type_def_event)).await;
        manager.deliver(CohortEvent::Registry(registry_event)).await;

        assert_eq!(drain(&mut calls), vec!["mismatch:Asset", "refresh:mc-C"]);
    }

    #[tokio::test]
    async fn test_publisher_to_manager_over_topic() {
        let topic = Arc::new(InMemoryTopic::new("cohort.events", 16));
        let (processor, mut calls) = ChannelProcessor::new();
        let manager = Arc::new(
            InboundEventManager::new("cohort", "mc-A").add_cohort_processor(processor),
        );
        let listener = manager.listen(topic.as_ref()).await.unwrap();

        let publisher = OutboundEventPublisher::new("cohort", Originator::new("mc-B"), topic, 16);
        publisher
            .process_new_entity_event(
                &EventSource::new("cohort", Originator::new("mc-B")),
                &asset("e9"),
            )
            .await
            .unwrap();

        let call = tokio::time::timeout(Duration::from_secs(5), calls.recv())
            .await
            .unwrap();
        assert_eq!(call.as_deref(), Some("new:e9:mc-B"));

        publisher.shutdown().await.unwrap();
        listener.abort();
    }
}
