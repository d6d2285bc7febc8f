//! Runs a single cohort member on an in-memory topic and logs every event
//! it sees. Configuration comes from `omrs.toml` and `OMRS__*` variables.

use omrs::{
    CohortConfig, EventSource, InMemoryTopic, InboundEventManager, InstanceLifecycle,
    LoggingProcessor, MemberRegistration, ObservabilitySystem, OutboundEventPublisher, RegistryEventProcessor,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CohortConfig::load()?;
    ObservabilitySystem::init(&config.observability)?;

    info!(
        cohort = %config.cohort_name,
        metadata_collection_id = %config.local_member.metadata_collection_id,
        "Starting cohort member"
    );

    let topic = Arc::new(InMemoryTopic::new(
        format!("{}.events", config.cohort_name),
        config.topic.capacity,
    ));
    let manager = Arc::new(
        InboundEventManager::from_config(&config)
            .with_lifecycle(Arc::new(InstanceLifecycle::with_tombstone_capacity(
                config.lifecycle.tombstone_capacity,
            )))
            .add_cohort_processor(Arc::new(LoggingProcessor))
            .add_registry_processor(Arc::new(LoggingProcessor)),
    );
    let listener = manager.listen(topic.as_ref()).await?;

    let publisher = OutboundEventPublisher::from_config(&config, topic.clone());
    let source = EventSource::new(config.cohort_name.clone(), config.originator());
    let registration = MemberRegistration::new(chrono::Utc::now())
        .with_metadata_collection_name(config.cohort_name.clone());
    publisher
        .process_registration_event(&source, &registration)
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    publisher
        .process_un_registration_event(&source, None)
        .await?;
    publisher.shutdown().await?;
    listener.abort();
    Ok(())
}
