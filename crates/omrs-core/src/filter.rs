//! Security filter applied to events crossing the cohort boundary.

use crate::instance_event::InstanceEvent;
use crate::registry_event::RegistryEvent;
use crate::typedef_event::TypeDefEvent;

/// Inspects events on their way in and out of the cohort.
///
/// Each hook returns the event to continue with: the same event, a
/// substitute, or `None` to drop it silently. Hooks run synchronously on the
/// calling task, so implementations must not block.
pub trait EventsSecurityFilter: Send + Sync {
    fn validate_inbound_instance_event(
        &self,
        _cohort_name: &str,
        event: InstanceEvent,
    ) -> Option<InstanceEvent> {
        Some(event)
    }

    fn validate_outbound_instance_event(
        &self,
        _cohort_name: &str,
        event: InstanceEvent,
    ) -> Option<InstanceEvent> {
        Some(event)
    }

    fn validate_inbound_type_def_event(
        &self,
        _cohort_name: &str,
        event: TypeDefEvent,
    ) -> Option<TypeDefEvent> {
        Some(event)
    }

    fn validate_outbound_type_def_event(
        &self,
        _cohort_name: &str,
        event: TypeDefEvent,
    ) -> Option<TypeDefEvent> {
        Some(event)
    }

    fn validate_inbound_registry_event(
        &self,
        _cohort_name: &str,
        event: RegistryEvent,
    ) -> Option<RegistryEvent> {
        Some(event)
    }

    fn validate_outbound_registry_event(
        &self,
        _cohort_name: &str,
        event: RegistryEvent,
    ) -> Option<RegistryEvent> {
        Some(event)
    }
}

/// Lets every event through unchanged. Installed when no other filter is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl EventsSecurityFilter for PassThroughFilter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Originator;
    use crate::instance_event::InstanceEventKind;
    use crate::model::{EntityDetail, InstanceIdentity, InstanceType};
    use crate::vocabulary::InstanceEventType;

    struct DenyType(&'static str);

    impl EventsSecurityFilter for DenyType {
        fn validate_outbound_instance_event(
            &self,
            _cohort_name: &str,
            event: InstanceEvent,
        ) -> Option<InstanceEvent> {
            match event.type_def() {
                Some((_, name)) if name == self.0 => None,
                _ => Some(event),
            }
        }
    }

    /// Strips properties from inbound entities.
    struct Redact;

    impl EventsSecurityFilter for Redact {
        fn validate_inbound_instance_event(
            &self,
            _cohort_name: &str,
            event: InstanceEvent,
        ) -> Option<InstanceEvent> {
            let header = event.header().clone();
            match event.into_kind() {
                InstanceEventKind::NewEntity { mut entity } => {
                    entity.properties.clear();
                    InstanceEvent::new(header, InstanceEventKind::NewEntity { entity }).ok()
                }
                kind => InstanceEvent::new(header, kind).ok(),
            }
        }
    }

    fn new_entity(type_name: &str) -> InstanceEvent {
        let entity = EntityDetail::new("e1", InstanceType::new("t-1", type_name, 1), "mc-A")
            .with_property("secret", serde_json::json!("s3cr3t"));
        InstanceEvent::outbound(Originator::new("mc-A"), InstanceEventKind::NewEntity { entity })
            .unwrap()
    }

    #[test]
    fn test_pass_through() {
        let event = new_entity("Asset");
        let filter = PassThroughFilter;
        assert_eq!(
            filter.validate_inbound_instance_event("cohort", event.clone()),
            Some(event.clone())
        );
        assert_eq!(
            filter.validate_outbound_instance_event("cohort", event.clone()),
            Some(event)
        );
    }

    #[test]
    fn test_filter_can_drop() {
        let filter = DenyType("Secret");
        assert!(filter
            .validate_outbound_instance_event("cohort", new_entity("Secret"))
            .is_none());
        assert!(filter
            .validate_outbound_instance_event("cohort", new_entity("Asset"))
            .is_some());
        // untouched hooks keep the default
        assert!(filter
            .validate_inbound_instance_event("cohort", new_entity("Secret"))
            .is_some());
    }

    #[test]
    fn test_filter_can_substitute() {
        let filtered = Redact
            .validate_inbound_instance_event("cohort", new_entity("Asset"))
            .unwrap();
        assert_eq!(filtered.event_type(), InstanceEventType::NewEntity);
        match filtered.kind() {
            InstanceEventKind::NewEntity { entity } => {
                assert_eq!(entity.guid(), "e1");
                assert!(entity.properties.is_empty());
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
