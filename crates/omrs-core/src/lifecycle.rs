//! Per-instance lifecycle tracking.
//!
//! [`InstanceLifecycle`] remembers the last known state of each instance GUID
//! and classifies incoming transitions against it. Processors that keep
//! reference copies can use it to spot transitions that arrive after an
//! instance was purged. Purged GUIDs are kept as tombstones up to a fixed
//! capacity; the oldest are evicted first.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::instance_event::{InstanceEvent, InstanceEventKind};
use crate::model::InstanceIdentity;
use crate::vocabulary::InstanceEventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Active,
    /// Soft-deleted; can still be restored.
    Deleted,
    /// Terminal.
    Purged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConflict {
    pub instance_guid: String,
    pub state: InstanceState,
    pub event_type: InstanceEventType,
}

impl fmt::Display for LifecycleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is not valid for instance {} in state {:?}",
            self.event_type, self.instance_guid, self.state
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleVerdict {
    /// The transition was accepted; carries the resulting state.
    Applied(InstanceState),
    /// Nothing to do, such as a repeated purge or a refresh request.
    Ignored,
    Conflict(LifecycleConflict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Create,
    Modify,
    Refresh,
    Delete,
    Restore,
    Purge,
    DeletePurge,
    Request,
    None,
}

impl From<InstanceEventType> for Transition {
    fn from(event_type: InstanceEventType) -> Self {
        use InstanceEventType as T;
        match event_type {
            T::NewEntity | T::NewRelationship => Transition::Create,
            T::UpdatedEntity
            | T::UpdatedRelationship
            | T::UndoneEntity
            | T::UndoneRelationship
            | T::ClassifiedEntity
            | T::DeclassifiedEntity
            | T::ReclassifiedEntity
            | T::ReHomedEntity
            | T::ReHomedRelationship
            | T::ReTypedEntity
            | T::ReTypedRelationship
            | T::ReIdentifiedEntity
            | T::ReIdentifiedRelationship => Transition::Modify,
            T::RefreshedEntity | T::RefreshedRelationship => Transition::Refresh,
            T::DeletedEntity | T::DeletedRelationship => Transition::Delete,
            T::RestoredEntity | T::RestoredRelationship => Transition::Restore,
            T::PurgedEntity | T::PurgedRelationship => Transition::Purge,
            T::DeletePurgedEntity | T::DeletePurgedRelationship => Transition::DeletePurge,
            T::RefreshEntityRequest | T::RefreshRelationshipRequest => Transition::Request,
            T::BatchInstances | T::InstanceError | T::UnknownInstanceEvent => Transition::None,
        }
    }
}

pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 10_000;

/// Concurrent map of instance GUID to lifecycle state.
#[derive(Debug)]
pub struct InstanceLifecycle {
    states: DashMap<String, InstanceState>,
    /// Purged GUIDs, oldest first.
    tombstones: Mutex<VecDeque<String>>,
    tombstone_capacity: usize,
}

impl Default for InstanceLifecycle {
    fn default() -> Self {
        Self::with_tombstone_capacity(DEFAULT_TOMBSTONE_CAPACITY)
    }
}

impl InstanceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember at most `capacity` purged GUIDs. A transition for an evicted
    /// GUID is treated as if the instance had never been seen.
    pub fn with_tombstone_capacity(capacity: usize) -> Self {
        Self {
            states: DashMap::new(),
            tombstones: Mutex::new(VecDeque::new()),
            tombstone_capacity: capacity,
        }
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop whatever is known about an instance.
    pub fn forget(&self, instance_guid: &str) -> Option<InstanceState> {
        let removed = self.states.remove(instance_guid).map(|(_, state)| state);
        if removed == Some(InstanceState::Purged) {
            self.tombstones
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|guid| guid != instance_guid);
        }
        removed
    }

    /// Drop every purged instance. Returns how many were removed.
    pub fn evict_purged(&self) -> usize {
        let evicted: Vec<String> = self
            .tombstones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        evicted
            .iter()
            .filter(|guid| {
                self.states
                    .remove_if(guid.as_str(), |_, state| *state == InstanceState::Purged)
                    .is_some()
            })
            .count()
    }

    fn record_tombstone(&self, guid: &str) {
        let evicted: Vec<String> = {
            let mut tombstones = self
                .tombstones
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            tombstones.push_back(guid.to_string());
            let excess = tombstones.len().saturating_sub(self.tombstone_capacity);
            tombstones.drain(..excess).collect()
        };
        for guid in evicted {
            self.states
                .remove_if(&guid, |_, state| *state == InstanceState::Purged);
        }
    }

    pub fn state(&self, instance_guid: &str) -> Option<InstanceState> {
        self.states.get(instance_guid).map(|state| *state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn apply(&self, event: &InstanceEvent) -> LifecycleVerdict {
        match event.kind() {
            InstanceEventKind::BatchInstances { batch } => {
                let guids = batch
                    .entities
                    .iter()
                    .map(|e| e.guid())
                    .chain(batch.relationships.iter().map(|r| r.guid()));
                for guid in guids {
                    if let LifecycleVerdict::Conflict(conflict) =
                        self.transition(guid, InstanceEventType::BatchInstances, Transition::Refresh)
                    {
                        return LifecycleVerdict::Conflict(conflict);
                    }
                }
                LifecycleVerdict::Applied(InstanceState::Active)
            }
            InstanceEventKind::ReIdentifiedEntity {
                original_instance_guid,
                entity,
            } => self.reidentify(original_instance_guid, entity.guid(), event.event_type()),
            InstanceEventKind::ReIdentifiedRelationship {
                original_instance_guid,
                relationship,
            } => self.reidentify(original_instance_guid, relationship.guid(), event.event_type()),
            kind => match kind.identifiers() {
                Some(ids) => self.transition(
                    &ids.instance_guid,
                    event.event_type(),
                    Transition::from(event.event_type()),
                ),
                None => LifecycleVerdict::Ignored,
            },
        }
    }

    fn transition(
        &self,
        guid: &str,
        event_type: InstanceEventType,
        transition: Transition,
    ) -> LifecycleVerdict {
        let mut tombstoned = false;
        let verdict = match self.states.entry(guid.to_string()) {
            Entry::Vacant(vacant) => {
                let state = match transition {
                    Transition::Request | Transition::None => return LifecycleVerdict::Ignored,
                    Transition::Purge | Transition::DeletePurge => InstanceState::Purged,
                    Transition::Delete => InstanceState::Deleted,
                    _ => InstanceState::Active,
                };
                vacant.insert(state);
                if state == InstanceState::Purged {
                    // remember the tombstone so a late create is caught
                    tombstoned = true;
                }
                match transition {
                    Transition::Purge => LifecycleVerdict::Ignored,
                    _ => LifecycleVerdict::Applied(state),
                }
            }
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                let conflict = || {
                    LifecycleVerdict::Conflict(LifecycleConflict {
                        instance_guid: guid.to_string(),
                        state: current,
                        event_type,
                    })
                };
                match (current, transition) {
                    (_, Transition::Request | Transition::None) => LifecycleVerdict::Ignored,
                    (InstanceState::Purged, Transition::Purge | Transition::DeletePurge) => {
                        LifecycleVerdict::Ignored
                    }
                    (InstanceState::Purged, _) => conflict(),
                    (_, Transition::Create) => conflict(),
                    (_, Transition::Purge | Transition::DeletePurge) => {
                        occupied.insert(InstanceState::Purged);
                        tombstoned = true;
                        LifecycleVerdict::Applied(InstanceState::Purged)
                    }
                    (InstanceState::Active, Transition::Delete) => {
                        occupied.insert(InstanceState::Deleted);
                        LifecycleVerdict::Applied(InstanceState::Deleted)
                    }
                    (InstanceState::Deleted, Transition::Delete) => LifecycleVerdict::Ignored,
                    (InstanceState::Deleted, Transition::Restore) => {
                        occupied.insert(InstanceState::Active);
                        LifecycleVerdict::Applied(InstanceState::Active)
                    }
                    (InstanceState::Active, Transition::Restore) => LifecycleVerdict::Ignored,
                    (InstanceState::Deleted, Transition::Refresh) => {
                        LifecycleVerdict::Applied(InstanceState::Deleted)
                    }
                    (InstanceState::Deleted, Transition::Modify) => conflict(),
                    (InstanceState::Active, Transition::Modify | Transition::Refresh) => {
                        LifecycleVerdict::Applied(InstanceState::Active)
                    }
                }
            }
        };
        // the entry guard holds a shard lock, so eviction runs after it drops
        if tombstoned {
            self.record_tombstone(guid);
        }
        verdict
    }

    fn reidentify(
        &self,
        original_guid: &str,
        new_guid: &str,
        event_type: InstanceEventType,
    ) -> LifecycleVerdict {
        let state = match self.state(original_guid) {
            Some(InstanceState::Purged) => {
                return LifecycleVerdict::Conflict(LifecycleConflict {
                    instance_guid: original_guid.to_string(),
                    state: InstanceState::Purged,
                    event_type,
                })
            }
            Some(state) => state,
            None => InstanceState::Active,
        };
        if let Some(existing) = self.state(new_guid) {
            return LifecycleVerdict::Conflict(LifecycleConflict {
                instance_guid: new_guid.to_string(),
                state: existing,
                event_type,
            });
        }
        self.states.remove(original_guid);
        self.states.insert(new_guid.to_string(), state);
        LifecycleVerdict::Applied(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Originator;
    use crate::instance_event::PurgeTarget;
    use crate::model::{EntityDetail, InstanceGraph, InstanceIdentifiers, InstanceType};
    use std::sync::Arc;

    fn entity(guid: &str) -> EntityDetail {
        EntityDetail::new(guid, InstanceType::new("t-asset", "Asset", 1), "mc-A")
    }

    fn event(kind: InstanceEventKind) -> InstanceEvent {
        InstanceEvent::outbound(Originator::new("mc-A"), kind).unwrap()
    }

    fn purge(guid: &str) -> InstanceEvent {
        event(InstanceEventKind::PurgedEntity {
            purged: PurgeTarget::Identifiers(InstanceIdentifiers::new("t-asset", "Asset", guid)),
        })
    }

    #[test]
    fn test_purge_is_idempotent() {
        let lifecycle = InstanceLifecycle::new();
        lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e1") }));

        assert_eq!(
            lifecycle.apply(&purge("e1")),
            LifecycleVerdict::Applied(InstanceState::Purged)
        );
        assert_eq!(lifecycle.apply(&purge("e1")), LifecycleVerdict::Ignored);
        assert_eq!(lifecycle.apply(&purge("never-seen")), LifecycleVerdict::Ignored);
    }

    #[test]
    fn test_purged_is_terminal() {
        let lifecycle = InstanceLifecycle::new();
        lifecycle.apply(&purge("e1"));

        let verdict = lifecycle.apply(&event(InstanceEventKind::UpdatedEntity {
            original_entity: entity("e1"),
            entity: entity("e1").with_version(2),
        }));
        match verdict {
            LifecycleVerdict::Conflict(conflict) => {
                assert_eq!(conflict.state, InstanceState::Purged);
                assert_eq!(conflict.event_type, InstanceEventType::UpdatedEntity);
            }
            other => panic!("expected a conflict, got {:?}", other),
        }

        assert!(matches!(
            lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e1") })),
            LifecycleVerdict::Conflict(_)
        ));
    }

    #[test]
    fn test_duplicate_create_conflicts() {
        let lifecycle = InstanceLifecycle::new();
        let new = event(InstanceEventKind::NewEntity { entity: entity("e1") });
        assert_eq!(
            lifecycle.apply(&new),
            LifecycleVerdict::Applied(InstanceState::Active)
        );
        assert!(matches!(lifecycle.apply(&new), LifecycleVerdict::Conflict(_)));
    }

    #[test]
    fn test_delete_and_restore() {
        let lifecycle = InstanceLifecycle::new();
        lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e1") }));

        assert_eq!(
            lifecycle.apply(&event(InstanceEventKind::DeletedEntity { entity: entity("e1") })),
            LifecycleVerdict::Applied(InstanceState::Deleted)
        );
        assert!(matches!(
            lifecycle.apply(&event(InstanceEventKind::UndoneEntity { entity: entity("e1") })),
            LifecycleVerdict::Conflict(_)
        ));
        assert_eq!(
            lifecycle.apply(&event(InstanceEventKind::RestoredEntity { entity: entity("e1") })),
            LifecycleVerdict::Applied(InstanceState::Active)
        );
        assert_eq!(lifecycle.state("e1"), Some(InstanceState::Active));
    }

    #[test]
    fn test_delete_purge_is_terminal() {
        let lifecycle = InstanceLifecycle::new();
        lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e1") }));
        assert_eq!(
            lifecycle.apply(&event(InstanceEventKind::DeletePurgedEntity { entity: entity("e1") })),
            LifecycleVerdict::Applied(InstanceState::Purged)
        );
        assert_eq!(lifecycle.apply(&purge("e1")), LifecycleVerdict::Ignored);
    }

    #[test]
    fn test_reidentify_moves_state() {
        let lifecycle = InstanceLifecycle::new();
        lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e1") }));

        let verdict = lifecycle.apply(&event(InstanceEventKind::ReIdentifiedEntity {
            original_instance_guid: "e1".to_string(),
            entity: entity("e1-new"),
        }));

        assert_eq!(verdict, LifecycleVerdict::Applied(InstanceState::Active));
        assert_eq!(lifecycle.state("e1"), None);
        assert_eq!(lifecycle.state("e1-new"), Some(InstanceState::Active));
    }

    #[test]
    fn test_batch_applies_every_instance() {
        let lifecycle = InstanceLifecycle::new();
        let batch = InstanceGraph::new(vec![entity("e1"), entity("e2")], Vec::new());
        assert_eq!(
            lifecycle.apply(&event(InstanceEventKind::BatchInstances { batch })),
            LifecycleVerdict::Applied(InstanceState::Active)
        );
        assert_eq!(lifecycle.len(), 2);
    }

    #[test]
    fn test_tombstones_are_bounded() {
        let lifecycle = InstanceLifecycle::with_tombstone_capacity(100);
        lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("live") }));
        for i in 0..1000 {
            lifecycle.apply(&purge(&format!("gone-{}", i)));
        }

        assert_eq!(lifecycle.tombstone_count(), 100);
        assert_eq!(lifecycle.len(), 101);
        assert_eq!(lifecycle.state("live"), Some(InstanceState::Active));
        assert_eq!(lifecycle.state("gone-0"), None);
        assert_eq!(lifecycle.state("gone-999"), Some(InstanceState::Purged));
    }

    #[test]
    fn test_evicted_guid_is_treated_as_unseen() {
        let lifecycle = InstanceLifecycle::with_tombstone_capacity(1);
        lifecycle.apply(&purge("e1"));
        lifecycle.apply(&purge("e2"));

        assert_eq!(
            lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e1") })),
            LifecycleVerdict::Applied(InstanceState::Active)
        );
        assert!(matches!(
            lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e2") })),
            LifecycleVerdict::Conflict(_)
        ));
    }

    #[test]
    fn test_forget_and_evict_purged() {
        let lifecycle = InstanceLifecycle::new();
        lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity("e1") }));
        lifecycle.apply(&purge("e2"));
        lifecycle.apply(&purge("e3"));

        assert_eq!(lifecycle.forget("e2"), Some(InstanceState::Purged));
        assert_eq!(lifecycle.forget("e2"), None);
        assert_eq!(lifecycle.tombstone_count(), 1);

        assert_eq!(lifecycle.evict_purged(), 1);
        assert_eq!(lifecycle.tombstone_count(), 0);
        assert_eq!(lifecycle.len(), 1);
        assert_eq!(lifecycle.state("e1"), Some(InstanceState::Active));
    }

    #[tokio::test]
    async fn test_concurrent_updates_across_guids() {
        let lifecycle = Arc::new(InstanceLifecycle::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let lifecycle = lifecycle.clone();
            handles.push(tokio::spawn(async move {
                let guid = format!("e{}", i);
                lifecycle.apply(&event(InstanceEventKind::NewEntity { entity: entity(&guid) }));
                lifecycle.apply(&purge(&guid))
            }));
        }
        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                LifecycleVerdict::Applied(InstanceState::Purged)
            );
        }
        assert_eq!(lifecycle.len(), 16);
    }
}
