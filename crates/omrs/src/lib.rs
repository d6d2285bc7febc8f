//! `omrs`: convenience facade over the cohort event crates.

#![deny(missing_docs)]

/// Re-export everything from omrs-core at the crate root, so users can `use omrs::*;`.
#[doc(inline)]
pub use omrs_core::*;

pub use omrs_core::wire::{decode, encode};

/// The event core as a nested module, for `omrs::core::...` paths.
pub use omrs_core as core;

/// Topic connector, outbound publisher and inbound event manager.
pub use omrs_cohort as cohort;

pub use omrs_cohort::{
    CohortTopic, InMemoryTopic, InboundEventManager, OutboundEventPublisher, PublishOutcome,
    ReceiveOutcome,
};

/// Configuration and observability.
pub use omrs_shared as shared;

pub use omrs_shared::{CohortConfig, ObservabilitySystem};
