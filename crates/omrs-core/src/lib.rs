//! Core event model for OMRS cohorts
//!
//! Events, the conflict vocabulary, processor contracts and the security
//! filter shared by every member of a metadata repository cohort.

pub mod conflict;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod instance_event;
pub mod lifecycle;
pub mod model;
pub mod processor;
pub mod registry_event;
pub mod typedef_event;
pub mod vocabulary;
pub mod wire;

pub use conflict::*;
pub use envelope::*;
pub use error::*;
pub use filter::*;
pub use instance_event::*;
pub use lifecycle::*;
pub use model::*;
pub use processor::*;
pub use registry_event::*;
pub use typedef_event::*;
pub use vocabulary::*;
pub use wire::{CohortEvent, UnknownEvent, WireEnvelope};
