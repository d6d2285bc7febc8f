//! Payload objects carried inside cohort events

pub mod instance;
pub mod typedef;

pub use instance::*;
pub use typedef::*;
