//! Cohort runtime: the topic connector contract, the outbound publisher and
//! the inbound event manager.

pub mod manager;
pub mod publisher;
pub mod topic;

pub use manager::*;
pub use publisher::*;
pub use topic::*;
