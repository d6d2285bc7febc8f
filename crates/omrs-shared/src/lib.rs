//! Shared configuration and observability for OMRS cohort members

pub mod config;
pub mod observability;

pub use self::config::*;
pub use observability::*;
