//! Configuration management for OMRS cohort members

use config::{Config, ConfigError, Environment, File};
use omrs_core::Originator;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for a cohort member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Name of the cohort this member joins
    pub cohort_name: String,

    /// Identity of the local repository
    pub local_member: LocalMemberConfig,

    /// Outbound publisher configuration
    pub publisher: PublisherConfig,

    /// Topic configuration
    pub topic: TopicConfig,

    /// Instance lifecycle tracking
    pub lifecycle: LifecycleConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMemberConfig {
    /// Metadata collection id of the local repository
    pub metadata_collection_id: String,

    /// Server name sent in the originator
    pub server_name: Option<String>,

    /// Server type sent in the originator
    pub server_type: Option<String>,

    /// Owning organization
    pub organization_name: Option<String>,
}

impl LocalMemberConfig {
    /// Originator stamped on every event this member sends.
    pub fn originator(&self) -> Originator {
        Originator {
            metadata_collection_id: self.metadata_collection_id.clone(),
            server_name: self.server_name.clone(),
            server_type: self.server_type.clone(),
            organization_name: self.organization_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Events buffered before new ones are dropped
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Capacity of the in-memory broadcast channel
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Purged instance GUIDs remembered before the oldest are evicted
    pub tombstone_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,

    /// Exporter bind address
    pub bind_address: String,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            cohort_name: "cocoCohort".to_string(),
            local_member: LocalMemberConfig {
                metadata_collection_id: omrs_core::new_guid(),
                server_name: None,
                server_type: Some("Metadata Repository".to_string()),
                organization_name: None,
            },
            publisher: PublisherConfig {
                queue_capacity: 1024,
            },
            topic: TopicConfig { capacity: 1024 },
            lifecycle: LifecycleConfig {
                tombstone_capacity: omrs_core::DEFAULT_TOMBSTONE_CAPACITY,
            },
            observability: ObservabilityConfig {
                logging: LoggingConfig {
                    level: "info".to_string(),
                    format: "json".to_string(),
                },
                metrics: MetricsConfig {
                    enabled: false,
                    bind_address: "0.0.0.0:9090".to_string(),
                },
            },
        }
    }
}

impl CohortConfig {
    /// Load configuration from `omrs.toml` (if present) and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("omrs.toml")
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&CohortConfig::default())?);

        if path.as_ref().exists() {
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder
            .add_source(Environment::with_prefix("OMRS").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variables only
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&CohortConfig::default())?)
            .add_source(Environment::with_prefix("OMRS").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Originator for events sent by the local member.
    pub fn originator(&self) -> Originator {
        self.local_member.originator()
    }
}
