//! Logging and metrics for cohort members

use metrics::{counter, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

/// Global observability system
static OBSERVABILITY: OnceCell<ObservabilitySystem> = OnceCell::new();

/// Installs the tracing subscriber and, when enabled, the Prometheus exporter
pub struct ObservabilitySystem {
    metrics_enabled: bool,
}

impl ObservabilitySystem {
    /// Initialize the observability system. Fails if called twice.
    pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
        if OBSERVABILITY.get().is_some() {
            anyhow::bail!("Observability system already initialized");
        }

        let system = Self {
            metrics_enabled: config.metrics.enabled,
        };

        Self::init_logging(&config.logging)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        OBSERVABILITY
            .set(system)
            .map_err(|_| anyhow::anyhow!("Observability system already initialized"))?;

        info!("Observability system initialized");
        Ok(())
    }

    fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
        let level = parse_level(&config.level);

        let env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format.to_lowercase().as_str() {
            "json" => {
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(json_layer).try_init()?;
            }
            _ => {
                let pretty_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(pretty_layer).try_init()?;
            }
        }

        Ok(())
    }

    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()?;

        info!("Prometheus metrics exported on {}", bind_addr);
        Ok(())
    }

    /// Get the global observability system
    pub fn get() -> Option<&'static ObservabilitySystem> {
        OBSERVABILITY.get()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Cohort event metrics
pub struct EventMetrics;

impl EventMetrics {
    /// An envelope arrived from the topic
    pub fn event_received(category: &str) {
        counter!("omrs_events_received_total", "category" => category.to_string()).increment(1);
    }

    /// An inbound envelope was discarded before dispatch
    pub fn event_dropped(reason: &str) {
        counter!("omrs_events_dropped_total", "reason" => reason.to_string()).increment(1);
    }

    /// The security filter suppressed an event
    pub fn event_filtered(direction: &str, category: &str) {
        counter!("omrs_events_filtered_total",
                "direction" => direction.to_string(),
                "category" => category.to_string())
        .increment(1);
    }

    /// An event was handed to a processor
    pub fn event_dispatched(event_type: &str) {
        counter!("omrs_events_dispatched_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// A processor returned an error
    pub fn processor_failed(event_type: &str) {
        counter!("omrs_processor_failures_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// An outbound event reached the topic
    pub fn event_published(category: &str) {
        counter!("omrs_events_published_total", "category" => category.to_string()).increment(1);
    }

    /// An outbound event could not be queued or published
    pub fn publish_failed(reason: &str) {
        counter!("omrs_publish_failures_total", "reason" => reason.to_string()).increment(1);
    }
}

/// Records the time between creation and drop as a histogram sample
pub struct PerfTimer {
    start: Instant,
    metric_name: String,
    labels: Vec<(String, String)>,
}

impl PerfTimer {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            metric_name: metric_name.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn finish(self) {
        // recorded by Drop
    }

    fn record(&self) {
        let labels: Vec<Label> = self
            .labels
            .iter()
            .map(|(key, value)| Label::new(key.clone(), value.clone()))
            .collect();
        histogram!(self.metric_name.clone(), labels).record(self.start.elapsed().as_secs_f64());
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.record();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_timer() {
        let timer = PerfTimer::new("test_metric").with_label("event_type", "NEW_ENTITY_EVENT");

        assert_eq!(timer.metric_name, "test_metric");
        assert_eq!(timer.labels.len(), 1);

        timer.finish();
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_metrics_without_recorder() {
        // no recorder installed: calls are no-ops
        EventMetrics::event_received("INSTANCE");
        EventMetrics::event_dropped("malformed");
        EventMetrics::event_filtered("outbound", "INSTANCE");
        EventMetrics::publish_failed("queue_full");
    }
}
