//! The built-in metric set every session starts with, plus user-declared
//! metric definitions.

use lazy_static::lazy_static;
use serde::Deserialize;
use slog::{debug, warn, Logger};

use crate::prometheus::registry::{MetricKind, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoldenMetric {
    AppLoaded,
    AppUnloaded,
    PageNavigation,
    PageTimeToComplete,
    PageTimeToUsable,
    PerformanceTime,
}

impl GoldenMetric {
    pub fn name(&self) -> &'static str {
        match self {
            GoldenMetric::AppLoaded => "prom_react_app_loaded",
            GoldenMetric::AppUnloaded => "prom_react_app_unloaded",
            GoldenMetric::PageNavigation => "prom_react_navigation_duration_seconds",
            GoldenMetric::PageTimeToComplete => "prom_react_ttc_seconds",
            GoldenMetric::PageTimeToUsable => "prom_react_ttu_seconds",
            GoldenMetric::PerformanceTime => "prom_react_performance_seconds",
        }
    }
}

/// Declarative metric definition, as found in the `custom_metrics` config
/// table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricDefinition {
    Counter {
        name: String,
        description: String,
    },
    Gauge {
        name: String,
        description: String,
    },
    Histogram {
        name: String,
        description: String,
        #[serde(default)]
        buckets: Option<Vec<f64>>,
    },
}

impl MetricDefinition {
    pub fn counter(name: &str, description: &str) -> Self {
        MetricDefinition::Counter {
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    pub fn histogram(name: &str, description: &str, buckets: Option<Vec<f64>>) -> Self {
        MetricDefinition::Histogram {
            name: name.to_string(),
            description: description.to_string(),
            buckets,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetricDefinition::Counter { name, .. }
            | MetricDefinition::Gauge { name, .. }
            | MetricDefinition::Histogram { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricDefinition::Counter { .. } => MetricKind::Counter,
            MetricDefinition::Gauge { .. } => MetricKind::Gauge,
            MetricDefinition::Histogram { .. } => MetricKind::Histogram,
        }
    }
}

lazy_static! {
    pub static ref GOLDEN_METRICS: Vec<MetricDefinition> = vec![
        MetricDefinition::counter(GoldenMetric::AppLoaded.name(), "Application loaded counter"),
        MetricDefinition::counter(GoldenMetric::AppUnloaded.name(), "Application unloaded counter"),
        MetricDefinition::histogram(
            GoldenMetric::PageNavigation.name(),
            "Total navigation duration between pages in seconds",
            None,
        ),
        MetricDefinition::histogram(
            GoldenMetric::PageTimeToComplete.name(),
            "Section time to interactive in seconds",
            None,
        ),
        MetricDefinition::histogram(GoldenMetric::PageTimeToUsable.name(), "Section time to usable in seconds", None),
        MetricDefinition::histogram(
            GoldenMetric::PerformanceTime.name(),
            "Application performance load time in seconds",
            None,
        ),
    ];
}

/// Creates the golden metrics followed by `custom`. Histograms without their
/// own buckets use `default_buckets`.
///
/// Does nothing and returns false when the golden metrics already exist, so
/// a registry can be initialized more than once without losing counts.
/// Definitions that fail to register are logged and skipped.
pub fn create_metrics(
    registry: &mut Registry,
    default_buckets: &[f64],
    custom: &[MetricDefinition],
    logger: &Logger,
) -> bool {
    if registry.contains(MetricKind::Counter, GoldenMetric::AppLoaded.name()) {
        debug!(logger, "golden metrics already exist, skipping creation");
        return false;
    }

    for definition in GOLDEN_METRICS.iter().chain(custom) {
        let result = match definition {
            MetricDefinition::Counter { name, description } => {
                registry.create(MetricKind::Counter, name, description, None)
            }
            MetricDefinition::Gauge { name, description } => registry.create(MetricKind::Gauge, name, description, None),
            MetricDefinition::Histogram {
                name,
                description,
                buckets,
            } => registry.create(
                MetricKind::Histogram,
                name,
                description,
                Some(buckets.clone().unwrap_or_else(|| default_buckets.to_vec())),
            ),
        };
        if let Err(err) = result {
            warn!(logger, "Couldn't create metric"; "metric" => definition.name(), "err" => %err);
        }
    }
    true
}
