use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::prometheus::counter::Counter;
use crate::prometheus::desc::Desc;
use crate::prometheus::gauge::Gauge;
use crate::prometheus::histogram::{Histogram, DEFAULT_BUCKETS};
use crate::prometheus::text_create::metric_family_to_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        })
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a {kind} named {name} is already registered")]
    AlreadyRegistered { kind: MetricKind, name: String },
    #[error("{0} is not a valid metric name")]
    InvalidName(String),
    #[error("invalid histogram buckets: {0}")]
    InvalidBuckets(String),
}

/// Any collector the registry can own.
#[derive(Debug, Clone)]
pub enum MetricCollector {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

impl MetricCollector {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricCollector::Counter(_) => MetricKind::Counter,
            MetricCollector::Gauge(_) => MetricKind::Gauge,
            MetricCollector::Histogram(_) => MetricKind::Histogram,
        }
    }

    pub fn desc(&self) -> &Desc {
        match self {
            MetricCollector::Counter(c) => c.desc(),
            MetricCollector::Gauge(g) => g.desc(),
            MetricCollector::Histogram(h) => h.desc(),
        }
    }

    pub fn reset_all(&mut self) {
        match self {
            MetricCollector::Counter(c) => {
                c.reset_all();
            }
            MetricCollector::Gauge(g) => {
                g.reset_all();
            }
            MetricCollector::Histogram(h) => {
                h.reset_all();
            }
        }
    }

    /// Removes what `delivered` held from this collector. Counters and
    /// histograms subtract; gauges still at their delivered value go to 0.
    /// Collectors of different kinds are left untouched.
    pub fn subtract(&mut self, delivered: &MetricCollector) {
        match (self, delivered) {
            (MetricCollector::Counter(c), MetricCollector::Counter(d)) => {
                c.subtract(d);
            }
            (MetricCollector::Gauge(g), MetricCollector::Gauge(d)) => {
                g.clear_delivered(d);
            }
            (MetricCollector::Histogram(h), MetricCollector::Histogram(d)) => {
                h.subtract(d);
            }
            _ => {}
        }
    }

    pub fn as_counter(&self) -> Option<&Counter> {
        match self {
            MetricCollector::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_counter_mut(&mut self) -> Option<&mut Counter> {
        match self {
            MetricCollector::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_gauge(&self) -> Option<&Gauge> {
        match self {
            MetricCollector::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_gauge_mut(&mut self) -> Option<&mut Gauge> {
        match self {
            MetricCollector::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            MetricCollector::Histogram(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_histogram_mut(&mut self) -> Option<&mut Histogram> {
        match self {
            MetricCollector::Histogram(h) => Some(h),
            _ => None,
        }
    }
}

/// Registry owns one collector per (kind, name).
///
/// `generation` counts mutable accesses, so callers can tell whether an
/// operation touched the registry at all.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    collectors: BTreeMap<(MetricKind, String), MetricCollector>,
    generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a collector. Histograms without explicit
    /// buckets get [`DEFAULT_BUCKETS`]; `buckets` is ignored for other kinds.
    pub fn create(
        &mut self,
        kind: MetricKind,
        name: &str,
        help: &str,
        buckets: Option<Vec<f64>>,
    ) -> Result<&mut MetricCollector, RegistryError> {
        let key = (kind, name.to_string());
        if self.collectors.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered {
                kind,
                name: name.to_string(),
            });
        }

        let desc = Desc::new(name, help)?;
        let collector = match kind {
            MetricKind::Counter => MetricCollector::Counter(Counter::new(desc)),
            MetricKind::Gauge => MetricCollector::Gauge(Gauge::new(desc)),
            MetricKind::Histogram => {
                let buckets = buckets.unwrap_or_else(|| DEFAULT_BUCKETS.clone());
                MetricCollector::Histogram(Histogram::new(desc, buckets)?)
            }
        };

        self.generation += 1;
        Ok(self.collectors.entry(key).or_insert(collector))
    }

    pub fn contains(&self, kind: MetricKind, name: &str) -> bool {
        self.collectors.contains_key(&(kind, name.to_string()))
    }

    pub fn get(&self, kind: MetricKind, name: &str) -> Option<&MetricCollector> {
        self.collectors.get(&(kind, name.to_string()))
    }

    pub fn get_mut(&mut self, kind: MetricKind, name: &str) -> Option<&mut MetricCollector> {
        let collector = self.collectors.get_mut(&(kind, name.to_string()))?;
        self.generation += 1;
        Some(collector)
    }

    pub fn counter(&self, name: &str) -> Option<&Counter> {
        self.get(MetricKind::Counter, name).and_then(MetricCollector::as_counter)
    }

    pub fn counter_mut(&mut self, name: &str) -> Option<&mut Counter> {
        self.get_mut(MetricKind::Counter, name).and_then(MetricCollector::as_counter_mut)
    }

    pub fn gauge(&self, name: &str) -> Option<&Gauge> {
        self.get(MetricKind::Gauge, name).and_then(MetricCollector::as_gauge)
    }

    pub fn gauge_mut(&mut self, name: &str) -> Option<&mut Gauge> {
        self.get_mut(MetricKind::Gauge, name).and_then(MetricCollector::as_gauge_mut)
    }

    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.get(MetricKind::Histogram, name).and_then(MetricCollector::as_histogram)
    }

    pub fn histogram_mut(&mut self, name: &str) -> Option<&mut Histogram> {
        self.get_mut(MetricKind::Histogram, name).and_then(MetricCollector::as_histogram_mut)
    }

    pub fn collectors(&self) -> impl Iterator<Item = &MetricCollector> {
        self.collectors.values()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Serializes every collector in text exposition format. Collectors are
    /// ordered by kind, then name.
    pub fn metrics(&self) -> String {
        let mut out = String::new();
        for collector in self.collectors.values() {
            // Writing into a String cannot fail.
            let _ = metric_family_to_text(&mut out, collector);
        }
        out
    }

    /// Zeroes every series of every collector. Collectors and series stay
    /// registered.
    pub fn reset(&mut self) {
        for collector in self.collectors.values_mut() {
            collector.reset_all();
        }
        self.generation += 1;
    }

    /// Takes a snapshot taken earlier with `clone` back out of the
    /// registry, leaving only what was recorded after it.
    pub fn subtract(&mut self, delivered: &Registry) {
        for (key, d) in &delivered.collectors {
            if let Some(collector) = self.collectors.get_mut(key) {
                collector.subtract(d);
            }
        }
        self.generation += 1;
    }
}
