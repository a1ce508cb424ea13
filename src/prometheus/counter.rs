use crate::prometheus::collector::{Collector, Metric};
use crate::prometheus::desc::Desc;
use crate::prometheus::labelset::LabelSet;

/// A counter holds one accumulating value per label set.
///
/// Negative deltas are accepted; keeping the value monotonic is left to the
/// caller.
#[derive(Debug, Clone)]
pub struct Counter {
    desc: Desc,
    series: Collector<f64>,
}

impl Counter {
    pub fn new(desc: Desc) -> Self {
        Counter {
            desc,
            series: Collector::new(),
        }
    }

    pub fn desc(&self) -> &Desc {
        &self.desc
    }

    pub fn inc(&mut self, labels: Option<&LabelSet>) -> &mut Self {
        self.add(1.0, labels)
    }

    pub fn add(&mut self, delta: f64, labels: Option<&LabelSet>) -> &mut Self {
        let current = self.series.get(labels).map_or(0.0, |m| m.value);
        self.series.set(current + delta, labels);
        self
    }

    /// Current value for `labels`, 0 when the series does not exist yet.
    pub fn value(&self, labels: Option<&LabelSet>) -> f64 {
        self.series.get(labels).map_or(0.0, |m| m.value)
    }

    pub fn get(&self, labels: Option<&LabelSet>) -> Option<&Metric<f64>> {
        self.series.get(labels)
    }

    pub fn set(&mut self, value: f64, labels: Option<&LabelSet>) -> &mut Self {
        self.series.set(value, labels);
        self
    }

    pub fn collect(&self, labels: Option<&LabelSet>) -> Vec<&Metric<f64>> {
        self.series.collect(labels)
    }

    pub fn reset(&mut self, labels: Option<&LabelSet>) {
        self.series.reset(labels);
    }

    pub fn reset_all(&mut self) -> &mut Self {
        self.series.reset_all();
        self
    }

    /// Takes the counts of `delivered` out of every matching series.
    pub fn subtract(&mut self, delivered: &Counter) -> &mut Self {
        self.series.subtract(&delivered.series);
        self
    }

    pub fn series(&self) -> &Collector<f64> {
        &self.series
    }
}
