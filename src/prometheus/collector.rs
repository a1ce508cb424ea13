use std::fmt;

use crate::prometheus::labelset::LabelSet;

/// A value stored per label set. Each value type defines its own zero and
/// how an already delivered value is taken out of it.
pub trait MetricValue: Clone + fmt::Debug {
    fn reset(&mut self);

    /// Removes `delivered`, an earlier copy of this value, keeping whatever
    /// was recorded since.
    fn subtract(&mut self, delivered: &Self);
}

impl MetricValue for f64 {
    fn reset(&mut self) {
        *self = 0.0;
    }

    fn subtract(&mut self, delivered: &Self) {
        *self -= delivered;
    }
}

/// One series of a metric: its label set (absent for the unlabeled series)
/// and its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric<V> {
    pub labels: Option<LabelSet>,
    pub value: V,
}

/// Series store for a single metric name. At most one entry exists per
/// distinct label set; entries keep their insertion order.
#[derive(Debug, Clone)]
pub struct Collector<V> {
    data: Vec<Metric<V>>,
}

impl<V> Default for Collector<V> {
    fn default() -> Self {
        Collector { data: Vec::new() }
    }
}

impl<V: MetricValue> Collector<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, labels: Option<&LabelSet>) -> Option<usize> {
        self.data.iter().position(|m| m.labels.as_ref() == labels)
    }

    /// Returns the entry whose label set equals `labels` exactly, or the
    /// unlabeled entry when `labels` is `None`.
    pub fn get(&self, labels: Option<&LabelSet>) -> Option<&Metric<V>> {
        self.position(labels).map(|i| &self.data[i])
    }

    pub(crate) fn get_mut(&mut self, labels: Option<&LabelSet>) -> Option<&mut Metric<V>> {
        match self.position(labels) {
            Some(i) => Some(&mut self.data[i]),
            None => None,
        }
    }

    /// Overwrites the value of the matching entry, or appends a new one.
    pub fn set(&mut self, value: V, labels: Option<&LabelSet>) -> &mut Self {
        match self.get_mut(labels) {
            Some(existing) => existing.value = value,
            None => self.data.push(Metric {
                labels: labels.cloned(),
                value,
            }),
        }
        self
    }

    /// Without a filter, returns every entry. With a filter, returns the
    /// labeled entries carrying every pair of the filter; unlike `get`, extra
    /// labels on an entry do not prevent a match.
    pub fn collect(&self, labels: Option<&LabelSet>) -> Vec<&Metric<V>> {
        match labels {
            None => self.data.iter().collect(),
            Some(filter) => self
                .data
                .iter()
                .filter(|m| m.labels.as_ref().is_some_and(|l| l.matches(filter)))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[Metric<V>] {
        &self.data
    }

    /// Zeroes the entry matching `labels`, or every entry when `labels` is
    /// `None`. Entries and their label sets are kept.
    pub fn reset(&mut self, labels: Option<&LabelSet>) {
        match labels {
            None => {
                for m in &mut self.data {
                    m.value.reset();
                }
            }
            Some(_) => {
                if let Some(m) = self.get_mut(labels) {
                    m.value.reset();
                }
            }
        }
    }

    pub fn reset_all(&mut self) -> &mut Self {
        for m in &mut self.data {
            m.value.reset();
        }
        self
    }

    /// Subtracts every entry of `delivered` from the entry with the same
    /// label set. Entries only present in `self` are left alone.
    pub fn subtract(&mut self, delivered: &Collector<V>) -> &mut Self {
        for d in &delivered.data {
            if let Some(m) = self.get_mut(d.labels.as_ref()) {
                m.value.subtract(&d.value);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
