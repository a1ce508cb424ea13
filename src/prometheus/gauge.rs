use crate::prometheus::collector::{Collector, Metric};
use crate::prometheus::desc::Desc;
use crate::prometheus::labelset::LabelSet;

/// A gauge holds one freely settable value per label set.
#[derive(Debug, Clone)]
pub struct Gauge {
    desc: Desc,
    series: Collector<f64>,
}

impl Gauge {
    pub fn new(desc: Desc) -> Self {
        Gauge {
            desc,
            series: Collector::new(),
        }
    }

    pub fn desc(&self) -> &Desc {
        &self.desc
    }

    pub fn set(&mut self, val: f64, labels: Option<&LabelSet>) -> &mut Self {
        self.series.set(val, labels);
        self
    }

    pub fn inc(&mut self, labels: Option<&LabelSet>) -> &mut Self {
        self.add(1.0, labels)
    }

    pub fn dec(&mut self, labels: Option<&LabelSet>) -> &mut Self {
        self.add(-1.0, labels)
    }

    pub fn add(&mut self, val: f64, labels: Option<&LabelSet>) -> &mut Self {
        let old_val = self.value(labels);
        self.series.set(old_val + val, labels);
        self
    }

    pub fn sub(&mut self, val: f64, labels: Option<&LabelSet>) -> &mut Self {
        self.add(-val, labels)
    }

    pub fn value(&self, labels: Option<&LabelSet>) -> f64 {
        self.series.get(labels).map_or(0.0, |m| m.value)
    }

    pub fn get(&self, labels: Option<&LabelSet>) -> Option<&Metric<f64>> {
        self.series.get(labels)
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

    /// Zeroes the series still holding the value found in `delivered`. A
    /// series set to something else since then keeps its new value.
    pub fn clear_delivered(&mut self, delivered: &Gauge) -> &mut Self {
        for d in delivered.series.entries() {
            if let Some(m) = self.series.get_mut(d.labels.as_ref()) {
                if m.value == d.value {
                    m.value = 0.0;
                }
            }
        }
        self
    }

    pub fn series(&self) -> &Collector<f64> {
        &self.series
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_moves_both_ways() {
        let mut g = Gauge::new(Desc::new("queue_depth", "Queue depth").unwrap());
        g.set(10.0, None).inc(None).dec(None).dec(None).sub(2.5, None);
        assert_eq!(g.value(None), 6.5);

        g.add(0.5, None);
        assert_eq!(g.value(None), 7.0);

        g.reset_all();
        assert_eq!(g.value(None), 0.0);
        assert_eq!(g.collect(None).len(), 1);
    }

    #[test]
    fn test_clear_delivered_keeps_newer_values() {
        let mut g = Gauge::new(Desc::new("queue_depth", "Queue depth").unwrap());
        let a = LabelSet::from([("q", "a")]);
        let b = LabelSet::from([("q", "b")]);
        g.set(4.0, Some(&a)).set(2.0, Some(&b));
        let delivered = g.clone();

        g.set(9.0, Some(&b));
        g.clear_delivered(&delivered);

        assert_eq!(g.value(Some(&a)), 0.0);
        assert_eq!(g.value(Some(&b)), 9.0);
    }
}
