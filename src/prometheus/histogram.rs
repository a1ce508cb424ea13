use lazy_static::lazy_static;

use crate::prometheus::collector::{Collector, Metric, MetricValue};
use crate::prometheus::desc::Desc;
use crate::prometheus::labelset::LabelSet;
use crate::prometheus::registry::RegistryError;
use crate::prometheus::text_create::format_float;

lazy_static! {
    /// Bucket boundaries used when a histogram is created without its own.
    pub static ref DEFAULT_BUCKETS: Vec<f64> = vec![0.01, 0.1, 1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 10.0, 15.0];
}

/// Below this many upper bounds a linear scan beats a binary search.
const LINEAR_SEARCH_LIMIT: usize = 35;

/// A cumulative bucket: the number of observations `<= upper_bound`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

/// Distribution recorded for one label set. The `+Inf` bucket is implicit
/// and always equals `count`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramValue {
    pub buckets: Vec<Bucket>,
    pub sum: f64,
    pub count: u64,
    pub raw: Vec<f64>,
}

impl HistogramValue {
    fn zeroed(upper_bounds: &[f64]) -> Self {
        HistogramValue {
            buckets: upper_bounds
                .iter()
                .map(|&upper_bound| Bucket {
                    upper_bound,
                    cumulative_count: 0,
                })
                .collect(),
            sum: 0.0,
            count: 0,
            raw: Vec::new(),
        }
    }

    /// Cumulative count keyed by the bucket boundary as it appears in the
    /// `le` label (`"0.5"`, `"10"`, `"+Inf"`).
    pub fn entry(&self, le: &str) -> Option<u64> {
        if le == "+Inf" {
            return Some(self.count);
        }
        self.buckets
            .iter()
            .find(|b| format_float(b.upper_bound) == le)
            .map(|b| b.cumulative_count)
    }

    /// All configured buckets as `(le, cumulative_count)` pairs, in
    /// ascending boundary order, without the implicit `+Inf` bucket.
    pub fn entries(&self) -> Vec<(String, u64)> {
        self.buckets
            .iter()
            .map(|b| (format_float(b.upper_bound), b.cumulative_count))
            .collect()
    }
}

impl MetricValue for HistogramValue {
    fn reset(&mut self) {
        for b in &mut self.buckets {
            b.cumulative_count = 0;
        }
        self.sum = 0.0;
        self.count = 0;
        self.raw.clear();
    }

    fn subtract(&mut self, delivered: &Self) {
        for (b, d) in self.buckets.iter_mut().zip(&delivered.buckets) {
            b.cumulative_count = b.cumulative_count.saturating_sub(d.cumulative_count);
        }
        self.sum -= delivered.sum;
        self.count = self.count.saturating_sub(delivered.count);
        let n = delivered.raw.len().min(self.raw.len());
        self.raw.drain(..n);
    }
}

/// Checks that bucket boundaries are finite and strictly increasing.
pub fn validate_buckets(upper_bounds: &[f64]) -> Result<(), RegistryError> {
    for (i, b) in upper_bounds.iter().enumerate() {
        if !b.is_finite() {
            return Err(RegistryError::InvalidBuckets(format!("bucket boundary {} is not finite", b)));
        }
        if i > 0 && upper_bounds[i - 1] >= *b {
            return Err(RegistryError::InvalidBuckets(format!(
                "bucket boundaries must be strictly increasing, {} >= {}",
                upper_bounds[i - 1],
                b
            )));
        }
    }
    Ok(())
}

/// A histogram counts observations into fixed cumulative buckets, one
/// distribution per label set.
#[derive(Debug, Clone)]
pub struct Histogram {
    desc: Desc,
    upper_bounds: Vec<f64>,
    series: Collector<HistogramValue>,
}

impl Histogram {
    pub fn new(desc: Desc, upper_bounds: Vec<f64>) -> Result<Self, RegistryError> {
        validate_buckets(&upper_bounds)?;
        Ok(Histogram {
            desc,
            upper_bounds,
            series: Collector::new(),
        })
    }

    pub fn desc(&self) -> &Desc {
        &self.desc
    }

    pub fn buckets(&self) -> &[f64] {
        &self.upper_bounds
    }

    /// Index of the first bucket `v` falls into; `upper_bounds.len()` when
    /// it only lands in `+Inf` (including NaN).
    fn find_bucket(&self, v: f64) -> usize {
        let n = self.upper_bounds.len();
        if v.is_nan() {
            return n;
        }
        if n < LINEAR_SEARCH_LIMIT {
            return self.upper_bounds.iter().position(|&bound| v <= bound).unwrap_or(n);
        }
        self.upper_bounds.partition_point(|&bound| bound < v)
    }

    pub fn observe(&mut self, v: f64, labels: Option<&LabelSet>) -> &mut Self {
        let bucket = self.find_bucket(v);
        if self.series.get(labels).is_none() {
            self.series.set(HistogramValue::zeroed(&self.upper_bounds), labels);
        }

        if let Some(m) = self.series.get_mut(labels) {
            let value = &mut m.value;
            value.raw.push(v);
            value.sum += v;
            value.count += 1;
            for b in &mut value.buckets[bucket..] {
                b.cumulative_count += 1;
            }
        }
        self
    }

    pub fn get(&self, labels: Option<&LabelSet>) -> Option<&Metric<HistogramValue>> {
        self.series.get(labels)
    }

    /// Replaces the distribution of a series. The value must carry one
    /// bucket per configured upper bound, with the same bounds.
    pub fn set(&mut self, value: HistogramValue, labels: Option<&LabelSet>) -> Result<&mut Self, RegistryError> {
        let same_bounds = value.buckets.len() == self.upper_bounds.len()
            && value
                .buckets
                .iter()
                .zip(&self.upper_bounds)
                .all(|(b, bound)| b.upper_bound == *bound);
        if !same_bounds {
            return Err(RegistryError::InvalidBuckets(format!(
                "value buckets do not match the bounds of {}",
                self.desc.fq_name()
            )));
        }
        self.series.set(value, labels);
        Ok(self)
    }

    pub fn collect(&self, labels: Option<&LabelSet>) -> Vec<&Metric<HistogramValue>> {
        self.series.collect(labels)
    }

    pub fn reset(&mut self, labels: Option<&LabelSet>) {
        self.series.reset(labels);
    }

    pub fn reset_all(&mut self) -> &mut Self {
        self.series.reset_all();
        self
    }

    /// Takes the observations of `delivered` out of every matching series.
    /// `raw` loses its delivered prefix.
    pub fn subtract(&mut self, delivered: &Histogram) -> &mut Self {
        self.series.subtract(&delivered.series);
        self
    }

    pub fn series(&self) -> &Collector<HistogramValue> {
        &self.series
    }
}
