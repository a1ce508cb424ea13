use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use crate::prometheus::text_create::format_float;

/// A label value is either a string or a number. `"1"` and `1` are
/// different values.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelValue {
    Str(String),
    Num(f64),
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelValue::Str(s) => f.write_str(s),
            LabelValue::Num(n) => f.write_str(&format_float(*n)),
        }
    }
}

impl From<&str> for LabelValue {
    fn from(s: &str) -> Self {
        LabelValue::Str(s.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(s: String) -> Self {
        LabelValue::Str(s)
    }
}

impl From<&String> for LabelValue {
    fn from(s: &String) -> Self {
        LabelValue::Str(s.clone())
    }
}

impl From<f64> for LabelValue {
    fn from(n: f64) -> Self {
        LabelValue::Num(n)
    }
}

impl From<i64> for LabelValue {
    fn from(n: i64) -> Self {
        LabelValue::Num(n as f64)
    }
}

/// An unordered set of label pairs. Equality is set equality; iteration
/// (and therefore serialization) is ordered by label name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSet(BTreeMap<String, LabelValue>);

impl LabelSet {
    pub fn new() -> Self {
        LabelSet(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<LabelValue>) -> Option<LabelValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&LabelValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, LabelValue> {
        self.0.iter()
    }

    /// Reports whether every pair of `filter` is present in `self`.
    /// Extra labels on `self` are ignored.
    pub fn matches(&self, filter: &LabelSet) -> bool {
        filter.iter().all(|(name, value)| self.0.get(name) == Some(value))
    }

    /// Returns a new set holding the pairs of `self` overlaid with `other`.
    pub fn merge(&self, other: &LabelSet) -> LabelSet {
        let mut result = self.clone();
        for (k, v) in other.iter() {
            result.0.insert(k.clone(), v.clone());
        }
        result
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = (&'a String, &'a LabelValue);
    type IntoIter = btree_map::Iter<'a, String, LabelValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<LabelValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        LabelSet(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for LabelSet
where
    K: Into<String>,
    V: Into<LabelValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={:?}", k, v.to_string())).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}
