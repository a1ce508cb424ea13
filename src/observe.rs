//! Publish/subscribe for observations. Listeners are called synchronously,
//! in registration order, every time the session records an observation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use slog::{info, Logger};

use crate::prometheus::labelset::LabelSet;

/// What listeners receive: the metric name, the tags after merging with the
/// session's default tags, and the raw value, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric_name: String,
    pub tags: LabelSet,
    pub value: Option<f64>,
}

pub type ObserveCallback = Arc<dyn Fn(&Observation) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerHandle(u64);

/// Handles are allocated in increasing order, so iterating the map visits
/// listeners in the order they were added.
#[derive(Default)]
pub struct ObserveListeners {
    next_id: u64,
    listeners: BTreeMap<u64, ObserveCallback>,
}

impl ObserveListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, callback: ObserveCallback) -> ListenerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, callback);
        ListenerHandle(id)
    }

    /// Returns false if the handle was already removed.
    pub fn remove(&mut self, handle: ListenerHandle) -> bool {
        self.listeners.remove(&handle.0).is_some()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// The current listeners, in registration order. Callers invoke them
    /// after releasing any lock guarding `self`, so a callback may add or
    /// remove listeners.
    pub fn snapshot(&self) -> Vec<ObserveCallback> {
        self.listeners.values().cloned().collect()
    }
}

impl fmt::Debug for ObserveListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveListeners")
            .field("next_id", &self.next_id)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A listener logging every observation at info level.
pub fn logging_listener(logger: Logger) -> ObserveCallback {
    Arc::new(move |observation: &Observation| {
        info!(logger, "observation";
            "metric" => &observation.metric_name,
            "value" => ?observation.value,
            "tags" => %observation.tags);
    })
}
