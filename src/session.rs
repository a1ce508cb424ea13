//! The metrics session: owns the registry for one application run, merges
//! default tags into every observation, notifies listeners and triggers
//! flushes to the aggregator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slog::{debug, o, warn, Logger};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, PathNormalizer, SessionConfig};
use crate::golden::{create_metrics, GoldenMetric};
use crate::observe::{ListenerHandle, Observation, ObserveCallback, ObserveListeners};
use crate::prometheus::labelset::LabelSet;
use crate::prometheus::push::{FlushOutcome, Pusher};
use crate::prometheus::registry::Registry;
use crate::prometheus::text_create::is_valid_label_name;

pub type PathNormalizeFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A completed navigation as reported by the host. Times are in
/// milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationEvent {
    pub start: f64,
    pub duration: f64,
    pub time_to_complete: f64,
    pub time_to_usable: f64,
    pub is_full_page_navigation: bool,
    pub target: String,
}

/// The last navigation, with its path already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationData {
    pub start: f64,
    pub duration: f64,
    pub time_to_complete: f64,
    pub time_to_usable: f64,
    pub is_full_page_navigation: bool,
    pub path: String,
}

pub struct MetricsSession {
    registry: Arc<Mutex<Registry>>,
    pusher: Option<Arc<Pusher>>,
    default_tags: LabelSet,
    histogram_buckets: Vec<f64>,
    normalize_path: PathNormalizeFn,
    navigation_data: Mutex<Option<NavigationData>>,
    listeners: Mutex<ObserveListeners>,
    logger: Logger,
}

impl MetricsSession {
    pub fn new(config: &SessionConfig, logger: Logger) -> Result<Self, ConfigError> {
        Self::with_registry(Arc::new(Mutex::new(Registry::new())), config, logger)
    }

    /// Builds a session over an existing registry. Golden and custom metrics
    /// are only created if the registry does not hold them yet, so counts
    /// survive re-initialization.
    pub fn with_registry(
        registry: Arc<Mutex<Registry>>,
        config: &SessionConfig,
        logger: Logger,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let pusher = match &config.aggregator_url {
            Some(url) => {
                let pusher = config.transport.pusher(url, logger.new(o!("component" => "push")));
                if let Some(err) = pusher.error() {
                    return Err(ConfigError::Invalid(err.to_string()));
                }
                Some(Arc::new(pusher))
            }
            None => None,
        };

        let normalizer = PathNormalizer::compile(&config.path_rules)?;
        let normalize_path: PathNormalizeFn = Arc::new(move |path: &str| normalizer.normalize(path));

        {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            create_metrics(&mut registry, &config.histogram_buckets, &config.custom_metrics, &logger);
        }

        let default_tags = LabelSet::from([("app_name", config.app_name.as_str()), ("owner", config.owner.as_str())]);

        Ok(MetricsSession {
            registry,
            pusher,
            default_tags,
            histogram_buckets: config.histogram_buckets.clone(),
            normalize_path,
            navigation_data: Mutex::new(None),
            listeners: Mutex::new(ObserveListeners::new()),
            logger,
        })
    }

    /// Replaces the configured path rules with an arbitrary function.
    pub fn with_path_normalizer<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.normalize_path = Arc::new(f);
        self
    }

    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        Arc::clone(&self.registry)
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current registry contents in text exposition format.
    pub fn metrics(&self) -> String {
        self.lock_registry().metrics()
    }

    pub fn histogram_buckets(&self) -> &[f64] {
        &self.histogram_buckets
    }

    pub fn navigation_data(&self) -> Option<NavigationData> {
        self.navigation_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn default_tags(&self) -> &LabelSet {
        &self.default_tags
    }

    /// Records an observation on `metric_name`.
    ///
    /// `tags` are merged over the default `app_name`/`owner` tags. Counters
    /// add `value` (1 when absent); histograms and gauges require a value.
    /// Unless `skip_send` is set, a flush is started and its handle returned.
    /// Problems are logged, never returned.
    pub fn observe(
        &self,
        metric_name: &str,
        tags: Option<&LabelSet>,
        value: Option<f64>,
        skip_send: bool,
    ) -> Option<JoinHandle<FlushOutcome>> {
        let tags = match tags {
            Some(extra) => self.default_tags.merge(extra),
            None => self.default_tags.clone(),
        };

        self.record(metric_name, &tags, value);

        let observation = Observation {
            metric_name: metric_name.to_string(),
            tags,
            value,
        };
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        for callback in listeners {
            callback(&observation);
        }

        if skip_send {
            return None;
        }
        self.send_metrics()
    }

    fn record(&self, metric_name: &str, tags: &LabelSet, value: Option<f64>) {
        if let Some(v) = value {
            if !v.is_finite() {
                warn!(self.logger, "dropping non-finite observation"; "metric" => metric_name, "value" => v);
                return;
            }
        }

        let mut registry = self.lock_registry();
        let has_histogram = registry.histogram(metric_name).is_some();
        let has_gauge = registry.gauge(metric_name).is_some();
        let has_counter = registry.counter(metric_name).is_some();

        if !has_histogram && !has_gauge && !has_counter {
            warn!(self.logger, "No metric found"; "metric" => metric_name);
            return;
        }

        if let Some((label, _)) = tags.iter().find(|(label, _)| !is_valid_label_name(label)) {
            warn!(self.logger, "dropping observation with an invalid label name"; "metric" => metric_name, "label" => label.as_str());
            return;
        }
        if has_histogram && tags.get("le").is_some() {
            warn!(self.logger, "le is reserved on histograms, dropping observation"; "metric" => metric_name);
            return;
        }

        if has_histogram {
            let Some(v) = value else {
                warn!(self.logger, "metric is a histogram, so value is mandatory"; "metric" => metric_name);
                return;
            };
            if let Some(histogram) = registry.histogram_mut(metric_name) {
                histogram.observe(v, Some(tags));
            }
        }

        if has_gauge {
            let Some(v) = value else {
                warn!(self.logger, "metric is a gauge, so value is mandatory"; "metric" => metric_name);
                return;
            };
            if let Some(gauge) = registry.gauge_mut(metric_name) {
                gauge.set(v, Some(tags));
            }
        }

        if let Some(counter) = registry.counter_mut(metric_name) {
            counter.add(value.unwrap_or(1.0), Some(tags));
        }
    }

    /// Starts a flush on the current tokio runtime and returns right away.
    /// Returns `None` when no aggregator is configured or no runtime is
    /// running; metrics then stay in the registry.
    pub fn send_metrics(&self) -> Option<JoinHandle<FlushOutcome>> {
        let pusher = Arc::clone(self.pusher.as_ref()?);
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(self.logger, "no async runtime available, metrics not sent");
                return None;
            }
        };

        let registry = Arc::clone(&self.registry);
        Some(handle.spawn(async move { pusher.flush(&registry).await }))
    }

    /// Flushes in the caller's task.
    pub async fn flush(&self) -> FlushOutcome {
        match &self.pusher {
            Some(pusher) => pusher.flush(&self.registry).await,
            None => FlushOutcome::Skipped,
        }
    }

    pub fn record_app_loaded(&self) -> Option<JoinHandle<FlushOutcome>> {
        let tags = LabelSet::from([("status", "success")]);
        self.observe(GoldenMetric::AppLoaded.name(), Some(&tags), None, false)
    }

    /// Stores the navigation, observes its duration, time to complete and
    /// time to usable in seconds, then flushes once for all three.
    pub fn record_navigation(&self, event: NavigationEvent) -> Option<JoinHandle<FlushOutcome>> {
        let normalized = (self.normalize_path)(&event.target);
        let path = if normalized.is_empty() {
            event.target.clone()
        } else {
            normalized
        };

        *self
            .navigation_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(NavigationData {
            start: event.start,
            duration: event.duration,
            time_to_complete: event.time_to_complete,
            time_to_usable: event.time_to_usable,
            is_full_page_navigation: event.is_full_page_navigation,
            path: path.clone(),
        });

        let navigation_type = if event.is_full_page_navigation {
            "full_page"
        } else {
            "in_app"
        };
        let tags = LabelSet::from([("navigation_type", navigation_type), ("path", path.as_str())]);

        self.observe(GoldenMetric::PageNavigation.name(), Some(&tags), Some(event.duration / 1000.0), true);
        self.observe(
            GoldenMetric::PageTimeToComplete.name(),
            Some(&tags),
            Some(event.time_to_complete / 1000.0),
            true,
        );
        self.observe(
            GoldenMetric::PageTimeToUsable.name(),
            Some(&tags),
            Some(event.time_to_usable / 1000.0),
            true,
        );

        self.send_metrics()
    }

    /// Records a lifecycle event (e.g. `ttfb`, `dcl`, `load`) that happened
    /// `start` milliseconds into the run. Does not flush.
    pub fn record_lifecycle_event(&self, event_type: &str, start: f64) {
        let tags = LabelSet::from([("event_type", event_type)]);
        self.observe(GoldenMetric::PerformanceTime.name(), Some(&tags), Some(start / 1000.0), true);
    }

    /// Counts the unload and sends a last flush, awaiting it so the request
    /// is not cut short by process exit.
    pub async fn unload(&self) -> FlushOutcome {
        self.observe(GoldenMetric::AppUnloaded.name(), None, None, true);
        let outcome = self.flush().await;
        debug!(self.logger, "final flush done"; "outcome" => ?outcome);
        outcome
    }

    pub fn add_observe_listener(&self, callback: ObserveCallback) -> ListenerHandle {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(callback)
    }

    pub fn remove_observe_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)
    }

    pub fn clear_observe_listeners(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::MetricDefinition;
    use crate::prometheus::promslog;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn config() -> SessionConfig {
        SessionConfig {
            app_name: "x".to_string(),
            owner: "y".to_string(),
            custom_metrics: vec![
                MetricDefinition::histogram("checkout_seconds", "Checkout", Some(vec![1.0, 5.0, 10.0])),
                MetricDefinition::Gauge {
                    name: "cart_items".to_string(),
                    description: "Items in cart".to_string(),
                },
            ],
            ..SessionConfig::default()
        }
    }

    fn session() -> MetricsSession {
        MetricsSession::new(&config(), promslog::discard()).unwrap()
    }

    fn session_for(url: &str, registry: Arc<Mutex<Registry>>) -> MetricsSession {
        let config = SessionConfig {
            aggregator_url: Some(url.to_string()),
            ..config()
        };
        MetricsSession::with_registry(registry, &config, promslog::discard()).unwrap()
    }

    #[test]
    fn test_counter_observation_carries_default_tags() {
        let s = session();
        s.observe("prom_react_app_loaded", None, None, true);
        s.observe("prom_react_app_loaded", Some(&LabelSet::new()), None, true);

        assert!(s.metrics().contains("prom_react_app_loaded{app_name=\"x\",owner=\"y\"} 2\n"));
    }

    #[test]
    fn test_extra_tags_override_defaults() {
        let s = session();
        let tags = LabelSet::from([("owner", "z"), ("status", "success")]);
        s.observe("prom_react_app_loaded", Some(&tags), Some(3.0), true);

        assert!(s
            .metrics()
            .contains("prom_react_app_loaded{app_name=\"x\",owner=\"z\",status=\"success\"} 3\n"));
    }

    #[test]
    fn test_histogram_end_to_end() {
        let s = session();
        for v in [0.5, 3.0, 7.0, 20.0] {
            s.observe("checkout_seconds", None, Some(v), true);
        }

        let registry = s.registry();
        let registry = registry.lock().unwrap();
        let value = &registry
            .histogram("checkout_seconds")
            .unwrap()
            .get(Some(s.default_tags()))
            .unwrap()
            .value;
        assert_eq!(value.entry("1"), Some(1));
        assert_eq!(value.entry("5"), Some(2));
        assert_eq!(value.entry("10"), Some(3));
        assert_eq!(value.entry("+Inf"), Some(4));
        assert_eq!(value.sum, 30.5);
    }

    #[test]
    fn test_histogram_without_value_is_dropped() {
        let s = session();
        let registry = s.registry();
        let generation = registry.lock().unwrap().generation();
        s.observe("checkout_seconds", None, None, true);
        s.observe("cart_items", None, None, true);
        assert_eq!(registry.lock().unwrap().generation(), generation);
    }

    #[test]
    fn test_gauge_observation() {
        let s = session();
        s.observe("cart_items", None, Some(4.0), true);
        s.observe("cart_items", None, Some(2.0), true);
        assert!(s.metrics().contains("cart_items{app_name=\"x\",owner=\"y\"} 2\n"));
    }

    #[test]
    fn test_unknown_and_non_finite_observations_are_no_ops() {
        let s = session();
        let registry = s.registry();
        let generation = registry.lock().unwrap().generation();

        s.observe("does_not_exist", None, Some(1.0), true);
        s.observe("checkout_seconds", None, Some(f64::NAN), true);
        s.observe("prom_react_app_loaded", None, Some(f64::INFINITY), true);

        assert_eq!(registry.lock().unwrap().generation(), generation);
    }

    #[test]
    fn test_listeners_see_merged_tags() {
        let s = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = s.add_observe_listener(Arc::new(move |o: &Observation| {
            sink.lock().unwrap().push(o.clone());
        }));

        s.observe("prom_react_app_loaded", Some(&LabelSet::from([("status", "success")])), None, true);
        s.remove_observe_listener(handle);
        s.observe("prom_react_app_loaded", None, None, true);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].metric_name, "prom_react_app_loaded");
        assert_eq!(seen[0].value, None);
        assert_eq!(seen[0].tags, LabelSet::from([("app_name", "x"), ("owner", "y"), ("status", "success")]));
    }

    #[test]
    fn test_listener_may_clear_listeners() {
        let s = Arc::new(session());
        let inner = Arc::clone(&s);
        s.add_observe_listener(Arc::new(move |_: &Observation| {
            inner.clear_observe_listeners();
        }));
        s.observe("prom_react_app_loaded", None, None, true);
    }

    #[test]
    fn test_record_navigation() {
        let config = SessionConfig {
            path_rules: vec![crate::config::PathRule {
                pattern: r"^/products/\d+$".to_string(),
                replacement: "/products/:id".to_string(),
            }],
            ..config()
        };
        let s = MetricsSession::new(&config, promslog::discard()).unwrap();

        assert!(s
            .record_navigation(NavigationEvent {
                start: 10.0,
                duration: 1500.0,
                time_to_complete: 2000.0,
                time_to_usable: 500.0,
                is_full_page_navigation: false,
                target: "/products/42".to_string(),
            })
            .is_none());

        let data = s.navigation_data().unwrap();
        assert_eq!(data.path, "/products/:id");
        assert_eq!(data.duration, 1500.0);

        let out = s.metrics();
        let labels = "app_name=\"x\",navigation_type=\"in_app\",owner=\"y\",path=\"/products/:id\"";
        assert!(out.contains(&format!("prom_react_navigation_duration_seconds_sum{{{}}} 1.5\n", labels)));
        assert!(out.contains(&format!("prom_react_ttc_seconds_sum{{{}}} 2\n", labels)));
        assert!(out.contains(&format!("prom_react_ttu_seconds_sum{{{}}} 0.5\n", labels)));
    }

    #[test]
    fn test_custom_path_normalizer() {
        let s = session().with_path_normalizer(|p| p.split('?').next().unwrap_or(p).to_string());
        s.record_navigation(NavigationEvent {
            start: 0.0,
            duration: 100.0,
            time_to_complete: 100.0,
            time_to_usable: 100.0,
            is_full_page_navigation: true,
            target: "/search?q=shoes".to_string(),
        });
        assert_eq!(s.navigation_data().unwrap().path, "/search");
        assert!(s.metrics().contains("navigation_type=\"full_page\""));
    }

    #[test]
    fn test_record_lifecycle_event() {
        let s = session();
        s.record_lifecycle_event("ttfb", 250.0);
        assert!(s
            .metrics()
            .contains("prom_react_performance_seconds_sum{app_name=\"x\",event_type=\"ttfb\",owner=\"y\"} 0.25\n"));
    }

    #[test]
    fn test_reinitialization_keeps_counts() {
        let registry = Arc::new(Mutex::new(Registry::new()));
        let first = MetricsSession::with_registry(Arc::clone(&registry), &config(), promslog::discard()).unwrap();
        first.observe("prom_react_app_loaded", None, None, true);

        let second = MetricsSession::with_registry(Arc::clone(&registry), &config(), promslog::discard()).unwrap();
        second.observe("prom_react_app_loaded", None, None, true);

        assert!(second.metrics().contains("prom_react_app_loaded{app_name=\"x\",owner=\"y\"} 2\n"));
    }

    #[test]
    fn test_invalid_aggregator_url() {
        let config = SessionConfig {
            aggregator_url: Some("http://bad host".to_string()),
            ..config()
        };
        assert!(matches!(
            MetricsSession::new(&config, promslog::discard()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_without_aggregator_nothing_is_sent() {
        let s = session();
        assert!(s.observe("prom_react_app_loaded", None, None, false).is_none());
        assert!(s.send_metrics().is_none());
        assert!(matches!(s.flush().await, FlushOutcome::Skipped));
        assert!(s.metrics().contains("prom_react_app_loaded{app_name=\"x\",owner=\"y\"} 1\n"));
    }

    #[test]
    fn test_send_outside_runtime_keeps_metrics() {
        let s = session_for("http://127.0.0.1:1/push", Arc::new(Mutex::new(Registry::new())));
        assert!(s.observe("prom_react_app_loaded", None, None, false).is_none());
        assert!(s.metrics().contains("prom_react_app_loaded{app_name=\"x\",owner=\"y\"} 1\n"));
    }

    #[tokio::test]
    async fn test_observe_flushes_and_resets() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/metrics/job/shop")
                    .header("content-type", "text/plain;charset=UTF-8")
                    .body_includes("prom_react_app_loaded{app_name=\"x\",owner=\"y\",status=\"success\"} 1");
                then.status(200);
            })
            .await;

        let s = session_for(&server.url("/metrics/job/shop"), Arc::new(Mutex::new(Registry::new())));
        let outcome = s.record_app_loaded().unwrap().await.unwrap();

        mock.assert_async().await;
        assert!(matches!(outcome, FlushOutcome::Sent));
        assert!(s
            .metrics()
            .contains("prom_react_app_loaded{app_name=\"x\",owner=\"y\",status=\"success\"} 0\n"));
    }

    #[test]
    fn test_invalid_label_names_are_dropped() {
        let s = session();
        let registry = s.registry();
        let generation = registry.lock().unwrap().generation();

        s.observe("prom_react_app_loaded", Some(&LabelSet::from([("bad-key", "v")])), None, true);
        s.observe("checkout_seconds", Some(&LabelSet::from([("le", "x")])), Some(1.0), true);

        assert_eq!(registry.lock().unwrap().generation(), generation);
        let out = s.metrics();
        assert!(!out.contains("bad-key"));
        assert!(!out.contains("le=\"x\""));

        // `le` is only reserved on histograms.
        s.observe("prom_react_app_loaded", Some(&LabelSet::from([("le", "x")])), None, true);
        assert!(s.metrics().contains("prom_react_app_loaded{app_name=\"x\",le=\"x\",owner=\"y\"} 1\n"));
    }

    #[tokio::test]
    async fn test_observations_during_a_flush_are_kept() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/push")
                    .body_includes("prom_react_app_loaded{app_name=\"x\",owner=\"y\"} 3");
                then.status(200).delay(std::time::Duration::from_millis(300));
            })
            .await;

        let s = session_for(&server.url("/push"), Arc::new(Mutex::new(Registry::new())));
        for _ in 0..3 {
            s.observe("prom_react_app_loaded", None, None, true);
        }
        let flush = s.send_metrics().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        s.observe("prom_react_app_loaded", None, None, true);
        s.observe("prom_react_app_loaded", Some(&LabelSet::from([("status", "late")])), None, true);

        let outcome = flush.await.unwrap();
        mock.assert_async().await;
        assert!(outcome.is_sent());

        let out = s.metrics();
        assert!(out.contains("prom_react_app_loaded{app_name=\"x\",owner=\"y\"} 1\n"));
        assert!(out.contains("prom_react_app_loaded{app_name=\"x\",owner=\"y\",status=\"late\"} 1\n"));
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_by_the_next_one() {
        let failing = MockServer::start_async().await;
        failing
            .mock_async(|when, then| {
                when.method(POST).path("/push");
                then.status(500);
            })
            .await;
        let healthy = MockServer::start_async().await;
        let delivered = healthy
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/push")
                    .body_includes("checkout_seconds_count{app_name=\"x\",owner=\"y\"} 1");
                then.status(200);
            })
            .await;

        let registry = Arc::new(Mutex::new(Registry::new()));
        let broken = session_for(&failing.url("/push"), Arc::clone(&registry));
        let working = session_for(&healthy.url("/push"), Arc::clone(&registry));

        let outcome = broken.observe("checkout_seconds", None, Some(2.0), false).unwrap().await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Failed(_)));

        let outcome = working.flush().await;
        delivered.assert_async().await;
        assert!(outcome.is_sent());
    }

    #[tokio::test]
    async fn test_unload_sends_final_flush() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/push")
                    .body_includes("prom_react_app_unloaded{app_name=\"x\",owner=\"y\"} 1");
                then.status(200);
            })
            .await;

        let s = session_for(&server.url("/push"), Arc::new(Mutex::new(Registry::new())));
        let outcome = s.unload().await;

        mock.assert_async().await;
        assert!(outcome.is_sent());
    }
}
