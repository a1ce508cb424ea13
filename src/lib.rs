//! Client-side Prometheus metrics: a registry of counters, gauges and
//! histograms keyed by label sets, rendered in the text exposition format
//! and pushed to an aggregator by a [`session::MetricsSession`].

pub mod config;
pub mod golden;
pub mod observe;
pub mod prometheus;
pub mod session;
