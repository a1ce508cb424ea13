// Copyright 2015 The Prometheus Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Module push sends registry snapshots to a metrics aggregator. It uses a
//! builder approach. Create a Pusher with `new`, add options with its
//! methods, then call `send` or `flush`:
//!
//! ```no_run
//! # async fn run(registry: std::sync::Mutex<prom_push_rs::prometheus::registry::Registry>) {
//! use prom_push_rs::prometheus::push::Pusher;
//!
//! let pusher = Pusher::new("http://example.org/metrics/job/shop")
//!     .header("X-Tenant", "a")
//!     .basic_auth("top", Some("secret"));
//! pusher.flush(&registry).await;
//! # }
//! ```
//!
//! Option errors (a bad URL or header) are remembered and reported by the
//! first `send`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Url};
use slog::{debug, error, o, Logger};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::prometheus::registry::Registry;

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("invalid push option: {0}")]
    InvalidOption(String),
    #[error("error sending metrics to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status code {status} while pushing to {url}: {body}")]
    UnexpectedStatus { status: u16, url: String, body: String },
}

/// Result of one flush attempt.
#[derive(Debug)]
pub enum FlushOutcome {
    /// The registry serialized to nothing; no request was made.
    Skipped,
    /// The snapshot was delivered and taken out of the registry. Anything
    /// recorded while the request was in flight is kept for the next flush.
    Sent,
    /// Delivery failed; the registry was left intact.
    Failed(PushError),
}

impl FlushOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, FlushOutcome::Sent)
    }
}

#[derive(Debug, Clone)]
pub struct Pusher {
    error: Option<String>,
    url: String,
    client: Client,
    headers: HeaderMap,
    content_type: String,
    basic_auth: Option<(String, Option<String>)>,
    bearer_token: Option<String>,
    timeout: Option<Duration>,
    flush_lock: Arc<AsyncMutex<()>>,
    logger: Logger,
}

impl Pusher {
    pub fn new(url: &str) -> Self {
        let url = if !url.contains("://") {
            format!("http://{}", url)
        } else {
            url.to_string()
        };
        let url = url.trim_end_matches('/').to_string();
        let error = Url::parse(&url)
            .err()
            .map(|e| format!("aggregator url {}: {}", url, e));

        Pusher {
            error,
            url,
            client: Client::new(),
            headers: HeaderMap::new(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            basic_auth: None,
            bearer_token: None,
            timeout: None,
            flush_lock: Arc::new(AsyncMutex::new(())),
            logger: Logger::root(slog::Discard, o!()),
        }
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Adds a request header. Caller headers win over defaults; a
    /// `Content-Type` header replaces the default content type.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
            return self.content_type(value);
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(n), Ok(v)) => {
                self.headers.insert(n, v);
            }
            _ => self.error = Some(format!("header {}: {:?} is not valid", name, value)),
        }
        self
    }

    pub fn headers(self, headers: &BTreeMap<String, String>) -> Self {
        headers.iter().fold(self, |pusher, (name, value)| pusher.header(name, value))
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        if HeaderValue::from_str(content_type).is_err() {
            self.error = Some(format!("content type {:?} is not valid", content_type));
            return self;
        }
        self.content_type = content_type.to_string();
        self
    }

    pub fn basic_auth(mut self, username: &str, password: Option<&str>) -> Self {
        self.basic_auth = Some((username.to_string(), password.map(str::to_string)));
        self
    }

    pub fn bearer_auth(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// POSTs `body` to the aggregator. Any non-2xx answer is an error.
    pub async fn send(&self, body: String) -> Result<(), PushError> {
        if let Some(err) = &self.error {
            return Err(PushError::InvalidOption(err.clone()));
        }

        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, self.content_type.as_str())
            .headers(self.headers.clone())
            .body(body);
        if let Some((username, password)) = &self.basic_auth {
            req = req.basic_auth(username, password.as_ref());
        }
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let res = req.send().await.map_err(|source| PushError::Transport {
            url: self.url.clone(),
            source,
        })?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(PushError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.url.clone(),
                body,
            });
        }
        Ok(())
    }

    /// Serializes `registry`, sends it and, on success, takes the delivered
    /// snapshot back out of the registry. Observations recorded while the
    /// request was in flight stay for the next flush. The registry lock is
    /// held only while serializing and subtracting; flushes through the same
    /// pusher (or its clones) run one at a time.
    pub async fn flush(&self, registry: &Mutex<Registry>) -> FlushOutcome {
        let _in_flight = self.flush_lock.lock().await;

        let (body, snapshot) = {
            let registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            (registry.metrics(), registry.clone())
        };
        if body.is_empty() {
            return FlushOutcome::Skipped;
        }

        match self.send(body).await {
            Ok(()) => {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subtract(&snapshot);
                debug!(self.logger, "metrics delivered"; "url" => &self.url);
                FlushOutcome::Sent
            }
            Err(err) => {
                error!(self.logger, "Error while sending metrics"; "url" => &self.url, "err" => %err);
                FlushOutcome::Failed(err)
            }
        }
    }
}
