use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use slog::Logger;
use thiserror::Error;

use crate::golden::MetricDefinition;
use crate::prometheus::histogram::{validate_buckets, DEFAULT_BUCKETS};
use crate::prometheus::promslog;
use crate::prometheus::push::Pusher;

const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid path rule {pattern:?}: {source}")]
    InvalidRule {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a session needs. All fields are optional in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sent as the `app_name` label on every observation.
    pub app_name: String,
    /// Sent as the `owner` label on every observation.
    pub owner: String,
    /// Aggregator endpoint. Without it metrics are collected but never sent.
    pub aggregator_url: Option<String>,
    pub histogram_buckets: Vec<f64>,
    pub flush_interval_secs: u64,
    pub transport: TransportConfig,
    pub path_rules: Vec<PathRule>,
    pub custom_metrics: Vec<MetricDefinition>,
    pub log: promslog::Config,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            app_name: String::new(),
            owner: String::new(),
            aggregator_url: None,
            histogram_buckets: DEFAULT_BUCKETS.clone(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            transport: TransportConfig::default(),
            path_rules: Vec::new(),
            custom_metrics: Vec::new(),
            log: promslog::Config::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_buckets(&self.histogram_buckets).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid("flush_interval_secs must be positive".to_string()));
        }
        PathNormalizer::compile(&self.path_rules)?;
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Extra request options for the aggregator. Caller headers take
/// precedence; a `Content-Type` header or `content_type` replaces the
/// default `text/plain;charset=UTF-8`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub basic_auth: Option<BasicAuth>,
    pub bearer_token: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl TransportConfig {
    pub fn pusher(&self, url: &str, logger: Logger) -> Pusher {
        let mut pusher = Pusher::new(url).logger(logger);
        if let Some(content_type) = &self.content_type {
            pusher = pusher.content_type(content_type);
        }
        pusher = pusher.headers(&self.headers);
        if let Some(auth) = &self.basic_auth {
            pusher = pusher.basic_auth(&auth.username, auth.password.as_deref());
        }
        if let Some(token) = &self.bearer_token {
            pusher = pusher.bearer_auth(token);
        }
        if let Some(secs) = self.timeout_secs {
            pusher = pusher.timeout(Duration::from_secs(secs));
        }
        pusher
    }
}

/// Maps a concrete path to a low-cardinality label value, e.g.
/// `^/products/\d+$` to `/products/:id`. Capture groups may be referenced
/// in `replacement` as `$1`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Default)]
pub struct PathNormalizer {
    rules: Vec<(Regex, String)>,
}

impl PathNormalizer {
    pub fn compile(rules: &[PathRule]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.replacement.clone()))
                    .map_err(|source| ConfigError::InvalidRule {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PathNormalizer { rules })
    }

    /// The first matching rule wins; paths matching no rule are returned
    /// unchanged.
    pub fn normalize(&self, path: &str) -> String {
        for (re, replacement) in &self.rules {
            if re.is_match(path) {
                return re.replace(path, replacement.as_str()).into_owned();
            }
        }
        path.to_string()
    }
}
