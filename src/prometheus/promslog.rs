// Copyright 2024 The Prometheus Authors
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

//! Module promslog builds the slog logger used across the crate from a
//! level and a format setting.
//! It should typically only ever be used by the binary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use slog::{o, Discard, Drain, Level, LevelFilter, Logger, Never};

/// Canonical flag name to configure the allowed log level.
pub const LEVEL_FLAG_NAME: &str = "log.level";

pub const LEVEL_FLAG_HELP: &str =
    "Only log messages with the given severity or above. One of: [trace, debug, info, warn, error]";

/// Canonical flag name to configure the log format.
pub const FORMAT_FLAG_NAME: &str = "log.format";

pub const FORMAT_FLAG_HELP: &str = "Output format of log messages. One of: [logfmt, compact]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedLevel(Level);

impl AllowedLevel {
    pub fn level(&self) -> Level {
        self.0
    }
}

impl Default for AllowedLevel {
    fn default() -> Self {
        AllowedLevel(Level::Info)
    }
}

impl FromStr for AllowedLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lvl = match s.to_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" => Level::Warning,
            "error" => Level::Error,
            _ => return Err(format!("unrecognized log level {}", s)),
        };
        Ok(AllowedLevel(lvl))
    }
}

impl fmt::Display for AllowedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.0 {
            Level::Critical | Level::Error => "error",
            Level::Warning => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        })
    }
}

impl<'de> Deserialize<'de> for AllowedLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `logfmt` writes one full line per record (timestamp, level, message and
/// every key/value pair); `compact` groups records under their shared
/// logger context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllowedFormat {
    #[default]
    Logfmt,
    Compact,
}

impl FromStr for AllowedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logfmt" => Ok(AllowedFormat::Logfmt),
            "compact" => Ok(AllowedFormat::Compact),
            _ => Err(format!("unrecognized log format {}", s)),
        }
    }
}

impl fmt::Display for AllowedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllowedFormat::Logfmt => "logfmt",
            AllowedFormat::Compact => "compact",
        })
    }
}

impl<'de> Deserialize<'de> for AllowedFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub level: AllowedLevel,
    pub format: AllowedFormat,
}

/// Returns a terminal logger writing to stderr through an async drain.
pub fn new_logger(config: &Config) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    match config.format {
        AllowedFormat::Logfmt => build(slog_term::FullFormat::new(decorator).build().fuse(), config.level.level()),
        AllowedFormat::Compact => build(slog_term::CompactFormat::new(decorator).build().fuse(), config.level.level()),
    }
}

fn build<D>(drain: D, level: Level) -> Logger
where
    D: Drain<Ok = (), Err = Never> + Send + 'static,
{
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = LevelFilter::new(drain, level).ignore_res();
    Logger::root(drain, o!())
}

/// A logger that drops everything, the default for library types.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
