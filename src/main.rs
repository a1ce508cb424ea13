use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use slog::{info, o, warn, Logger};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};

use prom_push_rs::config::SessionConfig;
use prom_push_rs::observe::logging_listener;
use prom_push_rs::prometheus::labelset::{LabelSet, LabelValue};
use prom_push_rs::prometheus::promslog::{
    self, AllowedFormat, AllowedLevel, FORMAT_FLAG_HELP, FORMAT_FLAG_NAME, LEVEL_FLAG_HELP, LEVEL_FLAG_NAME,
};
use prom_push_rs::session::MetricsSession;

/// Reads observations from stdin, one per line, and pushes them to an
/// aggregator.
///
/// Line format: `<metric> [value] [key=value ...]`. Empty lines and lines
/// starting with `#` are ignored.
#[derive(Debug, Parser)]
#[command(name = "prom_push", version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Aggregator URL, overrides `aggregator_url`.
    #[arg(long)]
    gateway: Option<String>,

    #[arg(long = "app-name")]
    app_name: Option<String>,

    #[arg(long)]
    owner: Option<String>,

    /// Seconds between periodic flushes, overrides `flush_interval_secs`.
    #[arg(long = "flush-interval")]
    flush_interval: Option<u64>,

    /// Log every observation at info level.
    #[arg(long = "log-observations")]
    log_observations: bool,

    #[arg(long = LEVEL_FLAG_NAME, help = LEVEL_FLAG_HELP)]
    log_level: Option<AllowedLevel>,

    #[arg(long = FORMAT_FLAG_NAME, help = FORMAT_FLAG_HELP)]
    log_format: Option<AllowedFormat>,
}

impl Args {
    fn into_config(self) -> Result<(SessionConfig, bool), Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(url) = self.gateway {
            config.aggregator_url = Some(url);
        }
        if let Some(app_name) = self.app_name {
            config.app_name = app_name;
        }
        if let Some(owner) = self.owner {
            config.owner = owner;
        }
        if let Some(secs) = self.flush_interval {
            config.flush_interval_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        config.validate()?;
        Ok((config, self.log_observations))
    }
}

#[derive(Debug, PartialEq)]
struct InputLine {
    metric: String,
    value: Option<f64>,
    tags: LabelSet,
}

fn parse_line(line: &str) -> Result<Option<InputLine>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace().peekable();
    let metric = match fields.next() {
        Some(m) => m.to_string(),
        None => return Ok(None),
    };

    let mut value = None;
    if let Some(field) = fields.peek() {
        if !field.contains('=') {
            value = Some(field.parse::<f64>().map_err(|e| format!("value {:?}: {}", field, e))?);
            fields.next();
        }
    }

    let mut tags = LabelSet::new();
    for field in fields {
        match field.split_once('=') {
            Some((k, v)) if !k.is_empty() => {
                tags.insert(k, LabelValue::from(v));
            }
            _ => return Err(format!("tag {:?} is not key=value", field)),
        }
    }

    Ok(Some(InputLine { metric, value, tags }))
}

async fn run(session: Arc<MetricsSession>, config: &SessionConfig, logger: &Logger) -> Result<(), Box<dyn Error>> {
    let mut ticker = interval(config.flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match parse_line(&line) {
                    Ok(Some(input)) => {
                        let tags = if input.tags.is_empty() { None } else { Some(&input.tags) };
                        session.observe(&input.metric, tags, input.value, true);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(logger, "skipping malformed line"; "line" => &line, "err" => err),
                }
            }
            _ = ticker.tick() => {
                session.send_metrics();
            }
            _ = &mut interrupted => {
                info!(logger, "interrupted");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let (config, log_observations) = Args::parse().into_config()?;
    let logger = promslog::new_logger(&config.log);

    info!(logger, "Starting prom_push";
        "version" => env!("CARGO_PKG_VERSION"),
        "gateway" => config.aggregator_url.as_deref().unwrap_or("none"));

    let session = Arc::new(MetricsSession::new(&config, logger.new(o!("component" => "session")))?);
    if log_observations {
        session.add_observe_listener(logging_listener(logger.clone()));
    }
    session.record_app_loaded();

    let result = run(Arc::clone(&session), &config, &logger).await;

    let outcome = session.unload().await;
    info!(logger, "Stopping prom_push"; "sent" => outcome.is_sent());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("  # comment").unwrap(), None);

        assert_eq!(
            parse_line("prom_react_app_loaded").unwrap(),
            Some(InputLine {
                metric: "prom_react_app_loaded".to_string(),
                value: None,
                tags: LabelSet::new(),
            })
        );
        assert_eq!(
            parse_line("checkout_seconds 1.5 path=/cart status=ok").unwrap(),
            Some(InputLine {
                metric: "checkout_seconds".to_string(),
                value: Some(1.5),
                tags: LabelSet::from([("path", "/cart"), ("status", "ok")]),
            })
        );
        assert_eq!(
            parse_line("clicks button=buy").unwrap().unwrap().tags,
            LabelSet::from([("button", "buy")])
        );
    }

    #[test]
    fn test_parse_line_errors() {
        assert!(parse_line("clicks abc").is_err());
        assert!(parse_line("clicks 1 notatag").is_err());
        assert!(parse_line("clicks 1 =v").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "prom_push",
            "--gateway",
            "localhost:9091",
            "--app-name",
            "shop",
            "--flush-interval",
            "3",
            "--log.level",
            "debug",
        ]);
        let (config, log_observations) = args.into_config().unwrap();
        assert_eq!(config.aggregator_url.as_deref(), Some("localhost:9091"));
        assert_eq!(config.app_name, "shop");
        assert_eq!(config.flush_interval_secs, 3);
        assert_eq!(config.log.level.to_string(), "debug");
        assert!(!log_observations);
    }

    #[test]
    fn test_zero_flush_interval_is_rejected() {
        let args = Args::parse_from(["prom_push", "--flush-interval", "0"]);
        assert!(args.into_config().is_err());
    }
}
