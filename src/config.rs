use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::generation::orchestrator::{PollPolicy, MAX_POLL_DEADLINE};
use crate::generation::upstream::UpstreamDialect;

pub const DEFAULT_API_BASE: &str = "https://api.kie.ai";
pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image/1.5-text-to-image";
pub const DEFAULT_BIND: &str = "127.0.0.1:8788";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 180;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const BRIDGE_KEY_PREFIXES: [&str; 2] = ["KIE_", "COLORING_"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub api_base: String,
    /// Kept optional so a missing key surfaces per request rather than at boot.
    pub api_key: Option<String>,
    pub dialect: UpstreamDialect,
    pub model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub bind: SocketAddr,
    pub upstream: UpstreamConfig,
    pub poll_policy: PollPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("failed to read .env file: {0}")]
    Io(#[source] std::io::Error),
}

impl BridgeConfig {
    /// Process environment first, then `.env` under `root`.
    pub fn from_env_and_dotenv(root: &Path) -> Result<Self, ConfigError> {
        let dotenv = load_dotenv_map(root).map_err(ConfigError::Io)?;
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| dotenv.get(key).cloned())
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::from_env_and_dotenv(cwd.as_path())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_raw = get("COLORING_BRIDGE_BIND").unwrap_or_else(|| String::from(DEFAULT_BIND));
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidValue {
                key: "COLORING_BRIDGE_BIND",
                value: bind_raw.clone(),
            })?;

        let dialect = match get("KIE_API_DIALECT") {
            Some(raw) => raw
                .parse::<UpstreamDialect>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "KIE_API_DIALECT",
                    value: raw,
                })?,
            None => UpstreamDialect::Jobs,
        };

        let interval_ms = parse_u64(
            "COLORING_POLL_INTERVAL_MS",
            get("COLORING_POLL_INTERVAL_MS"),
            DEFAULT_POLL_INTERVAL_MS,
        )?;
        let timeout_secs = parse_u64(
            "COLORING_POLL_TIMEOUT_SECS",
            get("COLORING_POLL_TIMEOUT_SECS"),
            DEFAULT_POLL_TIMEOUT_SECS,
        )?;
        let upstream_timeout_secs = parse_u64(
            "COLORING_UPSTREAM_TIMEOUT_SECS",
            get("COLORING_UPSTREAM_TIMEOUT_SECS"),
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?;
        if interval_ms == 0 || interval_ms > MAX_POLL_DEADLINE.as_millis() as u64 {
            return Err(ConfigError::InvalidValue {
                key: "COLORING_POLL_INTERVAL_MS",
                value: interval_ms.to_string(),
            });
        }
        if timeout_secs == 0 || timeout_secs > MAX_POLL_DEADLINE.as_secs() {
            return Err(ConfigError::InvalidValue {
                key: "COLORING_POLL_TIMEOUT_SECS",
                value: timeout_secs.to_string(),
            });
        }

        let poll_policy = PollPolicy {
            interval: Duration::from_millis(interval_ms),
            deadline: Duration::from_secs(timeout_secs),
            ..PollPolicy::default()
        };

        Ok(Self {
            bind,
            upstream: UpstreamConfig {
                api_base: get("KIE_API_BASE")
                    .map(|base| base.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| String::from(DEFAULT_API_BASE)),
                api_key: get("KIE_API_KEY"),
                dialect,
                model: get("KIE_IMAGE_MODEL").unwrap_or_else(|| String::from(DEFAULT_IMAGE_MODEL)),
                request_timeout: Duration::from_secs(upstream_timeout_secs),
            },
            poll_policy,
        })
    }

    /// Eager check used by the `check-config` subcommand.
    pub fn require_credential(&self) -> Result<(), ConfigError> {
        match self.upstream.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::Missing("KIE_API_KEY")),
        }
    }
}

fn parse_u64(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

/// Bridge settings from `root/.env`; only `KIE_*` and `COLORING_*` keys are kept.
pub fn load_dotenv_map(root: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let path = root.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)?;
    let mut values = parse_dotenv_content(raw.as_str());
    values.retain(|key, _| is_bridge_key(key));
    Ok(values)
}

fn is_bridge_key(key: &str) -> bool {
    BRIDGE_KEY_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(parse_dotenv_line)
        .collect()
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line
        .strip_prefix("export ")
        .map_or(line, str::trim_start);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), dotenv_value(value.trim())))
}

fn dotenv_value(raw: &str) -> String {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    match raw.split_once(" #") {
        Some((before_comment, _)) => before_comment.trim_end().to_string(),
        None => raw.to_string(),
    }
}
