use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Records are also appended here when set.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_refresh_interval_secs() -> u64 {
    5
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".into()
}
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1502))
}
fn default_unit_id() -> u8 {
    1
}
fn default_max_sessions() -> usize {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            unit_id: default_unit_id(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl UpstreamConfig {
    /// Username and password, or `None` when no username is configured.
    /// A missing password is sent as empty.
    pub fn credentials(&self) -> Option<(String, String)> {
        match self.username.as_deref() {
            Some(user) if !user.is_empty() => Some((
                user.to_string(),
                self.password.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load YAML from disk, apply `SHELLY_*` environment overrides and validate.
    /// A missing file is treated as empty so the gateway can run from env alone.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&raw, |key| std::env::var(key).ok())
    }

    /// Parse config text; `env` resolves override variables.
    pub fn parse(raw: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut value: serde_yaml::Value = if raw.trim().is_empty() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            serde_yaml::from_str(raw)?
        };

        let mapping = value
            .as_mapping_mut()
            .ok_or_else(|| ConfigError::Invalid("top level must be a mapping".into()))?;
        let upstream = mapping
            .entry("upstream".into())
            .or_insert(serde_yaml::Value::Mapping(Default::default()));
        let upstream = upstream
            .as_mapping_mut()
            .ok_or_else(|| ConfigError::Invalid("`upstream` must be a mapping".into()))?;
        for (var, key) in [
            ("SHELLY_HOST", "host"),
            ("SHELLY_USERNAME", "username"),
            ("SHELLY_PASSWORD", "password"),
        ] {
            if let Some(v) = env(var) {
                upstream.insert(key.into(), v.into());
            }
        }
        if !upstream.contains_key(&serde_yaml::Value::from("host")) {
            return Err(ConfigError::Invalid(
                "upstream.host is required (or set SHELLY_HOST)".into(),
            ));
        }

        let cfg: Self = serde_yaml::from_value(value)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.host.trim().is_empty() {
            return Err(ConfigError::Invalid("upstream.host must not be empty".into()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_secs must be at least 1".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream.timeout_secs must be at least 1".into(),
            ));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log_level `{}`",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
