use std::{net::SocketAddr, path::Path, time::Duration};

use harvester_common::error::Error;
use serde::Deserialize;
use strum_macros::{Display, EnumString};
use tracing::{info, warn};

use crate::engine::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "./harvester.yaml";

/// Service configuration.
/// ---
/// Read from a YAML file, then overridden from the environment
/// (`.env` is loaded by `main` before this runs). Every key has a default,
/// so a missing file is not an error.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseSection,
    pub api: ApiSection,
    pub engine: EngineSection,
    pub browser: BrowserSection,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSection {
    pub listen_addr: String,
    pub jwt_secret: Option<String>,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            jwt_secret: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSection {
    /// Owner tag written on execution rows, defaults to the host name
    pub worker_id: Option<String>,
    pub max_workers: usize,
    pub tick_interval_ms: u64,
    pub shutdown_grace_secs: u64,
    pub retry: RetrySection,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            worker_id: None,
            max_workers: 10,
            tick_interval_ms: 1000,
            shutdown_grace_secs: 30,
            retry: RetrySection::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Default, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Plain HTTP fetches, no script execution
    #[default]
    Http,
    Chromium,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserSection {
    pub driver: DriverKind,

    /// DevTools endpoint of an already running Chromium
    pub cdp_url: Option<String>,
    pub session_reuse_hours: i64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            driver: DriverKind::Http,
            cdp_url: None,
            session_reuse_hours: 24,
        }
    }
}

impl AppConfig {
    /// Loads the file at `path` and applies process environment overrides.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            info!("Config: loaded {}", path.display());
            parse_yaml(&raw)?
        } else {
            warn!("Config: {} not found, using defaults", path.display());
            AppConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides keys from environment variables looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(addr) = lookup("HARVESTER_LISTEN_ADDR") {
            self.api.listen_addr = addr;
        }
        if let Some(secret) = lookup("HARVESTER_JWT_SECRET") {
            self.api.jwt_secret = Some(secret);
        }
        if let Some(worker_id) = lookup("HARVESTER_WORKER_ID") {
            self.engine.worker_id = Some(worker_id);
        }
        if let Some(max_workers) = lookup("HARVESTER_MAX_WORKERS") {
            self.engine.max_workers = max_workers.trim().parse().map_err(|e| {
                Error::Config(format!("HARVESTER_MAX_WORKERS '{max_workers}' is not a number: {e}"))
            })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.engine.max_workers == 0 {
            return Err(Error::Config("engine.max_workers must be at least 1".to_string()));
        }
        if self.engine.tick_interval_ms == 0 {
            return Err(Error::Config(
                "engine.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.engine.retry.multiplier < 1.0 {
            return Err(Error::Config(
                "engine.retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.engine.retry.max_delay_ms < self.engine.retry.initial_delay_ms {
            return Err(Error::Config(
                "engine.retry.max_delay_ms must not be below initial_delay_ms".to_string(),
            ));
        }
        if self.browser.session_reuse_hours < 0 {
            return Err(Error::Config(
                "browser.session_reuse_hours must not be negative".to_string(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, Error> {
        self.database
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("database.url (or DATABASE_URL) must be set".to_string()))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, Error> {
        self.api.listen_addr.parse().map_err(|e| {
            Error::Config(format!(
                "Failed to parse listen address '{}': {}",
                self.api.listen_addr, e
            ))
        })
    }

    pub fn jwt_secret(&self) -> Result<&str, Error> {
        self.api
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Config("api.jwt_secret (or HARVESTER_JWT_SECRET) must be set".to_string())
            })
    }

    /// Configured worker id, or the host name.
    pub fn worker_id(&self) -> String {
        if let Some(id) = self.engine.worker_id.as_deref().filter(|s| !s.trim().is_empty()) {
            return id.to_string();
        }

        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "harvester".to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.engine.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.engine.retry.max_delay_ms),
            multiplier: self.engine.retry.multiplier,
        }
    }

    pub fn session_reuse(&self) -> chrono::Duration {
        chrono::Duration::hours(self.browser.session_reuse_hours)
    }
}

pub fn parse_yaml(yaml_str: &str) -> Result<AppConfig, Error> {
    serde_yaml::from_str(yaml_str).map_err(|e| {
        let err = if let Some(location) = e.location() {
            ParseError::InvalidYaml {
                line: location.line(),
                column: location.column(),
                message: e.to_string(),
            }
        } else {
            ParseError::InvalidYamlNoLocation {
                message: e.to_string(),
            }
        };
        Error::Config(err.to_string())
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid YAML config at line {line}, column {column}: {message}")]
    InvalidYaml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Invalid YAML config: {message}")]
    InvalidYamlNoLocation { message: String },
}
