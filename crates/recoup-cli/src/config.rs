//! Application configuration.
//!
//! Loaded from a TOML file (default `config/default.toml`), then overlaid
//! with `RECOUP_*` environment variables. A `.env` file in the working
//! directory is read first, so it can supply those variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use recoup_engine::{EngineConfig, PipelineScheduler, ScheduleConfig, SendTriggerConfig};
use recoup_web::WebConfig;
use serde::{Deserialize, Serialize};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix shared by every environment override.
const ENV_PREFIX: &str = "RECOUP_";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Top-level configuration, one field per TOML table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub engine: EngineConfig,
    pub send: SendTriggerConfig,
    pub schedule: ScheduleConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/recoup.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format '{other}' (expected compact or json)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration for the CLI.
    ///
    /// An explicit `path` must exist. Without one, the default file is used
    /// when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `RECOUP_*` variables. `lookup` returns the value of a
    /// variable, if set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(path) = var("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.log.format = format.parse()?;
        }
        if let Some(bind) = var("BIND") {
            self.web.bind_addr = bind;
        }
        if let Some(port) = var("PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("{ENV_PREFIX}PORT is not a port number: {port}"))?;
        }
        if let Some(url) = var("SEND_URL") {
            self.send.url = Some(url);
        }
        if let Some(enabled) = var("SCHEDULE_ENABLED") {
            self.schedule.enabled = parse_bool(&enabled)
                .with_context(|| format!("{ENV_PREFIX}SCHEDULE_ENABLED is not a boolean"))?;
        }
        if let Some(cron) = var("SCHEDULE_CRON") {
            self.schedule.cron = cron;
        }
        if let Some(base) = var("INVOICE_LINK_BASE") {
            self.engine.invoice_link_base = base;
        }
        Ok(())
    }

    /// Reject values that would only fail later, at run time.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.schedule.enabled {
            PipelineScheduler::new(&self.schedule.cron)
                .context("invalid [schedule] cron expression")?;
        }
        if self.database.path.as_os_str().is_empty() {
            bail!("database.path must not be empty");
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected true or false, got '{other}'"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_usable() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.database.path, PathBuf::from("data/recoup.db"));
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Compact);
        assert!(config.send.url.is_none());
        assert!(!config.schedule.enabled);
        assert_eq!(config.web.port, 3000);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [engine]
            page_size = 100

            [web]
            port = 8080

            [log]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.page_size, 100);
        assert_eq!(config.engine.stage_max_attempts, 3);
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.web.bind_addr, "127.0.0.1");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn shipped_default_file_matches_built_in_defaults() {
        let config =
            AppConfig::from_toml(include_str!("../../../config/default.toml")).unwrap();
        config.validate().unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.database.path, defaults.database.path);
        assert_eq!(config.engine.page_size, defaults.engine.page_size);
        assert_eq!(config.schedule.cron, defaults.schedule.cron);
        assert_eq!(config.web.port, defaults.web.port);
        assert!(config.send.url.is_none());
    }

    #[test]
    fn unreadable_toml_is_an_error() {
        assert!(AppConfig::from_toml("[engine\npage_size = 1").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("RECOUP_DATABASE_PATH", "/tmp/other.db"),
                ("RECOUP_PORT", "9090"),
                ("RECOUP_BIND", "0.0.0.0"),
                ("RECOUP_SEND_URL", "http://localhost:7000/send"),
                ("RECOUP_LOG_FORMAT", "JSON"),
                ("RECOUP_SCHEDULE_ENABLED", "yes"),
                ("RECOUP_SCHEDULE_CRON", "0 7 * * *"),
            ]))
            .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.web.port, 9090);
        assert_eq!(config.web.bind_addr, "0.0.0.0");
        assert_eq!(
            config.send.url.as_deref(),
            Some("http://localhost:7000/send")
        );
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.schedule.enabled);
        assert_eq!(config.schedule.cron, "0 7 * * *");
        config.validate().unwrap();
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("RECOUP_PORT", "  ")])).unwrap();
        assert_eq!(config.web.port, 3000);
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env(&[("RECOUP_PORT", "eighty")])).is_err());
        assert!(
            config
                .apply_env(env(&[("RECOUP_LOG_FORMAT", "xml")]))
                .is_err()
        );
        assert!(
            config
                .apply_env(env(&[("RECOUP_SCHEDULE_ENABLED", "maybe")]))
                .is_err()
        );
    }

    #[test]
    fn enabled_schedule_needs_a_valid_cron() {
        let mut config = AppConfig::default();
        config.schedule.enabled = true;
        config.schedule.cron = "every morning".into();
        assert!(config.validate().is_err());

        config.schedule.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::from_file(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn file_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recoup.toml");
        std::fs::write(&path, "[database]\npath = \"ar.db\"\n").unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("ar.db"));
    }
}
