//! Runtime configuration for the core.
//!
//! Defaults are overridden by `CARBONVER_*` environment variables; blank
//! values are ignored.

use crate::kv::DEFAULT_APP_ID;
use crate::logging::{default_log_level, normalize_level};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_APP_ID: &str = "CARBONVER_APP_ID";
pub const ENV_DB_PATH: &str = "CARBONVER_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "CARBONVER_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "CARBONVER_LOG_DIR";

const DEFAULT_DB_FILE_NAME: &str = "carbonver.sqlite3";

// App ids become part of every storage key.
static APP_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("valid app id regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidAppId(String),
    InvalidLogLevel(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAppId(value) => write!(
                f,
                "app id `{value}` must be 1-64 chars of [A-Za-z0-9_-] starting alphanumeric"
            ),
            Self::InvalidLogLevel(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {}

/// Settings needed to open an application context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub app_id: String,
    pub db_path: PathBuf,
    pub log_level: String,
    /// File logging stays off when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            db_path: std::env::temp_dir().join(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Builds a config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_blank = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(app_id) = non_blank(ENV_APP_ID) {
            config.app_id = app_id;
        }
        if let Some(db_path) = non_blank(ENV_DB_PATH) {
            config.db_path = PathBuf::from(db_path);
        }
        if let Some(level) = non_blank(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        config.log_dir = non_blank(ENV_LOG_DIR).map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !APP_ID_RE.is_match(&self.app_id) {
            return Err(ConfigError::InvalidAppId(self.app_id.clone()));
        }
        normalize_level(&self.log_level).map_err(ConfigError::InvalidLogLevel)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig, ENV_APP_ID, ENV_DB_PATH, ENV_LOG_DIR, ENV_LOG_LEVEL};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.app_id, "cve-platform");
    }

    #[test]
    fn overrides_apply_and_blank_values_are_ignored() {
        let config = CoreConfig::from_lookup(lookup(&[
            (ENV_APP_ID, "field-trial"),
            (ENV_DB_PATH, " /data/cve.sqlite3 "),
            (ENV_LOG_LEVEL, "   "),
            (ENV_LOG_DIR, "/var/log/cve"),
        ]))
        .unwrap();

        assert_eq!(config.app_id, "field-trial");
        assert_eq!(config.db_path, PathBuf::from("/data/cve.sqlite3"));
        assert_eq!(config.log_level, CoreConfig::default().log_level);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/cve")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = CoreConfig::from_lookup(lookup(&[(ENV_APP_ID, "bad id!")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidAppId("bad id!".to_string()));

        let err = CoreConfig::from_lookup(lookup(&[(ENV_LOG_LEVEL, "loud")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }
}
