use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::poller::PollerOptions;
use crate::Result;

/// Server-wide configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeboardConfig {
    pub host: String,
    pub port: u16,
    /// Root scanned for dashboard folders at startup
    pub dashboards_dir: PathBuf,
    /// Served under `/static`
    pub static_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Handed to every data source through its context
    pub secret_key: String,
    /// Buffered push updates per slow subscriber
    pub push_capacity: usize,
    /// Per-dashboard settings, keyed by dashboard folder name
    pub dashboards: toml::Table,
}

impl Default for HomeboardConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            dashboards_dir: PathBuf::from("dashboards"),
            static_dir: PathBuf::from("static"),
            poll_interval_secs: 90,
            fetch_timeout_secs: 30,
            secret_key: "SecretKey".to_string(),
            push_capacity: 64,
            dashboards: toml::Table::new(),
        }
    }
}

impl HomeboardConfig {
    /// Load configuration from a TOML file (path via HOMEBOARD_CONFIG or ./homeboard.toml),
    /// then overlay HOMEBOARD_* environment variables.
    pub fn load() -> Self {
        let path = std::env::var("HOMEBOARD_CONFIG").unwrap_or_else(|_| "homeboard.toml".into());
        let p = Path::new(&path);
        let base = if !p.exists() {
            tracing::info!(target: "config", path = %path, "No TOML config found; using defaults/env");
            Self::default()
        } else {
            match Self::from_file(p) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(target: "config", path = %path, error = %e, "Failed to load TOML; using defaults");
                    Self::default()
                }
            }
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay values found through `lookup` (normally the process environment)
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = get("HOMEBOARD_HOST") {
            self.host = host;
        }
        if let Some(port) = get("HOMEBOARD_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(dir) = get("HOMEBOARD_DASHBOARDS_DIR") {
            self.dashboards_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("HOMEBOARD_STATIC_DIR") {
            self.static_dir = PathBuf::from(dir);
        }
        if let Some(secs) = get("HOMEBOARD_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.poll_interval_secs = secs;
        }
        if let Some(secs) = get("HOMEBOARD_FETCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.fetch_timeout_secs = secs;
        }
        if let Some(key) = get("HOMEBOARD_SECRET_KEY") {
            self.secret_key = key;
        }
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            interval: Duration::from_secs(self.poll_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    /// Settings table for one dashboard; empty when not configured
    pub fn dashboard_settings(&self, name: &str) -> toml::Table {
        self.dashboards
            .get(name)
            .and_then(|v| v.as_table())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_household_deployment() {
        let config = HomeboardConfig::default();
        assert_eq!(config.addr(), "0.0.0.0:5000");
        assert_eq!(config.poller_options().interval, Duration::from_secs(90));
        assert_eq!(config.dashboards_dir, PathBuf::from("dashboards"));
    }

    #[test]
    fn toml_overrides_and_dashboard_sections() {
        let config = HomeboardConfig::from_toml_str(
            r#"
            port = 8080
            poll_interval_secs = 10

            [dashboards.planer.calendar]
            conditional_fetch = true
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.host, "0.0.0.0");

        let planer = config.dashboard_settings("planer");
        assert!(planer.contains_key("calendar"));
        assert!(config.dashboard_settings("unknown").is_empty());
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = [
            ("HOMEBOARD_PORT", "9000"),
            ("HOMEBOARD_HOST", "127.0.0.1"),
            ("HOMEBOARD_FETCH_TIMEOUT_SECS", "not-a-number"),
            ("HOMEBOARD_SECRET_KEY", ""),
        ]
        .into_iter()
        .collect();

        let config = HomeboardConfig::from_toml_str("port = 8080")
            .unwrap()
            .with_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        // Unparseable and empty values are ignored
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.secret_key, "SecretKey");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(HomeboardConfig::from_toml_str("port = \"eighty\"").is_err());
    }
}
