use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::EndpointDraft;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("Failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No config path available: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    /// Endpoints imported (upserted by name) at start-up
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<EndpointDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "uppe-monitor.db".into(), pool_size: 8 }
    }
}

/// Engine timing and behaviour knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound of the random delay before an endpoint's first check
    pub startup_jitter_ms: u64,
    pub http_timeout_seconds: u64,
    pub tcp_timeout_seconds: u64,
    pub ping_timeout_seconds: u64,
    pub broker_timeout_seconds: u64,
    pub cert_timeout_seconds: u64,
    /// Keep observation history when an endpoint is deleted
    pub retain_history_on_delete: bool,
    pub domain_check_enabled: bool,
    pub rdap_base_url: String,
    /// How often stored endpoints are compared against running tasks; 0 disables
    pub reload_interval_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            startup_jitter_ms: 3_000,
            http_timeout_seconds: 30,
            tcp_timeout_seconds: 10,
            ping_timeout_seconds: 10,
            broker_timeout_seconds: 10,
            cert_timeout_seconds: 10,
            retain_history_on_delete: false,
            domain_check_enabled: true,
            rdap_base_url: "https://rdap.org".into(),
            reload_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uppe/monitor.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Ok(home_dir) = env::var("HOME") {
        path::PathBuf::from(home_dir).join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uppe/monitor.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Pool Size", &self.database.pool_size)?;
        write_title_1(f, "Engine")?;
        write_1(f, "Startup Jitter (ms)", &self.engine.startup_jitter_ms)?;
        write_1(f, "HTTP Timeout (s)", &self.engine.http_timeout_seconds)?;
        write_1(f, "TCP Timeout (s)", &self.engine.tcp_timeout_seconds)?;
        write_1(f, "Ping Timeout (s)", &self.engine.ping_timeout_seconds)?;
        write_1(f, "Broker Timeout (s)", &self.engine.broker_timeout_seconds)?;
        write_1(f, "Certificate Timeout (s)", &self.engine.cert_timeout_seconds)?;
        write_1(f, "Retain History On Delete", &self.engine.retain_history_on_delete)?;
        write_1(f, "Domain Checks", &self.engine.domain_check_enabled)?;
        write_1(f, "Reload Interval (s)", &self.engine.reload_interval_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Seeded Endpoints", &self.endpoints.len())?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uppe/monitor.toml
    ///  or the specified path if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.engine.http_timeout_seconds, 30);
        assert!(dir.path().join("monitor.toml").exists());
    }

    #[test]
    fn test_partial_config_with_seeded_endpoints() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        fs::write(
            &path,
            r#"
[engine]
startup_jitter_ms = 0
retain_history_on_delete = true

[[endpoints]]
name = "website"
kind = "http"
target = "https://example.com"
headers = '{"Accept": "text/html"}'
cert_check_enabled = true

[[endpoints]]
name = "database"
kind = "tcp"
target = "db.internal"
port = 5432
"#,
        )
        .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.engine.startup_jitter_ms, 0);
        assert!(config.engine.retain_history_on_delete);
        assert_eq!(config.engine.tcp_timeout_seconds, 10);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].port, Some(5432));
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        fs::write(&path, "[engine\nbroken").unwrap();
        assert!(matches!(Config::from_config(Some(&path)), Err(Error::ParseFailed(_))));
    }
}
