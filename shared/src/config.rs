//! Server and global settings
//!
//! Settings arrive as loosely-typed JSON (`RawSettings`) and are sanitised into
//! an immutable `Settings` value that the dispatcher loads fresh for every run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 2457;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MIN_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One RCON endpoint. Identified within a run by its position in the list.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub secret: String,
    pub timeout_secs: u64,
}

impl ServerTarget {
    pub fn new(name: &str, host: &str, port: u16, secret: &str, timeout_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            secret: secret.to_string(),
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name to show in history, falling back to the list position
    pub fn display_name(&self, index: usize) -> String {
        if self.name.trim().is_empty() {
            format!("Server-{}", index)
        } else {
            self.name.clone()
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.host.trim().is_empty() && !self.secret.is_empty()
    }
}

impl fmt::Debug for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTarget")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Sanitised engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub servers: Vec<ServerTarget>,
    pub timeout_secs: u64,
    pub auto_retry: bool,
    pub debug: bool,
    pub retry_delay_secs: u64,
    /// `None` keeps retrying until a run succeeds
    pub max_retries: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            auto_retry: false,
            debug: false,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_retries: None,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawSettings = serde_json::from_str(json)?;
        Ok(raw.sanitize())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Source of settings, consulted once at the start of every dispatch run
pub trait SettingsProvider: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
}

impl SettingsProvider for Settings {
    fn load(&self) -> Result<Settings, ConfigError> {
        Ok(self.clone())
    }
}

/// Settings file re-read on every call, so edits apply to the next run
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for FileSettings {
    fn load(&self) -> Result<Settings, ConfigError> {
        Settings::load(&self.path)
    }
}

/// Server entry as it appears in the settings file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawServer {
    pub name: String,
    pub host: String,
    pub port: i64,
    #[serde(alias = "secret")]
    pub password: String,
    pub timeout: Option<i64>,
}

/// Settings file shape, including the legacy single-server fields
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub servers: Vec<RawServer>,
    pub timeout: Option<i64>,
    pub auto_retry: bool,
    pub debug: bool,
    pub retry_delay_secs: Option<u64>,
    pub max_retries: Option<u32>,

    pub host: Option<String>,
    pub port: Option<i64>,
    pub password: Option<String>,
}

impl RawSettings {
    pub fn sanitize(self) -> Settings {
        let timeout_secs = clamp_timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS as i64));

        let mut servers: Vec<ServerTarget> = self
            .servers
            .into_iter()
            .filter_map(|raw| {
                let host = raw.host.trim().to_string();
                let secret = raw.password.trim().to_string();
                if host.is_empty() || secret.is_empty() || !is_valid_host(&host) {
                    return None;
                }
                Some(ServerTarget {
                    name: raw.name.trim().to_string(),
                    host,
                    port: clamp_port(raw.port),
                    secret,
                    timeout_secs: raw.timeout.map(clamp_timeout).unwrap_or(timeout_secs),
                })
            })
            .collect();

        if servers.is_empty() {
            if let (Some(host), Some(secret)) = (self.host, self.password) {
                let host = host.trim().to_string();
                let secret = secret.trim().to_string();
                if !host.is_empty() && !secret.is_empty() {
                    servers.push(ServerTarget {
                        name: "Default".to_string(),
                        host,
                        port: clamp_port(self.port.unwrap_or(DEFAULT_PORT as i64)),
                        secret,
                        timeout_secs,
                    });
                }
            }
        }

        Settings {
            servers,
            timeout_secs,
            auto_retry: self.auto_retry,
            debug: self.debug,
            retry_delay_secs: self.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            max_retries: self.max_retries,
        }
    }
}

fn clamp_timeout(value: i64) -> u64 {
    value.clamp(MIN_TIMEOUT_SECS as i64, MAX_TIMEOUT_SECS as i64) as u64
}

fn clamp_port(value: i64) -> u16 {
    value.clamp(1, u16::MAX as i64) as u16
}

fn is_valid_host(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok()
        || host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_list_is_sanitized() {
        let settings = Settings::from_json(
            r#"{
                "timeout": 12,
                "servers": [
                    {"name": "Main", "host": "10.0.0.1", "port": 2457, "password": "a"},
                    {"name": "NoSecret", "host": "10.0.0.2", "port": 2457, "password": ""},
                    {"name": "BadHost", "host": "evil;host", "port": 2457, "password": "b"},
                    {"name": "Clamp", "host": "game.example.com", "port": 99999, "password": "c", "timeout": 90}
                ],
                "auto_retry": true
            }"#,
        )
        .unwrap();

        assert_eq!(settings.servers.len(), 2);
        assert_eq!(settings.servers[0].name, "Main");
        assert_eq!(settings.servers[0].timeout_secs, 12);
        assert_eq!(settings.servers[1].port, 65535);
        assert_eq!(settings.servers[1].timeout_secs, MAX_TIMEOUT_SECS);
        assert!(settings.auto_retry);
        assert!(!settings.debug);
        assert_eq!(settings.retry_delay_secs, DEFAULT_RETRY_DELAY_SECS);
        assert_eq!(settings.max_retries, None);
    }

    #[test]
    fn test_timeout_bounds() {
        let low = Settings::from_json(r#"{"timeout": 1}"#).unwrap();
        assert_eq!(low.timeout_secs, MIN_TIMEOUT_SECS);

        let missing = Settings::from_json("{}").unwrap();
        assert_eq!(missing.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(missing.servers.is_empty());
    }

    #[test]
    fn test_legacy_single_server_form() {
        let settings =
            Settings::from_json(r#"{"host": "127.0.0.1", "password": "pw", "timeout": 8}"#)
                .unwrap();

        assert_eq!(settings.servers.len(), 1);
        let server = &settings.servers[0];
        assert_eq!(server.name, "Default");
        assert_eq!(server.port, DEFAULT_PORT);
        assert_eq!(server.timeout_secs, 8);
    }

    #[test]
    fn test_legacy_form_ignored_when_list_present() {
        let settings = Settings::from_json(
            r#"{"host": "1.1.1.1", "password": "x",
                "servers": [{"host": "2.2.2.2", "port": 27015, "secret": "y"}]}"#,
        )
        .unwrap();

        assert_eq!(settings.servers.len(), 1);
        assert_eq!(settings.servers[0].host, "2.2.2.2");
        assert_eq!(settings.servers[0].secret, "y");
    }

    #[test]
    fn test_debug_output_redacts_secret() {
        let target = ServerTarget::new("s", "h", 1, "topsecret", 5);
        let printed = format!("{:?}", target);
        assert!(!printed.contains("topsecret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn test_display_name_falls_back_to_index() {
        let target = ServerTarget::new("", "h", 1, "s", 5);
        assert_eq!(target.display_name(3), "Server-3");
        assert!(target.is_complete());
        assert!(!ServerTarget::new("x", " ", 1, "s", 5).is_complete());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"debug": true, "max_retries": 3}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.max_retries, Some(3));

        assert!(matches!(
            Settings::load("/nonexistent/settings.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_file_settings_reloads_each_call() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"auto_retry": false}"#).unwrap();

        let provider = FileSettings::new(file.path());
        assert!(!provider.load().unwrap().auto_retry);

        std::fs::write(file.path(), r#"{"auto_retry": true}"#).unwrap();
        assert!(provider.load().unwrap().auto_retry);

        std::fs::write(file.path(), "not json").unwrap();
        assert!(matches!(provider.load(), Err(ConfigError::Json(_))));
    }
}
