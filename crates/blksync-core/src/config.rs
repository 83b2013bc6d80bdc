use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{BlksyncError, BlksyncResult};

/// Listen address used when `server.listen_addr` is empty
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1";

/// Listen port used when `server.port` is unset or negative
pub const DEFAULT_PORT: u16 = 8080;

/// Top-level daemon configuration (loaded from blksync.toml)
///
/// Read once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlksyncConfig {
    pub server: ServerConfig,
    pub codec: CodecConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Block store root directory
    pub dictionary: PathBuf,
    /// Staging directory for in-flight block writes (default: <dictionary>/.staging)
    pub staging_dir: Option<PathBuf>,
    /// Listen address for the sync endpoint (empty = 127.0.0.1)
    pub listen_addr: String,
    /// Listen port for the sync endpoint (-1 = 8080)
    pub port: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// zstd compression level (default: 3)
    pub level: i32,
    /// Append a content checksum to each frame (default: true)
    pub checksum: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Prometheus metrics endpoint (disabled unless set)
    pub metrics_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dictionary: PathBuf::from("./blocks"),
            staging_dir: None,
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            port: i64::from(DEFAULT_PORT),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            level: 3,
            checksum: true,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
            metrics_addr: None,
        }
    }
}

impl ServerConfig {
    /// Staging directory, falling back to `<dictionary>/.staging`
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.dictionary.join(".staging"))
    }

    /// `host:port` to bind, applying the empty-host and negative-port defaults
    pub fn bind_addr(&self) -> BlksyncResult<String> {
        let host = if self.listen_addr.trim().is_empty() {
            DEFAULT_LISTEN_ADDR
        } else {
            self.listen_addr.trim()
        };
        let port = if self.port < 0 {
            DEFAULT_PORT
        } else {
            u16::try_from(self.port).map_err(|_| {
                BlksyncError::Config(format!("server.port out of range: {}", self.port))
            })?
        };
        Ok(format!("{host}:{port}"))
    }
}

/// A scalar configuration value returned by dotted-key lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Integer(_) => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
        }
    }
}

impl BlksyncConfig {
    /// Parse a TOML document, expanding `%NAME%` environment placeholders in
    /// string values before deserializing.
    pub fn from_toml_str(text: &str) -> BlksyncResult<Self> {
        let mut table: toml::Table = text
            .parse()
            .map_err(|e| BlksyncError::Config(format!("parsing config: {e}")))?;
        for (_, value) in table.iter_mut() {
            expand_env_in_value(value);
        }
        toml::Value::Table(table)
            .try_into()
            .map_err(|e| BlksyncError::Config(format!("invalid config: {e}")))
    }

    /// Load the config file at `path`
    pub fn load(path: &Path) -> BlksyncResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BlksyncError::Config(format!("cannot open config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Look up an effective setting by dotted key, e.g. `server.port`.
    ///
    /// Defaults are included. Booleans and floats are rendered as strings;
    /// tables and arrays yield `None`.
    pub fn lookup(&self, key: &str) -> Option<ConfigValue> {
        let root = toml::Value::try_from(self).ok()?;
        let mut node = &root;
        for part in key.split('.') {
            node = node.as_table()?.get(part)?;
        }
        match node {
            toml::Value::String(s) => Some(ConfigValue::String(s.clone())),
            toml::Value::Integer(i) => Some(ConfigValue::Integer(*i)),
            toml::Value::Boolean(b) => Some(ConfigValue::String(b.to_string())),
            toml::Value::Float(f) => Some(ConfigValue::String(f.to_string())),
            toml::Value::Datetime(d) => Some(ConfigValue::String(d.to_string())),
            toml::Value::Array(_) | toml::Value::Table(_) => None,
        }
    }
}

fn expand_env_in_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = expand_env(s),
        toml::Value::Array(items) => items.iter_mut().for_each(expand_env_in_value),
        toml::Value::Table(table) => table
            .iter_mut()
            .for_each(|(_, value)| expand_env_in_value(value)),
        _ => {}
    }
}

/// `%NAME%` placeholder, where NAME is one or more word characters
static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(\w+)%").expect("placeholder pattern is valid"));

/// Replace every `%NAME%` with the value of the environment variable `NAME`
/// (empty if unset). Other `%` text is kept.
pub fn expand_env(input: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
