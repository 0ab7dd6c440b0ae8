//! Configuration management

use crate::session::Settings;
use anyhow::{Context, Result};
use protocol::crypto::DigestEncoding;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default)]
    pub digest_encoding: DigestFormat,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_handshake_max_backoff_ms")]
    pub handshake_max_backoff_ms: u64,
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// 0 disables the liveness check
    #[serde(default)]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Password digest wire format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestFormat {
    #[default]
    Binary,
    Hex,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    10666
}

fn default_protocol_version() -> u8 {
    protocol::PROTOCOL_VERSION
}

fn default_handshake_timeout_ms() -> u64 {
    1000
}

fn default_handshake_max_backoff_ms() -> u64 {
    4000
}

fn default_handshake_attempts() -> u32 {
    4
}

fn default_keepalive_interval_ms() -> u64 {
    4000
}

fn default_read_timeout_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            digest_encoding: DigestFormat::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            handshake_max_backoff_ms: default_handshake_max_backoff_ms(),
            handshake_attempts: default_handshake_attempts(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            liveness_timeout_ms: 0,
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { timestamps: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.session.handshake_attempts == 0 {
            anyhow::bail!("session.handshake_attempts must be at least 1");
        }
        if self.session.handshake_timeout_ms == 0 {
            anyhow::bail!("session.handshake_timeout_ms must be non-zero");
        }
        if self.session.handshake_max_backoff_ms < self.session.handshake_timeout_ms {
            anyhow::bail!("session.handshake_max_backoff_ms must not be below handshake_timeout_ms");
        }
        if self.session.keepalive_interval_ms == 0 {
            anyhow::bail!("session.keepalive_interval_ms must be non-zero");
        }
        if self.session.read_timeout_ms == 0 {
            anyhow::bail!("session.read_timeout_ms must be non-zero");
        }
        Ok(())
    }
}

impl SessionConfig {
    pub fn settings(&self) -> Settings {
        let liveness_timeout = match self.liveness_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Settings {
            protocol_version: self.protocol_version,
            digest_encoding: match self.digest_encoding {
                DigestFormat::Binary => DigestEncoding::Binary,
                DigestFormat::Hex => DigestEncoding::Hex,
            },
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            handshake_max_backoff: Duration::from_millis(self.handshake_max_backoff_ms),
            handshake_attempts: self.handshake_attempts,
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
            liveness_timeout,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
