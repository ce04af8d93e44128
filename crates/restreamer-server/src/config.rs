// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Server configuration.
//!
//! Supports both a JSON config file and CLI flags; flags override
//! whatever the file set, mirroring `hdds-router::config`'s
//! file-or-flags precedence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One authentication predicate, evaluated against the raw
/// `Authorization` header value (spec.md §6's Auth contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Always admits.
    Allow,
    /// Always refuses (403; no realm offered).
    Deny,
    /// HTTP Basic, one fixed credential pair.
    Basic { user: String, pass: String, realm: String },
    /// HTTP Bearer, one fixed token.
    Bearer { token: String, realm: String },
}

fn default_serve_path() -> String {
    "/stream".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_check_path() -> String {
    "/check".to_string()
}

fn default_output_buffer() -> usize {
    4096
}

fn default_input_buffer() -> usize {
    4096
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_read_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_udp_datagram_size() -> usize {
    1500
}

fn default_rtp_lookahead() -> usize {
    16
}

fn default_max_connections() -> u32 {
    100
}

/// One configured upstream-to-downstream pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Identifies the stream in the statistics API and in logs.
    pub name: String,

    /// Upstream URLs, tried round-robin on every reconnect.
    pub urls: Vec<String>,

    #[serde(default = "default_serve_path")]
    pub serve_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_check_path")]
    pub check_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Informational-only soft cap (spec.md §9 Open Question (i)).
    #[serde(default)]
    pub full_connections: u32,

    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
    #[serde(default = "default_input_buffer")]
    pub input_buffer: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_udp_datagram_size")]
    pub udp_datagram_size: usize,
    #[serde(default = "default_rtp_lookahead")]
    pub rtp_lookahead: usize,

    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_limit() -> i64 {
    0
}

fn default_stats_path() -> String {
    "/statistics".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

/// Top-level server configuration: one or more streams plus process-wide
/// settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Soft-cap crossing / heartbeat notification target (spec.md §6).
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Event queue hysteresis limit; 0 disables LimitHit/LimitMiss.
    #[serde(default = "default_event_limit")]
    pub event_limit: i64,
    /// Statistics API path, covering every stream plus a synthesised
    /// `global` entry (spec.md §6).
    #[serde(default = "default_stats_path")]
    pub stats_path: String,

    pub streams: Vec<StreamConfig>,
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid("no streams configured".into()));
        }
        for stream in &self.streams {
            if stream.urls.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stream {:?} has no upstream URLs",
                    stream.name
                )));
            }
        }

        // build_routes() mounts every one of these directly onto the same
        // axum Router; a duplicate panics at startup instead of producing
        // this error.
        let mut paths = std::collections::HashSet::new();
        paths.insert(self.stats_path.as_str());
        for stream in &self.streams {
            for path in [
                stream.serve_path.as_str(),
                stream.health_path.as_str(),
                stream.check_path.as_str(),
            ] {
                if !paths.insert(path) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate route path {path:?} (stream {:?})",
                        stream.name
                    )));
                }
            }
        }

        Ok(())
    }
}
