// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Stream configuration.
//!
//! Configuration is read from a TOML file with three optional tables:
//! - `[stream]`: debug name, stream kind and idle timeout
//! - `[backoff]`: reconnect delay policy
//! - `[remote]`: endpoint URL and an optional static token
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamSettings,
    pub backoff: BackoffConfig,
    pub remote: RemoteConfig,
}

/// Which logical stream this is. Selects the timer identities the stream
/// schedules its idle and backoff timers under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    #[default]
    Listen,
    Write,
}

/// Per-stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Name used in log fields.
    pub name: String,
    pub kind: StreamKind,
    /// Quiescence period after `mark_idle` before an open stream is closed.
    pub idle_timeout_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            name: "listen".to_string(),
            kind: StreamKind::Listen,
            idle_timeout_ms: 60_000,
        }
    }
}

impl StreamSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Reconnect backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay used for the first retry that follows a failure.
    pub initial_delay_ms: u64,
    /// Ceiling for the computed delay.
    pub max_delay_ms: u64,
    /// Multiplier applied after each attempt.
    pub factor: f64,
    /// Jitter fraction: the delay is perturbed by up to `±jitter * delay`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            factor: 1.5,
            jitter: 0.5,
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Checks the invariants the backoff calculator relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff.factor must be >= 1.0, got {}",
                self.factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::InvalidConfig(format!(
                "backoff.jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "backoff.initial_delay_ms ({}) exceeds backoff.max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// WebSocket URL: `ws://...` or `wss://...`.
    pub url: String,
    /// Static bearer token. Overridden by `TETHER_TOKEN` at the call site.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            url: "ws://127.0.0.1:7890".to_string(),
            token: None,
        }
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.starts_with("ws://") || self.url.starts_with("wss://") {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!(
                "remote.url must start with ws:// or wss://, got '{}'",
                self.url
            )))
        }
    }
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Config::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;
        self.remote.validate()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
