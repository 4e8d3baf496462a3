//! Configuration management

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use axum::http::StatusCode;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::fault::{Fault, FaultKind};
use crate::{Error, Result};

/// Prefix for environment overrides, e.g. `FAULT_INJECTOR_SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "FAULT_INJECTOR_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Seed for the random source; unset means seeded from the clock
    pub seed: Option<u64>,
    /// Fault layers, outermost first
    pub faults: Vec<FaultConfig>,
}

impl Config {
    /// Load configuration from an optional YAML file plus environment overrides.
    ///
    /// The result is not validated, so callers can apply their own overrides
    /// first; call [`Config::validate`] afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse and validate configuration from a YAML string, without environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the host and every fault entry
    pub fn validate(&self) -> Result<()> {
        self.server
            .host
            .parse::<IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host '{}': {e}", self.server.host)))?;

        for (index, fault) in self.faults.iter().enumerate() {
            fault
                .to_fault()
                .map_err(|e| Error::Config(format!("faults[{index}]: {e}")))?;
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL requests are proxied to; unset serves a built-in echo handler
    pub upstream: Option<String>,
    /// Timeout for a proxied upstream call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long in-flight connections may drain after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            upstream: None,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// One fault layer as written in the config file.
///
/// Fields a kind does not use are ignored, so `afterward` on an `error`
/// entry is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Fault kind
    pub kind: FaultKind,
    /// Fraction of requests to fire on; values outside `[0, 1]` saturate
    #[serde(default)]
    pub ratio: f64,
    /// Injected delay, for the delay kinds
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,
    /// Delay after downstream responds instead of before (`delay` only)
    #[serde(default)]
    pub afterward: bool,
    /// Injected status code, required by the error kinds
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Injected body; empty uses the placeholder text
    #[serde(default)]
    pub status_text: String,
}

impl FaultConfig {
    /// Build the fault this entry describes
    pub fn to_fault(&self) -> Result<Fault> {
        let fault = match self.kind {
            FaultKind::Delay => Fault::Delay {
                duration: self.duration,
                afterward: self.afterward,
            },
            FaultKind::Error => Fault::error(self.status()?, self.status_text.clone()),
            FaultKind::DelayWithError => {
                Fault::delay_with_error(self.duration, self.status()?, self.status_text.clone())
            }
            FaultKind::Abort => Fault::abort(),
            FaultKind::DelayWithAbort => Fault::delay_with_abort(self.duration),
        };
        Ok(fault)
    }

    fn status(&self) -> Result<StatusCode> {
        let code = self
            .status_code
            .ok_or_else(|| Error::Config(format!("'{}' requires status_code", self.kind)))?;
        StatusCode::from_u16(code)
            .map_err(|_| Error::Config(format!("Invalid status_code {code}")))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "250ms", "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = if duration.subsec_nanos() == 0 {
            format!("{}s", duration.as_secs())
        } else if duration.subsec_nanos() % 1_000_000 == 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}ns", duration.as_nanos())
        };
        serializer.serialize_str(&text)
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms", "1500ns" or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns a message describing the bad input.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let invalid = |e: std::num::ParseIntError| format!("invalid duration '{s}': {e}");

        // "ms" and "ns" must be checked before "s" and "m"
        if let Some(ns) = s.strip_suffix("ns") {
            ns.parse::<u64>().map(Duration::from_nanos).map_err(invalid)
        } else if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis).map_err(invalid)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(invalid)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("invalid duration '{s}': overflow"))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        }
    }
}
