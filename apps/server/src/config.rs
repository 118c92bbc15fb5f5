//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use omnicast_core::protocol_constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use omnicast_core::{ProtocolConfig, TransportConfig};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WS API to.
    /// Override: `OMNICAST_BIND_PORT`
    pub bind_port: u16,

    /// TCP connect timeout for receiver requests, in seconds.
    /// Override: `OMNICAST_CONNECT_TIMEOUT_SECS`
    pub connect_timeout_secs: u64,

    /// Read timeout for receiver responses, in seconds.
    /// Override: `OMNICAST_READ_TIMEOUT_SECS`
    pub read_timeout_secs: u64,

    /// Optional cap on a whole request, in seconds. Unset by default, so
    /// only the connect and read timeouts bound a request.
    pub request_timeout_secs: Option<u64>,

    /// How long one mDNS resolve may take, in milliseconds.
    pub resolve_timeout_ms: u64,

    /// Upper bound on concurrent resolves and media commands.
    pub max_concurrent_io: usize,

    /// DLNA discovery and control.
    pub dlna: ProtocolConfig,

    /// AirPlay discovery and control.
    pub airplay: ProtocolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = omnicast_core::Config::default();
        Self {
            bind_port: 49500,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            request_timeout_secs: None,
            resolve_timeout_ms: core.resolve_timeout_ms,
            max_concurrent_io: core.max_concurrent_io,
            dlna: ProtocolConfig::default(),
            airplay: ProtocolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies overrides from `lookup` (the process environment in production).
    /// Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("OMNICAST_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(secs) = lookup("OMNICAST_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_secs = secs;
        }

        if let Some(secs) = lookup("OMNICAST_READ_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.read_timeout_secs = secs;
        }

        // Note: OMNICAST_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to omnicast-core's Config type.
    pub fn to_core_config(&self) -> omnicast_core::Config {
        omnicast_core::Config {
            preferred_port: self.bind_port,
            resolve_timeout_ms: self.resolve_timeout_ms,
            max_concurrent_io: self.max_concurrent_io,
            dlna: self.dlna.clone(),
            airplay: self.airplay.clone(),
            transport: TransportConfig {
                connect_timeout_ms: self.connect_timeout_secs * 1000,
                read_timeout_ms: self.read_timeout_secs * 1000,
                request_timeout_ms: self.request_timeout_secs.map(|secs| secs * 1000),
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_produce_valid_core_config() {
        let core = ServerConfig::default().to_core_config();
        assert!(core.validate().is_ok());
        assert_eq!(core.preferred_port, 49500);
        assert_eq!(core.transport, TransportConfig::default());
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = ServerConfig::from_yaml(
            "bind_port: 8080\nairplay:\n  enabled: false\ndlna:\n  service_types: [\"_dlna._tcp\"]\n",
        )
        .unwrap();

        assert_eq!(config.bind_port, 8080);
        assert!(!config.airplay.enabled);
        assert!(config.dlna.enabled);
        assert_eq!(config.dlna.service_types, Some(vec!["_dlna._tcp".to_string()]));
        assert_eq!(config.read_timeout_secs, READ_TIMEOUT_SECS);
    }

    #[test]
    fn env_overrides_win_and_garbage_is_ignored() {
        let env: HashMap<&str, &str> = [
            ("OMNICAST_BIND_PORT", "9000"),
            ("OMNICAST_CONNECT_TIMEOUT_SECS", "2"),
            ("OMNICAST_READ_TIMEOUT_SECS", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.connect_timeout_secs, 2);
        assert_eq!(config.read_timeout_secs, READ_TIMEOUT_SECS);
    }

    #[test]
    fn connect_and_read_timeouts_stay_separate() {
        let config = ServerConfig {
            connect_timeout_secs: 8,
            read_timeout_secs: 3,
            ..Default::default()
        };
        let transport = config.to_core_config().transport;

        assert_eq!(transport.connect_timeout_ms, 8000);
        assert_eq!(transport.read_timeout_ms, 3000);
        assert_eq!(transport.request_timeout_ms, None);
        assert!(transport.validate().is_ok());

        let capped = ServerConfig {
            request_timeout_secs: Some(20),
            ..config
        };
        assert_eq!(capped.to_core_config().transport.request_timeout_ms, Some(20_000));
    }
}
