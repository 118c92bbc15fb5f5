//! Core configuration types.
//!
//! [`Config`] is deserialized by the server binary (YAML plus environment
//! overrides) and handed to [`bootstrap_services`](crate::bootstrap_services).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    CONNECT_TIMEOUT_SECS, EVENT_CHANNEL_CAPACITY, READ_TIMEOUT_SECS,
};

/// Timeouts applied to every outbound media-control request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP connect timeout (milliseconds).
    pub connect_timeout_ms: u64,

    /// Read timeout (milliseconds).
    pub read_timeout_ms: u64,

    /// Optional cap on a whole request (milliseconds). Unset by default, so
    /// only the connect and read timeouts apply. When set it must not be
    /// shorter than the connect timeout.
    pub request_timeout_ms: Option<u64>,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err("transport timeouts must be > 0".to_string());
        }
        if self
            .request_timeout_ms
            .is_some_and(|total| total < self.connect_timeout_ms)
        {
            return Err("request_timeout_ms must be >= connect_timeout_ms".to_string());
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT_SECS * 1000,
            read_timeout_ms: READ_TIMEOUT_SECS * 1000,
            request_timeout_ms: None,
        }
    }
}

/// Per-protocol switches.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Whether a manager is built for this protocol at all.
    pub enabled: bool,

    /// Replaces the built-in list of browsed service types when set.
    pub service_types: Option<Vec<String>>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_types: None,
        }
    }
}

/// Configuration for the Omnicast core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS API (0 = auto-allocate).
    pub preferred_port: u16,

    // Discovery
    /// How long a single resolve may wait for address records (milliseconds).
    pub resolve_timeout_ms: u64,

    /// Upper bound on concurrent network operations (resolves and commands).
    pub max_concurrent_io: usize,

    // Protocols
    pub dlna: ProtocolConfig,
    pub airplay: ProtocolConfig,

    // Transport
    pub transport: TransportConfig,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.resolve_timeout_ms == 0 {
            return Err("resolve_timeout_ms must be > 0".to_string());
        }
        if self.max_concurrent_io == 0 {
            return Err("max_concurrent_io must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        for (label, protocol) in [("dlna", &self.dlna), ("airplay", &self.airplay)] {
            if let Some(types) = &protocol.service_types {
                if types.is_empty() {
                    return Err(format!("{label}.service_types must not be empty"));
                }
            }
        }
        self.transport.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            resolve_timeout_ms: 5000,
            max_concurrent_io: 8,
            dlna: ProtocolConfig::default(),
            airplay: ProtocolConfig::default(),
            transport: TransportConfig::default(),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn default_transport_matches_protocol_timeouts() {
        let transport = TransportConfig::default();
        assert_eq!(transport.connect_timeout(), Duration::from_secs(5));
        assert_eq!(transport.read_timeout(), Duration::from_secs(10));
        assert_eq!(transport.request_timeout(), None);
    }

    #[test]
    fn zero_io_workers_rejected() {
        let config = Config {
            max_concurrent_io: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_service_type_override_rejected() {
        let mut config = Config::default();
        config.airplay.service_types = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn request_timeout_shorter_than_connect_rejected() {
        let transport = TransportConfig {
            connect_timeout_ms: 5000,
            read_timeout_ms: 1000,
            request_timeout_ms: Some(1000),
        };
        assert!(transport.validate().is_err());

        let uncapped = TransportConfig {
            request_timeout_ms: None,
            ..transport
        };
        assert!(uncapped.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"airplay":{"enabled":false}}"#).unwrap();
        assert!(!config.airplay.enabled);
        assert!(config.dlna.enabled);
        assert_eq!(config.max_concurrent_io, 8);
    }
}
