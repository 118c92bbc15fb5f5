//! Device value types shared by every protocol family.
//!
//! A [`DeviceDescriptor`] is only ever built from a resolved service that
//! passed [`validate_endpoint`], so holders can assume the address is usable.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Protocol Tag
// ─────────────────────────────────────────────────────────────────────────────

/// Casting protocol families known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CastProtocol {
    /// Vendor SDK sessions (device list owned by the SDK).
    Cast,
    /// UPnP AVTransport renderers.
    Dlna,
    /// AirPlay-style HTTP receivers.
    AirPlay,
}

impl CastProtocol {
    /// Prefix used to qualify device ids so two families never collide.
    #[must_use]
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Cast => "cast",
            Self::Dlna => "dlna",
            Self::AirPlay => "airplay",
        }
    }

    /// Short label used in log lines.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cast => "Cast",
            Self::Dlna => "DLNA",
            Self::AirPlay => "AirPlay",
        }
    }
}

impl fmt::Display for CastProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a protocol name cannot be parsed.
#[derive(Debug, Error)]
#[error("unknown protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for CastProtocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cast" => Ok(Self::Cast),
            "dlna" => Ok(Self::Dlna),
            "airplay" => Ok(Self::AirPlay),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// A discovered, resolved and validated playback receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Stable id, unique within a running session.
    pub id: String,
    /// Cleaned display name.
    pub name: String,
    /// Raw service instance name as announced on the network.
    pub service_name: String,
    /// Resolved address. Never loopback.
    pub host: IpAddr,
    /// Resolved port. Never zero.
    pub port: u16,
    /// Raw service type the instance was found under.
    pub service_type: String,
    /// Protocol family this descriptor belongs to.
    pub protocol: CastProtocol,
}

impl DeviceDescriptor {
    /// Base URL for requests against this device (`http://host:port`).
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.host {
            IpAddr::V4(v4) => format!("http://{}:{}", v4, self.port),
            IpAddr::V6(v6) => format!("http://[{}]:{}", v6, self.port),
        }
    }

    /// Builds a URL for `path` on this device.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Reasons a resolved endpoint is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidEndpoint {
    /// Address is in 127.0.0.0/8 or is `::1`.
    #[error("loopback address")]
    Loopback,
    /// Address is `0.0.0.0` or `::`.
    #[error("unspecified address")]
    Unspecified,
    /// Port zero is never a reachable service.
    #[error("port out of range")]
    PortOutOfRange,
}

/// Validates a resolved host/port pair before it enters a registry.
pub fn validate_endpoint(host: IpAddr, port: u16) -> Result<(), InvalidEndpoint> {
    if host.is_loopback() {
        return Err(InvalidEndpoint::Loopback);
    }
    if host.is_unspecified() {
        return Err(InvalidEndpoint::Unspecified);
    }
    if port == 0 {
        return Err(InvalidEndpoint::PortOutOfRange);
    }
    Ok(())
}

/// Picks the address to use from a resolved record.
///
/// Usable IPv4 addresses win over IPv6. If nothing usable exists the first
/// address is returned so validation can reject it with a precise reason.
#[must_use]
pub fn preferred_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    let usable = |ip: &&IpAddr| !ip.is_loopback() && !ip.is_unspecified();
    addresses
        .iter()
        .filter(usable)
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.iter().find(usable))
        .or_else(|| addresses.first())
        .copied()
}

// ─────────────────────────────────────────────────────────────────────────────
// Display Names
// ─────────────────────────────────────────────────────────────────────────────

/// Turns a raw service instance name into something fit for a device picker.
///
/// Bracketed tags are removed, underscores become spaces, whitespace runs
/// collapse and `"Bob s TV"` becomes `"Bob's TV"`. Falls back to the trimmed
/// raw name if nothing is left.
#[must_use]
pub fn clean_display_name(raw: &str) -> String {
    let stripped = strip_bracketed(raw).replace('_', " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = collapsed.replace(" s ", "'s ");

    if cleaned.is_empty() {
        raw.trim().to_string()
    } else {
        cleaned
    }
}

fn strip_bracketed(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = &rest[open + close + 1..];
    }

    out.push_str(rest);
    out
}
