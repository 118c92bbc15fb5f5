//! Per-protocol discovery parameters and the classification heuristic.
//!
//! Classification is deliberately permissive: a found service is accepted if
//! its type is a confirmed protocol type, or if its name looks like a
//! receiver and its port is in a typical range. False positives only cost a
//! resolve; a missed receiver never shows up in the picker.

use std::net::IpAddr;
use std::ops::RangeInclusive;

use super::platform::FoundService;
use crate::device::CastProtocol;

const DLNA_SERVICE_TYPES: &[&str] = &[
    "_http._tcp",
    "_upnp._tcp",
    "_dlna._tcp",
    "_mediaserver._tcp",
    "_renderer._tcp",
];

const DLNA_NAME_KEYWORDS: &[&str] = &[
    "dlna", "upnp", "media", "renderer", "tv", "samsung", "lg", "sony", "philips", "panasonic",
    "roku", "player", "stream", "cast",
];

const AIRPLAY_SERVICE_TYPES: &[&str] = &["_airplay._tcp", "_raop._tcp", "_homekit._tcp"];

const AIRPLAY_NAME_KEYWORDS: &[&str] = &[
    "airplay", "apple", "tv", "homepod", "airport", "mac", "iphone", "ipad", "lg", "samsung",
    "sony", "vizio", "roku", "speaker", "soundbar",
];

/// How device ids are derived from a resolved service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// `"{prefix}:{name}"`. One entry per instance name; lost matches by equality.
    ServiceName,
    /// `"{prefix}:{name}@{host}:{port}"`. One entry per endpoint; lost matches
    /// every endpoint of the instance by prefix.
    ServiceEndpoint,
}

/// Outcome of classifying a found service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Service type contains a confirmed protocol type.
    ConfirmedType,
    /// Name keyword matched and the port is in a typical range.
    NameAndPort,
    Rejected,
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Discovery parameters for one protocol family.
#[derive(Debug, Clone)]
pub struct DiscoveryProfile {
    pub protocol: CastProtocol,
    /// Service types browsed, one listener each.
    pub service_types: Vec<String>,
    /// Lower-case substrings that confirm the protocol from the service type.
    pub confirmed_types: Vec<String>,
    /// Lower-case substrings that hint at a receiver from the instance name.
    pub name_keywords: Vec<String>,
    /// Ports typically used by receivers of this family.
    pub port_ranges: Vec<RangeInclusive<u16>>,
    pub id_scheme: IdScheme,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl DiscoveryProfile {
    /// DLNA/UPnP renderers.
    pub fn dlna() -> Self {
        Self {
            protocol: CastProtocol::Dlna,
            service_types: owned(DLNA_SERVICE_TYPES),
            confirmed_types: owned(DLNA_SERVICE_TYPES),
            name_keywords: owned(DLNA_NAME_KEYWORDS),
            port_ranges: vec![8080..=8200],
            id_scheme: IdScheme::ServiceEndpoint,
        }
    }

    /// AirPlay-style receivers.
    pub fn airplay() -> Self {
        Self {
            protocol: CastProtocol::AirPlay,
            service_types: owned(AIRPLAY_SERVICE_TYPES),
            confirmed_types: owned(AIRPLAY_SERVICE_TYPES),
            name_keywords: owned(AIRPLAY_NAME_KEYWORDS),
            port_ranges: vec![5000..=7000, 49152..=65535],
            id_scheme: IdScheme::ServiceName,
        }
    }

    /// Replaces the browsed service types (classification lists are kept).
    #[must_use]
    pub fn with_service_types(mut self, service_types: Vec<String>) -> Self {
        self.service_types = service_types;
        self
    }

    /// Applies the acceptance heuristic to a found service.
    pub fn classify(&self, service: &FoundService) -> Classification {
        let service_type = service.service_type.to_lowercase();
        if self
            .confirmed_types
            .iter()
            .any(|t| service_type.contains(t.as_str()))
        {
            return Classification::ConfirmedType;
        }

        let name = service.name.to_lowercase();
        let name_hint = self
            .name_keywords
            .iter()
            .any(|k| name.contains(k.as_str()));
        let typical_port = service
            .port
            .is_some_and(|port| self.port_ranges.iter().any(|r| r.contains(&port)));

        if name_hint && typical_port {
            Classification::NameAndPort
        } else {
            Classification::Rejected
        }
    }

    /// Builds the registry id for a resolved service.
    pub fn device_id(&self, service_name: &str, host: IpAddr, port: u16) -> String {
        let prefix = self.protocol.id_prefix();
        match self.id_scheme {
            IdScheme::ServiceName => format!("{prefix}:{service_name}"),
            IdScheme::ServiceEndpoint => format!("{prefix}:{service_name}@{host}:{port}"),
        }
    }

    /// Returns true if `id` belongs to the instance named `service_name`.
    pub fn id_matches_service(&self, id: &str, service_name: &str) -> bool {
        let Some(rest) = id
            .strip_prefix(self.protocol.id_prefix())
            .and_then(|rest| rest.strip_prefix(':'))
        else {
            return false;
        };
        match self.id_scheme {
            IdScheme::ServiceName => rest == service_name,
            // Names may contain '@'; the endpoint never does.
            IdScheme::ServiceEndpoint => {
                rest.rsplit_once('@').map(|(name, _)| name) == Some(service_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(name: &str, service_type: &str, port: Option<u16>) -> FoundService {
        FoundService {
            name: name.to_string(),
            service_type: service_type.to_string(),
            port,
        }
    }

    #[test]
    fn confirmed_type_always_accepted() {
        let profile = DiscoveryProfile::airplay();
        for service_type in ["_airplay._tcp", "_AirPlay._tcp.local.", "_raop._tcp", "_homekit._tcp"] {
            let classification = profile.classify(&found("zzz", service_type, None));
            assert_eq!(classification, Classification::ConfirmedType, "{service_type}");
        }

        let dlna = DiscoveryProfile::dlna();
        assert!(dlna
            .classify(&found("printer", "_upnp._tcp.local.", Some(1)))
            .is_accepted());
    }

    #[test]
    fn name_needs_typical_port() {
        let profile = DiscoveryProfile::airplay();

        assert_eq!(
            profile.classify(&found("Samsung Soundbar", "_spotify-connect._tcp", Some(7000))),
            Classification::NameAndPort
        );
        assert_eq!(
            profile.classify(&found("Samsung Soundbar", "_spotify-connect._tcp", Some(80))),
            Classification::Rejected
        );
        assert_eq!(
            profile.classify(&found("Samsung Soundbar", "_spotify-connect._tcp", None)),
            Classification::Rejected
        );
    }

    #[test]
    fn unrelated_service_rejected() {
        let profile = DiscoveryProfile::dlna();
        assert_eq!(
            profile.classify(&found("Office Printer", "_ipp._tcp", Some(8100))),
            Classification::Rejected
        );
    }

    #[test]
    fn dlna_ids_are_endpoint_scoped() {
        let profile = DiscoveryProfile::dlna();
        let host: IpAddr = "192.168.1.20".parse().unwrap();
        let id = profile.device_id("Bravia", host, 8080);

        assert_eq!(id, "dlna:Bravia@192.168.1.20:8080");
        assert!(profile.id_matches_service(&id, "Bravia"));
        assert!(!profile.id_matches_service(&id, "Brav"));
    }

    #[test]
    fn dlna_names_containing_at_sign_match_exactly() {
        let profile = DiscoveryProfile::dlna();
        let host: IpAddr = "10.0.0.2".parse().unwrap();
        let id = profile.device_id("Kitchen@Office", host, 80);

        assert!(profile.id_matches_service(&id, "Kitchen@Office"));
        assert!(!profile.id_matches_service(&id, "Kitchen"));

        let v6: IpAddr = "fe80::1".parse().unwrap();
        let id = profile.device_id("Kitchen", v6, 80);
        assert!(profile.id_matches_service(&id, "Kitchen"));
    }

    #[test]
    fn airplay_ids_match_exactly() {
        let profile = DiscoveryProfile::airplay();
        let host: IpAddr = "192.168.1.50".parse().unwrap();
        let id = profile.device_id("Living Room_tv[AirPlay]", host, 7000);

        assert_eq!(id, "airplay:Living Room_tv[AirPlay]");
        assert!(profile.id_matches_service(&id, "Living Room_tv[AirPlay]"));
        assert!(!profile.id_matches_service(&id, "Living Room"));
    }
}
