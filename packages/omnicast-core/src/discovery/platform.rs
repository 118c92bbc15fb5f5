//! Contract between the discovery engine and a multicast-DNS facility.
//!
//! Payloads are plain, non-optional structs; failures are typed enums. The
//! engine never sees platform-specific nullability or error codes beyond
//! what is modelled here.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Handle for one registered browse listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Lightweight announcement of a service instance, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundService {
    /// Raw instance name (e.g. `"Living Room_tv[AirPlay]"`).
    pub name: String,
    /// Service type the instance was found under (e.g. `"_airplay._tcp"`).
    pub service_type: String,
    /// Port, when the platform already knows it at found-time.
    pub port: Option<u16>,
}

/// A previously announced instance that went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostService {
    pub name: String,
    pub service_type: String,
}

/// Result of a successful resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub name: String,
    pub service_type: String,
    /// Every address record received for the instance.
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

/// Errors from listener registration and teardown.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The listener is unknown or was already unregistered.
    #[error("listener not registered")]
    NotRegistered,

    /// The platform refused to start or stop a browse.
    #[error("discovery rejected for {service_type} (code {code})")]
    Rejected { service_type: String, code: i32 },

    /// The underlying daemon failed.
    #[error("mDNS daemon error: {0}")]
    Daemon(String),
}

/// Why a resolve produced no usable record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    /// A resolve for the same instance is already in flight.
    #[error("resolve already active")]
    AlreadyActive,

    /// No address records arrived within the resolve timeout.
    #[error("resolve timed out")]
    Timeout,

    /// A record arrived but carried no addresses.
    #[error("resolved without addresses")]
    NoAddress,

    /// Any other platform failure.
    #[error("resolve failed (code {code})")]
    Platform { code: i32 },
}

impl ResolveFailure {
    /// Numeric code, mirroring common DNS-SD error numbering.
    pub fn platform_code(&self) -> i32 {
        match self {
            Self::AlreadyActive => 3,
            Self::Timeout => 4,
            Self::NoAddress => 5,
            Self::Platform { code } => *code,
        }
    }
}

/// Callbacks for one browse registration.
///
/// Calls may arrive on any thread, concurrently with each other and with user
/// actions. Implementations should hand off quickly.
pub trait DiscoveryListener: Send + Sync {
    fn on_discovery_started(&self, _service_type: &str) {}

    fn on_discovery_stopped(&self, _service_type: &str) {}

    fn on_start_discovery_failed(&self, service_type: &str, code: i32);

    fn on_stop_discovery_failed(&self, service_type: &str, code: i32);

    fn on_service_found(&self, service: FoundService);

    fn on_service_lost(&self, service: LostService);
}

/// Discover/resolve facility consumed by the discovery engine.
#[async_trait]
pub trait DiscoveryPlatform: Send + Sync {
    /// Starts browsing `service_type`, delivering callbacks to `listener`.
    ///
    /// # Errors
    /// Returns `PlatformError` if the browse could not be started.
    fn discover_services(
        &self,
        service_type: &str,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<ListenerId, PlatformError>;

    /// Stops a browse started by [`discover_services`](Self::discover_services).
    ///
    /// # Errors
    /// Returns `PlatformError::NotRegistered` if the listener is unknown.
    fn stop_service_discovery(&self, id: ListenerId) -> Result<(), PlatformError>;

    /// Resolves a found service to its addresses and port.
    async fn resolve_service(&self, service: &FoundService)
        -> Result<ResolvedService, ResolveFailure>;
}
