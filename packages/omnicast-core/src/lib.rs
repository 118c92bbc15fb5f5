//! Omnicast Core - multi-protocol casting layer.
//!
//! Discovers DLNA and AirPlay receivers over mDNS, keeps a deduplicated
//! per-protocol device registry, drives playback over each protocol's wire
//! API, and folds everything, together with an optional vendor cast SDK
//! session, into a single casting state.
//!
//! # Architecture
//!
//! - [`discovery`]: mDNS browse/resolve, classification and validation
//! - [`registry`]: Versioned, reactive device snapshots
//! - [`protocols`]: AirPlay HTTP and DLNA SOAP media clients
//! - [`manager`]: Per-protocol device selection and command dispatch
//! - [`vendor`]: Adapter over a vendor cast session SDK
//! - [`orchestrator`]: Aggregate casting state and command routing
//! - [`events`]: Event system for real-time client communication
//! - [`api`]: HTTP/WebSocket surface over the orchestrator
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`DiscoveryPlatform`](discovery::DiscoveryPlatform): mDNS facility
//! - [`MediaClient`](protocols::MediaClient): Per-protocol wire client
//! - [`CastSessionManager`](vendor::CastSessionManager): Vendor session SDK
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod device;
pub mod discovery;
pub mod error;
pub mod events;
pub mod manager;
pub mod orchestrator;
pub mod protocol_constants;
pub mod protocols;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod utils;
pub mod vendor;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types at the crate root
pub use device::{CastProtocol, DeviceDescriptor, UnknownProtocol};
pub use discovery::{DiscoveryPlatform, DiscoveryProfile, MdnsPlatform, ServiceDiscoveryEngine};
pub use error::{CastError, CastResult, ErrorCode};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, CastingEvent, DeviceEvent, DisconnectReason,
    EventEmitter, SessionEvent,
};
pub use registry::{Registry, Snapshot};
pub use runtime::{IoWorkers, TaskSpawner, TokioSpawner};
pub use state::{Config, ProtocolConfig, TransportConfig};
pub use utils::now_millis;

pub use manager::{CommandOutcome, ProtocolCastManager, ProtocolSelection};
pub use orchestrator::{CastingState, CastingType, UnifiedCastOrchestrator};
pub use protocols::{
    AirPlayClient, AuthChallenge, AuthScheme, DlnaClient, MediaClient, MediaCommand, MediaRequest,
    PlayOutcome,
};
pub use vendor::{CastSessionInfo, CastSessionManager, SessionListener, VendorCastAdapter};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_services_with, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
