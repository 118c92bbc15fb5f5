//! Application bootstrap and dependency wiring.
//!
//! The composition root: every service is instantiated and wired here, in
//! dependency order, so the relationships are visible in one place.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::device::CastProtocol;
use crate::discovery::{DiscoveryPlatform, DiscoveryProfile, MdnsPlatform, ServiceDiscoveryEngine};
use crate::error::{CastError, CastResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::manager::ProtocolCastManager;
use crate::orchestrator::UnifiedCastOrchestrator;
use crate::protocols::{build_http_client, AirPlayClient, DlnaClient, MediaClient};
use crate::runtime::{IoWorkers, TokioSpawner};
use crate::state::{Config, ProtocolConfig};
use crate::vendor::{CastSessionManager, VendorCastAdapter};

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Aggregate state and command routing.
    pub orchestrator: Arc<UnifiedCastOrchestrator>,
    /// Event bridge feeding WebSocket clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Bounded pool shared by resolves and media commands.
    pub workers: IoWorkers,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// AirPlay client, for answering authentication challenges. `None` when
    /// AirPlay is disabled.
    pub airplay_client: Option<Arc<AirPlayClient>>,
    /// Set when the built-in mDNS platform is in use.
    mdns: Option<Arc<MdnsPlatform>>,
}

impl BootstrappedServices {
    /// Manager for `protocol`, if enabled.
    pub fn manager(&self, protocol: CastProtocol) -> Option<&Arc<ProtocolCastManager>> {
        self.orchestrator.manager(protocol)
    }

    /// Stops every service and releases the mDNS daemon.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        self.orchestrator.stop();
        if let Some(mdns) = &self.mdns {
            mdns.shutdown();
        }
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all services over the built-in mDNS platform.
///
/// # Errors
/// Returns an error if the configuration is invalid, the HTTP client cannot
/// be built, or the mDNS daemon cannot start.
pub fn bootstrap_services(
    config: &Config,
    vendor: Option<Arc<dyn CastSessionManager>>,
) -> CastResult<BootstrappedServices> {
    let spawner = TokioSpawner::current();
    let mdns = Arc::new(MdnsPlatform::new(spawner.clone(), config.resolve_timeout())?);

    let mut services = bootstrap_services_with(
        config,
        Arc::clone(&mdns) as Arc<dyn DiscoveryPlatform>,
        vendor,
    )?;
    services.mdns = Some(mdns);
    Ok(services)
}

/// Bootstraps all services over a caller-supplied discovery platform.
///
/// Wiring order:
/// 1. Shared infrastructure (HTTP client, I/O pool, event bridge)
/// 2. One engine + client + manager per enabled protocol
/// 3. Vendor adapter (when an SDK is supplied)
/// 4. Orchestrator over all of the above
///
/// # Errors
/// Returns an error if the configuration is invalid or the HTTP client
/// cannot be built.
pub fn bootstrap_services_with(
    config: &Config,
    platform: Arc<dyn DiscoveryPlatform>,
    vendor: Option<Arc<dyn CastSessionManager>>,
) -> CastResult<BootstrappedServices> {
    config.validate().map_err(CastError::Configuration)?;

    let spawner = TokioSpawner::current();
    let workers = IoWorkers::new(spawner.clone(), config.max_concurrent_io);
    let http_client = build_http_client(&config.transport)?;
    let cancel_token = CancellationToken::new();

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));
    let emitter = Arc::clone(&event_bridge) as Arc<dyn EventEmitter>;

    let build_manager = |protocol_config: &ProtocolConfig,
                         profile: DiscoveryProfile,
                         client: Arc<dyn MediaClient>| {
        if !protocol_config.enabled {
            log::info!("[Bootstrap] {} disabled by configuration", profile.protocol.label());
            return None;
        }
        let profile = match &protocol_config.service_types {
            Some(types) => profile.with_service_types(types.clone()),
            None => profile,
        };
        let engine = ServiceDiscoveryEngine::new(
            profile,
            Arc::clone(&platform),
            workers.clone(),
            Arc::clone(&emitter),
        );
        Some(Arc::new(ProtocolCastManager::new(
            engine,
            client,
            workers.clone(),
            Arc::clone(&emitter),
        )))
    };

    let dlna = build_manager(
        &config.dlna,
        DiscoveryProfile::dlna(),
        Arc::new(DlnaClient::new(http_client.clone())),
    );
    let airplay_client = Arc::new(AirPlayClient::new(http_client));
    let airplay = build_manager(
        &config.airplay,
        DiscoveryProfile::airplay(),
        Arc::clone(&airplay_client) as Arc<dyn MediaClient>,
    );
    let airplay_client = airplay.as_ref().map(|_| airplay_client);

    let vendor = vendor.map(|sdk| Arc::new(VendorCastAdapter::new(sdk)));

    let orchestrator = Arc::new(UnifiedCastOrchestrator::new(
        vendor,
        dlna,
        airplay,
        spawner.clone(),
        Arc::clone(&emitter),
    ));

    Ok(BootstrappedServices {
        orchestrator,
        event_bridge,
        workers,
        spawner,
        cancel_token,
        airplay_client,
        mdns: None,
    })
}
