//! Service discovery engine.
//!
//! One [`ServiceDiscoveryEngine`] runs per protocol family. It registers one
//! platform listener per service type, classifies found services, resolves
//! the accepted ones and publishes validated [`DeviceDescriptor`]s into its
//! [`Registry`].
//!
//! # Threading
//!
//! Platform callbacks only push messages onto an unbounded channel. A single
//! event-loop task owns every registry mutation, so snapshot replacement is
//! single-writer by construction. Resolves run on the shared [`IoWorkers`]
//! pool and report back through the same channel.

pub mod mdns;
pub mod platform;
pub mod profile;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::device::{clean_display_name, preferred_address, validate_endpoint, DeviceDescriptor};
use crate::error::ErrorCode;
use crate::events::{DeviceEvent, EventEmitter};
use crate::registry::{Registry, Snapshot, Upsert};
use crate::runtime::{IoWorkers, TaskSpawner};
use crate::utils::now_millis;

pub use mdns::MdnsPlatform;
pub use platform::{
    DiscoveryListener, DiscoveryPlatform, FoundService, ListenerId, LostService, PlatformError,
    ResolveFailure, ResolvedService,
};
pub use profile::{Classification, DiscoveryProfile, IdScheme};

/// Messages from platform callbacks and resolve jobs to the event loop.
#[derive(Debug)]
enum EngineMessage {
    Found(FoundService),
    Lost(LostService),
    Resolved(ResolvedService),
    ResolveFailed {
        name: String,
        failure: ResolveFailure,
    },
}

/// Listener handed to the platform. Forwards everything to the event loop.
struct ChannelListener {
    label: &'static str,
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl ChannelListener {
    fn forward(&self, message: EngineMessage) {
        if self.tx.send(message).is_err() {
            log::trace!("[Discovery] {} event loop gone, dropping callback", self.label);
        }
    }
}

impl DiscoveryListener for ChannelListener {
    fn on_discovery_started(&self, service_type: &str) {
        log::debug!("[Discovery] {} browse started for {}", self.label, service_type);
    }

    fn on_discovery_stopped(&self, service_type: &str) {
        log::debug!("[Discovery] {} browse stopped for {}", self.label, service_type);
    }

    fn on_start_discovery_failed(&self, service_type: &str, code: i32) {
        log::warn!(
            "[Discovery] {} browse start failed for {}: {}",
            self.label,
            service_type,
            code
        );
    }

    fn on_stop_discovery_failed(&self, service_type: &str, code: i32) {
        log::warn!(
            "[Discovery] {} browse stop failed for {}: {}",
            self.label,
            service_type,
            code
        );
    }

    fn on_service_found(&self, service: FoundService) {
        self.forward(EngineMessage::Found(service));
    }

    fn on_service_lost(&self, service: LostService) {
        self.forward(EngineMessage::Lost(service));
    }
}

/// Listeners and cancellation for one start/stop cycle.
struct DiscoverySession {
    listeners: Vec<ListenerId>,
    cancel: CancellationToken,
}

/// Drives platform discovery for one protocol family.
pub struct ServiceDiscoveryEngine {
    profile: Arc<DiscoveryProfile>,
    platform: Arc<dyn DiscoveryPlatform>,
    registry: Arc<Registry<DeviceDescriptor>>,
    workers: IoWorkers,
    emitter: Arc<dyn EventEmitter>,
    session: Mutex<Option<DiscoverySession>>,
}

impl ServiceDiscoveryEngine {
    pub fn new(
        profile: DiscoveryProfile,
        platform: Arc<dyn DiscoveryPlatform>,
        workers: IoWorkers,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            platform,
            registry: Arc::new(Registry::new()),
            workers,
            emitter,
            session: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> &DiscoveryProfile {
        &self.profile
    }

    /// Current set of discovered devices.
    pub fn devices(&self) -> Snapshot<DeviceDescriptor> {
        self.registry.snapshot()
    }

    /// Receiver for every registry snapshot published from now on.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<DeviceDescriptor>> {
        self.registry.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Number of platform listeners registered by the current session.
    pub fn listener_count(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.listeners.len())
    }

    /// Starts the event loop and registers one listener per service type.
    ///
    /// Registration failures are logged and skipped. Calling this while a
    /// session is already running is a logged no-op.
    pub fn start_discovery(&self) {
        let mut session = self.session.lock();
        let label = self.profile.protocol.label();

        if session.is_some() {
            log::debug!("[Discovery] {} discovery already running", label);
            return;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let event_loop = EventLoop {
            profile: Arc::clone(&self.profile),
            platform: Arc::clone(&self.platform),
            registry: Arc::clone(&self.registry),
            workers: self.workers.clone(),
            emitter: Arc::clone(&self.emitter),
            cancel: cancel.clone(),
            tx: tx.clone(),
        };
        self.workers.spawner().spawn(event_loop.run(rx));

        let mut listeners = Vec::with_capacity(self.profile.service_types.len());
        for service_type in &self.profile.service_types {
            let listener = Arc::new(ChannelListener {
                label,
                tx: tx.clone(),
            });
            match self.platform.discover_services(service_type, listener) {
                Ok(id) => listeners.push(id),
                Err(e) => {
                    log::warn!(
                        "[Discovery] {} failed to browse {}: {}",
                        label,
                        service_type,
                        e
                    );
                }
            }
        }

        log::info!(
            "[Discovery] Started {} discovery for {}/{} service types",
            label,
            listeners.len(),
            self.profile.service_types.len()
        );

        *session = Some(DiscoverySession { listeners, cancel });
    }

    /// Unregisters every listener and clears the registry.
    ///
    /// Safe to call repeatedly and after a partial start. Listeners that are
    /// already gone count as stopped. The registry is cleared even if some
    /// unregistrations fail.
    pub fn stop_discovery(&self) {
        let label = self.profile.protocol.label();

        if let Some(session) = self.session.lock().take() {
            session.cancel.cancel();

            for id in session.listeners {
                match self.platform.stop_service_discovery(id) {
                    Ok(()) | Err(PlatformError::NotRegistered) => {}
                    Err(e) => {
                        log::warn!("[Discovery] {} failed to stop {}: {}", label, id, e);
                    }
                }
            }
            log::info!("[Discovery] Stopped {} discovery", label);
        }

        for device in self.registry.clear() {
            self.emitter.emit_device(DeviceEvent::Lost {
                protocol: device.protocol,
                id: device.id,
                timestamp: now_millis(),
            });
        }
    }
}

impl Drop for ServiceDiscoveryEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// Single writer for one engine's registry.
struct EventLoop {
    profile: Arc<DiscoveryProfile>,
    platform: Arc<dyn DiscoveryPlatform>,
    registry: Arc<Registry<DeviceDescriptor>>,
    workers: IoWorkers,
    emitter: Arc<dyn EventEmitter>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl EventLoop {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<EngineMessage>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }
        log::trace!(
            "[Discovery] {} event loop exited",
            self.profile.protocol.label()
        );
    }

    fn handle(&self, message: EngineMessage) {
        match message {
            EngineMessage::Found(service) => self.on_found(service),
            EngineMessage::Lost(service) => self.on_lost(service),
            EngineMessage::Resolved(service) => self.on_resolved(service),
            EngineMessage::ResolveFailed { name, failure } => self.on_resolve_failed(name, failure),
        }
    }

    fn on_found(&self, service: FoundService) {
        let label = self.profile.protocol.label();
        let classification = self.profile.classify(&service);

        if !classification.is_accepted() {
            log::trace!(
                "[Discovery] {} ignoring {} ({})",
                label,
                service.name,
                service.service_type
            );
            return;
        }

        log::debug!(
            "[Discovery] Potential {} service found: {} ({}, {:?})",
            label,
            service.name,
            service.service_type,
            classification
        );

        let platform = Arc::clone(&self.platform);
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        self.workers.spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            let message = match platform.resolve_service(&service).await {
                Ok(resolved) => EngineMessage::Resolved(resolved),
                Err(failure) => EngineMessage::ResolveFailed {
                    name: service.name,
                    failure,
                },
            };
            let _ = tx.send(message);
        });
    }

    fn on_resolved(&self, service: ResolvedService) {
        let label = self.profile.protocol.label();

        let Some(host) = preferred_address(&service.addresses) else {
            log::debug!("[Discovery] {} resolved {} without addresses", label, service.name);
            return;
        };

        if let Err(reason) = validate_endpoint(host, service.port) {
            log::debug!(
                "[Discovery] {} rejecting {} at {}:{}: {}",
                label,
                service.name,
                host,
                service.port,
                reason
            );
            return;
        }

        let device = DeviceDescriptor {
            id: self.profile.device_id(&service.name, host, service.port),
            name: clean_display_name(&service.name),
            host,
            port: service.port,
            service_type: service.service_type,
            protocol: self.profile.protocol,
            service_name: service.name,
        };

        let event = match self
            .registry
            .upsert_unless_cancelled(device.clone(), &self.cancel)
        {
            Some(Upsert::Inserted) => DeviceEvent::Discovered {
                device,
                timestamp: now_millis(),
            },
            Some(Upsert::Updated) => DeviceEvent::Updated {
                device,
                timestamp: now_millis(),
            },
            Some(Upsert::Unchanged) | None => return,
        };

        if let DeviceEvent::Discovered { device, .. } = &event {
            log::info!(
                "[Discovery] {} device resolved: {} at {}:{}",
                label,
                device.name,
                device.host,
                device.port
            );
        }
        self.emitter.emit_device(event);
    }

    fn on_resolve_failed(&self, name: String, failure: ResolveFailure) {
        let label = self.profile.protocol.label();
        match failure {
            ResolveFailure::AlreadyActive => {
                log::trace!("[Discovery] {} resolve already active for {}", label, name);
            }
            other => {
                log::warn!(
                    "[Discovery] {} resolve failed for {}: {} [{}/{}]",
                    label,
                    name,
                    other,
                    other.code(),
                    other.platform_code()
                );
            }
        }
    }

    fn on_lost(&self, service: LostService) {
        let label = self.profile.protocol.label();
        let removed = self
            .registry
            .remove_where(|device| self.profile.id_matches_service(&device.id, &service.name));

        for device in removed {
            log::info!("[Discovery] {} device lost: {}", label, device.name);
            self.emitter.emit_device(DeviceEvent::Lost {
                protocol: device.protocol,
                id: device.id,
                timestamp: now_millis(),
            });
        }
    }
}
