//! Per-protocol cast manager.
//!
//! Ties one discovery engine to one media client and tracks which device (if
//! any) the user selected. The selection is dropped automatically when the
//! selected device disappears from discovery.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::device::{CastProtocol, DeviceDescriptor};
use crate::discovery::ServiceDiscoveryEngine;
use crate::events::{DisconnectReason, EventEmitter, SessionEvent};
use crate::protocols::{MediaClient, MediaCommand, MediaRequest, PlayOutcome};
use crate::registry::Snapshot;
use crate::runtime::{IoWorkers, TaskSpawner};
use crate::utils::now_millis;

/// Callback fired after every successful `connect_to_device`.
pub type SessionStartedHook = Arc<dyn Fn() + Send + Sync>;

/// The manager's current device selection.
///
/// Only constructible as [`disconnected`](Self::disconnected) or
/// [`connected`](Self::connected), so a connected selection always carries a
/// device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSelection {
    connected: bool,
    selected_device: Option<DeviceDescriptor>,
}

impl ProtocolSelection {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(device: DeviceDescriptor) -> Self {
        Self {
            connected: true,
            selected_device: Some(device),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.selected_device.as_ref()
    }
}

/// Pending result of a media command.
///
/// Dropping it does not cancel the command.
#[derive(Debug)]
pub struct CommandOutcome(OutcomeInner);

#[derive(Debug)]
enum OutcomeInner {
    Ready(bool),
    Pending(oneshot::Receiver<bool>),
}

impl CommandOutcome {
    pub(crate) fn ready(success: bool) -> Self {
        Self(OutcomeInner::Ready(success))
    }

    fn pending(rx: oneshot::Receiver<bool>) -> Self {
        Self(OutcomeInner::Pending(rx))
    }

    /// Waits for the command to finish. A command whose task vanished
    /// counts as failed.
    pub async fn wait(self) -> bool {
        match self.0 {
            OutcomeInner::Ready(success) => success,
            OutcomeInner::Pending(rx) => rx.await.unwrap_or(false),
        }
    }
}

/// Connection state and media control for one protocol family.
pub struct ProtocolCastManager {
    engine: ServiceDiscoveryEngine,
    client: Arc<dyn MediaClient>,
    selection: Arc<watch::Sender<ProtocolSelection>>,
    workers: IoWorkers,
    emitter: Arc<dyn EventEmitter>,
    session_started: Mutex<Option<SessionStartedHook>>,
    watch_cancel: Mutex<Option<CancellationToken>>,
}

impl ProtocolCastManager {
    pub fn new(
        engine: ServiceDiscoveryEngine,
        client: Arc<dyn MediaClient>,
        workers: IoWorkers,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            engine,
            client,
            selection: Arc::new(watch::channel(ProtocolSelection::disconnected()).0),
            workers,
            emitter,
            session_started: Mutex::new(None),
            watch_cancel: Mutex::new(None),
        }
    }

    pub fn protocol(&self) -> CastProtocol {
        self.engine.profile().protocol
    }

    pub fn engine(&self) -> &ServiceDiscoveryEngine {
        &self.engine
    }

    /// Installs the callback fired after each successful connect.
    pub fn set_session_started_hook(&self, hook: SessionStartedHook) {
        *self.session_started.lock() = Some(hook);
    }

    /// Starts discovery and the vanished-device watch.
    pub fn start(&self) {
        self.engine.start_discovery();

        let mut guard = self.watch_cancel.lock();
        if guard.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *guard = Some(token.clone());

        let watcher = VanishWatch {
            devices: self.engine.subscribe(),
            selection: Arc::clone(&self.selection),
            emitter: Arc::clone(&self.emitter),
            protocol: self.protocol(),
        };
        self.workers.spawner().spawn(watcher.run(token));
        log::info!("[Manager] {} manager started", self.protocol().label());
    }

    /// Stops the watch and discovery, then drops the selection.
    ///
    /// Safe to call repeatedly or without `start()`.
    pub fn stop(&self) {
        if let Some(token) = self.watch_cancel.lock().take() {
            token.cancel();
        }
        self.engine.stop_discovery();
        self.drop_selection(DisconnectReason::Stopped);
    }

    /// Selects `device` for media control.
    ///
    /// Returns `false` for devices of another protocol or devices the client
    /// cannot drive.
    pub fn connect_to_device(&self, device: DeviceDescriptor) -> bool {
        let label = self.protocol().label();

        if device.protocol != self.protocol() {
            log::warn!(
                "[Manager] {} manager refused {} device {}",
                label,
                device.protocol.label(),
                device.id
            );
            return false;
        }
        if !self.client.supports(&device) {
            log::warn!(
                "[Manager] {} client cannot control {} ({})",
                label,
                device.name,
                device.service_type
            );
            return false;
        }

        log::info!("[Manager] {} connected to {} ({})", label, device.name, device.id);
        self.selection
            .send_replace(ProtocolSelection::connected(device.clone()));
        self.emitter.emit_session(SessionEvent::Connected {
            protocol: self.protocol(),
            device: device.clone(),
            timestamp: now_millis(),
        });

        let hook = self.session_started.lock().clone();
        if let Some(hook) = hook {
            hook();
        }

        let client = Arc::clone(&self.client);
        self.workers.spawn(async move {
            client.probe(&device).await;
        });
        true
    }

    /// Drops the current selection.
    pub fn disconnect(&self) {
        self.drop_selection(DisconnectReason::Requested);
    }

    fn drop_selection(&self, reason: DisconnectReason) {
        let previous = self.selection.send_replace(ProtocolSelection::disconnected());
        if let Some(device) = previous.selected_device {
            log::info!(
                "[Manager] {} disconnected from {} ({:?})",
                self.protocol().label(),
                device.name,
                reason
            );
            self.emitter.emit_session(SessionEvent::Disconnected {
                protocol: self.protocol(),
                device_id: device.id,
                reason,
                timestamp: now_millis(),
            });
        }
    }

    /// Starts playback on the selected device.
    ///
    /// An `Unusable` outcome drops the selection, provided it still points
    /// at the device the command ran against. `AuthRequired` keeps it so the
    /// request can be retried once credentials arrive.
    pub fn play_media(&self, request: MediaRequest) -> CommandOutcome {
        let selection = Arc::clone(&self.selection);
        let emitter = Arc::clone(&self.emitter);
        let protocol = self.protocol();
        self.dispatch(MediaCommand::Play, move |client, device| async move {
            match client.play_media(&device, &request).await {
                PlayOutcome::Started => true,
                PlayOutcome::Failed => false,
                PlayOutcome::Unusable => {
                    release_if_selected(&selection, emitter.as_ref(), protocol, &device);
                    false
                }
                PlayOutcome::AuthRequired => {
                    log::warn!(
                        "[Manager] {} {} wants credentials, keeping it selected",
                        protocol.label(),
                        device.name
                    );
                    emitter.emit_session(SessionEvent::AuthRequired {
                        protocol,
                        device_id: device.id.clone(),
                        timestamp: now_millis(),
                    });
                    false
                }
            }
        })
    }

    pub fn pause_media(&self) -> CommandOutcome {
        self.dispatch(MediaCommand::Pause, |client, device| async move {
            client.pause(&device).await
        })
    }

    pub fn resume_media(&self) -> CommandOutcome {
        self.dispatch(MediaCommand::Resume, |client, device| async move {
            client.resume(&device).await
        })
    }

    pub fn stop_media(&self) -> CommandOutcome {
        self.dispatch(MediaCommand::Stop, |client, device| async move {
            client.stop(&device).await
        })
    }

    /// Runs a client call against the selected device on the I/O pool.
    fn dispatch<F, Fut>(&self, command: MediaCommand, call: F) -> CommandOutcome
    where
        F: FnOnce(Arc<dyn MediaClient>, DeviceDescriptor) -> Fut,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let Some(device) = self.selection.borrow().device().cloned() else {
            log::warn!(
                "[Manager] {} {} ignored: no device selected",
                self.protocol().label(),
                command.as_str()
            );
            return CommandOutcome::ready(false);
        };

        let protocol = self.protocol();
        let emitter = Arc::clone(&self.emitter);
        let job = call(Arc::clone(&self.client), device);
        let rx = self.workers.run(async move {
            let success = job.await;
            emitter.emit_session(SessionEvent::CommandCompleted {
                protocol,
                command,
                success,
                timestamp: now_millis(),
            });
            success
        });
        CommandOutcome::pending(rx)
    }

    /// Current registry snapshot.
    pub fn devices(&self) -> Snapshot<DeviceDescriptor> {
        self.engine.devices()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Snapshot<DeviceDescriptor>> {
        self.engine.subscribe()
    }

    pub fn selection(&self) -> ProtocolSelection {
        self.selection.borrow().clone()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<ProtocolSelection> {
        self.selection.subscribe()
    }
}

impl Drop for ProtocolCastManager {
    fn drop(&mut self) {
        if let Some(token) = self.watch_cancel.get_mut().take() {
            token.cancel();
        }
    }
}

/// Drops the selection after a failed play, unless the user has already
/// moved on to another device.
fn release_if_selected(
    selection: &watch::Sender<ProtocolSelection>,
    emitter: &dyn EventEmitter,
    protocol: CastProtocol,
    device: &DeviceDescriptor,
) {
    let released = selection.send_if_modified(|current| match current.device() {
        Some(selected) if selected.id == device.id => {
            *current = ProtocolSelection::disconnected();
            true
        }
        _ => false,
    });
    if released {
        log::warn!(
            "[Manager] {} playback failed on {}, disconnecting",
            protocol.label(),
            device.name
        );
        emitter.emit_session(SessionEvent::Disconnected {
            protocol,
            device_id: device.id.clone(),
            reason: DisconnectReason::PlaybackFailed,
            timestamp: now_millis(),
        });
    }
}

/// Drops the selection when its device leaves the registry.
struct VanishWatch {
    devices: watch::Receiver<Snapshot<DeviceDescriptor>>,
    selection: Arc<watch::Sender<ProtocolSelection>>,
    emitter: Arc<dyn EventEmitter>,
    protocol: CastProtocol,
}

impl VanishWatch {
    async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                changed = self.devices.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = self.devices.borrow_and_update().clone();
                    self.check(&snapshot);
                }
            }
        }
    }

    fn check(&self, snapshot: &Snapshot<DeviceDescriptor>) {
        let mut lost = None;
        self.selection.send_if_modified(|selection| match selection.device() {
            Some(device) if !snapshot.contains(&device.id) => {
                lost = Some(device.clone());
                *selection = ProtocolSelection::disconnected();
                true
            }
            _ => false,
        });

        if let Some(device) = lost {
            log::info!(
                "[Manager] {} device {} vanished, disconnecting",
                self.protocol.label(),
                device.name
            );
            self.emitter.emit_session(SessionEvent::Disconnected {
                protocol: self.protocol,
                device_id: device.id,
                reason: DisconnectReason::DeviceLost,
                timestamp: now_millis(),
            });
        }
    }
}
