//! Aggregate casting state across the vendor SDK and protocol managers.
//!
//! The state is recomputed from scratch whenever any input changes. At most
//! one protocol is reported active, chosen by fixed precedence:
//! vendor Cast session, then DLNA, then AirPlay.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::device::CastProtocol;
use crate::error::ErrorCode;
use crate::events::{CastingEvent, EventEmitter};
use crate::manager::{CommandOutcome, ProtocolCastManager, ProtocolSelection};
use crate::protocols::{MediaCommand, MediaRequest};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::now_millis;
use crate::vendor::VendorCastAdapter;

/// Which protocol, if any, is currently casting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CastingType {
    None,
    Cast,
    Dlna,
    AirPlay,
}

impl From<CastProtocol> for CastingType {
    fn from(protocol: CastProtocol) -> Self {
        match protocol {
            CastProtocol::Cast => Self::Cast,
            CastProtocol::Dlna => Self::Dlna,
            CastProtocol::AirPlay => Self::AirPlay,
        }
    }
}

/// Aggregate casting state.
///
/// Only constructible through [`none`](Self::none) and
/// [`active`](Self::active): `is_active` always equals
/// `protocol != None`, and a device name implies an active state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastingState {
    is_active: bool,
    protocol: CastingType,
    device_name: Option<String>,
}

impl CastingState {
    pub fn none() -> Self {
        Self {
            is_active: false,
            protocol: CastingType::None,
            device_name: None,
        }
    }

    /// Active state for `protocol`. `CastingType::None` yields [`none`](Self::none).
    pub fn active(protocol: CastingType, device_name: Option<String>) -> Self {
        if protocol == CastingType::None {
            return Self::none();
        }
        Self {
            is_active: true,
            protocol,
            device_name,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn protocol(&self) -> CastingType {
        self.protocol
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

impl Default for CastingState {
    fn default() -> Self {
        Self::none()
    }
}

/// Vendor adapter as seen by one recomputation.
enum VendorView {
    Inactive,
    Active(Option<String>),
    Failed,
}

/// Precedence rule: first match wins.
fn resolve_state(
    vendor: VendorView,
    dlna: &ProtocolSelection,
    airplay: &ProtocolSelection,
) -> CastingState {
    match (vendor, dlna.device(), airplay.device()) {
        (VendorView::Active(name), _, _) => CastingState::active(CastingType::Cast, name),
        (VendorView::Failed, _, _) => CastingState::none(),
        (VendorView::Inactive, Some(device), _) => {
            CastingState::active(CastingType::Dlna, Some(device.name.clone()))
        }
        (VendorView::Inactive, None, Some(device)) => {
            CastingState::active(CastingType::AirPlay, Some(device.name.clone()))
        }
        (VendorView::Inactive, None, None) => CastingState::none(),
    }
}

/// Inputs and output shared by the orchestrator, its trigger task and the
/// managers' session-started hooks.
struct StateCore {
    vendor: Option<Arc<VendorCastAdapter>>,
    dlna: Option<Arc<ProtocolCastManager>>,
    airplay: Option<Arc<ProtocolCastManager>>,
    state: watch::Sender<CastingState>,
    emitter: Arc<dyn EventEmitter>,
    recompute_lock: Mutex<()>,
}

impl StateCore {
    fn vendor_view(&self) -> VendorView {
        let Some(vendor) = self.vendor.as_ref().filter(|v| v.is_active()) else {
            return VendorView::Inactive;
        };
        match vendor.device_name() {
            Ok(name) => VendorView::Active(name),
            Err(e) => {
                log::warn!("[Orchestrator] Vendor session lookup failed: {} [{}]", e, e.code());
                VendorView::Failed
            }
        }
    }

    fn selection_of(manager: Option<&Arc<ProtocolCastManager>>) -> ProtocolSelection {
        manager.map(|m| m.selection()).unwrap_or_default()
    }

    fn recompute(&self) {
        let _serial = self.recompute_lock.lock();
        let next = resolve_state(
            self.vendor_view(),
            &Self::selection_of(self.dlna.as_ref()),
            &Self::selection_of(self.airplay.as_ref()),
        );
        self.publish(next);
    }

    fn publish(&self, next: CastingState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if changed {
            log::info!(
                "[Orchestrator] Casting state: {:?} ({})",
                next.protocol(),
                next.device_name().unwrap_or("-")
            );
            self.emitter.emit_casting(CastingEvent::StateChanged {
                state: next,
                timestamp: now_millis(),
            });
        }
    }

    fn managers(&self) -> impl Iterator<Item = &Arc<ProtocolCastManager>> {
        self.dlna.iter().chain(self.airplay.iter())
    }

    /// Every input whose change requires a recomputation.
    fn triggers(&self) -> Vec<BoxStream<'static, ()>> {
        let mut triggers = Vec::new();
        if let Some(vendor) = &self.vendor {
            triggers.push(WatchStream::from_changes(vendor.subscribe()).map(|_| ()).boxed());
            triggers.push(
                WatchStream::from_changes(vendor.session_ticks())
                    .map(|_| ())
                    .boxed(),
            );
        }
        for manager in self.managers() {
            triggers.push(
                WatchStream::from_changes(manager.subscribe_selection())
                    .map(|_| ())
                    .boxed(),
            );
        }
        triggers
    }
}

/// Unifies the vendor adapter and protocol managers into one
/// [`CastingState`] and routes media commands to the active protocol.
pub struct UnifiedCastOrchestrator {
    core: Arc<StateCore>,
    spawner: TokioSpawner,
    watch_cancel: Mutex<Option<CancellationToken>>,
}

impl UnifiedCastOrchestrator {
    pub fn new(
        vendor: Option<Arc<VendorCastAdapter>>,
        dlna: Option<Arc<ProtocolCastManager>>,
        airplay: Option<Arc<ProtocolCastManager>>,
        spawner: TokioSpawner,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let core = Arc::new(StateCore {
            vendor,
            dlna,
            airplay,
            state: watch::channel(CastingState::none()).0,
            emitter,
            recompute_lock: Mutex::new(()),
        });

        for manager in core.managers() {
            let weak = Arc::downgrade(&core);
            manager.set_session_started_hook(Arc::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.recompute();
                }
            }));
        }

        Self {
            core,
            spawner,
            watch_cancel: Mutex::new(None),
        }
    }

    /// Starts the vendor adapter and every manager, then recomputes.
    pub fn start(&self) {
        if let Some(vendor) = &self.core.vendor {
            vendor.start();
        }
        for manager in self.core.managers() {
            manager.start();
        }

        {
            let mut guard = self.watch_cancel.lock();
            if guard.is_none() {
                let token = CancellationToken::new();
                *guard = Some(token.clone());
                let core = Arc::clone(&self.core);
                let triggers = stream::select_all(core.triggers());
                self.spawner.spawn(watch_triggers(core, triggers, token));
            }
        }

        self.core.recompute();
        log::info!("[Orchestrator] Started");
    }

    /// Stops everything and publishes `NONE`. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(token) = self.watch_cancel.lock().take() {
            token.cancel();
        }
        for manager in self.core.managers() {
            manager.stop();
        }
        if let Some(vendor) = &self.core.vendor {
            vendor.stop();
        }

        let _serial = self.core.recompute_lock.lock();
        self.core.publish(CastingState::none());
        log::info!("[Orchestrator] Stopped");
    }

    /// Forces a recomputation from current inputs.
    pub fn refresh(&self) {
        self.core.recompute();
    }

    pub fn casting_state(&self) -> CastingState {
        self.core.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CastingState> {
        self.core.state.subscribe()
    }

    /// Manager for `protocol`, if that protocol is enabled.
    pub fn manager(&self, protocol: CastProtocol) -> Option<&Arc<ProtocolCastManager>> {
        match protocol {
            CastProtocol::Dlna => self.core.dlna.as_ref(),
            CastProtocol::AirPlay => self.core.airplay.as_ref(),
            CastProtocol::Cast => None,
        }
    }

    pub fn managers(&self) -> impl Iterator<Item = &Arc<ProtocolCastManager>> {
        self.core.managers()
    }

    pub fn vendor(&self) -> Option<&Arc<VendorCastAdapter>> {
        self.core.vendor.as_ref()
    }

    pub fn play_media(&self, request: MediaRequest) -> CommandOutcome {
        match self.route(MediaCommand::Play) {
            Some(manager) => manager.play_media(request),
            None => CommandOutcome::ready(false),
        }
    }

    pub fn pause_media(&self) -> CommandOutcome {
        self.route(MediaCommand::Pause)
            .map_or_else(|| CommandOutcome::ready(false), |m| m.pause_media())
    }

    pub fn resume_media(&self) -> CommandOutcome {
        self.route(MediaCommand::Resume)
            .map_or_else(|| CommandOutcome::ready(false), |m| m.resume_media())
    }

    pub fn stop_media(&self) -> CommandOutcome {
        self.route(MediaCommand::Stop)
            .map_or_else(|| CommandOutcome::ready(false), |m| m.stop_media())
    }

    /// Manager that should execute `command` given the current state.
    fn route(&self, command: MediaCommand) -> Option<&Arc<ProtocolCastManager>> {
        match self.casting_state().protocol() {
            CastingType::Dlna => self.core.dlna.as_ref(),
            CastingType::AirPlay => self.core.airplay.as_ref(),
            CastingType::Cast => {
                log::debug!(
                    "[Orchestrator] {} left to the Cast session's own playback control",
                    command.as_str()
                );
                None
            }
            CastingType::None => {
                log::warn!("[Orchestrator] {} ignored: nothing is casting", command.as_str());
                None
            }
        }
    }
}

impl Drop for UnifiedCastOrchestrator {
    fn drop(&mut self) {
        if let Some(token) = self.watch_cancel.get_mut().take() {
            token.cancel();
        }
    }
}

async fn watch_triggers(
    core: Arc<StateCore>,
    mut triggers: stream::SelectAll<BoxStream<'static, ()>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = triggers.next() => match next {
                Some(()) => core.recompute(),
                None => {
                    token.cancelled().await;
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryProfile, ServiceDiscoveryEngine};
    use crate::events::emitter::tests::RecordingEventEmitter;
    use crate::runtime::IoWorkers;
    use crate::test_fixtures::{
        airplay_device, dlna_device, FakeMediaClient, FakePlatform, FakeSessionManager,
    };

    fn connected(name: &str) -> ProtocolSelection {
        ProtocolSelection::connected(dlna_device(name, "192.168.1.20", 8080))
    }

    #[test]
    fn vendor_wins_over_dlna() {
        let state = resolve_state(
            VendorView::Active(Some("Chromecast".into())),
            &connected("Den"),
            &connected("Kitchen"),
        );
        assert_eq!(state.protocol(), CastingType::Cast);
        assert_eq!(state.device_name(), Some("Chromecast"));
    }

    #[test]
    fn dlna_wins_over_airplay() {
        let state = resolve_state(VendorView::Inactive, &connected("Den"), &connected("Kitchen"));
        assert_eq!(state, CastingState::active(CastingType::Dlna, Some("Den".into())));
    }

    #[test]
    fn airplay_when_alone() {
        let state = resolve_state(
            VendorView::Inactive,
            &ProtocolSelection::disconnected(),
            &connected("Kitchen"),
        );
        assert_eq!(state.protocol(), CastingType::AirPlay);
        assert!(state.is_active());
    }

    #[test]
    fn vendor_lookup_failure_is_none() {
        let state = resolve_state(VendorView::Failed, &connected("Den"), &connected("Kitchen"));
        assert_eq!(state, CastingState::none());
    }

    #[test]
    fn active_with_none_type_is_none() {
        let state = CastingState::active(CastingType::None, Some("x".into()));
        assert!(!state.is_active());
        assert_eq!(state.device_name(), None);
    }

    #[test]
    fn state_serializes_camel_case() {
        let state = CastingState::active(CastingType::AirPlay, Some("Kitchen".into()));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isActive"], true);
        assert_eq!(json["protocol"], "AIRPLAY");
        assert_eq!(json["deviceName"], "Kitchen");
    }

    struct Fixture {
        sdk: Arc<FakeSessionManager>,
        dlna: Arc<FakeMediaClient>,
        airplay: Arc<FakeMediaClient>,
        emitter: Arc<RecordingEventEmitter>,
        orchestrator: UnifiedCastOrchestrator,
    }

    fn fixture() -> Fixture {
        let platform = Arc::new(FakePlatform::default());
        let emitter = Arc::new(RecordingEventEmitter::default());
        let workers = IoWorkers::new(TokioSpawner::current(), 4);

        let manager = |profile: DiscoveryProfile, client: Arc<FakeMediaClient>| {
            let engine = ServiceDiscoveryEngine::new(
                profile,
                platform.clone(),
                workers.clone(),
                emitter.clone(),
            );
            Arc::new(ProtocolCastManager::new(
                engine,
                client,
                workers.clone(),
                emitter.clone(),
            ))
        };

        let dlna = Arc::new(FakeMediaClient::new(CastProtocol::Dlna));
        let airplay = Arc::new(FakeMediaClient::new(CastProtocol::AirPlay));
        let sdk = Arc::new(FakeSessionManager::default());

        let orchestrator = UnifiedCastOrchestrator::new(
            Some(Arc::new(VendorCastAdapter::new(sdk.clone()))),
            Some(manager(DiscoveryProfile::dlna(), dlna.clone())),
            Some(manager(DiscoveryProfile::airplay(), airplay.clone())),
            TokioSpawner::current(),
            emitter.clone(),
        );

        Fixture {
            sdk,
            dlna,
            airplay,
            emitter,
            orchestrator,
        }
    }

    async fn wait_for_state(
        orchestrator: &UnifiedCastOrchestrator,
        pred: impl FnMut(&CastingState) -> bool,
    ) -> CastingState {
        let mut rx = orchestrator.subscribe();
        let state = tokio::time::timeout(std::time::Duration::from_secs(2), rx.wait_for(pred))
            .await
            .expect("timed out waiting for casting state")
            .expect("orchestrator dropped")
            .clone();
        state
    }

    #[tokio::test]
    async fn connect_is_visible_before_returning() {
        let f = fixture();
        f.orchestrator.start();

        let dlna = f.orchestrator.manager(CastProtocol::Dlna).unwrap();
        assert!(dlna.connect_to_device(dlna_device("Den", "192.168.1.20", 8080)));

        let state = f.orchestrator.casting_state();
        assert_eq!(state.protocol(), CastingType::Dlna);
        assert_eq!(state.device_name(), Some("Den"));
    }

    #[tokio::test]
    async fn commands_follow_the_active_protocol() {
        let f = fixture();
        f.orchestrator.start();

        f.orchestrator
            .manager(CastProtocol::AirPlay)
            .unwrap()
            .connect_to_device(airplay_device("Kitchen", "192.168.1.60", 7000));
        assert!(f.orchestrator.pause_media().wait().await);
        assert!(f.airplay.calls().contains(&"pause".to_string()));

        f.orchestrator
            .manager(CastProtocol::Dlna)
            .unwrap()
            .connect_to_device(dlna_device("Den", "192.168.1.20", 8080));
        assert!(f.orchestrator.stop_media().wait().await);
        assert!(f.dlna.calls().contains(&"stop".to_string()));
        assert!(!f.airplay.calls().contains(&"stop".to_string()));
    }

    #[tokio::test]
    async fn vendor_session_overrides_and_swallows_commands() {
        let f = fixture();
        f.orchestrator.start();
        f.orchestrator
            .manager(CastProtocol::Dlna)
            .unwrap()
            .connect_to_device(dlna_device("Den", "192.168.1.20", 8080));

        f.sdk.set_session(Some("Chromecast"));
        f.sdk.fire(|l| l.on_session_started("s1"));
        let state = wait_for_state(&f.orchestrator, |s| s.protocol() == CastingType::Cast).await;
        assert_eq!(state.device_name(), Some("Chromecast"));

        assert!(!f.orchestrator.resume_media().wait().await);
        assert!(!f.dlna.calls().contains(&"resume".to_string()));

        f.sdk.set_session(None);
        f.sdk.fire(|l| l.on_session_ended(0));
        wait_for_state(&f.orchestrator, |s| s.protocol() == CastingType::Dlna).await;
    }

    #[tokio::test]
    async fn nothing_casting_rejects_commands() {
        let f = fixture();
        f.orchestrator.start();

        let request = MediaRequest::new("http://x/a.mp3", "Song", "Band");
        assert!(!f.orchestrator.play_media(request).wait().await);
        assert!(f.dlna.calls().is_empty());
        assert!(f.airplay.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_publishes_none_and_releases_vendor() {
        let f = fixture();
        f.orchestrator.start();
        assert_eq!(f.sdk.listener_count(), 1);

        f.orchestrator
            .manager(CastProtocol::AirPlay)
            .unwrap()
            .connect_to_device(airplay_device("Kitchen", "192.168.1.60", 7000));
        f.orchestrator.stop();
        f.orchestrator.stop();

        assert_eq!(f.orchestrator.casting_state(), CastingState::none());
        assert_eq!(f.sdk.listener_count(), 0);

        let changes = f.emitter.casting.lock().len();
        assert_eq!(changes, 2);
    }
}
