//! Shared test doubles: a scripted discovery platform, a recording HTTP
//! receiver, and fakes for the media client and the vendor session SDK.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::device::{CastProtocol, DeviceDescriptor};
use crate::discovery::{
    DiscoveryListener, DiscoveryPlatform, FoundService, ListenerId, LostService, PlatformError,
    ResolveFailure, ResolvedService,
};
use crate::manager::ProtocolSelection;
use crate::protocols::{MediaClient, MediaRequest, PlayOutcome};
use crate::registry::Snapshot;
use crate::vendor::{CastSessionInfo, CastSessionManager, SessionListener, VendorError};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn found(name: &str, service_type: &str, port: Option<u16>) -> FoundService {
    FoundService {
        name: name.to_string(),
        service_type: service_type.to_string(),
        port,
    }
}

pub(crate) fn resolved(name: &str, service_type: &str, ip: &str, port: u16) -> ResolvedService {
    ResolvedService {
        name: name.to_string(),
        service_type: service_type.to_string(),
        addresses: vec![ip.parse().unwrap()],
        port,
    }
}

pub(crate) fn airplay_device(name: &str, ip: &str, port: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        id: format!("airplay:{name}"),
        name: name.to_string(),
        service_name: name.to_string(),
        host: ip.parse::<IpAddr>().unwrap(),
        port,
        service_type: "_airplay._tcp".to_string(),
        protocol: CastProtocol::AirPlay,
    }
}

pub(crate) fn dlna_device(name: &str, ip: &str, port: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        id: format!("dlna:{name}@{ip}:{port}"),
        name: name.to_string(),
        service_name: name.to_string(),
        host: ip.parse::<IpAddr>().unwrap(),
        port,
        service_type: "_dlna._tcp".to_string(),
        protocol: CastProtocol::Dlna,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Waiting
// ─────────────────────────────────────────────────────────────────────────────

/// Lets spawned tasks run to quiescence.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Waits until the published snapshot satisfies `pred`.
pub(crate) async fn wait_for_snapshot<T: Clone>(
    rx: &mut watch::Receiver<Snapshot<T>>,
    pred: impl FnMut(&Snapshot<T>) -> bool,
) -> Snapshot<T> {
    tokio::time::timeout(WAIT_LIMIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("registry dropped")
        .clone()
}

/// Waits until the published selection satisfies `pred`.
pub(crate) async fn wait_for_selection(
    rx: &mut watch::Receiver<ProtocolSelection>,
    pred: impl FnMut(&ProtocolSelection) -> bool,
) -> ProtocolSelection {
    tokio::time::timeout(WAIT_LIMIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for selection")
        .expect("manager dropped")
        .clone()
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery Platform
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted platform: tests announce and lose services by hand and decide
/// what each resolve returns.
#[derive(Default)]
pub(crate) struct FakePlatform {
    listeners: Mutex<HashMap<u64, (String, Arc<dyn DiscoveryListener>)>>,
    next_id: AtomicU64,
    failing_types: Mutex<HashSet<String>>,
    resolutions: Mutex<HashMap<String, Result<ResolvedService, ResolveFailure>>>,
    resolve_calls: AtomicUsize,
    resolve_delay: Mutex<Duration>,
}

impl FakePlatform {
    pub(crate) fn set_resolution(
        &self,
        name: &str,
        result: Result<ResolvedService, ResolveFailure>,
    ) {
        self.resolutions.lock().insert(name.to_string(), result);
    }

    pub(crate) fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock() = delay;
    }

    pub(crate) fn fail_browse(&self, service_type: &str) {
        self.failing_types.lock().insert(service_type.to_string());
    }

    fn listeners_for(&self, service_type: &str) -> Vec<Arc<dyn DiscoveryListener>> {
        self.listeners
            .lock()
            .values()
            .filter(|(ty, _)| ty == service_type)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Delivers `service` to listeners browsing its own service type.
    pub(crate) fn announce(&self, service: FoundService) {
        let service_type = service.service_type.clone();
        self.announce_on(&service_type, service);
    }

    /// Delivers `service` to listeners browsing `browse_type`.
    pub(crate) fn announce_on(&self, browse_type: &str, service: FoundService) {
        for listener in self.listeners_for(browse_type) {
            listener.on_service_found(service.clone());
        }
    }

    pub(crate) fn lose(&self, name: &str, service_type: &str) {
        for listener in self.listeners_for(service_type) {
            listener.on_service_lost(LostService {
                name: name.to_string(),
                service_type: service_type.to_string(),
            });
        }
    }

    pub(crate) fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn active_listeners(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Forgets every listener, as if the platform dropped them on its own.
    pub(crate) fn drop_all_listeners(&self) {
        self.listeners.lock().clear();
    }
}

#[async_trait]
impl DiscoveryPlatform for FakePlatform {
    fn discover_services(
        &self,
        service_type: &str,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<ListenerId, PlatformError> {
        if self.failing_types.lock().contains(service_type) {
            listener.on_start_discovery_failed(service_type, -1);
            return Err(PlatformError::Rejected {
                service_type: service_type.to_string(),
                code: -1,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .insert(id, (service_type.to_string(), Arc::clone(&listener)));
        listener.on_discovery_started(service_type);
        Ok(ListenerId(id))
    }

    fn stop_service_discovery(&self, id: ListenerId) -> Result<(), PlatformError> {
        let removed = self.listeners.lock().remove(&id.0);
        match removed {
            Some((service_type, listener)) => {
                listener.on_discovery_stopped(&service_type);
                Ok(())
            }
            None => Err(PlatformError::NotRegistered),
        }
    }

    async fn resolve_service(
        &self,
        service: &FoundService,
    ) -> Result<ResolvedService, ResolveFailure> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.resolve_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.resolutions
            .lock()
            .get(&service.name)
            .cloned()
            .unwrap_or(Err(ResolveFailure::Timeout))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Receiver
// ─────────────────────────────────────────────────────────────────────────────

/// One request captured by [`TestReceiver`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub uri: String,
    /// Lower-cased header names.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub(crate) fn path_and_query(&self) -> &str {
        &self.uri
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted answer to one request.
pub(crate) struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Reply {
    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub(crate) fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

type Responder = Arc<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>;

/// Local HTTP server that records every request and answers from a script.
pub(crate) struct TestReceiver {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    cancel: CancellationToken,
}

impl TestReceiver {
    /// Answers every request with `status` and an empty body.
    pub(crate) async fn start(status: u16) -> Self {
        Self::start_with(move |_| (status, String::new())).await
    }

    pub(crate) async fn start_with<F>(respond: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
    {
        Self::start_replying(move |request| {
            let (status, body) = respond(request);
            Reply {
                status,
                headers: Vec::new(),
                body,
            }
        })
        .await
    }

    pub(crate) async fn start_replying<F>(respond: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Responder = Arc::new(respond);

        let recorded = Arc::clone(&requests);
        let app = Router::new().fallback(move |request: Request| {
            let recorded = Arc::clone(&recorded);
            let respond = Arc::clone(&respond);
            async move { record(request, recorded, respond).await }
        });

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
        });

        Self {
            port,
            requests,
            cancel,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for TestReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn record(
    request: Request,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    respond: Responder,
) -> (StatusCode, HeaderMap, String) {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();

    let request = RecordedRequest {
        method: parts.method.to_string(),
        uri: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default(),
        headers: parts
            .headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let reply = respond(&request);
    recorded.lock().push(request);

    let mut headers = HeaderMap::new();
    for (name, value) in reply.headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    (
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        headers,
        reply.body,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Media Client
// ─────────────────────────────────────────────────────────────────────────────

/// Records calls by name and answers with a configurable result.
pub(crate) struct FakeMediaClient {
    protocol: CastProtocol,
    calls: Mutex<Vec<String>>,
    result: AtomicBool,
    supported: AtomicBool,
    failed_play: Mutex<PlayOutcome>,
}

impl FakeMediaClient {
    pub(crate) fn new(protocol: CastProtocol) -> Self {
        Self {
            protocol,
            calls: Mutex::new(Vec::new()),
            result: AtomicBool::new(true),
            supported: AtomicBool::new(true),
            failed_play: Mutex::new(PlayOutcome::Failed),
        }
    }

    /// Outcome reported by `play_media` while the result is `false`.
    pub(crate) fn set_failed_play(&self, outcome: PlayOutcome) {
        *self.failed_play.lock() = outcome;
    }

    pub(crate) fn set_result(&self, result: bool) {
        self.result.store(result, Ordering::SeqCst);
    }

    pub(crate) fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn call(&self, name: &str) -> bool {
        self.calls.lock().push(name.to_string());
        self.result.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaClient for FakeMediaClient {
    fn protocol(&self) -> CastProtocol {
        self.protocol
    }

    fn supports(&self, device: &DeviceDescriptor) -> bool {
        device.protocol == self.protocol && self.supported.load(Ordering::SeqCst)
    }

    async fn play_media(&self, _device: &DeviceDescriptor, _request: &MediaRequest) -> PlayOutcome {
        if self.call("play") {
            PlayOutcome::Started
        } else {
            *self.failed_play.lock()
        }
    }

    async fn pause(&self, _device: &DeviceDescriptor) -> bool {
        self.call("pause")
    }

    async fn resume(&self, _device: &DeviceDescriptor) -> bool {
        self.call("resume")
    }

    async fn stop(&self, _device: &DeviceDescriptor) -> bool {
        self.call("stop")
    }

    async fn probe(&self, _device: &DeviceDescriptor) {
        self.call("probe");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vendor SDK
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory session manager; tests fire callbacks by hand.
#[derive(Default)]
pub(crate) struct FakeSessionManager {
    listeners: Mutex<Vec<Arc<dyn SessionListener>>>,
    session: Mutex<Option<String>>,
    fail: AtomicBool,
}

impl FakeSessionManager {
    pub(crate) fn set_session(&self, friendly_name: Option<&str>) {
        *self.session.lock() = friendly_name.map(str::to_string);
    }

    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn fire(&self, callback: impl Fn(&dyn SessionListener)) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            callback(listener.as_ref());
        }
    }
}

impl CastSessionManager for FakeSessionManager {
    fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.lock().push(listener);
    }

    fn remove_session_listener(&self, listener: &Arc<dyn SessionListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn current_session(&self) -> Result<Option<CastSessionInfo>, VendorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VendorError::Query("session lookup failed".into()));
        }
        Ok(self.session.lock().clone().map(|friendly_name| CastSessionInfo { friendly_name }))
    }
}
