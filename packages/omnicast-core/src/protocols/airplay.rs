//! AirPlay-style HTTP media control.
//!
//! Each operation is a single `POST http://{host}:{port}/{endpoint}`:
//!
//! | Operation | Endpoint          | Body                           |
//! |-----------|-------------------|--------------------------------|
//! | play      | `/play`           | `text/parameters` key/value lines |
//! | pause     | `/rate?value=0.0` | empty                          |
//! | resume    | `/rate?value=1.0` | empty                          |
//! | stop      | `/stop`           | empty                          |
//!
//! Receivers that want a PIN or password answer 401/403 with a
//! `WWW-Authenticate` challenge. The challenge is published on
//! [`AirPlayClient::subscribe_auth_challenge`] and the rejected request is
//! held; [`AirPlayClient::provide_credentials`] stores Basic or Digest
//! credentials for the device and sends the held request once more.

use std::collections::HashMap;

use async_trait::async_trait;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_TYPE, USER_AGENT, WWW_AUTHENTICATE,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use super::{MediaClient, MediaCommand, MediaRequest, PlayOutcome};
use crate::device::{CastProtocol, DeviceDescriptor};
use crate::error::ErrorCode;
use crate::protocol_constants::{
    AIRPLAY_DEFAULT_AUTH_USER, AIRPLAY_PARAMETERS_CONTENT_TYPE, AIRPLAY_PAUSE_PATH,
    AIRPLAY_PLAY_PATH, AIRPLAY_PROTOCOL_VERSION, AIRPLAY_RESUME_PATH, AIRPLAY_SERVER_INFO_PATH,
    AIRPLAY_STOP_PATH, AIRPLAY_USER_AGENT, APP_NAME, RAOP_SERVICE_TYPE,
};
use crate::utils::local_client_name;

/// Errors from a single AirPlay-style request.
#[derive(Debug, Error)]
pub enum AirPlayError {
    /// HTTP request failed (connect, timeout, I/O).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Receiver answered 401/403. Carries the raw `WWW-Authenticate` value.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Receiver returned a non-success status.
    #[error("HTTP error {0}")]
    HttpStatus(u16),

    /// Credentials were supplied while no receiver was asking for them.
    #[error("no authentication challenge is pending")]
    NoChallenge,
}

/// Convenient Result alias for AirPlay requests.
pub type AirPlayResult<T> = Result<T, AirPlayError>;

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthScheme {
    Basic,
    Digest,
}

/// A receiver's request for credentials, parsed from `WWW-Authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    pub device_id: String,
    pub device_name: String,
    pub scheme: AuthScheme,
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl AuthChallenge {
    /// Parses a `WWW-Authenticate` value. Returns `None` for an empty header
    /// or a scheme other than Basic and Digest.
    pub fn parse(device: &DeviceDescriptor, header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
        let scheme = if scheme.eq_ignore_ascii_case("basic") {
            AuthScheme::Basic
        } else if scheme.eq_ignore_ascii_case("digest") {
            AuthScheme::Digest
        } else {
            return None;
        };

        let params = auth_params(rest);
        let param = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        Some(Self {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            scheme,
            realm: param("realm"),
            nonce: param("nonce"),
            qop: param("qop"),
            opaque: param("opaque"),
            algorithm: param("algorithm"),
        })
    }
}

/// Splits `key=value, key="quoted, value"` pairs.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let after = after.trim_start();
        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(',') {
                Some(end) => (after[..end].trim_end(), &after[end..]),
                None => (after.trim_end(), ""),
            },
        };
        params.push((key.trim().to_string(), value.to_string()));
        rest = remaining;
    }
    params
}

/// Credentials supplied for one receiver.
#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// Last challenge and stored credentials for one receiver.
#[derive(Debug)]
struct DeviceAuth {
    challenge: AuthChallenge,
    credentials: Option<Credentials>,
    nonce_count: u32,
}

/// Inputs to one Digest `Authorization` header.
struct DigestInput<'a> {
    username: &'a str,
    password: &'a str,
    method: &'a str,
    uri: &'a str,
    nonce_count: u32,
    cnonce: &'a str,
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Builds a Digest `Authorization` value (RFC 2617, MD5). Returns `None`
/// when the challenge lacks a realm or nonce.
fn digest_authorization(challenge: &AuthChallenge, input: &DigestInput<'_>) -> Option<String> {
    let realm = challenge.realm.as_deref()?;
    let nonce = challenge.nonce.as_deref()?;
    let qop = challenge.qop.as_deref().and_then(|qop| {
        qop.split(',')
            .map(str::trim)
            .find(|q| q.eq_ignore_ascii_case("auth"))
    });
    // Only MD5 is implemented; other algorithms are answered with it too.
    let algorithm = challenge
        .algorithm
        .as_deref()
        .unwrap_or("MD5")
        .to_uppercase();

    let ha1 = md5_hex(&format!("{}:{}:{}", input.username, realm, input.password));
    let ha2 = md5_hex(&format!("{}:{}", input.method, input.uri));
    let nc = format!("{:08x}", input.nonce_count);

    let response = match qop {
        Some(qop) => md5_hex(&format!(
            "{ha1}:{nonce}:{nc}:{}:{qop}:{ha2}",
            input.cnonce
        )),
        None => md5_hex(&format!("{ha1}:{nonce}:{ha2}")),
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        input.username, realm, nonce, input.uri, response
    );
    if let Some(qop) = qop {
        header.push_str(&format!(", qop={qop}, nc={nc}, cnonce=\"{}\"", input.cnonce));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    header.push_str(&format!(", algorithm={algorithm}"));
    Some(header)
}

/// A request rejected for lack of credentials, kept for one retry.
#[derive(Debug, Clone)]
struct PendingCommand {
    device: DeviceDescriptor,
    command: MediaCommand,
    body: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Identity headers sent with every request.
#[derive(Debug, Clone)]
struct ClientIdentity {
    device_id: String,
    session_id: String,
    client_name: String,
}

impl ClientIdentity {
    fn generate() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
            session_id: uuid::Uuid::new_v4().to_string(),
            client_name: format!("{} on {}", APP_NAME, local_client_name()),
        }
    }
}

/// Builds the `/play` body: CRLF-separated `Key: value` lines with a
/// trailing CRLF.
pub fn build_play_body(request: &MediaRequest) -> String {
    let mut lines = vec![
        format!("Content-Location: {}", single_line(&request.url)),
        "Start-Position: 0.0".to_string(),
    ];
    if !request.title.is_empty() {
        lines.push(format!("Title: {}", single_line(&request.title)));
    }
    if !request.artist.is_empty() {
        lines.push(format!("Artist: {}", single_line(&request.artist)));
    }
    if let Some(art) = request.album_art.as_deref().filter(|a| !a.is_empty()) {
        lines.push(format!("Artwork-Location: {}", single_line(art)));
    }

    let mut body = lines.join("\r\n");
    body.push_str("\r\n");
    body
}

/// Parameter values cannot span lines.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Endpoint path for a media command.
fn command_path(command: MediaCommand) -> &'static str {
    match command {
        MediaCommand::Play => AIRPLAY_PLAY_PATH,
        MediaCommand::Pause => AIRPLAY_PAUSE_PATH,
        MediaCommand::Resume => AIRPLAY_RESUME_PATH,
        MediaCommand::Stop => AIRPLAY_STOP_PATH,
    }
}

/// AirPlay-style HTTP client.
pub struct AirPlayClient {
    http: Client,
    identity: ClientIdentity,
    challenge: watch::Sender<Option<AuthChallenge>>,
    auth: Mutex<HashMap<String, DeviceAuth>>,
    pending: Mutex<Option<PendingCommand>>,
}

impl AirPlayClient {
    /// Creates a client with a fresh device and session identity.
    pub fn new(http: Client) -> Self {
        Self {
            http,
            identity: ClientIdentity::generate(),
            challenge: watch::channel(None).0,
            auth: Mutex::new(HashMap::new()),
            pending: Mutex::new(None),
        }
    }

    /// The challenge currently waiting for credentials, if any.
    pub fn auth_challenge(&self) -> Option<AuthChallenge> {
        self.challenge.borrow().clone()
    }

    pub fn subscribe_auth_challenge(&self) -> watch::Receiver<Option<AuthChallenge>> {
        self.challenge.subscribe()
    }

    /// Stores credentials for the challenged receiver and sends the held
    /// request again with an `Authorization` header.
    ///
    /// # Errors
    /// `NoChallenge` when no receiver is asking for credentials; otherwise
    /// the outcome of the retried request.
    pub async fn provide_credentials(
        &self,
        password: &str,
        username: Option<&str>,
    ) -> AirPlayResult<()> {
        let Some(challenge) = self.auth_challenge() else {
            return Err(AirPlayError::NoChallenge);
        };

        let credentials = Credentials {
            username: username.unwrap_or(AIRPLAY_DEFAULT_AUTH_USER).to_string(),
            password: password.to_string(),
        };
        self.auth
            .lock()
            .entry(challenge.device_id.clone())
            .or_insert_with(|| DeviceAuth {
                challenge: challenge.clone(),
                credentials: None,
                nonce_count: 0,
            })
            .credentials = Some(credentials);
        log::info!(
            "[AirPlay] Credentials provided for {} (scheme={:?})",
            challenge.device_name,
            challenge.scheme
        );

        let pending = {
            let mut guard = self.pending.lock();
            match guard.as_ref() {
                Some(p) if p.device.id == challenge.device_id => guard.take(),
                _ => None,
            }
        };
        let Some(pending) = pending else {
            return Ok(());
        };

        let result = self
            .execute(&pending.device, pending.command, pending.body)
            .await;
        log::info!(
            "[AirPlay] Retry of {} after credentials: {}",
            pending.command.as_str(),
            if result.is_ok() { "succeeded" } else { "failed" }
        );
        result
    }

    /// Drops the pending challenge and the request held for it.
    pub fn cancel_authentication(&self) {
        *self.pending.lock() = None;
        if let Some(challenge) = self.challenge.send_replace(None) {
            log::warn!(
                "[AirPlay] Authentication cancelled for {}",
                challenge.device_name
            );
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(USER_AGENT, AIRPLAY_USER_AGENT)
            .header("X-Apple-ProtocolVersion", AIRPLAY_PROTOCOL_VERSION)
            .header("X-Apple-DeviceID", &self.identity.device_id)
            .header("X-Apple-Client-Name", &self.identity.client_name)
            .header("X-Apple-Session-ID", &self.identity.session_id)
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "keep-alive")
    }

    /// Adds `Authorization` when credentials are stored for `device`.
    fn authorize(
        &self,
        builder: RequestBuilder,
        device: &DeviceDescriptor,
        method: &str,
        uri: &str,
    ) -> RequestBuilder {
        let mut auth = self.auth.lock();
        let Some(entry) = auth.get_mut(&device.id) else {
            return builder;
        };
        let Some(credentials) = entry.credentials.clone() else {
            return builder;
        };

        match entry.challenge.scheme {
            AuthScheme::Basic => {
                builder.basic_auth(credentials.username, Some(credentials.password))
            }
            AuthScheme::Digest => {
                entry.nonce_count += 1;
                let cnonce = uuid::Uuid::new_v4().simple().to_string();
                let input = DigestInput {
                    username: &credentials.username,
                    password: &credentials.password,
                    method,
                    uri,
                    nonce_count: entry.nonce_count,
                    cnonce: &cnonce[..16],
                };
                match digest_authorization(&entry.challenge, &input) {
                    Some(header) => builder.header(AUTHORIZATION, header),
                    None => builder,
                }
            }
        }
    }

    /// Records a 401/403 challenge and holds the rejected request.
    fn on_auth_required(&self, device: &DeviceDescriptor, pending: PendingCommand, header: &str) {
        if let Some(challenge) = AuthChallenge::parse(device, header) {
            {
                let mut auth = self.auth.lock();
                match auth.get_mut(&device.id) {
                    Some(entry) => {
                        if entry.challenge.nonce != challenge.nonce {
                            entry.nonce_count = 0;
                        }
                        entry.challenge = challenge.clone();
                    }
                    None => {
                        auth.insert(
                            device.id.clone(),
                            DeviceAuth {
                                challenge: challenge.clone(),
                                credentials: None,
                                nonce_count: 0,
                            },
                        );
                    }
                }
            }
            self.challenge.send_replace(Some(challenge));
        }
        *self.pending.lock() = Some(pending);
    }

    /// Clears a prompt for `device` once one of its requests succeeds.
    fn on_success(&self, device: &DeviceDescriptor) {
        self.challenge.send_if_modified(|current| match current {
            Some(challenge) if challenge.device_id == device.id => {
                *current = None;
                true
            }
            _ => false,
        });
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|p| p.device.id == device.id) {
            *pending = None;
        }
    }

    /// Sends one command. Succeeds only on a 2xx response.
    async fn send(
        &self,
        device: &DeviceDescriptor,
        command: MediaCommand,
        body: Option<String>,
    ) -> AirPlayResult<()> {
        let path = command_path(command);
        let url = device.url(path);
        let mut builder = self.request(reqwest::Method::POST, url.clone());
        builder = match &body {
            Some(body) => builder
                .header(CONTENT_TYPE, AIRPLAY_PARAMETERS_CONTENT_TYPE)
                .body(body.clone()),
            None => builder.body(""),
        };
        builder = self.authorize(builder, device, "POST", &format!("/{path}"));

        log::debug!("[AirPlay] {} -> {}", command.as_str(), url);
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let header = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let pending = PendingCommand {
                device: device.clone(),
                command,
                body,
            };
            self.on_auth_required(device, pending, &header);
            return Err(AirPlayError::AuthRequired(header));
        }
        if !status.is_success() {
            return Err(AirPlayError::HttpStatus(status.as_u16()));
        }
        self.on_success(device);
        Ok(())
    }

    async fn execute(
        &self,
        device: &DeviceDescriptor,
        command: MediaCommand,
        body: Option<String>,
    ) -> AirPlayResult<()> {
        let result = self.send(device, command, body).await;
        match &result {
            Ok(()) => {
                log::info!("[AirPlay] {} succeeded on {}", command.as_str(), device.name);
            }
            Err(e) => {
                log::warn!(
                    "[AirPlay] {} failed on {} ({}:{}): {} [{}]",
                    command.as_str(),
                    device.name,
                    device.host,
                    device.port,
                    e,
                    e.code()
                );
            }
        }
        result
    }
}

#[async_trait]
impl MediaClient for AirPlayClient {
    fn protocol(&self) -> CastProtocol {
        CastProtocol::AirPlay
    }

    /// RAOP-only receivers speak RTSP and cannot take HTTP `/play`.
    fn supports(&self, device: &DeviceDescriptor) -> bool {
        device.protocol == CastProtocol::AirPlay
            && !device
                .service_type
                .to_lowercase()
                .contains(RAOP_SERVICE_TYPE)
    }

    /// A failed play leaves the receiver unusable unless it only wants
    /// credentials.
    async fn play_media(&self, device: &DeviceDescriptor, request: &MediaRequest) -> PlayOutcome {
        let body = build_play_body(request);
        match self.execute(device, MediaCommand::Play, Some(body)).await {
            Ok(()) => PlayOutcome::Started,
            Err(AirPlayError::AuthRequired(_)) => PlayOutcome::AuthRequired,
            Err(_) => PlayOutcome::Unusable,
        }
    }

    async fn pause(&self, device: &DeviceDescriptor) -> bool {
        self.execute(device, MediaCommand::Pause, None).await.is_ok()
    }

    async fn resume(&self, device: &DeviceDescriptor) -> bool {
        self.execute(device, MediaCommand::Resume, None).await.is_ok()
    }

    async fn stop(&self, device: &DeviceDescriptor) -> bool {
        self.execute(device, MediaCommand::Stop, None).await.is_ok()
    }

    async fn probe(&self, device: &DeviceDescriptor) {
        let url = device.url(AIRPLAY_SERVER_INFO_PATH);
        match self.request(reqwest::Method::GET, url).send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                log::debug!(
                    "[AirPlay] server-info from {}: status={} ({} bytes)",
                    device.name,
                    status,
                    body.len()
                );
            }
            Err(e) => {
                log::debug!("[AirPlay] server-info probe failed for {}: {}", device.name, e);
            }
        }
    }
}
