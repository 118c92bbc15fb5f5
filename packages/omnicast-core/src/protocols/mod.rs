//! Wire-level media-control clients.
//!
//! Each protocol family implements [`MediaClient`]: a stateless set of
//! request builders over a shared `reqwest` client with fixed timeouts.
//! Every operation issues its request(s) once. Transport commands report
//! plain success; `play_media` also says whether the selection survives the
//! failure. Transport errors are logged, never returned.

pub mod airplay;
pub mod dlna;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::device::{CastProtocol, DeviceDescriptor};
use crate::protocol_constants::DEFAULT_MIME_TYPE;
use crate::state::TransportConfig;

pub use airplay::{AirPlayClient, AuthChallenge, AuthScheme};
pub use dlna::DlnaClient;

/// A media item to hand to a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRequest {
    /// URL the receiver fetches the media from.
    pub url: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album_art: Option<String>,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_string()
}

impl MediaRequest {
    pub fn new(url: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            artist: artist.into(),
            album_art: None,
            mime_type: default_mime_type(),
        }
    }

    #[must_use]
    pub fn with_album_art(mut self, url: impl Into<String>) -> Self {
        self.album_art = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// Media-control primitives shared by every protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaCommand {
    Play,
    Pause,
    Resume,
    Stop,
}

impl MediaCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        }
    }
}

/// How a `play_media` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayOutcome {
    Started,
    /// Failed; the device stays selected.
    Failed,
    /// Failed in a way that leaves the device unusable; the manager drops
    /// the selection.
    Unusable,
    /// The receiver asked for credentials. The request is held until they
    /// are supplied or the challenge is cancelled.
    AuthRequired,
}

impl PlayOutcome {
    pub fn is_started(self) -> bool {
        self == Self::Started
    }
}

/// Protocol-specific media control against one device.
///
/// Implementations must not retry and must not block past the transport
/// timeouts they were built with.
#[async_trait]
pub trait MediaClient: Send + Sync {
    /// Protocol family this client speaks.
    fn protocol(&self) -> CastProtocol;

    /// Whether `device` can be controlled by this client.
    fn supports(&self, device: &DeviceDescriptor) -> bool {
        device.protocol == self.protocol()
    }

    /// Loads `request` on the device and starts playback.
    async fn play_media(&self, device: &DeviceDescriptor, request: &MediaRequest) -> PlayOutcome;

    async fn pause(&self, device: &DeviceDescriptor) -> bool;

    async fn resume(&self, device: &DeviceDescriptor) -> bool;

    async fn stop(&self, device: &DeviceDescriptor) -> bool;

    /// Best-effort diagnostic request issued after connecting. Never fails.
    async fn probe(&self, _device: &DeviceDescriptor) {}
}

/// Builds the shared HTTP client used by every [`MediaClient`].
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(config: &TransportConfig) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .pool_idle_timeout(Duration::from_secs(30));
    // Connect and read are bounded separately; a total cap is opt-in.
    if let Some(total) = config.request_timeout() {
        builder = builder.timeout(total);
    }
    builder.build()
}
