//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the receivers we talk to (UPnP AVTransport,
//! AirPlay-style HTTP control) and changing them would break interop.

// ─────────────────────────────────────────────────────────────────────────────
// Application
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in client identity headers and logs.
pub const APP_NAME: &str = "Omnicast";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Transport
// ─────────────────────────────────────────────────────────────────────────────

/// TCP connect timeout for media-control requests (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Read timeout for media-control responses (seconds).
pub const READ_TIMEOUT_SECS: u64 = 10;

/// Default MIME type for media URLs when the caller does not supply one.
pub const DEFAULT_MIME_TYPE: &str = "audio/mpeg";

// ─────────────────────────────────────────────────────────────────────────────
// AirPlay-style HTTP Control
// ─────────────────────────────────────────────────────────────────────────────

pub const AIRPLAY_USER_AGENT: &str = "AirPlay/1.0";
pub const AIRPLAY_PROTOCOL_VERSION: &str = "1.0";

/// Content type of `/play` bodies (newline-separated `Key: value` lines).
pub const AIRPLAY_PARAMETERS_CONTENT_TYPE: &str = "text/parameters";

pub const AIRPLAY_PLAY_PATH: &str = "play";
pub const AIRPLAY_PAUSE_PATH: &str = "rate?value=0.0";
pub const AIRPLAY_RESUME_PATH: &str = "rate?value=1.0";
pub const AIRPLAY_STOP_PATH: &str = "stop";
pub const AIRPLAY_SERVER_INFO_PATH: &str = "server-info";

/// Username sent with a PIN or password when the caller supplies none.
pub const AIRPLAY_DEFAULT_AUTH_USER: &str = "AirPlay";

/// Audio-only RAOP service type. Receivers found only under this type do not
/// accept HTTP `/play`.
pub const RAOP_SERVICE_TYPE: &str = "_raop._tcp";

// ─────────────────────────────────────────────────────────────────────────────
// UPnP AVTransport (SOAP)
// ─────────────────────────────────────────────────────────────────────────────

/// AVTransport service URN used in `SOAPAction` and the action element.
pub const AV_TRANSPORT_URN: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// Control URL path for AVTransport actions.
pub const AV_TRANSPORT_CONTROL_PATH: &str = "/AVTransport/control";

/// UPnP class for music items in DIDL-Lite.
pub const DIDL_MUSIC_TRACK_CLASS: &str = "object.item.audioItem.musicTrack";

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Default capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
