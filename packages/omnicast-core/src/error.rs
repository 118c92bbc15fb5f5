//! Centralized error types for the Omnicast core library.
//!
//! Component errors stay local and are logged where they happen; only the
//! composition root and the HTTP API convert them into [`CastError`], which
//! maps onto status codes and a JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::device::UnknownProtocol;
use crate::discovery::{PlatformError, ResolveFailure};
use crate::protocols::airplay::AirPlayError;
use crate::protocols::dlna::SoapError;
use crate::vendor::VendorError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for PlatformError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotRegistered => "listener_not_registered",
            Self::Rejected { .. } => "discovery_rejected",
            Self::Daemon(_) => "mdns_daemon_failed",
        }
    }
}

impl ErrorCode for ResolveFailure {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyActive => "resolve_already_active",
            Self::Timeout => "resolve_timeout",
            Self::NoAddress => "resolve_no_address",
            Self::Platform { .. } => "resolve_failed",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
            Self::Invalid(_) => "soap_invalid_request",
        }
    }
}

impl ErrorCode for AirPlayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::AuthRequired(_) => "auth_required",
            Self::HttpStatus(_) => "http_error_status",
            Self::NoChallenge => "no_auth_challenge",
        }
    }
}

impl ErrorCode for VendorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "vendor_unavailable",
            Self::Query(_) => "vendor_query_failed",
        }
    }
}

/// Application-wide error type for the API layer and composition root.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum CastError {
    /// mDNS discovery could not be set up. `code` comes from the
    /// underlying [`PlatformError`].
    #[error("Discovery failed: {message}")]
    Discovery { code: &'static str, message: String },

    /// A receiver rejected or failed a request. `code` comes from the
    /// underlying protocol error.
    #[error("Receiver error: {message}")]
    Receiver { code: &'static str, message: String },

    /// Device id is not in the protocol's registry.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The protocol is disabled in configuration.
    #[error("Protocol disabled: {0}")]
    ProtocolDisabled(String),

    /// Network-related error (HTTP client construction, receiver I/O).
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery { code, .. } | Self::Receiver { code, .. } => *code,
            Self::DeviceNotFound(_) => "device_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ProtocolDisabled(_) => "protocol_disabled",
            Self::Network(_) => "network_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound(_) | Self::ProtocolDisabled(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Receiver { code, .. } => match *code {
                "auth_required" => StatusCode::UNAUTHORIZED,
                "no_auth_challenge" => StatusCode::CONFLICT,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type CastResult<T> = Result<T, CastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PlatformError> for CastError {
    fn from(err: PlatformError) -> Self {
        Self::Discovery {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<AirPlayError> for CastError {
    fn from(err: AirPlayError) -> Self {
        Self::Receiver {
            code: err.code(),
            message: err.to_string(),
        }
    }
}


impl From<reqwest::Error> for CastError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<UnknownProtocol> for CastError {
    fn from(err: UnknownProtocol) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}
