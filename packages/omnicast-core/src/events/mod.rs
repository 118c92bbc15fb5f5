//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for core components to emit events
//! - [`BroadcastEventBridge`] for WebSocket transport
//! - Event types for discovery, protocol sessions and the aggregate casting state

mod bridge;
pub(crate) mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::device::{CastProtocol, DeviceDescriptor};
use crate::orchestrator::CastingState;
use crate::protocols::MediaCommand;

/// Events broadcast to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Registry changes from a discovery engine.
    Device(DeviceEvent),

    /// Selection and command results from a protocol manager.
    Session(SessionEvent),

    /// Aggregate casting state changes.
    Casting(CastingEvent),
}

/// Registry changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A device id appeared in a registry.
    Discovered {
        device: DeviceDescriptor,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An existing device id was re-resolved with different data.
    Updated {
        device: DeviceDescriptor,
        timestamp: u64,
    },
    /// A device id was removed after its service was lost.
    Lost {
        protocol: CastProtocol,
        id: String,
        timestamp: u64,
    },
}

/// Why a protocol manager dropped its selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    /// Caller asked for it.
    Requested,
    /// The selected device disappeared from discovery.
    DeviceLost,
    /// The manager was stopped.
    Stopped,
    /// Playback failed in a way that left the device unusable.
    PlaybackFailed,
}

/// Protocol manager session changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Connected {
        protocol: CastProtocol,
        device: DeviceDescriptor,
        timestamp: u64,
    },
    Disconnected {
        protocol: CastProtocol,
        #[serde(rename = "deviceId")]
        device_id: String,
        reason: DisconnectReason,
        timestamp: u64,
    },
    /// The receiver asked for credentials before it would play.
    AuthRequired {
        protocol: CastProtocol,
        #[serde(rename = "deviceId")]
        device_id: String,
        timestamp: u64,
    },
    /// A media-control command finished (successfully or not).
    CommandCompleted {
        protocol: CastProtocol,
        command: MediaCommand,
        success: bool,
        timestamp: u64,
    },
}

/// Aggregate casting state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CastingEvent {
    StateChanged {
        state: CastingState,
        timestamp: u64,
    },
}
