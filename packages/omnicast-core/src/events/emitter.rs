//! Event emitter abstraction for decoupling components from transport.
//!
//! Components depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transports.

use super::{CastingEvent, DeviceEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyEngine {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyEngine {
///     fn on_lost(&self, id: String) {
///         self.emitter.emit_device(DeviceEvent::Lost { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a registry change from a discovery engine.
    fn emit_device(&self, event: DeviceEvent);

    /// Emits a protocol manager session change.
    fn emit_session(&self, event: SessionEvent);

    /// Emits an aggregate casting state change.
    fn emit_casting(&self, event: CastingEvent);
}

/// No-op emitter for tests and embedders that only poll state.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_device(&self, _event: DeviceEvent) {}

    fn emit_session(&self, _event: SessionEvent) {}

    fn emit_casting(&self, _event: CastingEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_casting(&self, event: CastingEvent) {
        tracing::debug!(?event, "casting_event");
    }
}
