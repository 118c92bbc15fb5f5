//! Adapter over an external Cast session SDK.
//!
//! The SDK owns session negotiation, retries and reconnects. This module only
//! observes it: lifecycle callbacks are folded into one "casting active" flag,
//! and the current session's friendly name is looked up on demand.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::ErrorCode;

/// Errors surfaced by the vendor session SDK.
#[derive(Debug, Clone, Error)]
pub enum VendorError {
    /// The SDK is not initialised or its context is gone.
    #[error("cast session manager unavailable: {0}")]
    Unavailable(String),

    /// The SDK failed while answering a query.
    #[error("cast session query failed: {0}")]
    Query(String),
}

/// Snapshot of the SDK's current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastSessionInfo {
    pub friendly_name: String,
}

/// Lifecycle callbacks delivered by the SDK.
///
/// Only `started`, `resumed`, `ended` and `suspended` change state; the rest
/// default to no-ops.
pub trait SessionListener: Send + Sync {
    fn on_session_starting(&self) {}

    fn on_session_started(&self, session_id: &str);

    fn on_session_start_failed(&self, _error: i32) {}

    fn on_session_ending(&self) {}

    fn on_session_ended(&self, error: i32);

    fn on_session_resuming(&self, _session_id: &str) {}

    fn on_session_resumed(&self, was_suspended: bool);

    fn on_session_resume_failed(&self, _error: i32) {}

    fn on_session_suspended(&self, reason: i32);
}

/// Command surface of the SDK's session manager.
pub trait CastSessionManager: Send + Sync {
    fn add_session_listener(&self, listener: Arc<dyn SessionListener>);

    fn remove_session_listener(&self, listener: &Arc<dyn SessionListener>);

    /// Returns the active session, if any.
    ///
    /// # Errors
    /// Returns `VendorError` if the SDK cannot be queried.
    fn current_session(&self) -> Result<Option<CastSessionInfo>, VendorError>;
}

/// Watch channels shared between the adapter and its registered listener.
struct SessionSignals {
    active: watch::Sender<bool>,
    ticks: watch::Sender<u64>,
}

impl SessionSignals {
    fn set_active(&self, active: bool) {
        self.active.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
        self.ticks.send_modify(|t| *t = t.wrapping_add(1));
    }
}

struct AdapterListener {
    signals: Arc<SessionSignals>,
}

impl SessionListener for AdapterListener {
    fn on_session_started(&self, session_id: &str) {
        log::info!("[Vendor] Session started: {}", session_id);
        self.signals.set_active(true);
    }

    fn on_session_ended(&self, error: i32) {
        log::info!("[Vendor] Session ended (code {})", error);
        self.signals.set_active(false);
    }

    fn on_session_resumed(&self, was_suspended: bool) {
        log::info!("[Vendor] Session resumed (was_suspended={})", was_suspended);
        self.signals.set_active(true);
    }

    fn on_session_suspended(&self, reason: i32) {
        log::info!("[Vendor] Session suspended (reason {})", reason);
        self.signals.set_active(false);
    }
}

/// Exposes the SDK's session lifecycle as a boolean watch.
pub struct VendorCastAdapter {
    manager: Arc<dyn CastSessionManager>,
    listener: Arc<dyn SessionListener>,
    signals: Arc<SessionSignals>,
    registered: Mutex<bool>,
}

impl VendorCastAdapter {
    pub fn new(manager: Arc<dyn CastSessionManager>) -> Self {
        let signals = Arc::new(SessionSignals {
            active: watch::channel(false).0,
            ticks: watch::channel(0).0,
        });
        let listener: Arc<dyn SessionListener> = Arc::new(AdapterListener {
            signals: Arc::clone(&signals),
        });
        Self {
            manager,
            listener,
            signals,
            registered: Mutex::new(false),
        }
    }

    /// Registers the listener and seeds the flag from the current session.
    pub fn start(&self) {
        {
            let mut registered = self.registered.lock();
            if !*registered {
                self.manager.add_session_listener(Arc::clone(&self.listener));
                *registered = true;
            }
        }

        let active = match self.manager.current_session() {
            Ok(session) => session.is_some(),
            Err(e) => {
                log::warn!("[Vendor] Could not read current session: {} [{}]", e, e.code());
                false
            }
        };
        self.signals.set_active(active);
    }

    /// Unregisters the listener. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut registered = self.registered.lock();
        if *registered {
            self.manager.remove_session_listener(&self.listener);
            *registered = false;
            self.signals.set_active(false);
        }
    }

    pub fn is_active(&self) -> bool {
        *self.signals.active.borrow()
    }

    /// Friendly name of the SDK's current session, looked up on demand.
    ///
    /// # Errors
    /// Returns `VendorError` if the SDK cannot be queried.
    pub fn device_name(&self) -> Result<Option<String>, VendorError> {
        Ok(self
            .manager
            .current_session()?
            .map(|session| session.friendly_name))
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signals.active.subscribe()
    }

    /// Bumped on every state-changing callback, even when the flag is
    /// unchanged (e.g. a resume onto a different device).
    pub fn session_ticks(&self) -> watch::Receiver<u64> {
        self.signals.ticks.subscribe()
    }
}

impl Drop for VendorCastAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}
