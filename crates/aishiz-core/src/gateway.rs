//! Worker-side wrapper around the caller's callback.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::callback::TokenCallback;
use crate::session::SessionId;

/// Delivered if a gateway is dropped before its terminal call.
pub(crate) const UNEXPECTED_TERMINATION: &str = "Generation worker terminated unexpectedly.";

/// Holds the durable callback reference for one session.
///
/// `emit_complete` / `emit_error` consume the gateway, so nothing can be
/// emitted after the terminal call and the reference is released exactly
/// once. A panic raised by the callback is caught and logged, never
/// propagated into the worker.
pub(crate) struct CallbackGateway {
    session: SessionId,
    callback: Option<Arc<dyn TokenCallback>>,
}

impl CallbackGateway {
    pub(crate) fn new(session: SessionId, callback: Arc<dyn TokenCallback>) -> Self {
        Self {
            session,
            callback: Some(callback),
        }
    }

    pub(crate) fn emit_token(&self, text: &str) {
        if let Some(cb) = &self.callback {
            guarded(self.session, "on_token", || cb.on_token(text));
        }
    }

    pub(crate) fn emit_complete(mut self) {
        if let Some(cb) = self.callback.take() {
            guarded(self.session, "on_complete", || cb.on_complete());
        }
    }

    pub(crate) fn emit_error(mut self, message: &str) {
        if let Some(cb) = self.callback.take() {
            guarded(self.session, "on_error", || cb.on_error(message));
        }
    }
}

impl Drop for CallbackGateway {
    fn drop(&mut self) {
        if let Some(cb) = self.callback.take() {
            warn!(session = %self.session, "gateway dropped without a terminal event");
            guarded(self.session, "on_error", || cb.on_error(UNEXPECTED_TERMINATION));
        }
    }
}

fn guarded(session: SessionId, op: &'static str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(session = %session, op, "callback panicked; ignoring");
    } else {
        debug!(session = %session, op, "callback delivered");
    }
}
