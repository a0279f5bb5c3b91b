use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use aishiz_abi::engine::InferenceEngine;

use super::SessionId;

/// The part of a session visible outside its worker: identity plus the
/// cancellation flag. Shared between the registry and the worker.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    /// The only field written from a thread other than the worker's.
    cancel_requested: AtomicBool,
    created_at: Instant,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId) -> Self {
        Self {
            id,
            cancel_requested: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Ask the worker to stop at its next poll point.
    #[inline]
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Engine resources for one session. Field order is drop order:
/// sampler, then context, then model (reverse of acquisition).
pub(crate) struct LoadedEngine<E: InferenceEngine> {
    pub(crate) sampler: E::Sampler,
    pub(crate) context: E::Context,
    pub(crate) model: E::Model,
}

/// Everything one session owns. Created by the controller, then moved into
/// its worker, which is the sole owner from that point on.
pub(crate) struct SessionRecord<E: InferenceEngine> {
    pub(crate) handle: Arc<SessionHandle>,
    pub(crate) engine: Option<LoadedEngine<E>>,
}

impl<E: InferenceEngine> SessionRecord<E> {
    pub(crate) fn new(handle: Arc<SessionHandle>) -> Self {
        Self {
            handle,
            engine: None,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Drop engine resources now. Returns true if anything was held.
    pub(crate) fn release_engine(&mut self) -> bool {
        self.engine.take().is_some()
    }
}
