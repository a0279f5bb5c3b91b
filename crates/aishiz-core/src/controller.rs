//! Caller-facing entry points: start a session, stop it, and (optionally)
//! wait for workers to finish.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use aishiz_abi::engine::InferenceEngine;
use tracing::{error, info, warn};

use crate::callback::TokenCallback;
use crate::gateway::CallbackGateway;
use crate::request::GenerationRequest;
use crate::session::{SessionId, SessionRegistry};
use crate::worker::{GenerationWorker, SessionSummary};

/// Summaries of auto-reaped workers kept for a later `join`/`reap_finished`.
pub const RECENT_SUMMARIES: usize = 64;

#[derive(Default)]
struct Workers {
    live: HashMap<SessionId, JoinHandle<SessionSummary>>,
    /// Oldest first; capped at `RECENT_SUMMARIES`.
    recent: VecDeque<SessionSummary>,
}

impl Workers {
    fn take_finished(&mut self) -> Vec<(SessionId, JoinHandle<SessionSummary>)> {
        let ids: Vec<SessionId> = self
            .live
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.live.remove(&id).map(|h| (id, h)))
            .collect()
    }

    fn remember(&mut self, summaries: impl IntoIterator<Item = SessionSummary>) {
        self.recent.extend(summaries);
        while self.recent.len() > RECENT_SUMMARIES {
            self.recent.pop_front();
        }
    }
}

/// Starts one background worker thread per session and tracks it so the
/// host can join or shut down cleanly. Sessions run independently: there is
/// no scheduling, quota or ordering between them.
///
/// Exited workers are joined on every `start_generation`, so a host that
/// never joins still holds at most the handles of sessions that were running
/// at its last start.
pub struct SessionController<E: InferenceEngine> {
    engine: Arc<E>,
    registry: Arc<SessionRegistry>,
    workers: Mutex<Workers>,
}

impl<E: InferenceEngine> SessionController<E> {
    /// Controller backed by the process-wide registry.
    pub fn new(engine: E) -> Self {
        Self::with_registry(engine, SessionRegistry::global())
    }

    pub fn with_registry(engine: E, registry: Arc<SessionRegistry>) -> Self {
        Self {
            engine: Arc::new(engine),
            registry,
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a session and launch its worker. Returns as soon as the
    /// worker is scheduled; never waits on generation.
    ///
    /// Returns [`SessionId::INVALID`] without creating anything when the
    /// callback is missing or does not provide all three operations, or
    /// when the worker thread cannot be spawned.
    pub fn start_generation(
        &self,
        request: GenerationRequest,
        callback: Option<Arc<dyn TokenCallback>>,
    ) -> SessionId {
        let Some(callback) = callback else {
            warn!("start_generation rejected: no callback");
            return SessionId::INVALID;
        };
        if !callback.is_complete() {
            warn!("start_generation rejected: callback lacks on_token/on_complete/on_error");
            return SessionId::INVALID;
        }

        self.reap_into_recent();

        let handle = self.registry.create();
        let id = handle.id();
        let worker = GenerationWorker::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
            handle,
            request,
            CallbackGateway::new(id, callback),
        );

        let spawned = thread::Builder::new()
            .name(format!("aishiz-session-{id}"))
            .spawn(move || worker.run());

        match spawned {
            Ok(join) => {
                self.workers.lock().live.insert(id, join);
                info!(session = %id, "generation started");
                id
            }
            Err(e) => {
                // The closure (and its gateway) was dropped inside `spawn`,
                // which already delivered `on_error` to the caller.
                error!(session = %id, error = %e, "failed to spawn generation worker");
                self.registry.remove(id);
                SessionId::INVALID
            }
        }
    }

    /// Request cooperative cancellation. Unknown, invalid or finished ids are
    /// ignored. Never blocks on the worker.
    pub fn stop_generation(&self, id: SessionId) {
        if self.registry.request_cancel(id) {
            info!(session = %id, "stop requested");
        }
    }

    pub fn is_active(&self, id: SessionId) -> bool {
        self.registry.contains(id)
    }

    /// Live sessions started by this controller, ascending.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        let workers = self.workers.lock();
        self.registry
            .ids()
            .into_iter()
            .filter(|id| workers.live.contains_key(id))
            .collect()
    }

    /// Worker handles not yet joined.
    pub fn tracked_workers(&self) -> usize {
        self.workers.lock().live.len()
    }

    /// Wait for one session's worker. `None` if the id is unknown here
    /// (never started, already joined, or aged out of the recent summaries)
    /// or the worker thread panicked.
    pub fn join(&self, id: SessionId) -> Option<SessionSummary> {
        let handle = {
            let mut workers = self.workers.lock();
            if let Some(pos) = workers.recent.iter().position(|s| s.id == id) {
                return workers.recent.remove(pos);
            }
            workers.live.remove(&id)?
        };
        join_worker(id, handle)
    }

    /// Cancel every session this controller started and join all workers.
    pub fn shutdown(&self) -> Vec<SessionSummary> {
        let (handles, recent) = {
            let mut workers = self.workers.lock();
            let handles: Vec<(SessionId, JoinHandle<SessionSummary>)> =
                workers.live.drain().collect();
            (handles, std::mem::take(&mut workers.recent))
        };
        info!(sessions = handles.len(), "shutting down session controller");

        for (id, _) in &handles {
            self.registry.request_cancel(*id);
        }

        let mut summaries: Vec<SessionSummary> = recent.into_iter().collect();
        summaries.extend(handles.into_iter().filter_map(|(id, h)| join_worker(id, h)));
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// Join workers that have already exited, without blocking on live ones,
    /// and hand back every summary not yet collected.
    pub fn reap_finished(&self) -> Vec<SessionSummary> {
        let (done, recent) = {
            let mut workers = self.workers.lock();
            (workers.take_finished(), std::mem::take(&mut workers.recent))
        };

        let mut summaries: Vec<SessionSummary> = recent.into_iter().collect();
        summaries.extend(done.into_iter().filter_map(|(id, h)| join_worker(id, h)));
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    fn reap_into_recent(&self) {
        let done = self.workers.lock().take_finished();
        if done.is_empty() {
            return;
        }
        let summaries: Vec<SessionSummary> = done
            .into_iter()
            .filter_map(|(id, handle)| join_worker(id, handle))
            .collect();
        self.workers.lock().remember(summaries);
    }
}

fn join_worker(id: SessionId, handle: JoinHandle<SessionSummary>) -> Option<SessionSummary> {
    match handle.join() {
        Ok(summary) => Some(summary),
        Err(_) => {
            error!(session = %id, "worker thread panicked");
            None
        }
    }
}
