//! Generation worker: drives one session from prompt to terminal event.
//!
//! States: Validating → EngineLoading → PromptProcessing → Streaming →
//! Terminating. Every exit path, including a panic inside engine code, goes
//! through [`GenerationWorker::finish`], which releases engine resources,
//! fires exactly one terminal callback, drops the callback reference and
//! removes the session from the registry, in that order.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aishiz_abi::engine::InferenceEngine;
use aishiz_abi::error::EngineError;
use aishiz_abi::sampling::SamplingParams;
use tracing::{debug, error, info};

use crate::error::GenerationError;
use crate::gateway::CallbackGateway;
use crate::request::GenerationRequest;
use crate::session::{LoadedEngine, SessionHandle, SessionId, SessionRecord, SessionRegistry};

mod decode;
mod prefill;
mod utils;

use prefill::PromptOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Validating,
    EngineLoading,
    PromptProcessing,
    Streaming,
    Terminating,
}

/// Why a successful session stopped producing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxTokens,
    EndOfSequence,
    Cancelled,
    /// A decode after some output failed; output so far stands.
    DecodeFailed,
}

/// Terminal outcome of a session.
///
/// Callers see `Completed` (whatever the stop reason) as `on_complete` and
/// `Errored` as `on_error`. The distinction between a natural stop, a
/// cancellation and a truncated stream is kept here for logs and summaries.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed { generated: u32, stop: StopReason },
    Errored(GenerationError),
}

impl Outcome {
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Errored(_))
    }

    #[inline]
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Outcome::Completed { stop, .. } => Some(*stop),
            Outcome::Errored(_) => None,
        }
    }
}

/// What a finished worker reports back to whoever joins it.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub outcome: Outcome,
    /// From session creation (not worker start) to the terminal event.
    pub elapsed: Duration,
}

pub(crate) struct GenerationWorker<E: InferenceEngine> {
    engine: Arc<E>,
    registry: Arc<SessionRegistry>,
    record: SessionRecord<E>,
    request: GenerationRequest,
    gateway: CallbackGateway,
    state: WorkerState,
}

impl<E: InferenceEngine> GenerationWorker<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        registry: Arc<SessionRegistry>,
        handle: Arc<SessionHandle>,
        request: GenerationRequest,
        gateway: CallbackGateway,
    ) -> Self {
        Self {
            engine,
            registry,
            record: SessionRecord::new(handle),
            request,
            gateway,
            state: WorkerState::Validating,
        }
    }

    /// Run to completion on the current thread.
    pub(crate) fn run(mut self) -> SessionSummary {
        let id = self.record.id();

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.drive())) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(session = %id, state = ?self.state, "engine panicked during generation");
                Outcome::Errored(GenerationError::WorkerPanicked)
            }
        };

        self.finish(outcome)
    }

    fn enter(&mut self, next: WorkerState) {
        debug!(session = %self.record.id(), from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn drive(&mut self) -> Outcome {
        self.enter(WorkerState::Validating);
        if self.request.model_path.trim().is_empty() {
            return Outcome::Errored(GenerationError::EmptyModelPath);
        }

        self.enter(WorkerState::EngineLoading);
        let loaded = match self.load_engine() {
            Ok(loaded) => loaded,
            Err(e) => return Outcome::Errored(e),
        };

        self.enter(WorkerState::PromptProcessing);
        let Self {
            engine,
            record,
            request,
            gateway,
            state,
            ..
        } = self;
        let loaded = record.engine.insert(loaded);
        let handle = &record.handle;

        let (n_past, batch) = match prefill::process_prompt(&**engine, request, handle, loaded) {
            Ok(PromptOutcome::Ready { n_past, batch }) => (n_past, batch),
            Ok(PromptOutcome::Cancelled) => {
                return Outcome::Completed {
                    generated: 0,
                    stop: StopReason::Cancelled,
                };
            }
            Err(e) => return Outcome::Errored(e),
        };

        debug!(
            session = %handle.id(),
            from = ?*state,
            to = ?WorkerState::Streaming,
            "state transition"
        );
        *state = WorkerState::Streaming;
        let (generated, stop) =
            decode::stream(&**engine, request, handle, gateway, loaded, n_past, batch);
        Outcome::Completed { generated, stop }
    }

    /// Acquire model, context and sampler. On failure, whatever was already
    /// acquired is dropped here, before the error is reported.
    fn load_engine(&self) -> Result<LoadedEngine<E>, GenerationError> {
        let id = self.record.id();
        let req = &self.request;

        info!(session = %id, model = %req.model_path, "loading model");
        let model = self
            .engine
            .load_model(Path::new(&req.model_path), &req.model)
            .map_err(GenerationError::ModelLoad)?;
        info!(session = %id, "model loaded");

        let context = self
            .engine
            .create_context(&model, &req.context)
            .map_err(GenerationError::ContextCreate)?;
        debug!(
            session = %id,
            n_ctx = req.context.n_ctx,
            n_batch = req.context.n_batch,
            "context created"
        );

        let mut sampling = req.sampling.normalized();
        let seed = sampling.resolved_seed().ok_or_else(|| {
            GenerationError::SamplerInit(EngineError::Sampler(format!(
                "seed {} outside 0..={}",
                sampling.seed,
                SamplingParams::MAX_SEED
            )))
        })?;
        sampling.seed = i64::from(seed);
        let sampler = self
            .engine
            .create_sampler(&model, &sampling)
            .map_err(GenerationError::SamplerInit)?;
        debug!(session = %id, seed = sampling.seed, "sampler ready");

        Ok(LoadedEngine {
            sampler,
            context,
            model,
        })
    }

    /// The single exit path for every session.
    fn finish(mut self, mut outcome: Outcome) -> SessionSummary {
        self.enter(WorkerState::Terminating);
        let Self {
            registry,
            mut record,
            gateway,
            ..
        } = self;
        let id = record.id();

        // A panicking handle destructor must not skip the terminal event or
        // leave the id registered.
        match panic::catch_unwind(AssertUnwindSafe(|| record.release_engine())) {
            Ok(true) => debug!(session = %id, "engine resources released"),
            Ok(false) => {}
            Err(_) => {
                error!(session = %id, "engine panicked while releasing resources");
                if !outcome.is_error() {
                    outcome = Outcome::Errored(GenerationError::WorkerPanicked);
                }
            }
        }

        match &outcome {
            Outcome::Completed { generated, stop } => {
                info!(session = %id, generated, stop = ?stop, "generation completed");
                gateway.emit_complete();
            }
            Outcome::Errored(e) => {
                error!(
                    session = %id,
                    error = %e,
                    cause = ?std::error::Error::source(e),
                    "generation failed"
                );
                gateway.emit_error(&e.to_string());
            }
        }

        registry.remove(id);

        SessionSummary {
            id,
            outcome,
            elapsed: record.handle.created_at().elapsed(),
        }
    }
}
