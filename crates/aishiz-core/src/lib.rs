//! Aishiz core: runs text-generation sessions on background workers and
//! streams their output to caller-supplied callbacks.
//!
//! A host builds a [`SessionController`] over some [`InferenceEngine`],
//! calls [`SessionController::start_generation`] with a request and a
//! [`TokenCallback`], and may later call
//! [`SessionController::stop_generation`] with the returned id. Every
//! started session ends with exactly one `on_complete` or `on_error`.

pub mod callback;
pub mod config;
pub mod controller;
pub mod echo;
pub mod error;
mod gateway;
pub mod paths;
pub mod request;
pub mod session;
pub mod worker;

pub use aishiz_abi;
pub use aishiz_abi::engine::{ContextParams, InferenceEngine, ModelParams};
pub use aishiz_abi::sampling::SamplingParams;

pub use callback::{channel_callback, FnCallback, StreamEvent, TokenCallback};
pub use config::{InferenceParams, ParamsStore};
pub use controller::{SessionController, RECENT_SUMMARIES};
pub use echo::EchoEngine;
pub use error::{ConfigError, GenerationError};
pub use request::GenerationRequest;
pub use session::{SessionHandle, SessionId, SessionRegistry};
pub use worker::{Outcome, SessionSummary, StopReason, WorkerState};
