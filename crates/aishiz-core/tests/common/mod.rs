#![allow(dead_code)]

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use aishiz_core::aishiz_abi::{
    Batch, ContextParams, EngineError, InferenceEngine, ModelParams, SamplingParams, Token,
};
use aishiz_core::{SessionController, SessionRegistry, StreamEvent};

pub const EOS: Token = Token(-1);

/// Shared, ordered record of engine activity (drops, prompt chunks) and
/// anything a test callback wants to interleave with it.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Knobs for [`ScriptedEngine`]. Everything off by default: the engine then
/// loads fine and emits `t0 `, `t1 `, ... forever.
#[derive(Clone, Default)]
pub struct Script {
    pub fail_load: bool,
    pub fail_context: bool,
    pub fail_sampler: bool,
    pub fail_prompt_decode: bool,
    /// Fail the decode that follows the n-th emitted token (1-based).
    pub fail_decode_after: Option<u32>,
    /// Sample end-of-sequence once this many tokens were produced.
    pub eos_after: Option<u32>,
    /// Byte pieces to emit instead of `tN `; EOS once exhausted.
    pub pieces: Option<Vec<Vec<u8>>>,
    pub panic_on_sample: bool,
    /// Panic from the context's destructor (after logging the drop).
    pub panic_on_context_drop: bool,
    pub step_delay: Duration,
}

pub struct ScriptedEngine {
    script: Script,
    log: EventLog,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> (Self, EventLog) {
        let log = EventLog::default();
        (
            Self {
                script,
                log: log.clone(),
            },
            log,
        )
    }
}

pub struct ScriptedModel {
    log: EventLog,
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.log.push("drop model");
    }
}

pub struct ScriptedContext {
    log: EventLog,
    sampled: u32,
    generated_decodes: u32,
    prompt_done: bool,
    panic_on_drop: bool,
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.log.push("drop context");
        if self.panic_on_drop {
            panic!("scripted context drop panic");
        }
    }
}

pub struct ScriptedSampler {
    log: EventLog,
}

impl Drop for ScriptedSampler {
    fn drop(&mut self) {
        self.log.push("drop sampler");
    }
}

impl InferenceEngine for ScriptedEngine {
    type Model = ScriptedModel;
    type Context = ScriptedContext;
    type Sampler = ScriptedSampler;

    fn load_model(
        &self,
        _path: &Path,
        _params: &ModelParams,
    ) -> Result<ScriptedModel, EngineError> {
        if self.script.fail_load {
            return Err(EngineError::Load("scripted".into()));
        }
        Ok(ScriptedModel {
            log: self.log.clone(),
        })
    }

    fn create_context(
        &self,
        _model: &ScriptedModel,
        _params: &ContextParams,
    ) -> Result<ScriptedContext, EngineError> {
        if self.script.fail_context {
            return Err(EngineError::Context("scripted".into()));
        }
        Ok(ScriptedContext {
            log: self.log.clone(),
            sampled: 0,
            generated_decodes: 0,
            prompt_done: false,
            panic_on_drop: self.script.panic_on_context_drop,
        })
    }

    fn create_sampler(
        &self,
        _model: &ScriptedModel,
        _params: &SamplingParams,
    ) -> Result<ScriptedSampler, EngineError> {
        if self.script.fail_sampler {
            return Err(EngineError::Sampler("scripted".into()));
        }
        Ok(ScriptedSampler {
            log: self.log.clone(),
        })
    }

    fn tokenize(&self, _ctx: &mut ScriptedContext, text: &str) -> Result<Vec<Token>, EngineError> {
        Ok(text
            .split_whitespace()
            .enumerate()
            .map(|(i, _)| Token(1000 + i as i32))
            .collect())
    }

    fn decode(&self, ctx: &mut ScriptedContext, batch: &Batch) -> Result<(), EngineError> {
        if !ctx.prompt_done {
            if self.script.fail_prompt_decode {
                return Err(EngineError::Decode("scripted prompt".into()));
            }
            let logits = batch
                .logits_index()
                .map_or_else(|| "-".to_string(), |i| i.to_string());
            self.log.push(format!("prefill {} {}", batch.len(), logits));
            ctx.prompt_done = batch.logits_index().is_some();
            return Ok(());
        }

        ctx.generated_decodes += 1;
        if self.script.fail_decode_after == Some(ctx.generated_decodes) {
            return Err(EngineError::Decode("scripted".into()));
        }
        Ok(())
    }

    fn sample_next(&self, _sampler: &mut ScriptedSampler, ctx: &mut ScriptedContext) -> Token {
        if self.script.panic_on_sample {
            panic!("scripted engine panic");
        }
        if !self.script.step_delay.is_zero() {
            thread::sleep(self.script.step_delay);
        }
        let step = ctx.sampled;
        ctx.sampled += 1;

        if self.script.eos_after == Some(step) {
            return EOS;
        }
        if let Some(pieces) = &self.script.pieces {
            if step as usize >= pieces.len() {
                return EOS;
            }
        }
        Token(step as i32)
    }

    fn is_end_of_sequence(&self, _model: &ScriptedModel, token: Token) -> bool {
        token == EOS
    }

    fn token_to_piece(&self, _ctx: &ScriptedContext, token: Token) -> Vec<u8> {
        match &self.script.pieces {
            Some(pieces) => pieces.get(token.0 as usize).cloned().unwrap_or_default(),
            None => format!("t{} ", token.0).into_bytes(),
        }
    }
}

pub fn controller(script: Script) -> (SessionController<ScriptedEngine>, EventLog) {
    let (engine, log) = ScriptedEngine::new(script);
    let registry = Arc::new(SessionRegistry::new());
    (SessionController::with_registry(engine, registry), log)
}

/// Every event still buffered; the channel closes once the worker drops
/// the callback, so call this after joining.
pub fn drain(rx: &Receiver<StreamEvent>) -> Vec<StreamEvent> {
    rx.try_iter().collect()
}

pub fn tokens(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

/// Exactly one terminal event, and it is the last one.
pub fn assert_single_terminal_last(events: &[StreamEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {events:?}");
    assert!(
        events.last().is_some_and(StreamEvent::is_terminal),
        "events: {events:?}"
    );
}
