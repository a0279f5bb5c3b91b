//! Built-in engine that replays the prompt back, one word per token.
//!
//! Useful for wiring up a host before a real backend is available: it goes
//! through the same load → prompt → stream cycle, paced so that stop
//! requests have something to interrupt.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use aishiz_abi::batch::Batch;
use aishiz_abi::engine::{ContextParams, InferenceEngine, ModelParams};
use aishiz_abi::error::EngineError;
use aishiz_abi::sampling::SamplingParams;
use aishiz_abi::token::Token;

const BOS: Token = Token(0);
const EOS: Token = Token(1);
const ECHO_PREFIX: Token = Token(2);
const ECHO_PREFIX_TEXT: &str = "Echo:";

pub const DEFAULT_ECHO_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct EchoEngine {
    delay: Duration,
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self {
            delay: DEFAULT_ECHO_DELAY,
        }
    }
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause applied before every sampled token.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[derive(Debug)]
pub struct EchoModel {
    path: PathBuf,
}

impl EchoModel {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub struct EchoContext {
    n_ctx: u32,
    vocab: Vec<String>,
    lookup: HashMap<String, Token>,
    prompt: Vec<Token>,
    pending: VecDeque<Token>,
    replay_queued: bool,
}

impl EchoContext {
    fn new(n_ctx: u32) -> Self {
        Self {
            n_ctx,
            vocab: vec![String::new(), String::new(), ECHO_PREFIX_TEXT.to_string()],
            lookup: HashMap::new(),
            prompt: Vec::new(),
            pending: VecDeque::new(),
            replay_queued: false,
        }
    }

    fn intern(&mut self, word: &str) -> Token {
        if let Some(&tok) = self.lookup.get(word) {
            return tok;
        }
        let tok = Token(self.vocab.len() as i32);
        self.vocab.push(format!(" {word}"));
        self.lookup.insert(word.to_string(), tok);
        tok
    }
}

#[derive(Debug, Default)]
pub struct EchoSampler {
    accepted: usize,
}

impl EchoSampler {
    /// Tokens accepted so far in this session.
    pub fn accepted(&self) -> usize {
        self.accepted
    }
}

impl InferenceEngine for EchoEngine {
    type Model = EchoModel;
    type Context = EchoContext;
    type Sampler = EchoSampler;

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<EchoModel, EngineError> {
        if !path.is_file() {
            return Err(EngineError::Load(format!(
                "no model file at {}",
                path.display()
            )));
        }
        Ok(EchoModel {
            path: path.to_path_buf(),
        })
    }

    fn create_context(
        &self,
        _model: &EchoModel,
        params: &ContextParams,
    ) -> Result<EchoContext, EngineError> {
        if params.n_ctx == 0 {
            return Err(EngineError::Context("n_ctx must be positive".into()));
        }
        Ok(EchoContext::new(params.n_ctx))
    }

    fn create_sampler(
        &self,
        _model: &EchoModel,
        _params: &SamplingParams,
    ) -> Result<EchoSampler, EngineError> {
        Ok(EchoSampler::default())
    }

    fn tokenize(&self, ctx: &mut EchoContext, text: &str) -> Result<Vec<Token>, EngineError> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let mut tokens = Vec::with_capacity(words.len() + 1);
        tokens.push(BOS);
        tokens.extend(words.into_iter().map(|w| ctx.intern(w)));
        Ok(tokens)
    }

    fn decode(&self, ctx: &mut EchoContext, batch: &Batch) -> Result<(), EngineError> {
        if let Some(last) = batch.entries().last() {
            if last.pos as u32 >= ctx.n_ctx {
                return Err(EngineError::Decode(format!(
                    "context full at position {}",
                    last.pos
                )));
            }
        }
        if ctx.replay_queued {
            return Ok(());
        }

        ctx.prompt
            .extend(batch.entries().iter().map(|e| e.token).filter(|t| *t != BOS));
        if batch.logits_index().is_some() {
            ctx.pending.push_back(ECHO_PREFIX);
            ctx.pending.extend(ctx.prompt.iter().copied());
            ctx.replay_queued = true;
        }
        Ok(())
    }

    fn sample_next(&self, _sampler: &mut EchoSampler, ctx: &mut EchoContext) -> Token {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        ctx.pending.pop_front().unwrap_or(EOS)
    }

    fn accept(&self, sampler: &mut EchoSampler, _token: Token) {
        sampler.accepted += 1;
    }

    fn is_end_of_sequence(&self, _model: &EchoModel, token: Token) -> bool {
        token == EOS
    }

    fn token_to_piece(&self, ctx: &EchoContext, token: Token) -> Vec<u8> {
        usize::try_from(token.0)
            .ok()
            .and_then(|i| ctx.vocab.get(i))
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default()
    }
}
