use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::batch::Batch;
use crate::error::EngineError;
use crate::sampling::SamplingParams;
use crate::token::Token;

/// Options for loading model weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub use_mmap: bool,
    /// Layers to offload to GPU; 0 keeps everything on CPU.
    pub n_gpu_layers: i32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            use_mmap: true,
            n_gpu_layers: 0,
        }
    }
}

/// Options for one execution context (KV cache + batch sizing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextParams {
    pub n_ctx: u32,
    /// Maximum tokens per decode call; prompts longer than this are chunked.
    pub n_batch: u32,
    pub n_threads: i32,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_batch: 512,
            n_threads: 4,
        }
    }
}

/// Backend-agnostic interface for inference engines.
///
/// Handles are owned values. Whoever holds them is the only user; a session
/// worker drops them in reverse order of acquisition (sampler, context, model).
pub trait InferenceEngine: Send + Sync + 'static {
    type Model: Send;
    type Context: Send;
    type Sampler: Send;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, EngineError>;

    fn create_context(
        &self,
        model: &Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, EngineError>;

    fn create_sampler(
        &self,
        model: &Self::Model,
        params: &SamplingParams,
    ) -> Result<Self::Sampler, EngineError>;

    /// Tokenize `text`, adding BOS and parsing special tokens.
    fn tokenize(&self, ctx: &mut Self::Context, text: &str) -> Result<Vec<Token>, EngineError>;

    fn decode(&self, ctx: &mut Self::Context, batch: &Batch) -> Result<(), EngineError>;

    /// Sample at the last position that requested logits in the previous decode.
    fn sample_next(&self, sampler: &mut Self::Sampler, ctx: &mut Self::Context) -> Token;

    /// Record the chosen token in the sampler's history (repeat penalty).
    fn accept(&self, _sampler: &mut Self::Sampler, _token: Token) {}

    fn is_end_of_sequence(&self, model: &Self::Model, token: Token) -> bool;

    /// Raw UTF-8 bytes of the token's text piece. May end mid-codepoint.
    fn token_to_piece(&self, ctx: &Self::Context, token: Token) -> Vec<u8>;
}
