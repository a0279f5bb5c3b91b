use aishiz_abi::engine::{ContextParams, ModelParams};
use aishiz_abi::sampling::SamplingParams;

/// Everything a worker needs to run one session. Owned by value, so the
/// caller may drop its own copies as soon as `start_generation` returns.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_path: String,
    pub prompt: String,
    pub sampling: SamplingParams,
    pub max_tokens: u32,
    pub context: ContextParams,
    pub model: ModelParams,
}

impl GenerationRequest {
    pub fn new(model_path: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            prompt: prompt.into(),
            sampling: SamplingParams::default(),
            max_tokens: 256,
            context: ContextParams::default(),
            model: ModelParams::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.sampling.seed = seed;
        self
    }

    pub fn with_context(mut self, context: ContextParams) -> Self {
        self.context = context;
        self
    }

    pub fn with_model_params(mut self, model: ModelParams) -> Self {
        self.model = model;
        self
    }
}
