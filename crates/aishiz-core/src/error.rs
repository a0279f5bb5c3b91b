use aishiz_abi::error::EngineError;
use thiserror::Error;

/// Why a session ended in `on_error`. `Display` is exactly the message the
/// caller's callback receives; the engine error, if any, stays in `source()`.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Model path is empty. Select a model first.")]
    EmptyModelPath,

    #[error("Failed to load model. Check if the file is a valid GGUF model.")]
    ModelLoad(#[source] EngineError),

    #[error("Failed to create inference context.")]
    ContextCreate(#[source] EngineError),

    #[error("Failed to initialize sampler.")]
    SamplerInit(#[source] EngineError),

    #[error("Failed to process prompt.")]
    PromptProcessing(#[source] EngineError),

    /// Tokenizer produced nothing, so there is no position to sample from.
    #[error("Failed to process prompt.")]
    EmptyPrompt,

    #[error("Generation worker panicked.")]
    WorkerPanicked,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
