use thiserror::Error;

/// Failure reported by an inference engine operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Load(String),

    #[error("context creation failed: {0}")]
    Context(String),

    #[error("sampler init failed: {0}")]
    Sampler(String),

    #[error("tokenize failed: {0}")]
    Tokenize(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("batch error: {0}")]
    Batch(String),

    #[error("plugin error: {0}")]
    Plugin(String),
}
