use std::path::PathBuf;

use aishiz_abi::error::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found; set AISHIZ_PLUGIN_PATH or install one into {0}")]
    NotFound(PathBuf),

    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("missing symbol {symbol}: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("plugin entry returned null")]
    NullEntry,

    #[error("ABI mismatch: host={host} plugin={plugin}")]
    AbiMismatch { host: u32, plugin: u32 },

    /// A previous load attempt in this process already failed.
    #[error("{0}")]
    Cached(String),
}

impl From<PluginError> for EngineError {
    fn from(e: PluginError) -> Self {
        EngineError::Plugin(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
