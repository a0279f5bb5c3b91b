//! Persisted inference parameters and engine knobs read from the environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use aishiz_abi::engine::ContextParams;
use aishiz_abi::sampling::SamplingParams;
use tracing::warn;

use crate::error::ConfigError;
use crate::paths::params_path;
use crate::request::GenerationRequest;

pub const ENV_N_CTX: &str = "AISHIZ_N_CTX";
pub const ENV_N_BATCH: &str = "AISHIZ_N_BATCH";
pub const ENV_N_THREADS: &str = "AISHIZ_N_THREADS";

/// User-tunable generation settings for one model.
/// Keys are camelCase on disk; missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferenceParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
    pub max_tokens: u32,
    pub context_length: u32,
    pub seed: i64,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            temperature: 0.70,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.10,
            max_tokens: 256,
            context_length: 2048,
            seed: -1,
        }
    }
}

impl InferenceParams {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repeat_penalty: self.repeat_penalty,
            seed: self.seed,
            ..SamplingParams::default()
        }
    }

    /// Context params sized from `context_length`, then env overrides.
    pub fn context(&self) -> ContextParams {
        context_params_from_env(ContextParams {
            n_ctx: self.context_length,
            ..ContextParams::default()
        })
    }

    pub fn to_request(
        &self,
        model_path: impl Into<String>,
        prompt: impl Into<String>,
    ) -> GenerationRequest {
        GenerationRequest::new(model_path, prompt)
            .with_sampling(self.sampling())
            .with_max_tokens(self.max_tokens)
            .with_context(self.context())
    }
}

/// Apply `AISHIZ_N_CTX` / `AISHIZ_N_BATCH` / `AISHIZ_N_THREADS` on top of `base`.
/// Unparseable values are ignored.
pub fn context_params_from_env(base: ContextParams) -> ContextParams {
    apply_context_overrides(base, |key| std::env::var(key).ok())
}

fn apply_context_overrides(
    mut p: ContextParams,
    lookup: impl Fn(&str) -> Option<String>,
) -> ContextParams {
    if let Some(v) = lookup(ENV_N_CTX).and_then(|v| v.parse().ok()) {
        p.n_ctx = v;
    }
    if let Some(v) = lookup(ENV_N_BATCH).and_then(|v| v.parse().ok()) {
        p.n_batch = v;
    }
    if let Some(v) = lookup(ENV_N_THREADS).and_then(|v| v.parse().ok()) {
        p.n_threads = v;
    }
    p
}

/// On-disk store of per-model parameters plus a default profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamsStore {
    pub default: InferenceParams,
    pub models: HashMap<String, InferenceParams>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl ParamsStore {
    /// Load from the standard location (`<data_dir>/Aishiz/params.json`).
    pub fn load_default() -> Self {
        Self::load(params_path())
    }

    /// Missing file → empty store. Malformed file → logged, empty store.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut store = match Self::read(path) {
            Ok(Some(store)) => store,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable params file");
                Self::default()
            }
        };
        store.path = Some(path.to_path_buf());
        store
    }

    fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Write atomically next to the target (tmp + rename).
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.path.clone().unwrap_or_else(params_path);
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Parameters for `model`, falling back to the default profile.
    pub fn params_for(&self, model: &str) -> InferenceParams {
        self.models
            .get(model)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn set_params(&mut self, model: impl Into<String>, params: InferenceParams) {
        self.models.insert(model.into(), params);
    }

    pub fn remove(&mut self, model: &str) -> Option<InferenceParams> {
        self.models.remove(model)
    }
}
