use serde::{Deserialize, Serialize};

/// Sampler configuration handed to `InferenceEngine::create_sampler`.
///
/// `seed` in `0..=MAX_SEED` is used verbatim; a negative seed asks for a
/// time-derived one (see [`SamplingParams::resolved_seed`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
    /// Window of recent tokens the repeat penalty looks at.
    pub repeat_last_n: i32,
    pub seed: i64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.70,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.10,
            repeat_last_n: 64,
            seed: -1,
        }
    }
}

impl SamplingParams {
    /// Largest seed an engine sampler accepts.
    pub const MAX_SEED: i64 = u32::MAX as i64;

    /// Returns a clamped copy that engines can apply without further checks.
    ///
    /// - temperature <= 0 → 0 (greedy)
    /// - top_k < 1 → 0 (disabled)
    /// - top_p ∉ (0, 1] → 1.0 (disabled)
    /// - repeat_penalty < 1.0 → 1.0
    /// - repeat_last_n < 0 → 0
    pub fn normalized(&self) -> Self {
        let mut p = self.clone();

        if !(p.temperature > 0.0) {
            p.temperature = 0.0;
        }
        if p.top_k < 1 {
            p.top_k = 0;
        }
        if !(p.top_p > 0.0 && p.top_p <= 1.0) {
            p.top_p = 1.0;
        }
        if !(p.repeat_penalty >= 1.0) {
            p.repeat_penalty = 1.0;
        }
        if p.repeat_last_n < 0 {
            p.repeat_last_n = 0;
        }
        p
    }

    #[inline]
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }

    /// The seed the sampler should actually use. `None` when a non-negative
    /// seed does not fit the sampler's 32-bit seed.
    pub fn resolved_seed(&self) -> Option<u32> {
        if self.seed < 0 {
            Some(chrono::Utc::now().timestamp() as u32)
        } else {
            u32::try_from(self.seed).ok()
        }
    }
}
