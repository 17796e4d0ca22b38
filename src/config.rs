//! Model and generation configuration.
//!
//! Both structs deserialize with per-field defaults so a host can pass a
//! partial options object across the boundary and get the documented
//! defaults for everything it omitted.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Parameters for loading a model.
///
/// Immutable once the model is loaded; supply a fresh value on each `load`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the GGUF model file.
    pub path: PathBuf,
    /// Context window size in tokens.
    pub context_size: u32,
    /// Number of threads for evaluation.
    pub thread_count: u32,
    /// Number of layers to offload to GPU (0 = CPU only).
    pub gpu_layers: u32,
    /// Memory-map the model file instead of reading it into RAM.
    pub use_mmap: bool,
    /// Lock model memory to keep it from being paged out.
    pub use_mlock: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            context_size: 2048,
            thread_count: 4,
            gpu_layers: 0,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

impl ModelConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.path.as_os_str().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "model path must not be empty".into(),
            ));
        }
        if self.context_size == 0 {
            return Err(RuntimeError::InvalidConfig(
                "context_size must be positive".into(),
            ));
        }
        if self.thread_count == 0 {
            return Err(RuntimeError::InvalidConfig(
                "thread_count must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Sampling parameters, passed through to the engine unmodified.
///
/// The exact top-p/top-k/penalty combination semantics belong to the engine;
/// this crate treats them as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// 0.0 = greedy, higher = more random.
    pub temperature: f32,
    /// Nucleus sampling threshold, in [0, 1].
    pub top_p: f32,
    /// Top-k cutoff (0 = disabled).
    pub top_k: u32,
    pub repeat_penalty: f32,
    /// Random seed (0 = pick one from system entropy).
    pub seed: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            seed: 0,
        }
    }
}

/// One text-generation request. Consumed per call; not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Upper bound on generated tokens for this call.
    pub max_tokens: u32,
    pub sampling: SamplingParams,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            max_tokens: 512,
            sampling: SamplingParams::default(),
        }
    }
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_tokens == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_tokens must be positive".into(),
            ));
        }
        let s = &self.sampling;
        if !s.temperature.is_finite() || s.temperature < 0.0 {
            return Err(RuntimeError::InvalidConfig(
                "temperature must be >= 0".into(),
            ));
        }
        if !s.top_p.is_finite() || !(0.0..=1.0).contains(&s.top_p) {
            return Err(RuntimeError::InvalidConfig(
                "top_p must be in [0, 1]".into(),
            ));
        }
        if !s.repeat_penalty.is_finite() || s.repeat_penalty < 0.0 {
            return Err(RuntimeError::InvalidConfig(
                "repeat_penalty must be >= 0".into(),
            ));
        }
        Ok(())
    }
}
