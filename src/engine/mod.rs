//! Inference engine seam.
//!
//! The runtime and controller are generic over [`InferenceEngine`] so the
//! heavyweight llama.cpp backend stays behind the `llama` feature gate and
//! tests can drive the full lifecycle with a scripted engine.

pub mod gguf;
#[cfg(feature = "llama")]
pub mod llama;
#[cfg(test)]
pub(crate) mod mock;

use thiserror::Error;

use crate::config::{ModelConfig, SamplingParams};

/// Error reported by an engine primitive.
///
/// Messages are carried verbatim from the underlying library; the adapter
/// adds no policy, retries nothing, and caches nothing.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("backend initialization failed: {0}")]
    Backend(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("context creation failed: {0}")]
    ContextCreate(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("token evaluation failed: {0}")]
    Evaluate(String),

    #[error("sampling failed: {0}")]
    Sample(String),

    #[error("token decoding failed: {0}")]
    Detokenize(String),
}

/// Engine-level token id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenId(pub i32);

/// Handle to the logits produced by the most recent
/// [`InferenceEngine::evaluate`] call. The meaning is engine-defined; for
/// llama.cpp it is the batch row the logits were written to.
#[derive(Debug, Clone, Copy)]
pub struct Logits(pub i32);

/// Thin typed seam over an inference library's C-style entry points.
///
/// Each method maps 1:1 onto an engine primitive. Handle release is
/// expressed through `Drop` on the associated types; the model runtime
/// guarantees a context is dropped at or before its owning model, and that
/// at most one model/context pair exists at a time.
pub trait InferenceEngine {
    type Model;
    type Context;

    fn load_model(&self, config: &ModelConfig) -> Result<Self::Model, EngineError>;

    fn create_context(
        &self,
        model: &Self::Model,
        config: &ModelConfig,
    ) -> Result<Self::Context, EngineError>;

    fn tokenize(&self, model: &Self::Model, text: &str) -> Result<Vec<TokenId>, EngineError>;

    /// Feeds `tokens` into the context starting at absolute position
    /// `position`, returning a handle to the resulting logits.
    fn evaluate(
        &self,
        model: &Self::Model,
        context: &mut Self::Context,
        tokens: &[TokenId],
        position: u32,
    ) -> Result<Logits, EngineError>;

    fn sample(
        &self,
        model: &Self::Model,
        context: &mut Self::Context,
        logits: Logits,
        sampling: &SamplingParams,
    ) -> Result<TokenId, EngineError>;

    /// Raw bytes of a token's text. May be an incomplete UTF-8 fragment;
    /// callers are expected to reassemble.
    fn token_to_piece(&self, model: &Self::Model, token: TokenId) -> Result<Vec<u8>, EngineError>;

    fn is_end_of_generation(&self, model: &Self::Model, token: TokenId) -> bool;

    /// Clears cache state so the next evaluation starts at position 0.
    fn reset_context(&self, context: &mut Self::Context);
}
