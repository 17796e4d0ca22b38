//! llama-bridge
//!
//! Lifecycle and streaming-generation bridge over a locally loaded LLM.
//!
//! The crate owns the hard part of embedding an inference engine: safe
//! single-owner lifecycle for the model and its context, a cancellable
//! token-by-token generation loop, and a Send + Sync boundary for host
//! platforms whose engine handles are thread-affine. The engine itself is
//! an opaque collaborator behind [`engine::InferenceEngine`]; the llama.cpp
//! implementation is enabled with the `llama` feature.
//!
//! Typical host flow: [`bridge::InferenceBridge::spawn`] → `load_model` →
//! `generate` (stream tokens) → `stop_inference` at will → `unload_model`.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod runtime;

pub use bridge::{InferenceBridge, READY_MARKER};
pub use config::{GenerationRequest, ModelConfig, SamplingParams};
pub use engine::{EngineError, InferenceEngine, Logits, TokenId};
pub use error::RuntimeError;
pub use generation::{
    CancellationFlag, ChannelSink, FinishReason, GeneratedToken, GenerationController,
    GenerationOutcome, StreamEvent, TokenSink,
};
pub use runtime::{ModelRuntime, RuntimeSnapshot};
