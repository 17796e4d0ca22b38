//! Bridge-level error taxonomy.

use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by the model runtime, generation controller, and bridge.
///
/// All variants are returned to the direct caller; nothing here terminates
/// the process, and a failed call never leaves the runtime in a corrupted
/// state (a failed load stays absent, a failed generate stays loaded).
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    /// A model is already resident; unload it before loading another.
    #[error("a model is already loaded; unload it first")]
    AlreadyLoaded,

    /// The operation requires a loaded model and none is resident.
    #[error("no model is loaded")]
    NotLoaded,

    /// The engine rejected the model load or context creation.
    #[error("failed to load model: {0}")]
    LoadFailure(#[source] EngineError),

    /// An engine step failed mid-generation. Fatal to the current call only.
    #[error("engine failure during generation: {0}")]
    EvaluationFailure(#[source] EngineError),

    /// The token sink rejected a token, aborting the generation.
    #[error("token sink aborted generation")]
    CallbackAborted,

    /// Teardown was requested while a generation holds the model handles.
    #[error("a generation is in flight; stop it before unloading")]
    Busy,

    /// A config or request field is out of range.
    #[error("invalid parameter: {0}")]
    InvalidConfig(String),

    /// The bridge worker thread is gone or failed to start.
    #[error("worker thread unavailable: {0}")]
    Worker(String),
}
