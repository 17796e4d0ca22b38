//! Generation controller: the token-by-token sampling loop and its
//! cooperative cancellation.
//!
//! Cancellation is cooperative rather than preemptive because the engine's
//! evaluate/sample steps are not safely interruptible mid-call. The flag is
//! checked once per iteration, which bounds stop latency to one token's
//! evaluation cost.

mod decoder;
mod sink;

pub use sink::{ChannelSink, GeneratedToken, StreamEvent, TokenSink};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GenerationRequest;
use crate::engine::InferenceEngine;
use crate::error::RuntimeError;
use crate::runtime::{ModelRuntime, Session};
use decoder::PieceDecoder;

/// Why a generation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The request's token budget was exhausted.
    MaxTokens,
    /// The engine produced an end-of-generation token.
    EndOfGeneration,
    /// `stop()` was observed. Cancellation is a normal outcome, not an
    /// error.
    Cancelled,
}

/// Summary of a completed generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub tokens_emitted: u32,
    pub finish: FinishReason,
    pub elapsed: Duration,
}

impl GenerationOutcome {
    /// Tokens per second over the whole call, prompt evaluation included.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            f64::from(self.tokens_emitted) / secs
        } else {
            0.0
        }
    }
}

/// Cooperative stop signal shared between the generation loop and any
/// thread that wants to interrupt it.
#[derive(Debug, Default)]
pub struct CancellationFlag(AtomicBool);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Drives the sampling loop against a [`ModelRuntime`].
pub struct GenerationController<E: InferenceEngine> {
    runtime: Arc<ModelRuntime<E>>,
    cancel: Arc<CancellationFlag>,
}

impl<E: InferenceEngine> GenerationController<E> {
    pub fn new(runtime: Arc<ModelRuntime<E>>) -> Self {
        Self::with_flag(runtime, Arc::new(CancellationFlag::new()))
    }

    /// Uses a caller-provided flag, for hosts that need to signal stop
    /// without holding a reference to the controller itself.
    pub fn with_flag(runtime: Arc<ModelRuntime<E>>, cancel: Arc<CancellationFlag>) -> Self {
        Self { runtime, cancel }
    }

    /// Requests cancellation of the in-flight generation, if any.
    ///
    /// Safe to call from any thread and returns immediately; the loop
    /// observes the flag within one iteration. No-op when idle.
    pub fn stop(&self) {
        self.cancel.set();
    }

    pub fn cancellation_flag(&self) -> Arc<CancellationFlag> {
        self.cancel.clone()
    }

    /// Runs one generation, streaming each token into `sink`.
    ///
    /// Fails with `NotLoaded` if no model is resident (the sink is never
    /// invoked), `EvaluationFailure` if an engine step fails, or
    /// `CallbackAborted` if the sink rejects a token. None of these disturb
    /// the loaded model. Cancellation and token-budget exhaustion are
    /// successful outcomes, reported in [`GenerationOutcome::finish`].
    pub fn generate<S: TokenSink>(
        &self,
        request: &GenerationRequest,
        sink: &mut S,
    ) -> Result<GenerationOutcome, RuntimeError> {
        request.validate()?;
        self.cancel.clear();

        let started = Instant::now();
        let outcome = self.runtime.with_session(|engine, model, session| {
            run_loop(engine, model, session, request, sink, &self.cancel)
        })??;

        let outcome = GenerationOutcome {
            elapsed: started.elapsed(),
            ..outcome
        };
        tracing::info!(
            tokens = outcome.tokens_emitted,
            finish = ?outcome.finish,
            ms = outcome.elapsed.as_millis() as u64,
            "generation finished"
        );
        Ok(outcome)
    }
}

fn run_loop<E: InferenceEngine, S: TokenSink>(
    engine: &E,
    model: &E::Model,
    session: &mut Session<E::Context>,
    request: &GenerationRequest,
    sink: &mut S,
    cancel: &CancellationFlag,
) -> Result<GenerationOutcome, RuntimeError> {
    let prompt_tokens = engine
        .tokenize(model, &request.prompt)
        .map_err(RuntimeError::EvaluationFailure)?;
    tracing::debug!(count = prompt_tokens.len(), "prompt tokenized");

    let mut decoder = PieceDecoder::new();
    let mut pending = prompt_tokens;
    let mut emitted = 0u32;
    let mut finish = FinishReason::MaxTokens;

    for index in 0..request.max_tokens {
        if cancel.is_set() {
            tracing::debug!(index, "generation cancelled");
            finish = FinishReason::Cancelled;
            break;
        }

        let logits = engine
            .evaluate(model, &mut session.context, &pending, session.position)
            .map_err(RuntimeError::EvaluationFailure)?;
        session.position += pending.len() as u32;

        let token = engine
            .sample(model, &mut session.context, logits, &request.sampling)
            .map_err(RuntimeError::EvaluationFailure)?;

        if engine.is_end_of_generation(model, token) {
            tracing::debug!(index, "end of generation token");
            finish = FinishReason::EndOfGeneration;
            let tail = decoder.flush();
            if !tail.is_empty() {
                let delivered = sink.accept(GeneratedToken {
                    text: tail,
                    index,
                    is_final: true,
                });
                if !delivered {
                    return Err(RuntimeError::CallbackAborted);
                }
                emitted += 1;
            }
            break;
        }

        let piece = engine
            .token_to_piece(model, token)
            .map_err(RuntimeError::EvaluationFailure)?;
        let mut text = decoder.push(&piece);
        let is_final = index + 1 == request.max_tokens;
        if is_final {
            text.push_str(&decoder.flush());
        }

        let delivered = sink.accept(GeneratedToken {
            text,
            index,
            is_final,
        });
        if !delivered {
            return Err(RuntimeError::CallbackAborted);
        }
        emitted += 1;

        pending = vec![token];
    }

    Ok(GenerationOutcome {
        tokens_emitted: emitted,
        finish,
        elapsed: Duration::ZERO,
    })
}
