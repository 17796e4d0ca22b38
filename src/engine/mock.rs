//! Scripted engine for exercising the runtime and controller without a
//! real model. Records every engine call, including handle drops, in a
//! shared event log so tests can assert ordering.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{EngineError, InferenceEngine, Logits, TokenId};
use crate::config::{ModelConfig, SamplingParams};

const EOG: TokenId = TokenId(-1);

pub type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct MockEngine {
    pub fail_load: bool,
    pub fail_context: bool,
    pub fail_evaluate: bool,
    /// Sample returns the end-of-generation token once this many tokens
    /// have been produced since the last context reset.
    pub eog_after: Option<u32>,
    /// Per-evaluation delay, for cross-thread cancellation tests.
    pub step_delay: Option<Duration>,
    /// Pieces returned for sampled token ids; ids past the end fall back
    /// to `token_{id} `.
    pub pieces: Vec<Vec<u8>>,
    pub events: EventLog,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

pub struct MockModel {
    events: EventLog,
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.events.lock().unwrap().push("free_model".into());
    }
}

pub struct MockContext {
    events: EventLog,
    next: u32,
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.events.lock().unwrap().push("free_context".into());
    }
}

impl InferenceEngine for MockEngine {
    type Model = MockModel;
    type Context = MockContext;

    fn load_model(&self, config: &ModelConfig) -> Result<MockModel, EngineError> {
        if self.fail_load {
            return Err(EngineError::ModelLoad(format!(
                "no such file: {}",
                config.path.display()
            )));
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("load {}", config.path.display()));
        Ok(MockModel {
            events: self.events.clone(),
        })
    }

    fn create_context(
        &self,
        _model: &MockModel,
        config: &ModelConfig,
    ) -> Result<MockContext, EngineError> {
        if self.fail_context {
            return Err(EngineError::ContextCreate("out of memory".into()));
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("context {}", config.context_size));
        Ok(MockContext {
            events: self.events.clone(),
            next: 0,
        })
    }

    fn tokenize(&self, _model: &MockModel, text: &str) -> Result<Vec<TokenId>, EngineError> {
        // BOS plus one token per whitespace-separated word.
        Ok(std::iter::once(TokenId(1))
            .chain(
                text.split_whitespace()
                    .enumerate()
                    .map(|(i, _)| TokenId(1000 + i as i32)),
            )
            .collect())
    }

    fn evaluate(
        &self,
        _model: &MockModel,
        _context: &mut MockContext,
        tokens: &[TokenId],
        position: u32,
    ) -> Result<Logits, EngineError> {
        if self.fail_evaluate {
            return Err(EngineError::Evaluate("decode failed".into()));
        }
        if let Some(delay) = self.step_delay {
            std::thread::sleep(delay);
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("evaluate {}@{}", tokens.len(), position));
        Ok(Logits(tokens.len() as i32 - 1))
    }

    fn sample(
        &self,
        _model: &MockModel,
        context: &mut MockContext,
        _logits: Logits,
        _sampling: &SamplingParams,
    ) -> Result<TokenId, EngineError> {
        let id = context.next;
        context.next += 1;
        if self.eog_after.is_some_and(|n| id >= n) {
            return Ok(EOG);
        }
        Ok(TokenId(id as i32))
    }

    fn token_to_piece(&self, _model: &MockModel, token: TokenId) -> Result<Vec<u8>, EngineError> {
        if let Some(piece) = self.pieces.get(token.0 as usize) {
            return Ok(piece.clone());
        }
        Ok(format!("token_{} ", token.0).into_bytes())
    }

    fn is_end_of_generation(&self, _model: &MockModel, token: TokenId) -> bool {
        token == EOG
    }

    fn reset_context(&self, context: &mut MockContext) {
        context.next = 0;
        self.events.lock().unwrap().push("reset".into());
    }
}
