//! Token delivery: the sink seam and its channel adapter.

use std::sync::mpsc::Sender;

use serde::Serialize;

use crate::error::RuntimeError;
use crate::generation::GenerationOutcome;

/// A single streamed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedToken {
    pub text: String,
    /// Per-call index, starting at 0 and strictly increasing.
    pub index: u32,
    /// True when the controller knows no further token will follow.
    pub is_final: bool,
}

/// Destination for streamed tokens.
///
/// `accept` is invoked synchronously, once per token, in index order; the
/// generation loop does not move on to index N+1 until the call for index N
/// returns. Returning `false` aborts the loop, which surfaces as
/// `CallbackAborted`. Any plain `FnMut(GeneratedToken) -> bool` is a sink.
pub trait TokenSink {
    fn accept(&mut self, token: GeneratedToken) -> bool;
}

impl<F: FnMut(GeneratedToken) -> bool> TokenSink for F {
    fn accept(&mut self, token: GeneratedToken) -> bool {
        self(token)
    }
}

/// Events streamed across the bridge boundary.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(GeneratedToken),
    /// Generation finished; carries the outcome summary.
    Done(GenerationOutcome),
    Error(RuntimeError),
}

impl StreamEvent {
    pub fn as_token(&self) -> Option<&GeneratedToken> {
        match self {
            StreamEvent::Token(token) => Some(token),
            _ => None,
        }
    }
}

/// Sink that forwards each token into an mpsc channel. A dropped receiver
/// reads as abort, which stops the generation loop.
pub struct ChannelSink {
    tx: Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<StreamEvent>) -> Self {
        Self { tx }
    }
}

impl TokenSink for ChannelSink {
    fn accept(&mut self, token: GeneratedToken) -> bool {
        self.tx.send(StreamEvent::Token(token)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn token(index: u32) -> GeneratedToken {
        GeneratedToken {
            text: format!("t{index}"),
            index,
            is_final: false,
        }
    }

    #[test]
    fn closure_is_a_sink() {
        let mut seen = Vec::new();
        let mut sink = |t: GeneratedToken| {
            seen.push(t.index);
            true
        };
        assert!(TokenSink::accept(&mut sink, token(0)));
        assert!(TokenSink::accept(&mut sink, token(1)));
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn channel_sink_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let mut sink = ChannelSink::new(tx);
        assert!(sink.accept(token(0)));
        drop(rx);
        assert!(!sink.accept(token(1)));
    }
}
