//! Incremental UTF-8 assembly for streamed token pieces.
//!
//! Engine vocabularies split multi-byte characters across tokens, so each
//! piece arrives as raw bytes. The decoder buffers an incomplete trailing
//! sequence and emits the longest valid prefix on every push.

#[derive(Debug, Default)]
pub(crate) struct PieceDecoder {
    buffer: Vec<u8>,
}

impl PieceDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns whatever now decodes cleanly. An
    /// incomplete trailing sequence stays buffered for the next push;
    /// bytes that can never decode become U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.buffer.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.buffer) {
                Ok(s) => {
                    out.push_str(s);
                    self.buffer.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.buffer[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.buffer.drain(..valid + bad);
                        }
                        None => {
                            self.buffer.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Drains any buffered incomplete suffix, lossily.
    pub fn flush(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        tail
    }
}
