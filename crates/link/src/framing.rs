//! NUL-delimited command framing.
//!
//! Every command on the wire is its text followed by a single `0x00` byte.
//! There is no length prefix, so the receiving side buffers bytes until it
//! sees the terminator and may emit several commands from one read.

pub const MESSAGE_TERMINATOR: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("command contains a NUL byte at offset {0}")]
    EmbeddedNul(usize),
    #[error("encoded command is {len} bytes (send buffer holds {capacity})")]
    TooLong { len: usize, capacity: usize },
    #[error("{pending} bytes received without a terminator (limit {limit})")]
    Oversized { pending: usize, limit: usize },
}

/// Encodes `text` as payload plus terminator.
pub fn encode(text: &str) -> Result<Vec<u8>, FrameError> {
    if let Some(offset) = text.bytes().position(|b| b == MESSAGE_TERMINATOR) {
        return Err(FrameError::EmbeddedNul(offset));
    }
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(MESSAGE_TERMINATOR);
    Ok(bytes)
}

/// A command ready to be written to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    text: String,
    wire: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>, capacity: usize) -> Result<Self, FrameError> {
        let text = text.into();
        let wire = encode(&text)?;
        if wire.len() > capacity {
            return Err(FrameError::TooLong {
                len: wire.len(),
                capacity,
            });
        }
        Ok(Self { text, wire })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn wire(&self) -> &[u8] {
        &self.wire
    }
}

#[derive(Debug)]
pub struct MessageFramer {
    accumulator: Vec<u8>,
    max_pending: usize,
}

impl MessageFramer {
    pub fn new(max_pending: usize) -> Self {
        Self {
            accumulator: Vec::new(),
            max_pending,
        }
    }

    /// Feeds received bytes and returns every command they complete, in
    /// stream order. Bytes after the last terminator stay buffered.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, FrameError> {
        let mut messages = Vec::new();

        for chunk in bytes.split_inclusive(|&b| b == MESSAGE_TERMINATOR) {
            match chunk.split_last() {
                Some((&MESSAGE_TERMINATOR, payload)) => {
                    self.accumulator.extend_from_slice(payload);
                    self.check_limit()?;
                    messages.push(String::from_utf8_lossy(&self.accumulator).into_owned());
                    self.accumulator.clear();
                }
                _ => {
                    self.accumulator.extend_from_slice(chunk);
                    self.check_limit()?;
                }
            }
        }

        Ok(messages)
    }

    fn check_limit(&self) -> Result<(), FrameError> {
        if self.accumulator.len() > self.max_pending {
            return Err(FrameError::Oversized {
                pending: self.accumulator.len(),
                limit: self.max_pending,
            });
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.accumulator.len()
    }

    pub fn clear(&mut self) {
        self.accumulator.clear();
    }
}
