//! Newline framing for the server's stdout.
//!
//! Reads from a pipe arrive in arbitrary chunks: one chunk may hold several
//! messages, or a message may be split across many chunks. The framer keeps a
//! growable buffer and only yields a line once its terminating `\n` arrives.

use bytes::{Buf, BytesMut};

/// Incremental line framer that turns raw stdout chunks into complete lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Leading bytes of `buffer` already known to hold no `\n`.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return any complete, non-blank lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            if let Some(line) = decode(&raw) {
                lines.push(line);
            }
        }
        self.scanned = self.buffer.len();

        lines
    }

    /// Bytes buffered while waiting for a terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drain whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let raw = self.buffer.split();
        self.scanned = 0;
        decode(&raw)
    }
}

fn decode(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.into_owned())
    }
}
