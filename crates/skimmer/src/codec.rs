//! Decompression and line framing for compressed log objects.
//!
//! Log objects arrive as gzip-compressed network chunks. [`GzipInflater`] is
//! a push decoder: feed it compressed chunks in arrival order and it hands
//! back whatever decompressed bytes became available. [`LineSplitter`] then
//! frames those bytes into newline-delimited records without ever buffering
//! the whole object. Array-format logs skip the splitter and accumulate the
//! full document instead.

use std::io::Write;

use anyhow::{Context, Result};
use flate2::write::MultiGzDecoder;
use memchr::memchr;

/// `Write` target the decoder inflates into. Drained after every push.
#[derive(Debug, Default)]
struct ByteSink {
    buf: Vec<u8>,
}

impl Write for ByteSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Push-style gzip decoder over chunked input.
///
/// `push` accepts compressed bytes as they arrive and returns the
/// decompressed bytes produced so far; `finish` drains the remainder and
/// fails if the stream ended mid-member. Multi-member gzip (concatenated
/// objects) decodes transparently.
#[derive(Debug)]
pub struct GzipInflater {
    // Option so finish() can consume the decoder exactly once.
    decoder: Option<MultiGzDecoder<ByteSink>>,
}

impl Default for GzipInflater {
    fn default() -> Self {
        Self::new()
    }
}

impl GzipInflater {
    pub fn new() -> Self {
        Self {
            decoder: Some(MultiGzDecoder::new(ByteSink::default())),
        }
    }

    /// Feed one compressed chunk, returning the decompressed bytes that
    /// became available. An empty result just means the decoder needs more
    /// input; it is not an error.
    pub fn push(&mut self, compressed: &[u8]) -> Result<Vec<u8>> {
        let decoder = self
            .decoder
            .as_mut()
            .context("gzip decoder was already finished")?;
        decoder
            .write_all(compressed)
            .context("log object is not valid gzip data")?;
        Ok(std::mem::take(&mut decoder.get_mut().buf))
    }

    /// Signal end of input. Returns the final decompressed bytes, or an
    /// error if the compressed stream was truncated.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let decoder = self
            .decoder
            .take()
            .context("gzip decoder was already finished")?;
        let sink = decoder
            .finish()
            .context("gzip stream ended before the final member was complete")?;
        Ok(sink.buf)
    }
}

/// Incremental newline framing over decompressed chunks.
///
/// Lines may span any number of chunks. The trailing `\n` (and a `\r` before
/// it) is stripped; empty and whitespace-only lines are dropped, matching
/// how line-format logs are produced. A final unterminated line is returned
/// by `finish`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed decompressed bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0usize;
        while let Some(pos) = memchr(b'\n', &self.pending[start..]) {
            let end = start + pos;
            let line = trim_line(&self.pending[start..end]);
            if !line.is_empty() {
                lines.push(line.to_vec());
            }
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// End of input: the unterminated final line, if one is buffered.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let tail = std::mem::take(&mut self.pending);
        let line = trim_line(&tail);
        if line.is_empty() {
            None
        } else {
            Some(line.to_vec())
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        &[]
    } else {
        line
    }
}
