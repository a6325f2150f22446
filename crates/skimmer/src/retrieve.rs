//! The retriever: object store read stream plus decompression.
//!
//! `open` starts a streaming read of the referenced object and wires it
//! through the gzip inflater. The returned [`LogStream`] is the only view
//! the dispatcher gets: lazily produced, finite, non-restartable chunks of
//! decompressed bytes. Read and decompression failures surface as `Err`
//! from `next_chunk`, never out-of-band.

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::debug;

use crate::codec::GzipInflater;
use crate::creds::Credentials;
use crate::dispatch::LogReference;
use crate::store::{ByteStream, ObjectStore, StoreBackend};

#[derive(Debug, Clone)]
pub struct Retriever {
    store: StoreBackend,
}

impl Retriever {
    pub fn new(store: StoreBackend) -> Self {
        Self { store }
    }

    pub async fn open(
        &self,
        reference: &LogReference,
        credentials: &Credentials,
    ) -> Result<LogStream> {
        let raw = self
            .store
            .open_read(&reference.container, &reference.key, credentials)
            .await
            .with_context(|| {
                format!(
                    "could not open log object {}/{}",
                    reference.container, reference.key
                )
            })?;
        debug!(
            container = %reference.container,
            key = %reference.key,
            "log stream opened"
        );
        Ok(LogStream::new(raw))
    }
}

/// Decompressed view of one log object. `next_chunk` returns `Ok(None)`
/// exactly once, at a clean end of stream.
pub struct LogStream {
    inner: ByteStream,
    inflater: GzipInflater,
    finished: bool,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The boxed byte stream has no useful Debug output.
        f.debug_struct("LogStream")
            .field("finished", &self.finished)
            .finish()
    }
}

impl LogStream {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            inflater: GzipInflater::new(),
            finished: false,
        }
    }

    /// The next non-empty run of decompressed bytes, or `None` at end of
    /// stream. Small compressed chunks may decode to nothing; those are
    /// absorbed here so callers only ever see real data.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.inner.next().await {
                Some(chunk) => {
                    let chunk = chunk.context("error while reading the object stream")?;
                    let decompressed = self.inflater.push(&chunk)?;
                    if !decompressed.is_empty() {
                        return Ok(Some(decompressed));
                    }
                }
                None => {
                    self.finished = true;
                    let tail = self.inflater.finish()?;
                    return if tail.is_empty() { Ok(None) } else { Ok(Some(tail)) };
                }
            }
        }
    }
}
