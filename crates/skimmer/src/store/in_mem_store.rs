//! In-memory object store backend, for tests and local experiments.
//!
//! Reads are served in fixed-size chunks so consumers exercise the same
//! chunk-boundary handling they would see against a real gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use futures::StreamExt;

use crate::creds::Credentials;
use crate::store::{ByteStream, ObjectPayload, ObjectStore};

const DEFAULT_CHUNK_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    chunk_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk size for reads. Small values surface boundary bugs in tests.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn insert(&self, container: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("in-memory store mutex poisoned"))?;
        objects.insert((container.to_string(), key.to_string()), body);
        Ok(())
    }

    pub fn get(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("in-memory store mutex poisoned"))?;
        Ok(objects
            .get(&(container.to_string(), key.to_string()))
            .cloned())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn open_read(
        &self,
        container: &str,
        key: &str,
        _credentials: &Credentials,
    ) -> Result<ByteStream> {
        let Some(body) = self.get(container, key)? else {
            bail!("object {container}/{key} does not exist");
        };
        let chunks: Vec<Result<Vec<u8>>> = body
            .chunks(self.chunk_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn put(&self, payload: ObjectPayload, _credentials: &Credentials) -> Result<()> {
        self.insert(&payload.container, &payload.key, payload.body)
    }
}
