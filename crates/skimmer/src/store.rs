//! Object store collaborators.
//!
//! The core needs exactly two capabilities from an object store: open a
//! streaming read of one object, and upload one object. Both sit behind the
//! [`ObjectStore`] trait; concrete backends are dispatched through
//! [`StoreBackend`] so callers never know whether bytes come off the wire
//! or out of a test fixture.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::creds::Credentials;

pub mod http_store;
pub mod in_mem_store;

pub use http_store::{HttpStore, HttpStoreConfig};
pub use in_mem_store::InMemoryStore;

/// Raw (still compressed) object bytes, in arrival order. `Err` items are
/// the asynchronous failure channel for read problems: the stream consumer
/// observes them, they are never swallowed here.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// One object headed back to the store.
#[derive(Debug, Clone)]
pub struct ObjectPayload {
    pub container: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStore: std::fmt::Debug {
    /// Open a streaming read of `container`/`key`. The returned stream is
    /// finite and non-restartable.
    async fn open_read(
        &self,
        container: &str,
        key: &str,
        credentials: &Credentials,
    ) -> Result<ByteStream>;

    /// Upload one object. Not retried by the core; failure is the caller's
    /// to report.
    async fn put(&self, payload: ObjectPayload, credentials: &Credentials) -> Result<()>;
}

/// Concrete store dispatch.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Http(HttpStore),
    InMemory(InMemoryStore),
}

#[async_trait]
impl ObjectStore for StoreBackend {
    async fn open_read(
        &self,
        container: &str,
        key: &str,
        credentials: &Credentials,
    ) -> Result<ByteStream> {
        match self {
            StoreBackend::Http(store) => store.open_read(container, key, credentials).await,
            StoreBackend::InMemory(store) => store.open_read(container, key, credentials).await,
        }
    }

    async fn put(&self, payload: ObjectPayload, credentials: &Credentials) -> Result<()> {
        match self {
            StoreBackend::Http(store) => store.put(payload, credentials).await,
            StoreBackend::InMemory(store) => store.put(payload, credentials).await,
        }
    }
}
