//! HTTP object store backend.
//!
//! Talks to an S3-compatible gateway: `GET {endpoint}/{container}/{key}`
//! for reads, `PUT` for uploads. Request signing is out of scope; resolved
//! credentials ride along as basic auth plus an optional session-token
//! header, which is what header-auth gateways accept.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::creds::Credentials;
use crate::store::{ByteStream, ObjectPayload, ObjectStore};

#[derive(Debug, Clone, Deserialize)]
pub struct HttpStoreConfig {
    /// Base URL of the gateway, scheme and port included.
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    config: HttpStoreConfig,
}

impl HttpStore {
    /// Builds the backend and its HTTP client. Connect timeout only — a
    /// whole-request timeout would kill long streaming downloads.
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build the http client for the object store")?;
        Ok(Self { client, config })
    }

    fn object_url(&self, container: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            container,
            key
        )
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        credentials: &Credentials,
    ) -> reqwest::RequestBuilder {
        let mut request =
            request.basic_auth(&credentials.access_key_id, Some(&credentials.secret_access_key));
        if let Some(token) = &credentials.session_token {
            request = request.header("x-session-token", token);
        }
        request
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn open_read(
        &self,
        container: &str,
        key: &str,
        credentials: &Credentials,
    ) -> Result<ByteStream> {
        let url = self.object_url(container, key);
        let response = self
            .authorize(self.client.get(&url), credentials)
            .send()
            .await
            .with_context(|| format!("GET {url} failed before a response arrived"))?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "GET {url} returned {status}; make sure the object exists and the \
                 endpoint serves this container"
            );
        }

        debug!(%url, "opened object read stream");
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(anyhow::Error::from));
        Ok(stream.boxed())
    }

    async fn put(&self, payload: ObjectPayload, credentials: &Credentials) -> Result<()> {
        let url = self.object_url(&payload.container, &payload.key);
        let mut request = self
            .authorize(self.client.put(&url), credentials)
            .body(payload.body);
        if let Some(content_type) = &payload.content_type {
            request = request.header("Content-Type", content_type);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("PUT {url} failed before a response arrived"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("PUT {url} returned {status}: {body}");
        }
        debug!(%url, "object uploaded");
        Ok(())
    }
}
