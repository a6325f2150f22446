//! Search index collaborator.
//!
//! Speaks the small slice of the index's REST surface the crate needs:
//! existence check and creation for the target index, and the per-record
//! upsert. The upsert policy is fixed: look the record up by its declared
//! identifier field, update it when a document with that `_id` already
//! exists, create it otherwise. A record without a usable identifier is
//! skipped with a warning, not failed; partially identified batches are a
//! fact of life in log streams.
//!
//! Query semantics beyond term-by-id are out of scope.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::dispatch::{Record, RecordEvent, RecordHandler};

fn default_search_by() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search endpoint, scheme and port included.
    pub endpoint: String,
    /// Index documents are written to.
    pub index: String,
    /// Record field holding the document identifier.
    #[serde(default = "default_search_by")]
    pub search_by: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Takes precedence over basic auth when set.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// What happened to one record at the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// No usable identifier; the record was not written.
    Skipped,
}

/// `hits.total` changed shape across index versions: a bare number in old
/// responses, `{ "value": n }` in newer ones. Both are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Legacy(u64),
    Object { value: u64 },
}

impl TotalHits {
    fn count(&self) -> u64 {
        match self {
            TotalHits::Legacy(n) => *n,
            TotalHits::Object { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    total: TotalHits,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    config: SearchConfig,
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials live in the config; keep them out of debug output.
        f.debug_struct("SearchClient")
            .field("endpoint", &self.config.endpoint)
            .field("index", &self.config.index)
            .field("search_by", &self.config.search_by)
            .finish()
    }
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build the http client for the search index")?;
        Ok(Self { client, config })
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/{}{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index,
            suffix
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(username) = &self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    fn json_body(request: reqwest::RequestBuilder, body: String) -> reqwest::RequestBuilder {
        request.header("Content-Type", "application/json").body(body)
    }

    pub async fn index_exists(&self) -> Result<bool> {
        let url = self.url("");
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .with_context(|| format!("HEAD {url} failed before a response arrived"))?;
        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            bail!("HEAD {url} returned {status}")
        }
    }

    pub async fn create_index(&self) -> Result<()> {
        let url = self.url("");
        let response = self
            .authorize(self.client.put(&url))
            .send()
            .await
            .with_context(|| format!("PUT {url} failed before a response arrived"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("PUT {url} returned {status}: {body}");
        }
        info!(index = %self.config.index, "created search index");
        Ok(())
    }

    /// Create the index unless it is already there.
    pub async fn ensure_index(&self) -> Result<()> {
        if self.index_exists().await? {
            debug!(index = %self.config.index, "search index already exists");
            return Ok(());
        }
        self.create_index().await
    }

    /// Documents whose `_id` equals `id`. Zero or one in practice; the
    /// count is all the upsert needs.
    async fn count_matching(&self, id: &str) -> Result<u64> {
        let url = self.url("/_search");
        let query = serde_json::json!({ "query": { "term": { "_id": id } } });
        let response = Self::json_body(self.authorize(self.client.post(&url)), query.to_string())
            .send()
            .await
            .with_context(|| format!("POST {url} failed before a response arrived"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("POST {url} returned {status}");
        }
        let body = response
            .text()
            .await
            .with_context(|| format!("could not read the response body from {url}"))?;
        let parsed: SearchResponse = serde_json::from_str(&body)
            .with_context(|| format!("unexpected search response shape from {url}"))?;
        Ok(parsed.hits.total.count())
    }

    async fn update(&self, id: &str, record: &Record) -> Result<()> {
        let url = self.url(&format!("/_update/{id}"));
        let body = serde_json::json!({ "doc": record });
        let response = Self::json_body(self.authorize(self.client.post(&url)), body.to_string())
            .send()
            .await
            .with_context(|| format!("POST {url} failed before a response arrived"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("POST {url} returned {status}: {body}");
        }
        Ok(())
    }

    async fn create(&self, id: &str, record: &Record) -> Result<()> {
        let url = self.url(&format!("/_create/{id}"));
        let body = serde_json::to_string(record).context("record is not serializable")?;
        let response = Self::json_body(self.authorize(self.client.put(&url)), body)
            .send()
            .await
            .with_context(|| format!("PUT {url} failed before a response arrived"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("PUT {url} returned {status}: {body}");
        }
        Ok(())
    }

    /// Write one record: update the existing document with its id, or
    /// create a new one. Records without a usable identifier are skipped.
    pub async fn upsert(&self, record: &Record) -> Result<UpsertOutcome> {
        let Some(id) = document_id(record, &self.config.search_by) else {
            warn!(
                field = %self.config.search_by,
                "record has no usable identifier; skipping"
            );
            return Ok(UpsertOutcome::Skipped);
        };

        if self.count_matching(&id).await? > 0 {
            self.update(&id, record)
                .await
                .with_context(|| format!("could not update document {id}"))?;
            debug!(%id, "updated document");
            Ok(UpsertOutcome::Updated)
        } else {
            self.create(&id, record)
                .await
                .with_context(|| format!("could not create document {id}"))?;
            debug!(%id, "created document");
            Ok(UpsertOutcome::Created)
        }
    }
}

/// A usable identifier is a non-empty string or a number. Anything else
/// (missing, null, objects, arrays, booleans) means skip.
fn document_id(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Record handler that writes every dispatched record to the index.
#[derive(Debug, Clone)]
pub struct UpsertHandler {
    client: SearchClient,
}

impl UpsertHandler {
    pub fn new(client: SearchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordHandler for UpsertHandler {
    async fn on_record(&mut self, event: RecordEvent<'_>) -> Result<()> {
        self.client
            .upsert(&event.record)
            .await
            .with_context(|| format!("could not index record {}", event.sequence))?;
        Ok(())
    }
}
