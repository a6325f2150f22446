//! skimmer — streams gzip-compressed log objects out of an object store,
//! splits them into JSON records and upserts each record into a search
//! index.
//!
//! The pieces compose through small capability traits: credential
//! resolution ([`creds::ResolveCredentials`]), object access
//! ([`store::ObjectStore`]), the per-record callback
//! ([`dispatch::RecordHandler`]) and failure reporting
//! ([`dispatch::DispatchContext`]). [`run`] wires the default pipeline;
//! library callers can assemble their own from the same parts.

use anyhow::{Result, bail};
use tracing::info;

pub mod app_config;
pub mod codec;
pub mod creds;
pub mod dispatch;
pub mod ingest;
pub mod retrieve;
pub mod search;
pub mod session;
pub mod store;

use app_config::AppConfig;
use dispatch::{FailureSlot, LogReference};
use ingest::Ingestor;
use search::{SearchClient, UpsertHandler};
use session::SessionTracker;
use store::{HttpStore, StoreBackend};

/// Ingest one log object end to end: make sure the index exists, stream
/// and parse the object, upsert every record.
///
/// Returns the first failure reason as an `Err`; a cancelled or failed
/// session never reports success.
pub async fn run(config: AppConfig, reference: LogReference) -> Result<()> {
    let search = SearchClient::new(config.search)?;
    search.ensure_index().await?;

    let store = StoreBackend::Http(HttpStore::new(config.store)?);
    let ingestor = Ingestor::new(store, config.credentials.build());

    let mut handler = UpsertHandler::new(search);
    let ctx = FailureSlot::new();
    let tracker = SessionTracker::new();
    ingestor.ingest(&reference, &mut handler, &ctx, &tracker).await;

    if let Some(reason) = ctx.take() {
        bail!("{reason}");
    }
    if !tracker.is_complete() {
        bail!("ingestion ended without completing");
    }
    info!(records = tracker.record_count(), "run finished");
    Ok(())
}
