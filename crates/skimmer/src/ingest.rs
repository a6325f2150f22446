//! Orchestration of one ingestion session.
//!
//! An [`Ingestor`] ties the collaborators together: resolve credentials,
//! open the log stream, drive the dispatcher. Every error on that path is
//! reported exactly once through the caller's [`DispatchContext`] and the
//! session is abandoned with `is_complete() == false`; the tracker and the
//! failure report together tell the host everything it can know.
//!
//! `start` spawns the session on the runtime with a fresh per-call tracker,
//! so overlapping ingestions never share state.

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::creds::{ProviderBackend, ResolveCredentials};
use crate::dispatch::{DispatchContext, LogReference, RecordHandler, dispatch};
use crate::retrieve::Retriever;
use crate::session::SessionTracker;
use crate::store::StoreBackend;

#[derive(Debug, Clone)]
pub struct Ingestor {
    retriever: Retriever,
    provider: ProviderBackend,
}

impl Ingestor {
    pub fn new(store: StoreBackend, provider: ProviderBackend) -> Self {
        Self {
            retriever: Retriever::new(store),
            provider,
        }
    }

    /// Run one session to the end on the current task.
    ///
    /// Completion and progress land on `tracker`; an unrecoverable error is
    /// reported once via `ctx.fail` and logged, never returned. Callers who
    /// need the failure as a value use a capturing context.
    pub async fn ingest<H, C>(
        &self,
        reference: &LogReference,
        handler: &mut H,
        ctx: &C,
        tracker: &SessionTracker,
    ) where
        H: RecordHandler,
        C: DispatchContext + ?Sized,
    {
        if let Err(err) = self.try_ingest(reference, handler, tracker).await {
            let reason = format!("{err:#}");
            error!(
                container = %reference.container,
                key = %reference.key,
                "ingestion failed: {reason}"
            );
            ctx.fail(&reason);
        }
    }

    async fn try_ingest<H: RecordHandler>(
        &self,
        reference: &LogReference,
        handler: &mut H,
        tracker: &SessionTracker,
    ) -> Result<()> {
        let credentials = self
            .provider
            .resolve()
            .await
            .context("could not resolve object store credentials")?;
        debug!(
            container = %reference.container,
            key = %reference.key,
            format = ?reference.format,
            "starting ingestion"
        );

        let mut stream = self.retriever.open(reference, &credentials).await?;
        dispatch(&mut stream, reference, &credentials, handler, tracker).await?;

        if tracker.is_complete() {
            info!(
                container = %reference.container,
                key = %reference.key,
                records = tracker.record_count(),
                "ingestion complete"
            );
        }
        Ok(())
    }

    /// Spawn one session in the background on a fresh tracker.
    pub fn start<H, C>(&self, reference: LogReference, mut handler: H, ctx: C) -> Ingestion
    where
        H: RecordHandler + 'static,
        C: DispatchContext + 'static,
    {
        let tracker = SessionTracker::new();
        let ingestor = self.clone();
        let task_tracker = tracker.clone();
        let task = tokio::spawn(async move {
            ingestor
                .ingest(&reference, &mut handler, &ctx, &task_tracker)
                .await;
        });
        Ingestion { tracker, task }
    }
}

/// Handle to a background session started by [`Ingestor::start`].
#[derive(Debug)]
pub struct Ingestion {
    tracker: SessionTracker,
    task: tokio::task::JoinHandle<()>,
}

impl Ingestion {
    /// Progress handle; cloneable, pollable from anywhere.
    pub fn tracker(&self) -> SessionTracker {
        self.tracker.clone()
    }

    /// Ask the session to stop at the next record boundary.
    pub fn cancel(&self) {
        self.tracker.cancel();
    }

    /// Wait until the session ends, however it ends. The outcome is on the
    /// tracker and the dispatch context, not in the return value.
    pub async fn join(self) -> Result<SessionTracker> {
        self.task
            .await
            .context("ingestion task panicked or was aborted")?;
        Ok(self.tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use crate::creds::{Credentials, EnvProvider, StaticProvider};
    use crate::dispatch::{FailureSlot, LogFormat, Record, RecordEvent};
    use crate::store::InMemoryStore;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn static_provider() -> ProviderBackend {
        ProviderBackend::Static(StaticProvider::new(Credentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        }))
    }

    fn ingestor_with(store: InMemoryStore) -> Ingestor {
        Ingestor::new(StoreBackend::InMemory(store), static_provider())
    }

    fn reference(key: &str, format: LogFormat) -> LogReference {
        LogReference {
            container: "logs".to_string(),
            key: key.to_string(),
            format,
        }
    }

    #[derive(Debug, Default, Clone)]
    struct Collector {
        seen: Arc<Mutex<Vec<Record>>>,
    }

    #[async_trait]
    impl RecordHandler for Collector {
        async fn on_record(&mut self, event: RecordEvent<'_>) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn a_full_session_dispatches_counts_and_completes() {
        let store = InMemoryStore::with_chunk_size(7);
        store
            .insert("logs", "trail.gz", gzip(br#"{"Records":[{"id":1},{"id":2}]}"#))
            .unwrap();
        let ingestor = ingestor_with(store);

        let mut handler = Collector::default();
        let seen = handler.seen.clone();
        let ctx = FailureSlot::new();
        let tracker = SessionTracker::new();
        ingestor
            .ingest(&reference("trail.gz", LogFormat::Array), &mut handler, &ctx, &tracker)
            .await;

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(tracker.record_count(), 2);
        assert!(tracker.is_complete());
        assert_eq!(ctx.take(), None);
    }

    #[tokio::test]
    async fn a_missing_object_fails_once_and_never_completes() {
        let ingestor = ingestor_with(InMemoryStore::new());

        let mut handler = Collector::default();
        let ctx = FailureSlot::new();
        let tracker = SessionTracker::new();
        ingestor
            .ingest(&reference("absent.gz", LogFormat::Lines), &mut handler, &ctx, &tracker)
            .await;

        let reason = ctx.take().unwrap();
        assert!(reason.contains("absent.gz"));
        assert!(!tracker.is_complete());
        assert_eq!(tracker.record_count(), 0);
    }

    #[tokio::test]
    async fn a_handler_error_aborts_with_progress_already_counted() {
        #[derive(Debug)]
        struct FailOnSecond {
            calls: u64,
        }

        #[async_trait]
        impl RecordHandler for FailOnSecond {
            async fn on_record(&mut self, _event: RecordEvent<'_>) -> anyhow::Result<()> {
                self.calls += 1;
                if self.calls == 2 {
                    anyhow::bail!("downstream rejected the record");
                }
                Ok(())
            }
        }

        let store = InMemoryStore::with_chunk_size(5);
        store
            .insert("logs", "t.gz", gzip(b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n"))
            .unwrap();
        let ingestor = ingestor_with(store);

        let mut handler = FailOnSecond { calls: 0 };
        let ctx = FailureSlot::new();
        let tracker = SessionTracker::new();
        ingestor
            .ingest(&reference("t.gz", LogFormat::Lines), &mut handler, &ctx, &tracker)
            .await;

        let reason = ctx.take().unwrap();
        assert!(reason.contains("downstream rejected the record"));
        // Only the line before the failure made it into the count.
        assert_eq!(tracker.record_count(), 1);
        assert!(!tracker.is_complete());
    }

    #[tokio::test]
    async fn a_truncated_object_fails_without_completing() {
        let compressed = gzip(b"{\"id\":1}\n{\"id\":2}\n");
        let cut = compressed.len() - 6;
        let store = InMemoryStore::with_chunk_size(4);
        store.insert("logs", "cut.gz", compressed[..cut].to_vec()).unwrap();
        let ingestor = ingestor_with(store);

        let mut handler = Collector::default();
        let ctx = FailureSlot::new();
        let tracker = SessionTracker::new();
        ingestor
            .ingest(&reference("cut.gz", LogFormat::Lines), &mut handler, &ctx, &tracker)
            .await;

        assert!(ctx.take().is_some());
        assert!(!tracker.is_complete());
    }

    #[tokio::test]
    async fn unresolvable_credentials_fail_the_session() {
        let store = InMemoryStore::new();
        store.insert("logs", "t.gz", gzip(b"{}\n")).unwrap();
        let ingestor = Ingestor::new(
            StoreBackend::InMemory(store),
            ProviderBackend::Env(EnvProvider::with_prefix("SKIMMER_INGEST_UNSET")),
        );

        let mut handler = Collector::default();
        let ctx = FailureSlot::new();
        let tracker = SessionTracker::new();
        ingestor
            .ingest(&reference("t.gz", LogFormat::Lines), &mut handler, &ctx, &tracker)
            .await;

        let reason = ctx.take().unwrap();
        assert!(reason.contains("credentials"));
        assert!(!tracker.is_complete());
    }

    #[tokio::test]
    async fn started_sessions_run_in_the_background_and_join_cleanly() {
        let store = InMemoryStore::with_chunk_size(8);
        store
            .insert("logs", "bg.gz", gzip(b"{\"id\":1}\n{\"id\":2}\n"))
            .unwrap();
        let ingestor = ingestor_with(store);

        let handler = Collector::default();
        let seen = handler.seen.clone();
        let ctx = Arc::new(FailureSlot::new());
        let ingestion =
            ingestor.start(reference("bg.gz", LogFormat::Lines), handler, ctx.clone());

        let tracker = ingestion.join().await.unwrap();
        assert!(tracker.is_complete());
        assert_eq!(tracker.record_count(), 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(ctx.take(), None);
    }

    #[tokio::test]
    async fn concurrent_sessions_keep_separate_trackers() {
        let store = InMemoryStore::with_chunk_size(8);
        store.insert("logs", "one.gz", gzip(b"{\"id\":1}\n")).unwrap();
        store
            .insert("logs", "three.gz", gzip(b"{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n"))
            .unwrap();
        let ingestor = ingestor_with(store);

        let first = ingestor.start(
            reference("one.gz", LogFormat::Lines),
            Collector::default(),
            Arc::new(FailureSlot::new()),
        );
        let second = ingestor.start(
            reference("three.gz", LogFormat::Lines),
            Collector::default(),
            Arc::new(FailureSlot::new()),
        );

        let first = first.join().await.unwrap();
        let second = second.join().await.unwrap();
        assert_eq!(first.record_count(), 1);
        assert_eq!(second.record_count(), 3);
        assert!(first.is_complete());
        assert!(second.is_complete());
    }

    #[tokio::test]
    async fn cancelled_sessions_end_neither_complete_nor_failed() {
        let store = InMemoryStore::with_chunk_size(4);
        store
            .insert("logs", "c.gz", gzip(b"{\"id\":1}\n{\"id\":2}\n"))
            .unwrap();
        let ingestor = ingestor_with(store);

        let ctx = Arc::new(FailureSlot::new());
        let ingestion = ingestor.start(
            reference("c.gz", LogFormat::Lines),
            Collector::default(),
            ctx.clone(),
        );
        ingestion.cancel();
        let tracker = ingestion.join().await.unwrap();

        assert!(!tracker.is_complete());
        assert_eq!(ctx.take(), None);
    }
}
