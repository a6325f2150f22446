//! The parser/dispatcher: splits a decompressed log stream into records and
//! hands each one to the caller's handler, in input order.
//!
//! Two mutually exclusive strategies, chosen by the declared [`LogFormat`]:
//!
//! - **Array**: buffer the whole object, parse one JSON document carrying a
//!   `Records` list, publish the full count, then run the dispatch loop.
//! - **Lines**: parse and dispatch each newline-delimited JSON document the
//!   moment its line is complete, while bytes are still arriving.
//!
//! Handlers see the same [`RecordEvent`] either way, so callers are
//! format-agnostic. A record handler's `on_record` for line *N* finishes
//! before line *N+1* is parsed; order is the contract, not throughput.
//!
//! A malformed document — the whole object in Array mode, any single line
//! in Lines mode — aborts the ingestion. The session is left incomplete and
//! the failure is reported through the caller's [`DispatchContext`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::creds::Credentials;
use crate::retrieve::LogStream;
use crate::session::SessionTracker;

/// One parsed log record. No schema is enforced here; downstream consumers
/// interpret the fields.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Declared encoding of a log object.
///
/// An absent format defaults to `Array` (the original wire default); an
/// unrecognized value is a deserialization error, not a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LogFormat {
    /// One JSON document with a `Records` list.
    #[default]
    Array,
    /// One JSON document per line.
    Lines,
}

/// Identifies one retrievable compressed log object. Immutable once a
/// retrieval begins.
#[derive(Debug, Clone, Deserialize)]
pub struct LogReference {
    pub container: String,
    pub key: String,
    #[serde(default)]
    pub format: LogFormat,
}

/// Everything a handler gets per record: the record itself, its 0-based
/// position, the reference being ingested and the credentials the retrieval
/// resolved. Replaces the untyped variadic forwarding of old.
#[derive(Debug)]
pub struct RecordEvent<'a> {
    pub record: Record,
    pub sequence: u64,
    pub reference: &'a LogReference,
    pub credentials: &'a Credentials,
}

/// Per-record callback seam. Implementations own whatever caller context
/// they need; the dispatcher only sequences the calls.
#[async_trait]
pub trait RecordHandler: Send {
    async fn on_record(&mut self, event: RecordEvent<'_>) -> Result<()>;
}

/// Capability for signaling unrecoverable failure back to whatever host
/// invoked the retrieval. Invoked at most once per session.
pub trait DispatchContext: Send + Sync {
    fn fail(&self, reason: &str);
}

impl<C: DispatchContext + ?Sized> DispatchContext for std::sync::Arc<C> {
    fn fail(&self, reason: &str) {
        (**self).fail(reason)
    }
}

/// Context that forwards failures to the log and nothing else. For hosts
/// that only want observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingContext;

impl DispatchContext for LoggingContext {
    fn fail(&self, reason: &str) {
        tracing::error!(reason, "log ingestion failed");
    }
}

/// Context that captures the first failure so synchronous callers can turn
/// it back into a `Result` after the session ends.
#[derive(Debug, Default)]
pub struct FailureSlot {
    slot: std::sync::Mutex<Option<String>>,
}

impl FailureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The captured failure reason, if the session failed.
    pub fn take(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl DispatchContext for FailureSlot {
    fn fail(&self, reason: &str) {
        if let Ok(mut slot) = self.slot.lock() {
            // First failure wins; the session reports at most one anyway.
            slot.get_or_insert_with(|| reason.to_string());
        }
    }
}

/// Array-format envelope: the whole object is one document with a `Records`
/// list. Other top-level fields are ignored.
#[derive(Debug, Deserialize)]
struct ArrayLog {
    #[serde(rename = "Records")]
    records: Vec<Record>,
}

/// Drive one decompressed stream to completion through `handler`.
///
/// Marks the tracker complete only after a clean end of stream; returns
/// early without completing if the tracker is cancelled.
pub(crate) async fn dispatch<H: RecordHandler>(
    stream: &mut LogStream,
    reference: &LogReference,
    credentials: &Credentials,
    handler: &mut H,
    tracker: &SessionTracker,
) -> Result<()> {
    match reference.format {
        LogFormat::Array => dispatch_array(stream, reference, credentials, handler, tracker).await,
        LogFormat::Lines => dispatch_lines(stream, reference, credentials, handler, tracker).await,
    }
}

async fn dispatch_array<H: RecordHandler>(
    stream: &mut LogStream,
    reference: &LogReference,
    credentials: &Credentials,
    handler: &mut H,
    tracker: &SessionTracker,
) -> Result<()> {
    let mut body = Vec::new();
    while let Some(chunk) = stream.next_chunk().await? {
        if tracker.is_cancelled() {
            debug!("ingestion cancelled while buffering the log object");
            return Ok(());
        }
        body.extend_from_slice(&chunk);
    }

    let log: ArrayLog = serde_json::from_slice(&body)
        .context("log object is not a JSON document with a `Records` list")?;

    // The full count is known the moment the document parses; publish it
    // before the dispatch loop runs, the way the original did.
    let total = log.records.len() as u64;
    tracker.add_records(total);
    debug!(records = total, "parsed array-format log");

    for (sequence, record) in log.records.into_iter().enumerate() {
        if tracker.is_cancelled() {
            debug!(sequence, "ingestion cancelled mid dispatch");
            return Ok(());
        }
        handler
            .on_record(RecordEvent {
                record,
                sequence: sequence as u64,
                reference,
                credentials,
            })
            .await
            .with_context(|| format!("record handler failed on record {sequence}"))?;
    }

    tracker.mark_complete();
    debug!(records = total, "finished array-format log");
    Ok(())
}

async fn dispatch_lines<H: RecordHandler>(
    stream: &mut LogStream,
    reference: &LogReference,
    credentials: &Credentials,
    handler: &mut H,
    tracker: &SessionTracker,
) -> Result<()> {
    let mut splitter = crate::codec::LineSplitter::default();
    let mut sequence = 0u64;

    while let Some(chunk) = stream.next_chunk().await? {
        for line in splitter.push(&chunk) {
            if tracker.is_cancelled() {
                debug!(sequence, "ingestion cancelled mid dispatch");
                return Ok(());
            }
            dispatch_line(&line, sequence, reference, credentials, handler, tracker).await?;
            sequence += 1;
        }
    }

    if let Some(line) = splitter.finish() {
        if tracker.is_cancelled() {
            return Ok(());
        }
        dispatch_line(&line, sequence, reference, credentials, handler, tracker).await?;
        sequence += 1;
    }

    tracker.mark_complete();
    debug!(records = sequence, "finished lines-format log");
    Ok(())
}

async fn dispatch_line<H: RecordHandler>(
    line: &[u8],
    sequence: u64,
    reference: &LogReference,
    credentials: &Credentials,
    handler: &mut H,
    tracker: &SessionTracker,
) -> Result<()> {
    let record: Record = serde_json::from_slice(line)
        .with_context(|| format!("line {} is not a JSON object", sequence + 1))?;
    trace!(sequence, "dispatching record");
    handler
        .on_record(RecordEvent {
            record,
            sequence,
            reference,
            credentials,
        })
        .await
        .with_context(|| format!("record handler failed on line {}", sequence + 1))?;
    tracker.add_records(1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use futures::StreamExt;

    use crate::store::ByteStream;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn log_stream(data: &[u8], chunk_size: usize) -> LogStream {
        let compressed = gzip(data);
        let chunks: Vec<_> = compressed
            .chunks(chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        let stream: ByteStream = futures::stream::iter(chunks).boxed();
        LogStream::new(stream)
    }

    fn reference(format: LogFormat) -> LogReference {
        LogReference {
            container: "logs".to_string(),
            key: "object.gz".to_string(),
            format,
        }
    }

    fn creds() -> Credentials {
        Credentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        }
    }

    #[derive(Debug, Default)]
    struct Collector {
        seen: Arc<Mutex<Vec<Record>>>,
    }

    #[async_trait]
    impl RecordHandler for Collector {
        async fn on_record(&mut self, event: RecordEvent<'_>) -> Result<()> {
            self.seen.lock().unwrap().push(event.record);
            Ok(())
        }
    }

    fn ids(seen: &Arc<Mutex<Vec<Record>>>) -> Vec<i64> {
        seen.lock()
            .unwrap()
            .iter()
            .map(|r| r.get("id").unwrap().as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn array_logs_dispatch_every_record_in_list_order() {
        let mut stream = log_stream(br#"{"Records":[{"id":1},{"id":2}]}"#, 5);
        let tracker = SessionTracker::new();
        let mut handler = Collector::default();
        let seen = handler.seen.clone();

        dispatch(&mut stream, &reference(LogFormat::Array), &creds(), &mut handler, &tracker)
            .await
            .unwrap();

        assert_eq!(ids(&seen), vec![1, 2]);
        assert_eq!(tracker.record_count(), 2);
        assert!(tracker.is_complete());
    }

    #[tokio::test]
    async fn array_count_is_published_before_the_dispatch_loop() {
        #[derive(Debug)]
        struct AssertCount {
            tracker: SessionTracker,
        }

        #[async_trait]
        impl RecordHandler for AssertCount {
            async fn on_record(&mut self, _event: RecordEvent<'_>) -> Result<()> {
                // Even the first callback already sees the full count.
                assert_eq!(self.tracker.record_count(), 3);
                Ok(())
            }
        }

        let mut stream = log_stream(br#"{"Records":[{"id":1},{"id":2},{"id":3}]}"#, 8);
        let tracker = SessionTracker::new();
        let mut handler = AssertCount {
            tracker: tracker.clone(),
        };
        dispatch(&mut stream, &reference(LogFormat::Array), &creds(), &mut handler, &tracker)
            .await
            .unwrap();
        assert!(tracker.is_complete());
    }

    #[tokio::test]
    async fn lines_logs_dispatch_each_line_in_order() {
        let mut stream = log_stream(b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n", 3);
        let tracker = SessionTracker::new();
        let mut handler = Collector::default();
        let seen = handler.seen.clone();

        dispatch(&mut stream, &reference(LogFormat::Lines), &creds(), &mut handler, &tracker)
            .await
            .unwrap();

        assert_eq!(ids(&seen), vec![1, 2, 3]);
        assert_eq!(tracker.record_count(), 3);
        assert!(tracker.is_complete());
    }

    #[tokio::test]
    async fn lines_logs_without_a_trailing_newline_still_dispatch_the_last_record() {
        let mut stream = log_stream(b"{\"id\":1}\n{\"id\":2}", 4);
        let tracker = SessionTracker::new();
        let mut handler = Collector::default();
        let seen = handler.seen.clone();

        dispatch(&mut stream, &reference(LogFormat::Lines), &creds(), &mut handler, &tracker)
            .await
            .unwrap();

        assert_eq!(ids(&seen), vec![1, 2]);
        assert_eq!(tracker.record_count(), 2);
        assert!(tracker.is_complete());
    }

    #[tokio::test]
    async fn a_malformed_line_aborts_and_leaves_the_session_incomplete() {
        let mut stream = log_stream(b"{\"id\":1}\nnot json\n{\"id\":3}\n", 6);
        let tracker = SessionTracker::new();
        let mut handler = Collector::default();
        let seen = handler.seen.clone();

        let err = dispatch(
            &mut stream,
            &reference(LogFormat::Lines),
            &creds(),
            &mut handler,
            &tracker,
        )
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("line 2"));
        assert_eq!(ids(&seen), vec![1]);
        assert_eq!(tracker.record_count(), 1);
        assert!(!tracker.is_complete());
    }

    #[tokio::test]
    async fn a_malformed_array_document_aborts_before_any_dispatch() {
        let mut stream = log_stream(br#"{"NotRecords":[]}"#, 8);
        let tracker = SessionTracker::new();
        let mut handler = Collector::default();
        let seen = handler.seen.clone();

        let err = dispatch(
            &mut stream,
            &reference(LogFormat::Array),
            &creds(),
            &mut handler,
            &tracker,
        )
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("Records"));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(tracker.record_count(), 0);
        assert!(!tracker.is_complete());
    }

    #[tokio::test]
    async fn a_cancelled_session_stops_without_completing_or_failing() {
        let mut stream = log_stream(b"{\"id\":1}\n{\"id\":2}\n", 4);
        let tracker = SessionTracker::new();
        tracker.cancel();
        let mut handler = Collector::default();
        let seen = handler.seen.clone();

        dispatch(&mut stream, &reference(LogFormat::Lines), &creds(), &mut handler, &tracker)
            .await
            .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(tracker.record_count(), 0);
        assert!(!tracker.is_complete());
    }

    #[test]
    fn absent_format_defaults_to_array() {
        let reference: LogReference =
            serde_json::from_str(r#"{"container":"c","key":"k"}"#).unwrap();
        assert_eq!(reference.format, LogFormat::Array);
    }

    #[test]
    fn unrecognized_format_values_are_rejected() {
        let result =
            serde_json::from_str::<LogReference>(r#"{"container":"c","key":"k","format":"Csv"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn logging_context_only_logs() {
        // Must not panic or capture anything; the log line is the output.
        LoggingContext.fail("stream went away");
    }

    #[test]
    fn failure_slot_keeps_only_the_first_reason() {
        let slot = FailureSlot::new();
        slot.fail("first");
        slot.fail("second");
        assert_eq!(slot.take(), Some("first".to_string()));
        assert_eq!(slot.take(), None);
    }
}
