//! Ingestion coordinator: store, then anchor.
//!
//! Every item goes through one store+anchor unit: `put` the payload, then
//! `append` the resulting record, shape included, to the ledger. Items are
//! processed one at a time in delivery order, so per-label ordering on the
//! ledger matches the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use anchorline_core::{decode_item, DataItem, LedgerRecord};
use anchorline_store::{AppendOutcome, ContentStore, Ledger, LedgerClient};

use crate::channel::MessageSource;
use crate::error::IngestionError;

/// Default wait per receive in [`IngestionCoordinator::run`].
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Why the ingestion loop ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopExit {
    /// `stop()` was called.
    #[default]
    Stopped,
    /// The message source ended.
    ChannelClosed,
}

/// Summary of one [`IngestionCoordinator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Items stored and anchored.
    pub ingested: u64,
    /// Messages without a label.
    pub skipped: u64,
    /// Items that failed to decode, store or anchor.
    pub failed: u64,
    pub exit: LoopExit,
}

/// Start/stop control for a running loop, usable from other tasks.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    enabled: Arc<AtomicBool>,
}

impl IngestHandle {
    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Ask the loop to exit. An item already in flight completes first.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Drives items from a message source into the content store and ledger.
pub struct IngestionCoordinator<S: ?Sized = dyn ContentStore, L: ?Sized = dyn LedgerClient> {
    store: Arc<S>,
    ledger: Arc<L>,
    handle: IngestHandle,
    receive_timeout: Duration,
    failure_sink: Option<mpsc::UnboundedSender<IngestionError>>,
}

impl<S, L> IngestionCoordinator<S, L>
where
    S: ContentStore + ?Sized,
    L: Ledger + ?Sized,
{
    /// Create a stopped coordinator.
    pub fn new(store: Arc<S>, ledger: Arc<L>) -> Self {
        Self {
            store,
            ledger,
            handle: IngestHandle {
                enabled: Arc::new(AtomicBool::new(false)),
            },
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            failure_sink: None,
        }
    }

    /// Set how long each receive waits before re-checking the flag.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Forward every per-item failure of [`run`](Self::run) to `sink`.
    pub fn with_failure_sink(mut self, sink: mpsc::UnboundedSender<IngestionError>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    /// A handle to start/stop the loop from elsewhere.
    pub fn handle(&self) -> IngestHandle {
        self.handle.clone()
    }

    pub fn start(&self) {
        self.handle.start();
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_enabled()
    }

    /// Store and anchor one item.
    ///
    /// The ledger is only called once the store has returned an address.
    pub async fn on_item_received(&self, item: DataItem) -> Result<LedgerRecord, IngestionError> {
        let address = match self.store.put(&item.payload).await {
            Ok(address) => address,
            Err(source) => return Err(IngestionError::StoreFailure { item, source }),
        };

        let record = item.record(address);
        self.append(&record).await?;
        Ok(record)
    }

    /// Anchor a record whose payload is already stored.
    ///
    /// Used after an [`IngestionError::AnchorFailure`]. The ledger dedupes on
    /// the record's anchor key, so retrying an append that actually landed
    /// returns [`AppendOutcome::AlreadyAnchored`].
    pub async fn retry_anchor(&self, record: LedgerRecord) -> Result<AppendOutcome, IngestionError> {
        self.append(&record).await
    }

    async fn append(&self, record: &LedgerRecord) -> Result<AppendOutcome, IngestionError> {
        match self.ledger.append(record).await {
            Ok(outcome) => {
                debug!(label = %record.label, address = %record.address, seq = outcome.seq(), "anchored");
                Ok(outcome)
            }
            Err(source) => Err(IngestionError::AnchorFailure {
                record: record.clone(),
                source,
            }),
        }
    }

    /// Decode and ingest one multipart message. `Ok(None)` if it has no label.
    pub async fn on_message(&self, frames: &[bytes::Bytes]) -> Result<Option<LedgerRecord>, IngestionError> {
        match decode_item(frames)? {
            Some(item) => self.on_item_received(item).await.map(Some),
            None => {
                debug!("skipping message without label");
                Ok(None)
            }
        }
    }

    /// Ingest from `source` until stopped or the source closes.
    ///
    /// Enables the flag on entry. Per-item failures are logged, forwarded to
    /// the failure sink if one is attached, and do not end the loop.
    pub async fn run<M>(&self, source: &mut M) -> IngestReport
    where
        M: MessageSource + ?Sized,
    {
        self.start();
        info!(timeout_ms = self.receive_timeout.as_millis() as u64, "ingestion started");

        let mut report = IngestReport::default();
        report.exit = loop {
            if !self.is_enabled() {
                break LoopExit::Stopped;
            }

            let frames = match source.receive(self.receive_timeout).await {
                Ok(Some(frames)) => frames,
                Ok(None) => continue,
                Err(_) => break LoopExit::ChannelClosed,
            };

            match self.on_message(&frames).await {
                Ok(Some(_)) => report.ingested += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    self.report_failure(e);
                }
            }
        };

        info!(
            ingested = report.ingested,
            skipped = report.skipped,
            failed = report.failed,
            exit = ?report.exit,
            "ingestion ended"
        );
        report
    }

    fn report_failure(&self, error: IngestionError) {
        warn!(
            label = ?error.label(),
            address = ?error.address(),
            error = %error,
            "item failed"
        );
        if let Some(sink) = &self.failure_sink {
            // A dropped receiver just means nobody is listening any more.
            let _ = sink.send(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ScriptedSource};
    use anchorline_core::{ContentAddress, ElementType, Label, ShapeMetadata};
    use anchorline_store::{MemoryContentStore, MemoryLedger};
    use bytes::Bytes;

    fn label(s: &str) -> Label {
        Label::new(s).unwrap()
    }

    fn coordinator() -> (
        Arc<MemoryContentStore>,
        Arc<MemoryLedger>,
        IngestionCoordinator<MemoryContentStore, MemoryLedger>,
    ) {
        let store = Arc::new(MemoryContentStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let coord = IngestionCoordinator::new(store.clone(), ledger.clone())
            .with_receive_timeout(Duration::from_millis(10));
        (store, ledger, coord)
    }

    #[tokio::test]
    async fn test_item_is_stored_then_anchored() {
        let (store, ledger, coord) = coordinator();
        let item = DataItem::new(label("apple"), vec![1u8; 12], 99)
            .with_shape(ShapeMetadata::new(vec![2, 2, 3], ElementType::U8));

        let record = coord.on_item_received(item.clone()).await.unwrap();
        assert_eq!(record.address, ContentAddress::of(&item.payload));
        assert_eq!(record.timestamp, 99);
        assert!(store.contains(&record.address).await.unwrap());
        assert_eq!(record.shape, item.shape);
        assert_eq!(ledger.latest(&label("apple")).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_equal_payloads_keep_their_own_shapes() {
        let (store, ledger, coord) = coordinator();
        let bytes = vec![1u8; 12];
        let cube = ShapeMetadata::new(vec![2, 2, 3], ElementType::U8);
        let flat = ShapeMetadata::new(vec![12], ElementType::U8);

        coord
            .on_item_received(DataItem::new(label("apple"), bytes.clone(), 1).with_shape(cube.clone()))
            .await
            .unwrap();
        coord
            .on_item_received(DataItem::new(label("lemon"), bytes.clone(), 2))
            .await
            .unwrap();
        coord
            .on_item_received(DataItem::new(label("pear"), bytes, 3).with_shape(flat.clone()))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let shape_of = |l: &'static str| {
            let ledger = ledger.clone();
            async move { ledger.latest(&label(l)).await.unwrap().unwrap().shape }
        };
        assert_eq!(shape_of("apple").await, Some(cube));
        assert_eq!(shape_of("lemon").await, None);
        assert_eq!(shape_of("pear").await, Some(flat));
    }

    #[tokio::test]
    async fn test_retry_anchor_is_idempotent() {
        let (_, _, coord) = coordinator();
        let record = coord
            .on_item_received(DataItem::new(label("apple"), b"x".to_vec(), 1))
            .await
            .unwrap();
        assert_eq!(
            coord.retry_anchor(record).await.unwrap(),
            AppendOutcome::AlreadyAnchored { seq: 1 }
        );
    }

    #[tokio::test]
    async fn test_run_counts_and_skips() {
        let (_, ledger, coord) = coordinator();
        let items = [
            DataItem::new(label("apple"), b"a".to_vec(), 1),
            DataItem::new(label("lemon"), b"b".to_vec(), 2),
        ];
        let mut source = ScriptedSource::from_items(items.iter());
        source.push_frames(vec![Bytes::new(), Bytes::from_static(b"x"), Bytes::from_static(&[1])]);
        source.push_frames(vec![Bytes::from_static(b"apple")]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let coord = coord.with_failure_sink(tx);
        let report = coord.run(&mut source).await;

        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.exit, LoopExit::ChannelClosed);
        assert!(matches!(rx.try_recv().unwrap(), IngestionError::Malformed(_)));
        assert_eq!(ledger.history(&label("apple")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_while_idle() {
        let (_, _, coord) = coordinator();
        let coord = Arc::new(coord);
        let publisher = Channel::new(4);
        let mut sub = publisher.subscribe().await;

        let runner = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.run(&mut sub).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(coord.is_enabled());

        coord.stop();
        let report = tokio::time::timeout(Duration::from_millis(500), runner)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert_eq!(report.exit, LoopExit::Stopped);
        drop(publisher);
    }
}
