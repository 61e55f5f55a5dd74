//! Retrieval coordinator: resolve a label to its latest content.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use anchorline_core::{ContentAddress, Label, LedgerRecord, ProductEvent, ShapeMetadata};
use anchorline_store::{ContentStore, Ledger, LedgerClient};

use crate::error::RetrievalError;

/// The latest content for a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    pub label: Label,
    pub address: ContentAddress,
    /// Payload bytes, verified against `address`.
    pub payload: Bytes,
    /// Timestamp of the anchoring record.
    pub timestamp: u64,
    /// Shape metadata from the anchoring record, if the producer supplied one.
    pub shape: Option<ShapeMetadata>,
}

/// A point-in-time snapshot of a label's anchors, oldest first.
///
/// Consuming: iterate it once.
#[derive(Debug)]
pub struct LedgerHistory {
    records: std::vec::IntoIter<LedgerRecord>,
}

impl Iterator for LedgerHistory {
    type Item = LedgerRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for LedgerHistory {}

/// Reads anchors from the ledger and their blocks from the store.
pub struct RetrievalCoordinator<S: ?Sized = dyn ContentStore, L: ?Sized = dyn LedgerClient> {
    store: Arc<S>,
    ledger: Arc<L>,
}

impl<S, L> RetrievalCoordinator<S, L>
where
    S: ContentStore + ?Sized,
    L: Ledger + ?Sized,
{
    pub fn new(store: Arc<S>, ledger: Arc<L>) -> Self {
        Self { store, ledger }
    }

    /// Fetch the most recently anchored content for `label`.
    ///
    /// The payload is checked against its address; altered bytes are an
    /// error, never a result.
    pub async fn get_latest(&self, label: &Label) -> Result<Retrieved, RetrievalError> {
        let record = self
            .ledger
            .latest(label)
            .await
            .map_err(|source| RetrievalError::Ledger {
                label: label.clone(),
                source,
            })?
            .ok_or_else(|| RetrievalError::NotFound(label.clone()))?;

        let address = record.address;
        let store_err = |source| RetrievalError::Store {
            label: label.clone(),
            address,
            source,
        };

        let payload = self
            .store
            .get(&address)
            .await
            .map_err(store_err)?
            .ok_or_else(|| RetrievalError::BlockMissing {
                label: label.clone(),
                address,
            })?;

        if !address.verifies(&payload) {
            let actual = ContentAddress::of(&payload);
            warn!(%label, %address, %actual, "content does not match its address");
            return Err(RetrievalError::IntegrityMismatch {
                label: label.clone(),
                address,
                actual,
            });
        }

        debug!(%label, %address, len = payload.len(), "retrieved");
        Ok(Retrieved {
            label: record.label,
            address,
            payload,
            timestamp: record.timestamp,
            shape: record.shape,
        })
    }

    /// Every anchor for `label`, in append order.
    pub async fn list_events(&self, label: &Label) -> Result<LedgerHistory, RetrievalError> {
        let records = self
            .ledger
            .history(label)
            .await
            .map_err(|source| RetrievalError::Ledger {
                label: label.clone(),
                source,
            })?;
        Ok(LedgerHistory {
            records: records.into_iter(),
        })
    }

    /// Every event published on the product `label`, including party
    /// associations.
    pub async fn product_events(&self, label: &Label) -> Result<Vec<ProductEvent>, RetrievalError> {
        self.ledger
            .product_events(label)
            .await
            .map_err(|source| RetrievalError::Ledger {
                label: label.clone(),
                source,
            })
    }
}
