//! Data items and the ledger facts derived from them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shape::ShapeMetadata;
use crate::types::{ContentAddress, Label};

/// A labelled payload produced upstream.
///
/// Immutable once created; the ingestion coordinator consumes each item once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    /// Product or class the item belongs to.
    pub label: Label,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Acquisition time in microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Optional dimensions of the payload, anchored with the item's record.
    pub shape: Option<ShapeMetadata>,
}

impl DataItem {
    /// Create an item without shape metadata.
    pub fn new(label: Label, payload: impl Into<Bytes>, timestamp: u64) -> Self {
        Self {
            label,
            payload: payload.into(),
            timestamp,
            shape: None,
        }
    }

    /// Create an item stamped with the current time.
    pub fn now(label: Label, payload: impl Into<Bytes>) -> Self {
        Self::new(label, payload, now_micros())
    }

    /// Attach shape metadata.
    pub fn with_shape(mut self, shape: ShapeMetadata) -> Self {
        self.shape = Some(shape);
        self
    }

    /// The content address this item's payload will be stored under.
    pub fn address(&self) -> ContentAddress {
        ContentAddress::of(&self.payload)
    }

    /// The ledger record anchoring this item at `address`.
    pub fn record(&self, address: ContentAddress) -> LedgerRecord {
        LedgerRecord {
            label: self.label.clone(),
            address,
            timestamp: self.timestamp,
            shape: self.shape.clone(),
        }
    }
}

/// The anchored fact: `label` had content `address` at `timestamp`.
///
/// Once appended to the ledger it is never mutated. Shape metadata rides on
/// the record rather than on the block, so two items with equal bytes keep
/// their own shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub label: Label,
    pub address: ContentAddress,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeMetadata>,
}

impl LedgerRecord {
    /// The natural idempotency key of this record.
    ///
    /// Appending the same `(label, address, timestamp)` twice must not create
    /// a second anchor; ledgers deduplicate on this key. The shape is not part
    /// of it: the first anchor wins.
    pub fn anchor_key(&self) -> AnchorKey {
        let mut hasher = blake3::Hasher::new_derive_key("anchorline-anchor-v0");
        hasher.update(self.label.as_str().as_bytes());
        hasher.update(&[0x00]);
        hasher.update(self.address.as_bytes());
        hasher.update(&self.timestamp.to_be_bytes());
        AnchorKey(*hasher.finalize().as_bytes())
    }
}

/// A 32-byte idempotency key for ledger appends.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorKey(pub [u8; 32]);

impl AnchorKey {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for AnchorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnchorKey({})", &self.to_hex()[..16])
    }
}

/// An entry in a product's published event list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEvent {
    /// Ledger-wide append sequence, 1-based.
    pub seq: u64,
    /// The product the event was published on.
    pub label: Label,
    pub kind: ProductEventKind,
}

/// What happened to a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProductEventKind {
    /// Content was anchored against the product.
    DataAdded {
        address: ContentAddress,
        timestamp: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape: Option<ShapeMetadata>,
    },
    /// A party was associated with the product.
    PartyAssociated { party_id: String },
}

impl ProductEvent {
    /// Event name as published by the ledger.
    pub fn name(&self) -> &'static str {
        match self.kind {
            ProductEventKind::DataAdded { .. } => "data_added",
            ProductEventKind::PartyAssociated { .. } => "party_associated",
        }
    }

    /// The ledger record, if this is a data event.
    pub fn as_record(&self) -> Option<LedgerRecord> {
        match &self.kind {
            ProductEventKind::DataAdded {
                address,
                timestamp,
                shape,
            } => Some(LedgerRecord {
                label: self.label.clone(),
                address: *address,
                timestamp: *timestamp,
                shape: shape.clone(),
            }),
            ProductEventKind::PartyAssociated { .. } => None,
        }
    }
}

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
