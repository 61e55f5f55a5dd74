//! Client traits: the abstract interfaces the pipeline talks to.
//!
//! The pipeline is agnostic to where blocks and anchors live. Implementations
//! include in-memory and SQLite backends in this crate and RPC clients in
//! `anchorline-rpc`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use anchorline_core::{ContentAddress, Label, LedgerRecord, ProductEvent};

use crate::error::Result;

/// Id of the contract that must be deployed before the registry accepts
/// products and parties.
pub const REGISTRY_CONTRACT: &str = "registry";

/// A content-addressable block store.
///
/// # Design Notes
///
/// - **Idempotent puts**: putting the same bytes twice returns the same address.
/// - **No reshaping**: payloads are opaque. Shape metadata travels on the
///   ledger record, never with the block.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a payload and return its content address.
    async fn put(&self, payload: &[u8]) -> Result<ContentAddress>;

    /// Fetch a payload by address. `None` if the store does not hold it.
    async fn get(&self, address: &ContentAddress) -> Result<Option<Bytes>>;

    /// Check if a block exists.
    async fn contains(&self, address: &ContentAddress) -> Result<bool>;

    /// Remove a block. Returns whether anything was removed.
    async fn purge(&self, address: &ContentAddress) -> Result<bool>;
}

/// Result of appending a record to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendOutcome {
    /// A new anchor was appended at `seq`.
    Appended { seq: u64 },
    /// The record's anchor key was already present at `seq` (idempotent).
    AlreadyAnchored { seq: u64 },
}

impl AppendOutcome {
    /// The sequence number of the anchor.
    pub fn seq(&self) -> u64 {
        match self {
            AppendOutcome::Appended { seq } | AppendOutcome::AlreadyAnchored { seq } => *seq,
        }
    }
}

/// An append-only registry of label -> content-address anchors.
///
/// "Latest" is defined by append order, not by record timestamp: two records
/// with equal timestamps resolve to the one appended last.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append a record. Deduplicated on [`LedgerRecord::anchor_key`].
    async fn append(&self, record: &LedgerRecord) -> Result<AppendOutcome>;

    /// The most recently appended record for a label.
    async fn latest(&self, label: &Label) -> Result<Option<LedgerRecord>>;

    /// Every record for a label, in append order.
    async fn history(&self, label: &Label) -> Result<Vec<LedgerRecord>>;

    /// Every event published on a product, in append order.
    async fn product_events(&self, label: &Label) -> Result<Vec<ProductEvent>>;
}

/// Snapshot of the registry returned by [`Registry::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySummary {
    /// Deployed contract ids, sorted.
    pub contracts: Vec<String>,
    pub products: usize,
    pub parties: usize,
    /// Number of data anchors on the ledger.
    pub records: u64,
}

/// Administrative pass-through operations on the ledger's registry.
///
/// Repeating a write that is already in effect fails with
/// [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists). A
/// conflicting write, such as a known party id with different contact info,
/// fails with `InvalidInput`.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Deploy a contract by id.
    async fn deploy_contract(&self, contract_id: &str) -> Result<()>;

    /// Load the registry state.
    async fn initialize(&self) -> Result<RegistrySummary>;

    /// Register a product.
    async fn add_product(&self, label: &Label) -> Result<()>;

    /// Register a party with its contact info.
    async fn add_party(&self, party_id: &str, contact_info: &str) -> Result<()>;

    /// Associate a party with a product.
    async fn associate_party(&self, party_id: &str, product: &Label) -> Result<()>;
}

/// The full ledger client surface: anchoring plus registry administration.
pub trait LedgerClient: Ledger + Registry {}

impl<T: Ledger + Registry + ?Sized> LedgerClient for T {}

/// Behaviour switches for the reference ledger backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    /// Reject appends for labels that were never registered as products.
    pub require_registered_products: bool,
}
