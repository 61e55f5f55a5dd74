//! In-memory implementations of the client traits.
//!
//! These have the same semantics as the SQLite backends but keep everything
//! in memory with no persistence. Primarily for tests and demos.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use anchorline_core::{AnchorKey, ContentAddress, Label, LedgerRecord, ProductEvent, ProductEventKind};

use crate::error::{Result, StoreError};
use crate::traits::{
    AppendOutcome, ContentStore, Ledger, LedgerPolicy, Registry, RegistrySummary,
    REGISTRY_CONTRACT,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Content store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory content store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryContentStore {
    blocks: RwLock<HashMap<ContentAddress, Bytes>>,
}

impl MemoryContentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the store holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, payload: &[u8]) -> Result<ContentAddress> {
        let address = ContentAddress::of(payload);
        let mut blocks = write(&self.blocks)?;
        blocks
            .entry(address)
            .or_insert_with(|| Bytes::copy_from_slice(payload));
        Ok(address)
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Bytes>> {
        let blocks = read(&self.blocks)?;
        Ok(blocks.get(address).cloned())
    }

    async fn contains(&self, address: &ContentAddress) -> Result<bool> {
        let blocks = read(&self.blocks)?;
        Ok(blocks.contains_key(address))
    }

    async fn purge(&self, address: &ContentAddress) -> Result<bool> {
        let mut blocks = write(&self.blocks)?;
        Ok(blocks.remove(address).is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory ledger and registry.
pub struct MemoryLedger {
    policy: LedgerPolicy,
    inner: RwLock<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    /// Every event in append order; `seq` is index + 1.
    events: Vec<ProductEvent>,

    /// Label -> indices into `events`.
    by_label: HashMap<Label, Vec<usize>>,

    /// Anchor key -> seq, for idempotent appends.
    anchors: HashMap<AnchorKey, u64>,

    contracts: BTreeSet<String>,
    products: BTreeSet<Label>,
    parties: BTreeMap<String, String>,
    associations: HashSet<(String, Label)>,
}

impl LedgerInner {
    fn push_event(&mut self, label: Label, kind: ProductEventKind) -> u64 {
        let seq = self.events.len() as u64 + 1;
        self.by_label
            .entry(label.clone())
            .or_default()
            .push(self.events.len());
        self.events.push(ProductEvent { seq, label, kind });
        seq
    }

    fn events_for<'a>(&'a self, label: &Label) -> impl DoubleEndedIterator<Item = &'a ProductEvent> {
        self.by_label
            .get(label)
            .map(|idx| idx.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&i| &self.events[i])
    }

    fn require_registry(&self) -> Result<()> {
        if self.contracts.contains(REGISTRY_CONTRACT) {
            Ok(())
        } else {
            Err(StoreError::InvalidInput("registry not deployed".into()))
        }
    }
}

impl MemoryLedger {
    /// Create an empty ledger with the default policy.
    pub fn new() -> Self {
        Self::with_policy(LedgerPolicy::default())
    }

    /// Create an empty ledger with the given policy.
    pub fn with_policy(policy: LedgerPolicy) -> Self {
        Self {
            policy,
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    /// Number of data anchors.
    pub fn record_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.anchors.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, record: &LedgerRecord) -> Result<AppendOutcome> {
        let mut inner = write(&self.inner)?;

        let key = record.anchor_key();
        if let Some(&seq) = inner.anchors.get(&key) {
            return Ok(AppendOutcome::AlreadyAnchored { seq });
        }

        if self.policy.require_registered_products && !inner.products.contains(&record.label) {
            return Err(StoreError::InvalidInput(format!(
                "product label {} not recognized",
                record.label
            )));
        }

        let seq = inner.push_event(
            record.label.clone(),
            ProductEventKind::DataAdded {
                address: record.address,
                timestamp: record.timestamp,
                shape: record.shape.clone(),
            },
        );
        inner.anchors.insert(key, seq);
        Ok(AppendOutcome::Appended { seq })
    }

    async fn latest(&self, label: &Label) -> Result<Option<LedgerRecord>> {
        let inner = read(&self.inner)?;
        let latest = inner.events_for(label).rev().find_map(ProductEvent::as_record);
        Ok(latest)
    }

    async fn history(&self, label: &Label) -> Result<Vec<LedgerRecord>> {
        let inner = read(&self.inner)?;
        Ok(inner.events_for(label).filter_map(ProductEvent::as_record).collect())
    }

    async fn product_events(&self, label: &Label) -> Result<Vec<ProductEvent>> {
        let inner = read(&self.inner)?;
        Ok(inner.events_for(label).cloned().collect())
    }
}

#[async_trait]
impl Registry for MemoryLedger {
    async fn deploy_contract(&self, contract_id: &str) -> Result<()> {
        if contract_id.is_empty() {
            return Err(StoreError::InvalidInput("contract id must not be empty".into()));
        }
        let mut inner = write(&self.inner)?;
        if !inner.contracts.insert(contract_id.to_string()) {
            return Err(StoreError::AlreadyExists(format!(
                "contract {}",
                contract_id
            )));
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<RegistrySummary> {
        let inner = read(&self.inner)?;
        Ok(RegistrySummary {
            contracts: inner.contracts.iter().cloned().collect(),
            products: inner.products.len(),
            parties: inner.parties.len(),
            records: inner.anchors.len() as u64,
        })
    }

    async fn add_product(&self, label: &Label) -> Result<()> {
        let mut inner = write(&self.inner)?;
        inner.require_registry()?;
        if !inner.products.insert(label.clone()) {
            return Err(StoreError::AlreadyExists(format!("product {}", label)));
        }
        Ok(())
    }

    async fn add_party(&self, party_id: &str, contact_info: &str) -> Result<()> {
        if party_id.is_empty() {
            return Err(StoreError::InvalidInput("party id must not be empty".into()));
        }
        let mut inner = write(&self.inner)?;
        inner.require_registry()?;
        match inner.parties.get(party_id) {
            Some(known) if known == contact_info => {
                return Err(StoreError::AlreadyExists(format!("party {}", party_id)));
            }
            Some(_) => {
                return Err(StoreError::InvalidInput(format!(
                    "party {} already registered with other contact info",
                    party_id
                )));
            }
            None => {}
        }
        inner
            .parties
            .insert(party_id.to_string(), contact_info.to_string());
        Ok(())
    }

    async fn associate_party(&self, party_id: &str, product: &Label) -> Result<()> {
        let mut inner = write(&self.inner)?;
        if !inner.products.contains(product) {
            return Err(StoreError::InvalidInput(format!("product {} does not exist", product)));
        }
        if !inner.parties.contains_key(party_id) {
            return Err(StoreError::InvalidInput(format!("party {} does not exist", party_id)));
        }
        if !inner
            .associations
            .insert((party_id.to_string(), product.clone()))
        {
            return Err(StoreError::AlreadyExists(format!(
                "party {} associated with {}",
                party_id, product
            )));
        }
        inner.push_event(
            product.clone(),
            ProductEventKind::PartyAssociated {
                party_id: party_id.to_string(),
            },
        );
        Ok(())
    }
}
