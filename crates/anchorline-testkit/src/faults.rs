//! Fault-injecting wrappers around real backends.
//!
//! Each wrapper forwards to an inner backend and fails, or lies, on demand.
//! Switches are atomics so a test can flip them while a loop is running.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use anchorline_core::{ContentAddress, Label, LedgerRecord, ProductEvent};
use anchorline_store::{
    AppendOutcome, ContentStore, Ledger, LedgerClient, Registry, RegistrySummary, Result,
    StoreError,
};

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {} failure", what))
}

/// Consume one unit of a countdown; true if it was armed.
fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A content store that can fail puts or serve altered bytes.
pub struct FlakyContentStore {
    inner: Arc<dyn ContentStore>,
    down: AtomicBool,
    failing_puts: AtomicU32,
    poisoned: Mutex<HashSet<Bytes>>,
    tampered: Mutex<HashSet<ContentAddress>>,
    puts: AtomicU64,
}

impl FlakyContentStore {
    pub fn new(inner: Arc<dyn ContentStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failing_puts: AtomicU32::new(0),
            poisoned: Mutex::new(HashSet::new()),
            tampered: Mutex::new(HashSet::new()),
            puts: AtomicU64::new(0),
        }
    }

    /// Fail every call until set back to false.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` puts.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Fail every put of exactly this payload.
    pub fn fail_puts_of(&self, payload: impl Into<Bytes>) {
        self.poisoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(payload.into());
    }

    /// Serve altered bytes for `address` from now on.
    pub fn tamper(&self, address: ContentAddress) {
        self.tampered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address);
    }

    /// Puts that reached the inner store.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(injected("store"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FlakyContentStore {
    async fn put(&self, payload: &[u8]) -> Result<ContentAddress> {
        self.check_up()?;
        let poisoned = self
            .poisoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(payload);
        if poisoned || take(&self.failing_puts) {
            return Err(injected("put"));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(payload).await
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Bytes>> {
        self.check_up()?;
        let payload = self.inner.get(address).await?;
        let tampered = self
            .tampered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address);
        Ok(match payload {
            Some(bytes) if tampered => {
                let mut altered = bytes.to_vec();
                match altered.first_mut() {
                    Some(b) => *b ^= 0xff,
                    None => altered.push(0),
                }
                Some(Bytes::from(altered))
            }
            other => other,
        })
    }

    async fn contains(&self, address: &ContentAddress) -> Result<bool> {
        self.check_up()?;
        self.inner.contains(address).await
    }

    async fn purge(&self, address: &ContentAddress) -> Result<bool> {
        self.check_up()?;
        self.inner.purge(address).await
    }
}

/// A ledger that can refuse appends or lose their acknowledgements.
pub struct FlakyLedger {
    inner: Arc<dyn LedgerClient>,
    failing_appends: AtomicU32,
    lost_acks: AtomicU32,
    appends: AtomicU64,
}

impl FlakyLedger {
    pub fn new(inner: Arc<dyn LedgerClient>) -> Self {
        Self {
            inner,
            failing_appends: AtomicU32::new(0),
            lost_acks: AtomicU32::new(0),
            appends: AtomicU64::new(0),
        }
    }

    /// Reject the next `n` appends without recording them.
    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Record the next `n` appends but report them as failed.
    pub fn lose_next_acks(&self, n: u32) {
        self.lost_acks.store(n, Ordering::SeqCst);
    }

    /// Appends that reached the inner ledger.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn append(&self, record: &LedgerRecord) -> Result<AppendOutcome> {
        if take(&self.failing_appends) {
            return Err(injected("append"));
        }
        self.appends.fetch_add(1, Ordering::SeqCst);
        let outcome = self.inner.append(record).await?;
        if take(&self.lost_acks) {
            return Err(injected("append ack"));
        }
        Ok(outcome)
    }

    async fn latest(&self, label: &Label) -> Result<Option<LedgerRecord>> {
        self.inner.latest(label).await
    }

    async fn history(&self, label: &Label) -> Result<Vec<LedgerRecord>> {
        self.inner.history(label).await
    }

    async fn product_events(&self, label: &Label) -> Result<Vec<ProductEvent>> {
        self.inner.product_events(label).await
    }
}

#[async_trait]
impl Registry for FlakyLedger {
    async fn deploy_contract(&self, contract_id: &str) -> Result<()> {
        self.inner.deploy_contract(contract_id).await
    }

    async fn initialize(&self) -> Result<RegistrySummary> {
        self.inner.initialize().await
    }

    async fn add_product(&self, label: &Label) -> Result<()> {
        self.inner.add_product(label).await
    }

    async fn add_party(&self, party_id: &str, contact_info: &str) -> Result<()> {
        self.inner.add_party(party_id, contact_info).await
    }

    async fn associate_party(&self, party_id: &str, product: &Label) -> Result<()> {
        self.inner.associate_party(party_id, product).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{label, TestFixture};
    use anchorline_store::FailureKind;

    #[tokio::test]
    async fn test_flaky_store_switches() {
        let fixture = TestFixture::new();
        let store = FlakyContentStore::new(fixture.store.clone());

        store.fail_next_puts(1);
        assert_eq!(store.put(b"a").await.unwrap_err().kind(), FailureKind::Unavailable);
        let address = store.put(b"a").await.unwrap();
        assert_eq!(store.puts(), 1);

        store.fail_puts_of(&b"b"[..]);
        assert!(store.put(b"b").await.is_err());

        store.tamper(address);
        let served = store.get(&address).await.unwrap().unwrap();
        assert!(!address.verifies(&served));

        store.set_down(true);
        assert!(store.contains(&address).await.is_err());
    }

    #[tokio::test]
    async fn test_lost_ack_still_lands() {
        let fixture = TestFixture::new();
        let ledger = FlakyLedger::new(fixture.ledger.clone());
        let record = LedgerRecord {
            label: label("apple"),
            address: ContentAddress::of(b"a"),
            timestamp: 1,
            shape: None,
        };

        ledger.lose_next_acks(1);
        assert!(ledger.append(&record).await.is_err());
        assert_eq!(fixture.ledger.history(&label("apple")).await.unwrap(), vec![record.clone()]);
        assert_eq!(
            ledger.append(&record).await.unwrap(),
            AppendOutcome::AlreadyAnchored { seq: 1 }
        );
        assert_eq!(ledger.appends(), 2);
    }
}
