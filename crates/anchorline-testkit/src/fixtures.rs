//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use anchorline::Pipeline;
use anchorline_core::{DataItem, Label};
use anchorline_rpc::{
    LoopbackConnector, ManagedConnection, NodeService, RetryPolicy, RpcContentStore, RpcLedger,
};
use anchorline_store::{
    LedgerPolicy, MemoryContentStore, MemoryLedger, Registry, REGISTRY_CONTRACT,
};

/// Labels used across the fixtures.
pub const FRUIT: [&str; 4] = ["apple", "banana", "lemon", "orange"];

/// A memory store and ledger pair.
pub struct TestFixture {
    pub store: Arc<MemoryContentStore>,
    pub ledger: Arc<MemoryLedger>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_policy(LedgerPolicy::default())
    }

    pub fn with_policy(policy: LedgerPolicy) -> Self {
        Self {
            store: Arc::new(MemoryContentStore::new()),
            ledger: Arc::new(MemoryLedger::with_policy(policy)),
        }
    }

    /// A pipeline over the fixture's backends.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.store.clone(), self.ledger.clone())
    }

    /// Deploy the registry and register every label in `products`.
    pub async fn register_products(&self, products: &[&str]) {
        self.ledger
            .deploy_contract(REGISTRY_CONTRACT)
            .await
            .expect("deploy registry");
        for product in products {
            self.ledger
                .add_product(&label(product))
                .await
                .expect("add product");
        }
    }

    /// Serve the fixture's backends over a loopback RPC node and return a
    /// pipeline that reaches them through it.
    ///
    /// The connector is returned so tests can sever or refuse connections.
    pub fn remote_pipeline(&self) -> (Pipeline, LoopbackConnector) {
        let service = NodeService::new()
            .with_blobs(self.store.clone())
            .with_ledger(self.ledger.clone());
        let connector = LoopbackConnector::new(Arc::new(service));
        let conn = Arc::new(ManagedConnection::new(
            Arc::new(connector.clone()),
            fast_retry(),
        ));
        let pipeline = Pipeline::new(
            Arc::new(RpcContentStore::new(conn.clone())),
            Arc::new(RpcLedger::new(conn)),
        );
        (pipeline, connector)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry policy with short delays for tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        connect_attempts: 3,
        backoff: Duration::from_millis(5),
        health_check_after: Duration::from_secs(30),
    }
}

/// Parse a label known to be valid.
pub fn label(s: &str) -> Label {
    Label::new(s).expect("fixture label")
}

/// An item with a fixed timestamp.
pub fn item(l: &str, payload: &[u8], timestamp: u64) -> DataItem {
    DataItem::new(label(l), payload.to_vec(), timestamp)
}

/// `count` items cycling through [`FRUIT`], each with a distinct payload and
/// increasing timestamps.
pub fn fruit_items(count: usize) -> Vec<DataItem> {
    (0..count)
        .map(|i| {
            let l = FRUIT[i % FRUIT.len()];
            item(l, format!("{}-{}", l, i).as_bytes(), 1_000 + i as u64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorline_store::Ledger;

    #[test]
    fn test_fruit_items_are_distinct() {
        let items = fruit_items(8);
        assert_eq!(items[0].label, label("apple"));
        assert_eq!(items[5].label, label("banana"));
        assert_ne!(items[0].address(), items[4].address());
        assert!(items.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_registered_products_accept_anchors_under_strict_policy() {
        let fixture = TestFixture::with_policy(LedgerPolicy {
            require_registered_products: true,
        });
        fixture.register_products(&["apple"]).await;

        let pipeline = fixture.pipeline();
        pipeline.ingest(item("apple", b"ok", 1)).await.unwrap();
        assert!(pipeline.ingest(item("pear", b"no", 2)).await.is_err());
        assert_eq!(fixture.ledger.history(&label("pear")).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_remote_pipeline_reaches_fixture_backends() {
        let fixture = TestFixture::new();
        let (pipeline, connector) = fixture.remote_pipeline();

        let record = pipeline.ingest(item("apple", b"remote", 1)).await.unwrap();
        assert_eq!(fixture.store.len(), 1);
        assert_eq!(
            fixture.ledger.history(&label("apple")).await.unwrap(),
            vec![record]
        );
        assert_eq!(connector.connects(), 1);
    }
}
