//! The Pipeline: one handle over a content store and a ledger.
//!
//! Wires the backends, the channel and both coordinators together from a
//! single [`AnchorlineConfig`], and passes registry administration straight
//! through to the ledger.

use std::sync::Arc;

use tracing::{debug, info};

use anchorline_core::{DataItem, Label, LedgerRecord, SealKey, SealedText};
use anchorline_rpc::{ManagedConnection, RpcContentStore, RpcLedger, TcpConnector};
use anchorline_store::{
    ContentStore, LedgerClient, MemoryContentStore, MemoryLedger, RegistrySummary,
};

use crate::channel::{Channel, Publisher};
use crate::config::AnchorlineConfig;
use crate::error::Result;
use crate::ingest::IngestionCoordinator;
use crate::retrieve::{LedgerHistory, RetrievalCoordinator, Retrieved};
use crate::tcp::TcpSubscriber;

/// The main Pipeline struct.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerClient>,
    config: Arc<AnchorlineConfig>,
}

impl Pipeline {
    /// Create a pipeline over existing backends with default settings.
    pub fn new(store: Arc<dyn ContentStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            store,
            ledger,
            config: Arc::new(AnchorlineConfig::default()),
        }
    }

    /// Replace the settings used for channels and coordinators.
    pub fn with_config(mut self, config: Arc<AnchorlineConfig>) -> Self {
        self.config = config;
        self
    }

    /// Connect to the remote store and ledger named in `config`.
    ///
    /// Nothing is dialled until the first call. When both endpoints are the
    /// same node the clients share one connection.
    pub fn from_config(config: Arc<AnchorlineConfig>) -> Self {
        let policy = config.retry_policy();
        let (store, ledger) = if config.store.endpoint == config.ledger.endpoint {
            let conn = Arc::new(ManagedConnection::new(
                Arc::new(TcpConnector::new(config.store.endpoint.clone())),
                policy,
            ));
            (RpcContentStore::new(conn.clone()), RpcLedger::new(conn))
        } else {
            (
                RpcContentStore::tcp(config.store.endpoint.clone(), policy),
                RpcLedger::tcp(config.ledger.endpoint.clone(), policy),
            )
        };
        debug!(
            store = %config.store.endpoint,
            ledger = %config.ledger.endpoint,
            "pipeline configured"
        );
        Self {
            store: Arc::new(store),
            ledger: Arc::new(ledger),
            config,
        }
    }

    /// A pipeline over fresh in-memory backends.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryContentStore::new()),
            Arc::new(MemoryLedger::new()),
        )
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn config(&self) -> &AnchorlineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Data path
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a transport channel sized from the configuration.
    pub fn channel(&self) -> Publisher {
        Channel::new(self.config.channel.capacity)
    }

    /// Subscribe to the networked channel at `channel.endpoint`.
    ///
    /// The subscriber redials a lost publisher, so a loop fed by it only
    /// ends through its handle.
    pub fn subscribe_remote(&self) -> TcpSubscriber {
        debug!(endpoint = %self.config.channel.endpoint, "subscribing");
        TcpSubscriber::connect(
            self.config.channel.endpoint.clone(),
            self.config.subscriber_options(),
        )
    }

    /// A stopped ingestion coordinator over this pipeline's backends.
    pub fn ingestion(&self) -> IngestionCoordinator {
        IngestionCoordinator::new(self.store.clone(), self.ledger.clone())
            .with_receive_timeout(self.config.receive_timeout())
    }

    pub fn retrieval(&self) -> RetrievalCoordinator {
        RetrievalCoordinator::new(self.store.clone(), self.ledger.clone())
    }

    /// Store and anchor a single item.
    pub async fn ingest(&self, item: DataItem) -> Result<LedgerRecord> {
        Ok(self.ingestion().on_item_received(item).await?)
    }

    pub async fn get_latest(&self, label: &Label) -> Result<Retrieved> {
        Ok(self.retrieval().get_latest(label).await?)
    }

    pub async fn list_events(&self, label: &Label) -> Result<LedgerHistory> {
        Ok(self.retrieval().list_events(label).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn deploy_contract(&self, contract_id: &str) -> Result<()> {
        self.ledger.deploy_contract(contract_id).await?;
        info!(contract_id, "contract deployed");
        Ok(())
    }

    pub async fn initialize(&self) -> Result<RegistrySummary> {
        Ok(self.ledger.initialize().await?)
    }

    pub async fn add_product(&self, label: &Label) -> Result<()> {
        self.ledger.add_product(label).await?;
        info!(%label, "product registered");
        Ok(())
    }

    pub async fn add_party(&self, party_id: &str, contact_info: &str) -> Result<()> {
        self.ledger.add_party(party_id, contact_info).await?;
        info!(party_id, "party registered");
        Ok(())
    }

    /// Register a party whose contact info is sealed for `owner`.
    ///
    /// The ledger only ever sees the sealed text, which is returned.
    pub async fn add_party_sealed(
        &self,
        party_id: &str,
        contact_info: &str,
        owner: &str,
    ) -> Result<SealedText> {
        let sealed = SealKey::derive(owner).seal(contact_info)?;
        self.add_party(party_id, sealed.as_str()).await?;
        Ok(sealed)
    }

    pub async fn associate_party(&self, party_id: &str, product: &Label) -> Result<()> {
        self.ledger.associate_party(party_id, product).await?;
        info!(party_id, product = %product, "party associated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, RetrievalError};
    use anchorline_core::ProductEventKind;
    use anchorline_store::{FailureKind, Ledger};
    use std::time::Duration;

    fn label(s: &str) -> Label {
        Label::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_then_get_latest() {
        let pipeline = Pipeline::in_memory();
        let record = pipeline
            .ingest(DataItem::new(label("apple"), b"crisp".to_vec(), 10))
            .await
            .unwrap();

        let latest = pipeline.get_latest(&label("apple")).await.unwrap();
        assert_eq!(latest.address, record.address);
        assert_eq!(&latest.payload[..], b"crisp");
        assert_eq!(pipeline.list_events(&label("apple")).await.unwrap().len(), 1);

        assert!(matches!(
            pipeline.get_latest(&label("pear")).await,
            Err(PipelineError::Retrieval(RetrievalError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_channel_feeds_ingestion() {
        let pipeline = Pipeline::in_memory();
        let publisher = pipeline.channel();
        let mut sub = publisher.subscribe().await;

        publisher
            .publish(&DataItem::new(label("apple"), b"1".to_vec(), 1))
            .await
            .unwrap();
        publisher.close().await;

        let report = pipeline.ingestion().run(&mut sub).await;
        assert_eq!(report.ingested, 1);
        assert_eq!(&pipeline.get_latest(&label("apple")).await.unwrap().payload[..], b"1");
    }

    #[tokio::test]
    async fn test_remote_subscription_feeds_ingestion() {
        let publisher = crate::tcp::TcpPublisher::bind("127.0.0.1:0").await.unwrap();
        let mut config = AnchorlineConfig::default();
        config.channel.endpoint = publisher.local_addr().to_string();
        config.channel.receive_timeout_ms = 10;
        let pipeline = Pipeline::in_memory().with_config(Arc::new(config));

        let mut source = pipeline.subscribe_remote();
        assert!(publisher.wait_for_subscribers(1, Duration::from_secs(5)).await);
        publisher
            .publish(&DataItem::new(label("apple"), b"wired".to_vec(), 3))
            .await
            .unwrap();

        let ingestion = pipeline.ingestion();
        let handle = ingestion.handle();
        let worker = tokio::spawn(async move { ingestion.run(&mut source).await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pipeline.ledger().latest(&label("apple")).await.unwrap().is_none() {
            assert!(tokio::time::Instant::now() < deadline, "item never anchored");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop();

        let report = worker.await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.exit, crate::ingest::LoopExit::Stopped);
        assert_eq!(&pipeline.get_latest(&label("apple")).await.unwrap().payload[..], b"wired");
    }

    #[tokio::test]
    async fn test_registry_pass_through() {
        let pipeline = Pipeline::in_memory();
        assert!(matches!(
            pipeline.add_product(&label("apple")).await,
            Err(PipelineError::Store(e)) if e.kind() == FailureKind::InvalidInput
        ));

        pipeline.deploy_contract("registry").await.unwrap();
        pipeline.add_product(&label("apple")).await.unwrap();
        let sealed = pipeline
            .add_party_sealed("grower", "ops@grower.example", "grower-co")
            .await
            .unwrap();
        assert_eq!(
            SealKey::derive("grower-co").open(&sealed).unwrap(),
            "ops@grower.example"
        );
        pipeline.associate_party("grower", &label("apple")).await.unwrap();

        let summary = pipeline.initialize().await.unwrap();
        assert_eq!(summary.products, 1);
        assert_eq!(summary.parties, 1);

        let events = pipeline.ledger().product_events(&label("apple")).await.unwrap();
        assert!(matches!(
            &events[..],
            [e] if matches!(&e.kind, ProductEventKind::PartyAssociated { party_id } if party_id == "grower")
        ));
    }
}
