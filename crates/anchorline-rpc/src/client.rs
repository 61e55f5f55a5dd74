//! Store-trait clients that talk to a remote node.
//!
//! [`RpcContentStore`] and [`RpcLedger`] implement the `anchorline-store`
//! traits over a [`ManagedConnection`], so the pipeline cannot tell a remote
//! backend from a local one. Transport failures surface as
//! `StoreError::Unavailable`; remote rejections keep their kind.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use bytes::Bytes;

use anchorline_core::{ContentAddress, Label, LedgerRecord, ProductEvent};
use anchorline_store::{
    AppendOutcome, ContentStore, Ledger, Registry, RegistrySummary, Result, StoreError,
};

use crate::managed::{ManagedConnection, RetryPolicy};
use crate::messages::{
    BlobRequest, BlobResponse, ErrorCode, LedgerRequest, LedgerResponse, Request, Response,
};
use crate::transport::TcpConnector;

fn unexpected(op: &'static str) -> StoreError {
    StoreError::Unavailable(format!("unexpected response to {}", op))
}

/// Content store client.
#[derive(Clone)]
pub struct RpcContentStore {
    conn: Arc<ManagedConnection>,
}

impl RpcContentStore {
    pub fn new(conn: Arc<ManagedConnection>) -> Self {
        Self { conn }
    }

    /// Client for a TCP endpoint. Does not connect until the first call.
    pub fn tcp(endpoint: impl Into<String>, policy: RetryPolicy) -> Self {
        Self::new(Arc::new(ManagedConnection::new(
            Arc::new(TcpConnector::new(endpoint)),
            policy,
        )))
    }

    async fn call(&self, request: BlobRequest) -> Result<BlobResponse> {
        let op = request.op();
        match self.conn.call(Request::Blob(request)).await? {
            Response::Blob(response) => Ok(response),
            Response::Error { code, message } => Err(code.into_store_error(message)),
            _ => Err(unexpected(op)),
        }
    }
}

#[async_trait]
impl ContentStore for RpcContentStore {
    async fn put(&self, payload: &[u8]) -> Result<ContentAddress> {
        let expected = ContentAddress::of(payload);
        let request = BlobRequest::Put {
            payload: Bytes::copy_from_slice(payload),
        };
        match self.call(request).await? {
            BlobResponse::Address(address) if address == expected => Ok(address),
            BlobResponse::Address(address) => Err(StoreError::InvalidData(format!(
                "store returned address {} for payload hashing to {}",
                address, expected
            ))),
            _ => Err(unexpected("put")),
        }
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Bytes>> {
        match self.call(BlobRequest::Get { address: *address }).await? {
            BlobResponse::Payload(payload) => Ok(payload),
            _ => Err(unexpected("get")),
        }
    }

    async fn contains(&self, address: &ContentAddress) -> Result<bool> {
        match self.call(BlobRequest::Contains { address: *address }).await? {
            BlobResponse::Flag(present) => Ok(present),
            _ => Err(unexpected("contains")),
        }
    }

    async fn purge(&self, address: &ContentAddress) -> Result<bool> {
        match self.call(BlobRequest::Purge { address: *address }).await? {
            BlobResponse::Flag(removed) => Ok(removed),
            _ => Err(unexpected("purge")),
        }
    }
}

/// Ledger and registry client.
#[derive(Clone)]
pub struct RpcLedger {
    conn: Arc<ManagedConnection>,
}

impl RpcLedger {
    pub fn new(conn: Arc<ManagedConnection>) -> Self {
        Self { conn }
    }

    /// Client for a TCP endpoint. Does not connect until the first call.
    pub fn tcp(endpoint: impl Into<String>, policy: RetryPolicy) -> Self {
        Self::new(Arc::new(ManagedConnection::new(
            Arc::new(TcpConnector::new(endpoint)),
            policy,
        )))
    }

    async fn call(&self, request: LedgerRequest) -> Result<LedgerResponse> {
        let op = request.op();
        match self.conn.call(Request::Ledger(request)).await? {
            Response::Ledger(response) => Ok(response),
            Response::Error { code, message } => Err(code.into_store_error(message)),
            _ => Err(unexpected(op)),
        }
    }

    /// Send a registry write.
    ///
    /// When the write had to be replayed on a fresh connection and the node
    /// answers `AlreadyExists`, the first attempt landed and its response was
    /// lost; that counts as success.
    async fn call_done(&self, request: LedgerRequest) -> Result<()> {
        let op = request.op();
        let replay_safe = request.is_registry_write();
        let delivery = self.conn.deliver(Request::Ledger(request)).await?;
        match delivery.response {
            Response::Ledger(LedgerResponse::Done) => Ok(()),
            Response::Error {
                code: ErrorCode::AlreadyExists,
                message,
            } if delivery.replayed && replay_safe => {
                debug!(op, %message, "replayed write was already applied");
                Ok(())
            }
            Response::Error { code, message } => Err(code.into_store_error(message)),
            _ => Err(unexpected(op)),
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn append(&self, record: &LedgerRecord) -> Result<AppendOutcome> {
        let request = LedgerRequest::AddData {
            record: record.clone(),
        };
        match self.call(request).await? {
            LedgerResponse::Appended(outcome) => Ok(outcome),
            _ => Err(unexpected("addData")),
        }
    }

    async fn latest(&self, label: &Label) -> Result<Option<LedgerRecord>> {
        match self.call(LedgerRequest::GetData { label: label.clone() }).await? {
            LedgerResponse::Record(record) => Ok(record),
            _ => Err(unexpected("getData")),
        }
    }

    async fn history(&self, label: &Label) -> Result<Vec<LedgerRecord>> {
        match self.call(LedgerRequest::History { label: label.clone() }).await? {
            LedgerResponse::Records(records) => Ok(records),
            _ => Err(unexpected("history")),
        }
    }

    async fn product_events(&self, label: &Label) -> Result<Vec<ProductEvent>> {
        match self
            .call(LedgerRequest::ProductEvents { label: label.clone() })
            .await?
        {
            LedgerResponse::Events(events) => Ok(events),
            _ => Err(unexpected("getProductPublishedEventList")),
        }
    }
}

#[async_trait]
impl Registry for RpcLedger {
    async fn deploy_contract(&self, contract_id: &str) -> Result<()> {
        self.call_done(LedgerRequest::DeployContract {
            contract_id: contract_id.to_string(),
        })
        .await
    }

    async fn initialize(&self) -> Result<RegistrySummary> {
        match self.call(LedgerRequest::Initialize).await? {
            LedgerResponse::Summary(summary) => Ok(summary),
            _ => Err(unexpected("initialize")),
        }
    }

    async fn add_product(&self, label: &Label) -> Result<()> {
        self.call_done(LedgerRequest::AddProduct { label: label.clone() })
            .await
    }

    async fn add_party(&self, party_id: &str, contact_info: &str) -> Result<()> {
        self.call_done(LedgerRequest::AddParty {
            party_id: party_id.to_string(),
            contact_info: contact_info.to_string(),
        })
        .await
    }

    async fn associate_party(&self, party_id: &str, product: &Label) -> Result<()> {
        self.call_done(LedgerRequest::AssociateParty {
            party_id: party_id.to_string(),
            product: product.clone(),
        })
        .await
    }
}
