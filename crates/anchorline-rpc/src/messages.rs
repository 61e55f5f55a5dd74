//! RPC message types.
//!
//! One request, one response. Blob requests are served by a content store,
//! ledger requests by a ledger client; a node may serve either or both.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use anchorline_core::{ContentAddress, Label, LedgerRecord, ProductEvent};
use anchorline_store::{AppendOutcome, RegistrySummary, StoreError};

/// Current protocol version, exchanged on connect.
pub const PROTOCOL_VERSION: u8 = 0;

/// A request to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Liveness and version check.
    Ping,
    Blob(BlobRequest),
    Ledger(LedgerRequest),
}

impl Request {
    /// Short operation name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Blob(req) => req.op(),
            Request::Ledger(req) => req.op(),
        }
    }
}

/// Content store operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobRequest {
    Put { payload: Bytes },
    Get { address: ContentAddress },
    Contains { address: ContentAddress },
    Purge { address: ContentAddress },
}

impl BlobRequest {
    pub fn op(&self) -> &'static str {
        match self {
            BlobRequest::Put { .. } => "put",
            BlobRequest::Get { .. } => "get",
            BlobRequest::Contains { .. } => "contains",
            BlobRequest::Purge { .. } => "purge",
        }
    }
}

/// Ledger and registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerRequest {
    /// Anchor a record (`addData`).
    AddData { record: LedgerRecord },
    /// Latest record for a label (`getData`).
    GetData { label: Label },
    History { label: Label },
    /// `getProductPublishedEventList`.
    ProductEvents { label: Label },
    DeployContract { contract_id: String },
    Initialize,
    AddProduct { label: Label },
    AddParty {
        party_id: String,
        contact_info: String,
    },
    /// `addPartyAssociationToProduct`.
    AssociateParty { party_id: String, product: Label },
}

impl LedgerRequest {
    /// Whether this is a registry write, where an `AlreadyExists` answer to a
    /// replay means the first attempt landed.
    pub fn is_registry_write(&self) -> bool {
        matches!(
            self,
            LedgerRequest::DeployContract { .. }
                | LedgerRequest::AddProduct { .. }
                | LedgerRequest::AddParty { .. }
                | LedgerRequest::AssociateParty { .. }
        )
    }

    pub fn op(&self) -> &'static str {
        match self {
            LedgerRequest::AddData { .. } => "addData",
            LedgerRequest::GetData { .. } => "getData",
            LedgerRequest::History { .. } => "history",
            LedgerRequest::ProductEvents { .. } => "getProductPublishedEventList",
            LedgerRequest::DeployContract { .. } => "deployContract",
            LedgerRequest::Initialize => "initialize",
            LedgerRequest::AddProduct { .. } => "addProduct",
            LedgerRequest::AddParty { .. } => "addParty",
            LedgerRequest::AssociateParty { .. } => "addPartyAssociationToProduct",
        }
    }
}

/// A response from a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Pong { version: u8 },
    Blob(BlobResponse),
    Ledger(LedgerResponse),
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Build an error response from a backend failure.
    pub fn from_store_error(err: &StoreError) -> Self {
        let code = match (err, err.kind()) {
            (StoreError::AlreadyExists(_), _) => ErrorCode::AlreadyExists,
            (_, anchorline_store::FailureKind::InvalidInput) => ErrorCode::InvalidInput,
            (_, anchorline_store::FailureKind::Unavailable) => ErrorCode::Unavailable,
        };
        Response::Error {
            code,
            message: err.to_string(),
        }
    }

    pub fn unsupported(what: &str) -> Self {
        Response::Error {
            code: ErrorCode::Unsupported,
            message: format!("{} not served by this node", what),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobResponse {
    Address(ContentAddress),
    Payload(Option<Bytes>),
    Flag(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerResponse {
    Appended(AppendOutcome),
    Record(Option<LedgerRecord>),
    Records(Vec<LedgerRecord>),
    Events(Vec<ProductEvent>),
    Summary(RegistrySummary),
    Done,
}

/// Error codes carried in [`Response::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The backend failed; retrying may help.
    Unavailable,
    /// The request was rejected.
    InvalidInput,
    /// The registry write is already in effect.
    AlreadyExists,
    /// The node does not serve this kind of request.
    Unsupported,
}

impl ErrorCode {
    /// Turn a remote error back into the local store taxonomy.
    pub fn into_store_error(self, message: String) -> StoreError {
        match self {
            ErrorCode::Unavailable => StoreError::Unavailable(message),
            ErrorCode::InvalidInput | ErrorCode::Unsupported => StoreError::InvalidInput(message),
            ErrorCode::AlreadyExists => StoreError::AlreadyExists(message),
        }
    }
}
