//! Error types for the pipeline.

use std::path::PathBuf;

use thiserror::Error;

use anchorline_core::{ContentAddress, CoreError, DataItem, Label, LedgerRecord, WireError};
use anchorline_rpc::RpcError;
use anchorline_store::StoreError;

/// The transport channel has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel closed")]
pub struct ChannelClosed;

/// A failure to publish on a networked channel.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Closed(#[from] ChannelClosed),

    /// The message could not be encoded, e.g. it is over the frame limit.
    #[error(transparent)]
    Encode(#[from] RpcError),
}

/// A per-item ingestion failure.
///
/// Each variant carries what a caller needs to retry idempotently: the whole
/// item when nothing was stored, the record when only anchoring failed.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The message could not be decoded into an item.
    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    /// The content store failed; nothing was anchored. Retry the whole item.
    #[error("store failed for label {}: {source}", .item.label)]
    StoreFailure {
        item: DataItem,
        #[source]
        source: StoreError,
    },

    /// The payload is stored but the ledger append failed. Retry with
    /// `retry_anchor(record)`; the address is already known.
    #[error("anchoring label {} at {} failed: {source}", .record.label, .record.address)]
    AnchorFailure {
        record: LedgerRecord,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    ChannelClosed(#[from] ChannelClosed),
}

impl IngestionError {
    /// Label of the affected item, when known.
    pub fn label(&self) -> Option<&Label> {
        match self {
            IngestionError::StoreFailure { item, .. } => Some(&item.label),
            IngestionError::AnchorFailure { record, .. } => Some(&record.label),
            _ => None,
        }
    }

    /// Content address of the affected item, when it was stored.
    pub fn address(&self) -> Option<ContentAddress> {
        match self {
            IngestionError::AnchorFailure { record, .. } => Some(record.address),
            _ => None,
        }
    }
}

/// A retrieval failure.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The ledger has no record for the label.
    #[error("no ledger record for label {0}")]
    NotFound(Label),

    /// The ledger points at a block the store cannot serve.
    #[error("block {address} for label {label} is missing from the store")]
    BlockMissing { label: Label, address: ContentAddress },

    /// The store returned bytes that do not hash to the anchored address.
    #[error("block for label {label} does not match its address {address} (got {actual})")]
    IntegrityMismatch {
        label: Label,
        address: ContentAddress,
        actual: ContentAddress,
    },

    #[error("ledger lookup for label {label} failed: {source}")]
    Ledger {
        label: Label,
        #[source]
        source: StoreError,
    },

    #[error("store lookup of {address} for label {label} failed: {source}")]
    Store {
        label: Label,
        address: ContentAddress,
        #[source]
        source: StoreError,
    },
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Any failure surfaced by the [`Pipeline`](crate::Pipeline) facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A registry call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
