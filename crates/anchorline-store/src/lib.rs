//! # Anchorline Store
//!
//! Client interfaces for the two external systems the pipeline depends on:
//! a content-addressable block store and an append-only ledger with a product
//! registry. Reference backends are provided in memory and on SQLite.
//!
//! ## Key Types
//!
//! - [`ContentStore`] - put/get of opaque blocks by [`ContentAddress`](anchorline_core::ContentAddress)
//! - [`Ledger`] - append/latest/history of label anchors
//! - [`Registry`] - contract deployment, products, parties, associations
//! - [`LedgerClient`] - `Ledger + Registry`, what the pipeline holds
//! - [`SqliteContentStore`] / [`SqliteLedger`] - durable backends
//! - [`MemoryContentStore`] / [`MemoryLedger`] - in-memory backends for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use anchorline_core::{DataItem, Label};
//! use anchorline_store::{ContentStore, Ledger, SqliteContentStore, SqliteLedger};
//!
//! async fn example() -> anchorline_store::Result<()> {
//!     let store = SqliteContentStore::open("anchorline.db")?;
//!     let ledger = SqliteLedger::open("anchorline.db")?;
//!
//!     let item = DataItem::now(Label::new("apple").unwrap(), b"pixels".to_vec());
//!     let address = store.put(&item.payload).await?;
//!     ledger.append(&item.record(address)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent puts**: the same bytes always land at the same address
//! - **Idempotent appends**: records are deduplicated on their anchor key
//! - **Append order**: "latest" is the last record appended for a label
//! - **Two failure kinds**: every error classifies as `Unavailable` or `InvalidInput`

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{FailureKind, Result, StoreError};
pub use memory::{MemoryContentStore, MemoryLedger};
pub use sqlite::{SqliteContentStore, SqliteLedger};
pub use traits::{
    AppendOutcome, ContentStore, Ledger, LedgerClient, LedgerPolicy, Registry, RegistrySummary,
    REGISTRY_CONTRACT,
};
