//! # Anchorline Core
//!
//! Pure primitives for the Anchorline provenance pipeline: data items,
//! content addresses, ledger records, and the multipart wire codec.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`DataItem`] - A labelled, timestamped payload produced upstream
//! - [`ContentAddress`] - Blake3 hash of a payload, the join key between store and ledger
//! - [`LedgerRecord`] - The anchored `(label, address, timestamp)` fact
//! - [`ProductEvent`] - One entry of a product's published event list
//! - [`ShapeMetadata`] - Explicit dimensions carried alongside a stored block
//!
//! ## Wire Format
//!
//! Items travel as three frames `[label, payload, timestamp_be]`, with an
//! optional fourth CBOR frame for [`ShapeMetadata`]. See [`wire`].

pub mod error;
pub mod item;
pub mod seal;
pub mod shape;
pub mod types;
pub mod wire;

pub use error::{CoreError, WireError};
pub use item::{now_micros, AnchorKey, DataItem, LedgerRecord, ProductEvent, ProductEventKind};
pub use seal::{SealKey, SealedText};
pub use shape::{ElementType, ShapeMetadata};
pub use types::{ContentAddress, Label};
pub use wire::{decode_item, encode_item, Multipart};
