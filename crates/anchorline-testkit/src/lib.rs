//! # Anchorline Testkit
//!
//! Testing utilities for Anchorline.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: memory backends, pipelines over them (locally or through a
//!   loopback RPC node) and ready-made items
//! - **Faults**: wrappers that make a store or ledger fail or lie on demand
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Fault Injection
//!
//! ```rust
//! use std::sync::Arc;
//! use anchorline::Pipeline;
//! use anchorline_testkit::{faults::FlakyContentStore, fixtures::TestFixture};
//!
//! let fixture = TestFixture::new();
//! let store = Arc::new(FlakyContentStore::new(fixture.store.clone()));
//! store.fail_next_puts(1);
//! let pipeline = Pipeline::new(store, fixture.ledger.clone());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use anchorline_testkit::generators::{item_from_params, ItemParams};
//!
//! proptest! {
//!     #[test]
//!     fn address_is_deterministic(params: ItemParams) {
//!         let a = item_from_params(&params);
//!         let b = item_from_params(&params);
//!         prop_assert_eq!(a.address(), b.address());
//!     }
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::{FlakyContentStore, FlakyLedger};
pub use fixtures::{fast_retry, fruit_items, item, label, TestFixture, FRUIT};
pub use generators::{item_from_params, item_stream, ItemParams};
