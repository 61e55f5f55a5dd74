//! # Anchorline
//!
//! A provenance pipeline for labelled data: every item is stored by content
//! address and its address is anchored on an append-only ledger, so the
//! latest content for a label can later be fetched and checked.
//!
//! ## Overview
//!
//! - **Channel**: publish/subscribe transport of multipart messages from
//!   producers to the pipeline, in-process or over TCP
//! - **Ingestion**: store the payload, then anchor `(label, address,
//!   timestamp)` on the ledger, one item at a time in delivery order
//! - **Retrieval**: label -> latest anchor -> payload, verified against its
//!   address
//! - **Registry**: products, parties and their associations, passed through
//!   to the ledger
//!
//! ## Usage
//!
//! ```rust,no_run
//! use anchorline::{DataItem, Label, Pipeline};
//!
//! async fn example() {
//!     let pipeline = Pipeline::in_memory();
//!     let publisher = pipeline.channel();
//!     let mut subscription = publisher.subscribe().await;
//!
//!     let ingestion = pipeline.ingestion();
//!     let worker = tokio::spawn(async move { ingestion.run(&mut subscription).await });
//!
//!     let label = Label::new("apple").unwrap();
//!     publisher.publish(&DataItem::now(label.clone(), b"crisp".to_vec())).await.unwrap();
//!
//!     // Closing lets the loop drain what was published, then exit.
//!     publisher.close().await;
//!     let _report = worker.await.unwrap();
//!     let latest = pipeline.get_latest(&label).await.unwrap();
//!     assert_eq!(&latest.payload[..], b"crisp");
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `anchorline::core` - pure types and the wire codec
//! - `anchorline::store` - client traits and reference backends
//! - `anchorline::rpc` - remote clients and the node server

pub mod channel;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod retrieve;
pub mod tcp;

// Re-export component crates
pub use anchorline_core as core;
pub use anchorline_rpc as rpc;
pub use anchorline_store as store;

pub use channel::{Channel, MessageSource, Publisher, ScriptedSource, Subscription};
pub use config::AnchorlineConfig;
pub use error::{
    ChannelClosed, ConfigError, IngestionError, PipelineError, PublishError, Result,
    RetrievalError,
};
pub use ingest::{IngestHandle, IngestReport, IngestionCoordinator, LoopExit, DEFAULT_RECEIVE_TIMEOUT};
pub use pipeline::Pipeline;
pub use retrieve::{LedgerHistory, RetrievalCoordinator, Retrieved};
pub use tcp::{SubscriberOptions, TcpPublisher, TcpSubscriber};

// Re-export commonly used core types
pub use anchorline_core::{ContentAddress, DataItem, Label, LedgerRecord, ShapeMetadata};
