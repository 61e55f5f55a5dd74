//! # Anchorline RPC
//!
//! The wire between the pipeline and its two collaborators.
//!
//! ## Overview
//!
//! Every exchange is one request frame and one response frame; a frame is a
//! 4-byte big-endian length followed by a CBOR body. A node serves blob
//! requests, ledger requests, or both, through [`NodeService`]. On the client
//! side, [`RpcContentStore`] and [`RpcLedger`] implement the store traits on
//! top of a [`ManagedConnection`] that reconnects on its own.
//!
//! ## Message Flow
//!
//! ```text
//! Client                               Node
//!   |-------- Ping ------------------->|   (on connect, and before reusing
//!   |<------- Pong {version} ----------|    an idle connection)
//!   |-------- Blob(Put{payload}) ----->|
//!   |<------- Blob(Address) -----------|
//!   |-------- Ledger(AddData) -------->|
//!   |<------- Ledger(Appended) --------|
//!   |-------- Ledger(AddProduct) ----->|
//!   |<------- Error{InvalidInput} -----|
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod managed;
pub mod messages;
pub mod server;
pub mod transport;

pub use client::{RpcContentStore, RpcLedger};
pub use codec::MAX_FRAME_LEN;
pub use error::{Result, RpcError};
pub use managed::{Delivery, ManagedConnection, RetryPolicy};
pub use messages::{
    BlobRequest, BlobResponse, ErrorCode, LedgerRequest, LedgerResponse, Request, Response,
    PROTOCOL_VERSION,
};
pub use server::{serve, NodeService, RpcHandler};
pub use transport::{loopback::LoopbackConnector, Connection, Connector, TcpConnector};
