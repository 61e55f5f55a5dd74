//! Transport abstraction for RPC connections.
//!
//! A [`Connector`] opens [`Connection`]s to one endpoint. Implementations are
//! TCP for real deployments and an in-process loopback for tests.

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::codec::{read_message, write_frame};
use crate::error::{Result, RpcError};
use crate::messages::{Request, Response};

/// One open request/response connection.
#[async_trait]
pub trait Connection: Send {
    /// Send a request and wait for its response.
    async fn call(&mut self, request: &Request) -> Result<Response>;
}

/// Opens connections to a fixed endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Human-readable endpoint, for logs and errors.
    fn endpoint(&self) -> String;
}

/// Connects over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Connector for `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpConnection { stream }))
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

struct TcpConnection {
    stream: TcpStream,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn call(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.stream, request).await?;
        read_message(&mut self.stream)
            .await?
            .ok_or(RpcError::ConnectionClosed)
    }
}

/// An in-process transport for testing.
///
/// Requests are CBOR-encoded and decoded as on the wire, then handed to a
/// handler directly. Connections can be severed and connects made to fail.
pub mod loopback {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Arc;

    use crate::codec::{decode, encode};
    use crate::server::RpcHandler;

    #[derive(Default)]
    struct Switchboard {
        /// Bumped by `sever_all`; connections from an older generation are dead.
        generation: AtomicU64,
        connects: AtomicU64,
        failing_connects: AtomicU32,
        lost_replies: AtomicU32,
    }

    /// Connector that reaches a handler in the same process.
    #[derive(Clone)]
    pub struct LoopbackConnector {
        handler: Arc<dyn RpcHandler>,
        board: Arc<Switchboard>,
    }

    impl LoopbackConnector {
        pub fn new(handler: Arc<dyn RpcHandler>) -> Self {
            Self {
                handler,
                board: Arc::new(Switchboard::default()),
            }
        }

        /// Break every connection opened so far.
        pub fn sever_all(&self) {
            self.board.generation.fetch_add(1, Ordering::SeqCst);
        }

        /// Make the next `n` connect attempts fail.
        pub fn fail_next_connects(&self, n: u32) {
            self.board.failing_connects.store(n, Ordering::SeqCst);
        }

        /// Handle the next `n` requests, then break the connection before
        /// replying.
        pub fn lose_next_replies(&self, n: u32) {
            self.board.lost_replies.store(n, Ordering::SeqCst);
        }

        /// Number of successful connects.
        pub fn connects(&self) -> u64 {
            self.board.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn connect(&self) -> Result<Box<dyn Connection>> {
            let failing = self.board.failing_connects.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |n| n.checked_sub(1),
            );
            if failing.is_ok() {
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "loopback connect refused",
                )));
            }

            self.board.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(LoopbackConnection {
                handler: self.handler.clone(),
                board: self.board.clone(),
                generation: self.board.generation.load(Ordering::SeqCst),
            }))
        }

        fn endpoint(&self) -> String {
            "loopback".to_string()
        }
    }

    struct LoopbackConnection {
        handler: Arc<dyn RpcHandler>,
        board: Arc<Switchboard>,
        generation: u64,
    }

    #[async_trait]
    impl Connection for LoopbackConnection {
        async fn call(&mut self, request: &Request) -> Result<Response> {
            if self.board.generation.load(Ordering::SeqCst) != self.generation {
                return Err(RpcError::ConnectionClosed);
            }
            let request: Request = decode(&encode(request)?)?;
            let response = self.handler.handle(request).await;
            let lost = self
                .board
                .lost_replies
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if lost.is_ok() {
                self.board.generation.fetch_add(1, Ordering::SeqCst);
                return Err(RpcError::ConnectionClosed);
            }
            decode(&encode(&response)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::loopback::LoopbackConnector;
    use super::*;
    use crate::messages::PROTOCOL_VERSION;
    use crate::server::NodeService;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loopback_call() {
        let connector = LoopbackConnector::new(Arc::new(NodeService::new()));
        let mut conn = connector.connect().await.unwrap();
        assert_eq!(
            conn.call(&Request::Ping).await.unwrap(),
            Response::Pong { version: PROTOCOL_VERSION }
        );
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_loopback_sever_and_refuse() {
        let connector = LoopbackConnector::new(Arc::new(NodeService::new()));
        let mut old = connector.connect().await.unwrap();
        connector.sever_all();
        assert!(matches!(
            old.call(&Request::Ping).await,
            Err(RpcError::ConnectionClosed)
        ));

        connector.fail_next_connects(1);
        assert!(connector.connect().await.is_err());
        let mut fresh = connector.connect().await.unwrap();
        assert!(fresh.call(&Request::Ping).await.is_ok());

        connector.lose_next_replies(1);
        assert!(matches!(
            fresh.call(&Request::Ping).await,
            Err(RpcError::ConnectionClosed)
        ));
        assert!(fresh.call(&Request::Ping).await.is_err());
    }
}
