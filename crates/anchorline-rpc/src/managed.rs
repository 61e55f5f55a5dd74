//! A reconnecting, health-checked connection.
//!
//! [`ManagedConnection`] owns at most one live connection. It connects
//! lazily, pings before reusing a connection that sat idle longer than
//! `health_check_after`, drops the connection on any transport failure, and
//! reconnects with a bounded number of attempts and linear back-off.
//!
//! Calls are serialized by an async mutex: one request is in flight at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, RpcError};
use crate::messages::{Request, Response, PROTOCOL_VERSION};
use crate::transport::{Connection, Connector};

/// Reconnect and health-check settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Connect attempts per call before giving up. At least one is made.
    pub connect_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
    /// Idle time after which a connection is pinged before reuse.
    pub health_check_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            backoff: Duration::from_millis(200),
            health_check_after: Duration::from_secs(30),
        }
    }
}

/// A response, and whether the request had to be sent twice to get it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub response: Response,
    /// The first send failed on a reused connection, so the node may have
    /// applied the request before this answer.
    pub replayed: bool,
}

struct Live {
    conn: Box<dyn Connection>,
    last_used: Instant,
}

/// A connection to one endpoint that heals itself.
pub struct ManagedConnection {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    live: Mutex<Option<Live>>,
}

impl ManagedConnection {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            live: Mutex::new(None),
        }
    }

    /// The endpoint this connection targets.
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Send a request, connecting or reconnecting as needed.
    ///
    /// If a reused connection fails at the transport level, the request is
    /// sent once more on a fresh connection. A failure on a fresh connection
    /// is returned to the caller and the connection is dropped.
    pub async fn call(&self, request: Request) -> Result<Response> {
        Ok(self.deliver(request).await?.response)
    }

    /// Like [`call`](Self::call), but reports whether the request was replayed.
    pub async fn deliver(&self, request: Request) -> Result<Delivery> {
        let mut guard = self.live.lock().await;

        let (mut live, reused) = match guard.take() {
            Some(live) => match self.revalidate(live).await {
                Some(live) => (live, true),
                None => (self.connect().await?, false),
            },
            None => (self.connect().await?, false),
        };

        match live.conn.call(&request).await {
            Ok(response) => {
                live.last_used = Instant::now();
                *guard = Some(live);
                Ok(Delivery {
                    response,
                    replayed: false,
                })
            }
            Err(e) if e.is_transport() && reused => {
                warn!(endpoint = %self.endpoint(), op = request.op(), error = %e, "connection lost, reconnecting");
                let mut fresh = self.connect().await?;
                let response = fresh.conn.call(&request).await?;
                fresh.last_used = Instant::now();
                *guard = Some(fresh);
                Ok(Delivery {
                    response,
                    replayed: true,
                })
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                *guard = Some(live);
                Err(e)
            }
        }
    }

    /// Drop the current connection, if any.
    pub async fn disconnect(&self) {
        self.live.lock().await.take();
    }

    /// Ping a connection that sat idle too long. `None` if it is dead.
    async fn revalidate(&self, mut live: Live) -> Option<Live> {
        if live.last_used.elapsed() < self.policy.health_check_after {
            return Some(live);
        }
        match live.conn.call(&Request::Ping).await {
            Ok(Response::Pong { .. }) => {
                live.last_used = Instant::now();
                Some(live)
            }
            outcome => {
                debug!(endpoint = %self.endpoint(), ?outcome, "health check failed");
                None
            }
        }
    }

    async fn connect(&self) -> Result<Live> {
        let attempts = self.policy.connect_attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            match self.handshake().await {
                Ok(conn) => {
                    info!(endpoint = %self.endpoint(), attempt, "connected");
                    return Ok(Live {
                        conn,
                        last_used: Instant::now(),
                    });
                }
                Err(e @ RpcError::VersionMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!(endpoint = %self.endpoint(), attempt, error = %e, "connect failed");
                    last = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff * attempt).await;
                    }
                }
            }
        }

        Err(RpcError::ConnectFailed {
            endpoint: self.endpoint(),
            attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn handshake(&self) -> Result<Box<dyn Connection>> {
        let mut conn = self.connector.connect().await?;
        match conn.call(&Request::Ping).await? {
            Response::Pong { version } if version == PROTOCOL_VERSION => Ok(conn),
            Response::Pong { version } => Err(RpcError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: version,
            }),
            _ => Err(RpcError::UnexpectedResponse("ping")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::NodeService;
    use crate::transport::loopback::LoopbackConnector;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            connect_attempts: 3,
            backoff: Duration::from_millis(1),
            health_check_after: Duration::from_secs(60),
        }
    }

    fn setup(policy: RetryPolicy) -> (LoopbackConnector, ManagedConnection) {
        let connector = LoopbackConnector::new(Arc::new(NodeService::new()));
        let managed = ManagedConnection::new(Arc::new(connector.clone()), policy);
        (connector, managed)
    }

    #[tokio::test]
    async fn test_connects_lazily_and_reuses() {
        let (connector, managed) = setup(fast_policy());
        assert_eq!(connector.connects(), 0);

        managed.call(Request::Ping).await.unwrap();
        managed.call(Request::Ping).await.unwrap();
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_severed_connection_is_replaced() {
        let (connector, managed) = setup(fast_policy());
        managed.call(Request::Ping).await.unwrap();

        connector.sever_all();
        let response = managed.call(Request::Ping).await.unwrap();
        assert!(matches!(response, Response::Pong { .. }));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_delivery_reports_replay() {
        let (connector, managed) = setup(fast_policy());
        assert!(!managed.deliver(Request::Ping).await.unwrap().replayed);

        connector.lose_next_replies(1);
        let delivery = managed.deliver(Request::Ping).await.unwrap();
        assert!(delivery.replayed);
        assert!(matches!(delivery.response, Response::Pong { .. }));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_idle_connection_is_health_checked() {
        let (connector, managed) = setup(RetryPolicy {
            health_check_after: Duration::ZERO,
            ..fast_policy()
        });
        managed.call(Request::Ping).await.unwrap();

        connector.sever_all();
        managed.call(Request::Ping).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_connect_retries_are_bounded() {
        let (connector, managed) = setup(fast_policy());

        connector.fail_next_connects(2);
        managed.call(Request::Ping).await.unwrap();
        assert_eq!(connector.connects(), 1);

        managed.disconnect().await;
        connector.fail_next_connects(3);
        let err = managed.call(Request::Ping).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectFailed { attempts: 3, .. }));
    }
}
