//! Networked transport channel over TCP.
//!
//! A [`TcpPublisher`] binds an endpoint and fans every message out to the
//! subscribers connected at that moment. A [`TcpSubscriber`] connects to it
//! and feeds what it reads into a [`MessageSource`] for the ingestion loop.
//!
//! Each message is one length-prefixed frame (the RPC codec) whose CBOR body
//! is the multipart message itself, `[label, payload, timestamp, ...]`. As
//! with the in-process channel, a subscriber only sees messages published
//! after it connected.
//!
//! By default a subscriber survives the publisher going away: it keeps
//! redialling and picks up again once a publisher is back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use anchorline_core::{encode_item, DataItem, Multipart};
use anchorline_rpc::codec::{decode, encode, read_frame, write_body};
use anchorline_rpc::RpcError;

use crate::channel::MessageSource;
use crate::error::{ChannelClosed, PublishError};

/// Default pause between subscriber reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(200);

struct PublisherState {
    subscribers: Vec<(SocketAddr, TcpStream)>,
    closed: bool,
    count: watch::Sender<usize>,
}

impl PublisherState {
    fn recount(&self) {
        self.count.send_replace(self.subscribers.len());
    }
}

/// The producer side of a networked channel.
pub struct TcpPublisher {
    local_addr: SocketAddr,
    state: Arc<Mutex<PublisherState>>,
    count: watch::Receiver<usize>,
    accept_task: JoinHandle<()>,
}

impl TcpPublisher {
    /// Bind `addr` and start accepting subscribers.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (count_tx, count) = watch::channel(0);
        let state = Arc::new(Mutex::new(PublisherState {
            subscribers: Vec::new(),
            closed: false,
            count: count_tx,
        }));

        let accept_task = tokio::spawn(accept_loop(listener, state.clone()));
        info!(addr = %local_addr, "publishing");
        Ok(Self {
            local_addr,
            state,
            count,
            accept_task,
        })
    }

    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Publish an item to every connected subscriber.
    pub async fn publish(&self, item: &DataItem) -> Result<usize, PublishError> {
        self.publish_frames(encode_item(item)).await
    }

    /// Publish raw frames to every connected subscriber.
    ///
    /// Returns the number of subscribers reached. Waits while a subscriber's
    /// socket is backed up. Subscribers that fail a write are dropped.
    pub async fn publish_frames(&self, frames: Multipart) -> Result<usize, PublishError> {
        let body = encode(&frames)?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ChannelClosed.into());
        }

        let mut delivered = 0;
        let mut i = 0;
        while i < state.subscribers.len() {
            let (peer, stream) = &mut state.subscribers[i];
            if let Err(e) = write_body(stream, &body).await {
                debug!(%peer, error = %e, "dropping subscriber");
                state.subscribers.swap_remove(i);
                continue;
            }
            delivered += 1;
            i += 1;
        }
        state.recount();

        trace!(delivered, frames = frames.len(), "published");
        Ok(delivered)
    }

    /// Number of connected subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Wait until at least `n` subscribers are connected.
    ///
    /// Returns false if `timeout` passes first.
    pub async fn wait_for_subscribers(&self, n: usize, timeout: Duration) -> bool {
        let mut count = self.count.clone();
        let reached = matches!(
            tokio::time::timeout(timeout, count.wait_for(|c| *c >= n)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Stop accepting and disconnect every subscriber. Idempotent.
    pub async fn close(&self) {
        self.accept_task.abort();
        let mut state = self.state.lock().await;
        if !state.closed {
            state.closed = true;
            state.subscribers.clear();
            state.recount();
            debug!(addr = %self.local_addr, "publisher closed");
        }
    }
}

impl Drop for TcpPublisher {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<PublisherState>>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, error = %e, "subscriber setup failed");
            continue;
        }

        let mut state = state.lock().await;
        if state.closed {
            return;
        }
        state.subscribers.push((peer, stream));
        state.recount();
        debug!(%peer, subscribers = state.subscribers.len(), "subscriber connected");
    }
}

/// Settings for a [`TcpSubscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberOptions {
    /// Messages buffered ahead of the ingestion loop.
    pub capacity: usize,
    /// Pause before redialling. `None` ends the source on the first
    /// disconnect or failed dial.
    pub reconnect_delay: Option<Duration>,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            capacity: 64,
            reconnect_delay: Some(DEFAULT_RECONNECT_DELAY),
        }
    }
}

/// The consumer side of a networked channel.
///
/// Reading happens on a background task, so a receive that times out never
/// loses a partly read frame. Dropping the subscriber stops the task.
pub struct TcpSubscriber {
    rx: mpsc::Receiver<Multipart>,
    task: JoinHandle<()>,
}

impl TcpSubscriber {
    /// Start subscribing to the publisher at `endpoint`.
    ///
    /// Must be called within a Tokio runtime. Dialling happens in the
    /// background; a publisher that is not up yet is retried while
    /// `reconnect_delay` is set.
    pub fn connect(endpoint: impl Into<String>, options: SubscriberOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let task = tokio::spawn(read_loop(endpoint.into(), tx, options.reconnect_delay));
        Self { rx, task }
    }
}

impl Drop for TcpSubscriber {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl MessageSource for TcpSubscriber {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Multipart>, ChannelClosed> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frames)) => Ok(Some(frames)),
            Ok(None) => Err(ChannelClosed),
            Err(_) => Ok(None),
        }
    }
}

async fn read_loop(
    endpoint: String,
    tx: mpsc::Sender<Multipart>,
    reconnect_delay: Option<Duration>,
) {
    loop {
        match TcpStream::connect(&endpoint).await {
            Ok(stream) => {
                info!(%endpoint, "subscribed");
                match forward(stream, &tx).await {
                    Ok(()) => debug!(%endpoint, "publisher went away"),
                    Err(e) => warn!(%endpoint, error = %e, "subscription lost"),
                }
            }
            Err(e) => debug!(%endpoint, error = %e, "dial failed"),
        }

        if tx.is_closed() {
            return;
        }
        match reconnect_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => return,
        }
    }
}

async fn forward(mut stream: TcpStream, tx: &mpsc::Sender<Multipart>) -> Result<(), RpcError> {
    stream.set_nodelay(true)?;
    while let Some(body) = read_frame(&mut stream).await? {
        match decode::<Multipart>(&body) {
            Ok(frames) => {
                if tx.send(frames).await.is_err() {
                    return Ok(());
                }
            }
            // The frame boundary is intact, so the stream stays usable.
            Err(e) => warn!(error = %e, "dropping undecodable message"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorline_core::{decode_item, Label};
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    const WAIT: Duration = Duration::from_secs(5);
    const TICK: Duration = Duration::from_millis(20);

    fn item(label: &str, payload: &[u8], ts: u64) -> DataItem {
        DataItem::new(Label::new(label).unwrap(), payload.to_vec(), ts)
    }

    fn once() -> SubscriberOptions {
        SubscriberOptions {
            capacity: 8,
            reconnect_delay: None,
        }
    }

    async fn next_item(sub: &mut TcpSubscriber) -> DataItem {
        let frames = sub.receive(WAIT).await.unwrap().unwrap();
        decode_item(&frames).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_items_arrive_in_publish_order() {
        let publisher = TcpPublisher::bind("127.0.0.1:0").await.unwrap();
        let mut sub = TcpSubscriber::connect(publisher.local_addr().to_string(), once());
        assert!(publisher.wait_for_subscribers(1, WAIT).await);

        assert_eq!(publisher.publish(&item("apple", b"1", 1)).await.unwrap(), 1);
        assert_eq!(publisher.publish(&item("lemon", b"2", 2)).await.unwrap(), 1);

        let first = next_item(&mut sub).await;
        assert_eq!((first.label.as_str(), first.timestamp), ("apple", 1));
        let second = next_item(&mut sub).await;
        assert_eq!(second.payload, Bytes::from_static(b"2"));
        assert_eq!(sub.receive(TICK).await, Ok(None));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let publisher = TcpPublisher::bind("127.0.0.1:0").await.unwrap();
        let addr = publisher.local_addr().to_string();
        let mut a = TcpSubscriber::connect(addr.clone(), once());
        let mut b = TcpSubscriber::connect(addr, once());
        assert!(publisher.wait_for_subscribers(2, WAIT).await);

        assert_eq!(publisher.publish(&item("apple", b"x", 1)).await.unwrap(), 2);
        assert_eq!(next_item(&mut a).await.payload, Bytes::from_static(b"x"));
        assert_eq!(next_item(&mut b).await.payload, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_close_ends_a_non_reconnecting_subscriber() {
        let publisher = TcpPublisher::bind("127.0.0.1:0").await.unwrap();
        let mut sub = TcpSubscriber::connect(publisher.local_addr().to_string(), once());
        assert!(publisher.wait_for_subscribers(1, WAIT).await);

        publisher.publish(&item("apple", b"last", 1)).await.unwrap();
        publisher.close().await;

        assert_eq!(next_item(&mut sub).await.payload, Bytes::from_static(b"last"));
        assert_eq!(sub.receive(WAIT).await, Err(ChannelClosed));
        assert!(matches!(
            publisher.publish(&item("apple", b"late", 2)).await,
            Err(PublishError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_subscriber_started_before_publisher_catches_up() {
        // Reserve a port, then free it for the publisher.
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap().to_string();
        drop(reserved);

        let mut sub = TcpSubscriber::connect(
            addr.clone(),
            SubscriberOptions {
                capacity: 8,
                reconnect_delay: Some(Duration::from_millis(10)),
            },
        );
        assert_eq!(sub.receive(TICK).await, Ok(None));

        let publisher = TcpPublisher::bind(&addr).await.unwrap();
        assert!(publisher.wait_for_subscribers(1, WAIT).await);
        publisher.publish(&item("pear", b"late start", 3)).await.unwrap();
        assert_eq!(next_item(&mut sub).await.label.as_str(), "pear");
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut sub = TcpSubscriber::connect(listener.local_addr().unwrap().to_string(), once());
        let (mut stream, _) = listener.accept().await.unwrap();

        write_body(&mut stream, &[0xff, 0x00]).await.unwrap();
        let good = encode(&encode_item(&item("apple", b"ok", 1))).unwrap();
        write_body(&mut stream, &good).await.unwrap();
        stream.shutdown().await.unwrap();

        assert_eq!(next_item(&mut sub).await.payload, Bytes::from_static(b"ok"));
        assert_eq!(sub.receive(WAIT).await, Err(ChannelClosed));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected_before_sending() {
        let publisher = TcpPublisher::bind("127.0.0.1:0").await.unwrap();
        let mut sub = TcpSubscriber::connect(publisher.local_addr().to_string(), once());
        assert!(publisher.wait_for_subscribers(1, WAIT).await);

        let huge = vec![
            Bytes::from_static(b"apple"),
            Bytes::from(vec![0u8; anchorline_rpc::MAX_FRAME_LEN]),
        ];
        assert!(matches!(
            publisher.publish_frames(huge).await,
            Err(PublishError::Encode(RpcError::MessageTooLarge(_)))
        ));

        publisher.publish(&item("apple", b"small", 1)).await.unwrap();
        assert_eq!(next_item(&mut sub).await.payload, Bytes::from_static(b"small"));
        assert_eq!(publisher.subscriber_count().await, 1);
    }
}
