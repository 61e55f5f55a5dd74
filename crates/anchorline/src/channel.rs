//! In-process publish/subscribe transport channel.
//!
//! One [`Publisher`] fans multipart messages out to any number of
//! [`Subscription`]s. Each subscriber has its own bounded buffer; a full
//! buffer makes `publish` wait rather than drop. Subscribers only see
//! messages published after they subscribed.
//!
//! Closing the publisher (or dropping it) ends the channel: once a
//! subscriber's buffer is drained, every `receive` yields [`ChannelClosed`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use anchorline_core::{encode_item, DataItem, Multipart};

use crate::error::ChannelClosed;

/// Anything the ingestion loop can pull messages from.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` on timeout; `Err(ChannelClosed)` once the source has ended.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Multipart>, ChannelClosed>;
}

/// Constructor namespace for channels.
pub struct Channel;

impl Channel {
    /// Open a channel whose subscribers buffer up to `capacity` messages each.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> Publisher {
        Publisher {
            capacity: capacity.max(1),
            state: Mutex::new(PublisherState {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }
}

struct PublisherState {
    subscribers: Vec<mpsc::Sender<Multipart>>,
    closed: bool,
}

/// The single producer side of a channel.
pub struct Publisher {
    capacity: usize,
    state: Mutex<PublisherState>,
}

impl Publisher {
    /// Attach a new subscriber.
    ///
    /// Subscribing to a closed channel yields a subscription that is already
    /// closed.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut state = self.state.lock().await;
        if !state.closed {
            state.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Publish an item to every current subscriber.
    pub async fn publish(&self, item: &DataItem) -> Result<usize, ChannelClosed> {
        self.publish_frames(encode_item(item)).await
    }

    /// Publish raw frames to every current subscriber.
    ///
    /// Returns the number of subscribers reached. Waits while any
    /// subscriber's buffer is full. Subscribers whose receiving side is gone
    /// are pruned.
    pub async fn publish_frames(&self, frames: Multipart) -> Result<usize, ChannelClosed> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ChannelClosed);
        }

        let mut delivered = 0;
        let mut i = 0;
        while i < state.subscribers.len() {
            if state.subscribers[i].send(frames.clone()).await.is_err() {
                debug!("pruning closed subscriber");
                state.subscribers.swap_remove(i);
                continue;
            }
            delivered += 1;
            i += 1;
        }

        trace!(delivered, frames = frames.len(), "published");
        Ok(delivered)
    }

    /// Number of attached subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Close the channel. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if !state.closed {
            state.closed = true;
            state.subscribers.clear();
            debug!("channel closed");
        }
    }
}

/// One consumer of a channel.
pub struct Subscription {
    rx: mpsc::Receiver<Multipart>,
}

impl Subscription {
    /// Wait for the next message with no timeout.
    pub async fn next(&mut self) -> Result<Multipart, ChannelClosed> {
        self.rx.recv().await.ok_or(ChannelClosed)
    }
}

#[async_trait]
impl MessageSource for Subscription {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Multipart>, ChannelClosed> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frames)) => Ok(Some(frames)),
            Ok(None) => Err(ChannelClosed),
            Err(_) => Ok(None),
        }
    }
}

/// A fixed script of messages followed by the end of the channel.
///
/// Handy for replaying captured traffic.
pub struct ScriptedSource {
    messages: std::collections::VecDeque<Multipart>,
}

impl ScriptedSource {
    pub fn new(messages: impl IntoIterator<Item = Multipart>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }

    /// Script built from items.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a DataItem>) -> Self {
        Self::new(items.into_iter().map(encode_item))
    }

    /// Append a raw message, e.g. one with an empty label.
    pub fn push_frames(&mut self, frames: Vec<Bytes>) {
        self.messages.push_back(frames);
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn receive(&mut self, _timeout: Duration) -> Result<Option<Multipart>, ChannelClosed> {
        self.messages.pop_front().map(Some).ok_or(ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorline_core::{decode_item, Label};
    use std::sync::Arc;

    const TICK: Duration = Duration::from_millis(20);

    fn item(label: &str, payload: &[u8]) -> DataItem {
        DataItem::new(Label::new(label).unwrap(), payload.to_vec(), 7)
    }

    fn decoded(frames: Multipart) -> DataItem {
        decode_item(&frames).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_delivery_in_send_order() {
        let publisher = Channel::new(8);
        let mut sub = publisher.subscribe().await;

        publisher.publish(&item("apple", b"1")).await.unwrap();
        publisher.publish(&item("apple", b"2")).await.unwrap();

        assert_eq!(decoded(sub.next().await.unwrap()).payload, Bytes::from_static(b"1"));
        assert_eq!(decoded(sub.next().await.unwrap()).payload, Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_fan_out_and_no_retroactive_delivery() {
        let publisher = Channel::new(8);
        let mut early = publisher.subscribe().await;
        publisher.publish(&item("apple", b"before")).await.unwrap();

        let mut late = publisher.subscribe().await;
        assert_eq!(publisher.publish(&item("apple", b"after")).await.unwrap(), 2);

        assert_eq!(decoded(early.next().await.unwrap()).payload, Bytes::from_static(b"before"));
        assert_eq!(decoded(early.next().await.unwrap()).payload, Bytes::from_static(b"after"));
        assert_eq!(decoded(late.next().await.unwrap()).payload, Bytes::from_static(b"after"));
        assert_eq!(late.receive(TICK).await, Ok(None));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_receive() {
        let publisher = Arc::new(Channel::new(8));
        let mut sub = publisher.subscribe().await;

        let waiter = tokio::spawn(async move { sub.receive(Duration::from_secs(5)).await });
        tokio::time::sleep(TICK).await;
        publisher.close().await;

        assert_eq!(waiter.await.unwrap(), Err(ChannelClosed));
        assert_eq!(publisher.publish(&item("apple", b"x")).await, Err(ChannelClosed));

        let mut after = publisher.subscribe().await;
        assert_eq!(after.receive(TICK).await, Err(ChannelClosed));
    }

    #[tokio::test]
    async fn test_dropping_publisher_closes() {
        let publisher = Channel::new(8);
        let mut sub = publisher.subscribe().await;
        drop(publisher);
        assert_eq!(sub.next().await, Err(ChannelClosed));
    }

    #[tokio::test]
    async fn test_full_buffer_applies_back_pressure() {
        let publisher = Arc::new(Channel::new(1));
        let mut sub = publisher.subscribe().await;
        publisher.publish(&item("apple", b"1")).await.unwrap();

        let p = publisher.clone();
        let blocked = tokio::spawn(async move { p.publish(&item("apple", b"2")).await });
        tokio::time::sleep(TICK).await;
        assert!(!blocked.is_finished());

        sub.next().await.unwrap();
        assert_eq!(blocked.await.unwrap(), Ok(1));
        assert_eq!(decoded(sub.next().await.unwrap()).payload, Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let publisher = Channel::new(8);
        let sub = publisher.subscribe().await;
        let _keep = publisher.subscribe().await;
        drop(sub);

        assert_eq!(publisher.publish(&item("apple", b"x")).await.unwrap(), 1);
        assert_eq!(publisher.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_scripted_source_ends_with_closed() {
        let items = [item("apple", b"1")];
        let mut source = ScriptedSource::from_items(items.iter());
        assert!(source.receive(TICK).await.unwrap().is_some());
        assert_eq!(source.receive(TICK).await, Err(ChannelClosed));
    }
}
