//! Inbound message fan-out.
//!
//! Subscribers register a filter (one exact topic, or every topic) and get
//! an unbounded queue. Delivery walks the list once per message, so each
//! subscriber sees each matching message exactly once and in transport order.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// An inbound message with its payload normalized to a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Build from a raw transport payload, replacing invalid UTF-8.
    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self::new(topic, String::from_utf8_lossy(payload))
    }
}

/// Cancellable handle and async iterator over delivered messages.
#[derive(Debug)]
pub struct Subscription {
    topic: Option<String>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    /// A subscription that is already finished.
    pub(crate) fn closed(topic: Option<String>) -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self { topic, rx }
    }

    /// The topic this subscription is filtered to; `None` for all topics.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Next message, or `None` once cancelled or the driver is disposed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stop receiving. Already queued messages can still be drained.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

struct Subscriber {
    filter: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

impl Subscriber {
    fn wants(&self, topic: &str) -> bool {
        self.filter.as_deref().is_none_or(|filter| filter == topic)
    }
}

/// The subscriber list.
#[derive(Default)]
pub struct FanOut {
    subscribers: Vec<Subscriber>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; `None` receives every topic.
    ///
    /// Cancelled and dropped subscribers are pruned here as well as on
    /// delivery, so a quiet topic cannot accumulate dead entries.
    pub fn register(&mut self, filter: Option<String>) -> Subscription {
        self.subscribers.retain(|sub| !sub.tx.is_closed());
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(Subscriber {
            filter: filter.clone(),
            tx,
        });
        Subscription { topic: filter, rx }
    }

    /// Deliver to every matching subscriber, pruning cancelled ones.
    /// Returns the number of subscribers that received the message.
    pub fn deliver(&mut self, message: &Message) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if sub.wants(&message.topic) {
                if sub.tx.send(message.clone()).is_err() {
                    return false;
                }
                delivered += 1;
            }
            true
        });
        delivered
    }

    /// Drop every subscriber; their `recv` returns `None` once drained.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
