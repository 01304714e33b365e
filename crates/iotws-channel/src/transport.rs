//! Transport collaborator contract.
//!
//! A transport turns a presigned URL into a live MQTT connection. Each
//! connection reports its lifecycle on an unbounded event queue:
//! one `Connected`, any number of `Message`s, and finally `Closed` or
//! `ReconnectRequested`. The manager treats the last two identically.
//!
//! The queue is unbounded so a transport's I/O task never parks on it while
//! the manager is itself waiting on that task to accept a publish.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::mpsc;

use crate::error::IotResult;

/// Lifecycle and inbound traffic of a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker accepted the session.
    Connected,
    /// Inbound publish.
    Message { topic: String, payload: Vec<u8> },
    /// Socket ended or errored; the connection is unusable.
    Closed { reason: String },
    /// The transport wants a fresh connection (signal from some libraries).
    ReconnectRequested,
}

impl TransportEvent {
    /// True for the events after which the connection is no longer authoritative.
    pub fn ends_connection(&self) -> bool {
        matches!(
            self,
            TransportEvent::Closed { .. } | TransportEvent::ReconnectRequested
        )
    }
}

/// Options forwarded verbatim with a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

/// Handle to a single live (or connecting) transport connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Subscribe to a topic filter.
    async fn subscribe(&self, topic: &str) -> IotResult<()>;

    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8], options: PublishOptions)
    -> IotResult<()>;

    /// Stop emitting events for this connection.
    fn remove_all_listeners(&self);

    /// Forcefully close the socket. Safe to call more than once.
    fn end(&self);
}

/// A connection handle paired with its event queue.
pub struct Link {
    pub connection: Arc<dyn Connection>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    pub fn new(
        connection: Arc<dyn Connection>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { connection, events }
    }

    /// Detach listeners and force-close the socket.
    ///
    /// Events still queued are discarded, so nothing from this connection
    /// can be delivered after teardown.
    pub fn teardown(mut self) {
        self.connection.remove_all_listeners();
        self.events.close();
        while self.events.try_recv().is_ok() {}
        self.connection.end();
    }
}

/// Opens connections to a presigned `wss://` URL.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> IotResult<Link>;
}
