//! MQTT over secure WebSocket, backed by `rumqttc`.
//!
//! Each `connect` builds a fresh `AsyncClient` for the presigned URL and
//! drives its `EventLoop` on a spawned task. rumqttc's own reconnect is never
//! used: the first poll error is reported as `Closed` and the task exits, so
//! the manager can mint a new signed URL before trying again.
//!
//! Subscribe and publish wait on rumqttc's bounded request queue, which only
//! the event loop drains. Events are therefore forwarded on an unbounded
//! queue: the loop must keep polling while the manager waits on a request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::IotConfig;
use crate::error::{IotError, IotResult};
use crate::transport::{Connection, Link, PublishOptions, Transport, TransportEvent};

/// AWS IoT Core accepts 128 KB payloads; leave headroom for headers and topic.
const MAX_PACKET_SIZE: usize = 128 * 1024 + 1024;

/// Port for `wss://` endpoints.
const WSS_PORT: u16 = 443;

/// `Transport` implementation opening rumqttc WebSocket sessions.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    client_id: String,
    keepalive: Duration,
    /// Capacity of rumqttc's outgoing request queue.
    request_capacity: usize,
}

impl WebSocketTransport {
    pub fn new(client_id: impl Into<String>, keepalive: Duration, request_capacity: usize) -> Self {
        Self {
            client_id: client_id.into(),
            keepalive,
            request_capacity: request_capacity.max(1),
        }
    }

    pub fn from_config(config: &IotConfig) -> Self {
        Self::new(
            config.resolve_client_id(),
            config.keepalive(),
            config.request_capacity,
        )
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self, url: &str) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, url, WSS_PORT);
        options.set_keep_alive(self.keepalive);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options.set_transport(rumqttc::Transport::wss_with_default_config());
        options
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> IotResult<Link> {
        if !url.starts_with("wss://") {
            return Err(IotError::Connection(format!(
                "expected a wss:// URL, got scheme of '{}'",
                url.split("://").next().unwrap_or_default()
            )));
        }

        let (client, eventloop) = AsyncClient::new(self.options(url), self.request_capacity);
        let (tx, rx) = mpsc::unbounded_channel();
        let listening = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(drive(eventloop, tx, listening.clone()));

        tracing::debug!(client_id = %self.client_id, "websocket event loop spawned");

        let connection = WebSocketConnection {
            client,
            listening,
            task: Mutex::new(Some(task)),
        };
        Ok(Link::new(Arc::new(connection), rx))
    }
}

/// Poll the event loop, forwarding lifecycle and inbound publishes.
async fn drive(
    mut eventloop: EventLoop,
    events: mpsc::UnboundedSender<TransportEvent>,
    listening: Arc<AtomicBool>,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(event) => match translate(event) {
                Some(event) => event,
                None => continue,
            },
            Err(e) => TransportEvent::Closed {
                reason: e.to_string(),
            },
        };

        if !listening.load(Ordering::Acquire) {
            break;
        }
        let terminal = event.ends_connection();
        if events.send(event).is_err() || terminal {
            break;
        }
    }
    tracing::debug!("websocket event loop stopped");
}

/// Map a rumqttc event to a transport event. Acks, pings and outgoing
/// packets carry nothing the manager needs.
fn translate(event: Event) -> Option<TransportEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Some(TransportEvent::Connected),
        Event::Incoming(Packet::Publish(publish)) => Some(TransportEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Event::Incoming(Packet::Disconnect) => Some(TransportEvent::Closed {
            reason: "broker sent disconnect".into(),
        }),
        _ => None,
    }
}

/// A single rumqttc session.
pub struct WebSocketConnection {
    client: AsyncClient,
    listening: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn subscribe(&self, topic: &str) -> IotResult<()> {
        self.client
            .subscribe(topic, rumqttc::QoS::AtMostOnce)
            .await
            .map_err(|e| IotError::Subscribe(e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> IotResult<()> {
        self.client
            .publish(topic, options.qos, options.retain, payload.to_vec())
            .await
            .map_err(|e| IotError::Publish(e.to_string()))
    }

    fn remove_all_listeners(&self) {
        self.listening.store(false, Ordering::Release);
    }

    fn end(&self) {
        // Dropping the event loop closes the socket without a DISCONNECT.
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.remove_all_listeners();
        self.end();
    }
}
