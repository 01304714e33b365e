//! Mock collaborators for testing without a broker or AWS.
//!
//! `MockTransport` records every connect, subscribe, publish and teardown
//! call in order, and lets a test inject lifecycle events into any
//! connection it handed out. `MockTransport::echo_broker` additionally
//! routes publishes through a bounded request queue drained by a broker
//! task, the way a real client's I/O loop does. `MockCredentialProvider`
//! replays scripted results.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::{mpsc, watch};

use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{IotError, IotResult};
use crate::transport::{Connection, Link, PublishOptions, Transport, TransportEvent};

/// A recorded transport call. `connection` is the zero-based index of the
/// connection in connect order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect { url: String },
    Subscribe { connection: usize, topic: String },
    Publish {
        connection: usize,
        topic: String,
        payload: String,
        qos: QoS,
        retain: bool,
    },
    RemoveAllListeners { connection: usize },
    End { connection: usize },
}

type CallLog = Arc<watch::Sender<Vec<TransportCall>>>;

struct ConnectionSlot {
    events: mpsc::UnboundedSender<TransportEvent>,
    listening: Arc<AtomicBool>,
}

/// Mock implementation of the `Transport` trait.
pub struct MockTransport {
    calls: CallLog,
    slots: Mutex<Vec<ConnectionSlot>>,
    connect_failures: Mutex<VecDeque<IotError>>,
    refuse_all: Mutex<Option<IotError>>,
    fail_publish: Arc<AtomicBool>,
    auto_connect: bool,
    echo_capacity: Option<usize>,
}

impl MockTransport {
    /// Connections stay in `Connecting` until the test emits `Connected`.
    pub fn new() -> Self {
        Self::build(false, None)
    }

    /// Every connection reports `Connected` as soon as it is opened.
    pub fn auto_connect() -> Self {
        Self::build(true, None)
    }

    /// Auto-connecting transport whose publishes wait on a request queue of
    /// `request_capacity`. A per-connection broker task drains it, records
    /// each publish and sends it straight back as an inbound `Message`.
    pub fn echo_broker(request_capacity: usize) -> Self {
        Self::build(true, Some(request_capacity.max(1)))
    }

    fn build(auto_connect: bool, echo_capacity: Option<usize>) -> Self {
        Self {
            calls: Arc::new(watch::Sender::new(Vec::new())),
            slots: Mutex::new(Vec::new()),
            connect_failures: Mutex::new(VecDeque::new()),
            refuse_all: Mutex::new(None),
            fail_publish: Arc::new(AtomicBool::new(false)),
            auto_connect,
            echo_capacity,
        }
    }

    /// Make the next `connect` fail with `error`. Failures queue up.
    pub fn fail_next_connect(&self, error: IotError) {
        self.connect_failures.lock().unwrap().push_back(error);
    }

    /// Fail every `connect` with `error` once the queued failures are used
    /// up; `None` accepts connections again.
    pub fn refuse_connections(&self, error: Option<IotError>) {
        *self.refuse_all.lock().unwrap() = error;
    }

    /// Make publishes on every connection fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::Release);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.borrow().clone()
    }

    /// URLs passed to `connect`, in order (failed attempts included).
    pub fn connect_urls(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Connect { url } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Topics subscribed on connection `connection`, in order.
    pub fn subscriptions(&self, connection: usize) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { connection: c, topic } if *c == connection => {
                    Some(topic.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of `connect` calls, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, TransportCall::Connect { .. }))
            .count()
    }

    /// Number of connections handed out.
    pub fn connections(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Resolve once the call log satisfies `predicate`.
    pub async fn wait_for_calls(&self, predicate: impl Fn(&[TransportCall]) -> bool) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|calls| predicate(calls)).await;
    }

    /// Resolve once `n` connect calls have been made.
    pub async fn wait_for_connects(&self, n: usize) {
        self.wait_for_calls(|calls| {
            calls
                .iter()
                .filter(|c| matches!(c, TransportCall::Connect { .. }))
                .count()
                >= n
        })
        .await;
    }

    /// Inject `event` into connection `connection`.
    ///
    /// Dropped silently once that connection's listeners were removed, the
    /// same way a real socket's late events go nowhere.
    pub async fn emit(&self, connection: usize, event: TransportEvent) {
        let sender = {
            let slots = self.slots.lock().unwrap();
            let slot = slots
                .get(connection)
                .unwrap_or_else(|| panic!("no mock connection #{connection}"));
            if !slot.listening.load(Ordering::Acquire) {
                return;
            }
            slot.events.clone()
        };
        let _ = sender.send(event);
    }

    /// Inject an inbound message into connection `connection`.
    pub async fn emit_message(&self, connection: usize, topic: &str, payload: &str) {
        self.emit(
            connection,
            TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
            },
        )
        .await;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> IotResult<Link> {
        self.calls.send_modify(|calls| {
            calls.push(TransportCall::Connect {
                url: url.to_string(),
            })
        });

        let refused = self.connect_failures.lock().unwrap().pop_front();
        if let Some(error) = refused.or_else(|| self.refuse_all.lock().unwrap().clone()) {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if self.auto_connect {
            let _ = tx.send(TransportEvent::Connected);
        }
        let listening = Arc::new(AtomicBool::new(true));

        let index = {
            let mut slots = self.slots.lock().unwrap();
            slots.push(ConnectionSlot {
                events: tx.clone(),
                listening: listening.clone(),
            });
            slots.len() - 1
        };

        let requests = self.echo_capacity.map(|capacity| {
            let (requests, queue) = mpsc::channel(capacity);
            tokio::spawn(echo_loop(queue, self.calls.clone(), tx, listening.clone()));
            requests
        });

        let connection = MockConnection {
            index,
            calls: self.calls.clone(),
            listening,
            ended: AtomicBool::new(false),
            fail_publish: self.fail_publish.clone(),
            requests,
        };
        Ok(Link::new(Arc::new(connection), rx))
    }
}

/// Broker side of an `echo_broker` connection.
async fn echo_loop(
    mut queue: mpsc::Receiver<TransportCall>,
    calls: CallLog,
    events: mpsc::UnboundedSender<TransportEvent>,
    listening: Arc<AtomicBool>,
) {
    while let Some(call) = queue.recv().await {
        let echo = match &call {
            TransportCall::Publish { topic, payload, .. } => Some(TransportEvent::Message {
                topic: topic.clone(),
                payload: payload.clone().into_bytes(),
            }),
            _ => None,
        };
        calls.send_modify(|calls| calls.push(call));
        if let Some(event) = echo.filter(|_| listening.load(Ordering::Acquire)) {
            let _ = events.send(event);
        }
    }
}

/// Connection handed out by `MockTransport`.
pub struct MockConnection {
    index: usize,
    calls: CallLog,
    listening: Arc<AtomicBool>,
    ended: AtomicBool,
    fail_publish: Arc<AtomicBool>,
    requests: Option<mpsc::Sender<TransportCall>>,
}

impl MockConnection {
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn record(&self, call: TransportCall) {
        self.calls.send_modify(|calls| calls.push(call));
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn subscribe(&self, topic: &str) -> IotResult<()> {
        if self.is_ended() {
            return Err(IotError::Subscribe("connection ended".into()));
        }
        self.record(TransportCall::Subscribe {
            connection: self.index,
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> IotResult<()> {
        if self.is_ended() || self.fail_publish.load(Ordering::Acquire) {
            return Err(IotError::Publish("mock publish failure".into()));
        }
        let call = TransportCall::Publish {
            connection: self.index,
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos: options.qos,
            retain: options.retain,
        };
        match &self.requests {
            Some(requests) => requests
                .send(call)
                .await
                .map_err(|_| IotError::Publish("mock broker gone".into())),
            None => {
                self.record(call);
                Ok(())
            }
        }
    }

    fn remove_all_listeners(&self) {
        self.listening.store(false, Ordering::Release);
        self.record(TransportCall::RemoveAllListeners {
            connection: self.index,
        });
    }

    fn end(&self) {
        self.ended.store(true, Ordering::Release);
        self.record(TransportCall::End {
            connection: self.index,
        });
    }
}

/// Mock implementation of the `CredentialProvider` trait.
///
/// Scripted results are returned first, in order; once they run out every
/// call succeeds with fixed mock credentials.
pub struct MockCredentialProvider {
    script: Mutex<VecDeque<IotResult<Credentials>>>,
    calls: AtomicUsize,
}

impl MockCredentialProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// The credentials returned once the script is exhausted.
    pub fn default_credentials() -> Credentials {
        Credentials::new(
            "AKIDMOCK",
            "mock-secret",
            Some("mock-session-token".to_string()),
        )
    }

    pub fn push_ok(&self, credentials: Credentials) {
        self.script.lock().unwrap().push_back(Ok(credentials));
    }

    pub fn push_err(&self, error: IotError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Number of times `credentials` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for MockCredentialProvider {
    async fn credentials(&self) -> IotResult<Credentials> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::default_credentials()))
    }
}
