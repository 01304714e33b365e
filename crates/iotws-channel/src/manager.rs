//! Connection manager: keeps one authenticated MQTT session alive.
//!
//! A single spawned task owns the session state machine:
//!
//! ```text
//! Idle ──reconnect()──▶ Authenticating ──creds──▶ Connecting ──Connected──▶ Live
//!  ▲                        │  ▲                      │                     │
//!  └──credential error──────┘  └──── Reconnecting ◀───┴──closed / error─────┘
//! ```
//!
//! Every attempt fetches fresh credentials and signs a fresh URL. Before a
//! replacement is connected the previous connection is fully torn down
//! (listeners detached, queued events discarded, socket force-closed), so
//! no message from an old connection can reach a subscriber.
//!
//! Caller operations are queued on a command channel and processed in
//! order by the same task, so `subscribe` and `publish` never block.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use iotws_sigv4::{ConnectRequest, sign_connect_url};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::IotConfig;
use crate::credentials::CredentialProvider;
use crate::error::{IotError, IotResult};
use crate::fanout::{FanOut, Message, Subscription};
use crate::transport::{Connection, Link, PublishOptions, Transport, TransportEvent};

/// Capacity of the error observer channel.
const ERROR_CAPACITY: usize = 32;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No attempt in flight; waiting for `reconnect()`.
    Idle,
    /// Waiting on the credential provider.
    Authenticating,
    /// Transport connect issued with a freshly signed URL.
    Connecting,
    /// Exactly one live connection; publishes are forwarded.
    Live,
    /// Previous connection torn down; about to re-authenticate.
    Reconnecting,
    /// Driver disposed; terminal.
    Disposed,
}

enum Command {
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        options: PublishOptions,
    },
    Reconnect,
}

/// State shared between the caller-facing handle and the session task.
struct Shared {
    connection: Option<Arc<dyn Connection>>,
    fanout: FanOut,
    disposed: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the session task and the current connection.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
    state: Arc<watch::Sender<ConnectionState>>,
    errors: broadcast::Sender<IotError>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Validate `config` and start connecting in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: IotConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> IotResult<Self> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared {
            connection: None,
            fanout: FanOut::new(),
            disposed: false,
        }));
        let state = Arc::new(watch::Sender::new(ConnectionState::Idle));
        let (errors, _) = broadcast::channel(ERROR_CAPACITY);

        let session = Session {
            config,
            credentials,
            transport,
            commands: commands_rx,
            shared: shared.clone(),
            state: state.clone(),
            errors: errors.clone(),
            topics: Vec::new(),
        };
        let task = tokio::spawn(session.run());

        Ok(Self {
            commands: commands_tx,
            shared,
            state,
            errors,
            task: Some(task),
        })
    }

    /// Add `topic` to the subscription set and stream its messages.
    ///
    /// Safe before the session is live; the subscribe is applied on connect
    /// and replayed on every reconnect. Repeat subscriptions to a topic do
    /// not issue another wire-level subscribe.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut shared = lock(&self.shared);
        if shared.disposed || topic.is_empty() {
            if topic.is_empty() {
                tracing::warn!("ignoring subscribe to empty topic");
            }
            return Subscription::closed(Some(topic.to_string()));
        }
        let subscription = shared.fanout.register(Some(topic.to_string()));
        drop(shared);

        let _ = self.commands.send(Command::Subscribe(topic.to_string()));
        subscription
    }

    /// Stream of every inbound message across all subscribed topics.
    pub fn messages(&self) -> Subscription {
        let mut shared = lock(&self.shared);
        if shared.disposed {
            return Subscription::closed(None);
        }
        shared.fanout.register(None)
    }

    /// Fire-and-forget publish. Dropped when no connection is live.
    pub fn publish(&self, topic: &str, payload: &str, options: PublishOptions) {
        if self.is_disposed() {
            tracing::debug!(topic = %topic, "dropping publish on disposed driver");
            return;
        }
        let _ = self.commands.send(Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
            options,
        });
    }

    /// Start a new attempt from Idle, or force a fresh handshake when live.
    pub fn reconnect(&self) -> IotResult<()> {
        if self.is_disposed() {
            return Err(IotError::Disposed);
        }
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| IotError::Disposed)
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Credential failures (once per attempt) and transport failures.
    pub fn errors(&self) -> broadcast::Receiver<IotError> {
        self.errors.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.shared).disposed
    }

    /// Stop the session and force-close the live connection.
    ///
    /// Synchronous: once this returns no further message is delivered and
    /// every subscription ends after draining what it already holds.
    pub fn dispose(&mut self) {
        let connection = {
            let mut shared = lock(&self.shared);
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            shared.fanout.clear();
            self.state.send_replace(ConnectionState::Disposed);
            shared.connection.take()
        };

        if let Some(connection) = connection {
            connection.remove_all_listeners();
            connection.end();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::info!("iot driver disposed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Where the session goes next.
enum Next {
    Authenticate,
    Idle,
    Backoff,
    Shutdown,
}

struct Session {
    config: IotConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Mutex<Shared>>,
    state: Arc<watch::Sender<ConnectionState>>,
    errors: broadcast::Sender<IotError>,
    /// Desired subscriptions in first-subscribed order.
    topics: Vec<String>,
}

impl Session {
    async fn run(mut self) {
        let mut next = Next::Authenticate;
        loop {
            next = match next {
                Next::Authenticate => self.attempt().await,
                Next::Idle => self.idle().await,
                Next::Backoff => self.backoff().await,
                Next::Shutdown => break,
            };
        }
        tracing::debug!("iot session task stopped");
    }

    /// One Authenticating → Connecting → Live cycle.
    async fn attempt(&mut self) -> Next {
        self.set_state(ConnectionState::Authenticating);

        let provider = self.credentials.clone();
        let Some(result) = self
            .with_commands(async move { provider.credentials().await })
            .await
        else {
            return Next::Shutdown;
        };
        let credentials = match result.and_then(|c| c.validate().map(|()| c)) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(error = %e, "credential retrieval failed");
                self.report(e);
                return Next::Idle;
            }
        };

        let url = sign_connect_url(&ConnectRequest::iot(
            &self.config.endpoint,
            &self.config.region,
            &credentials.access_key_id,
            &credentials.secret_access_key,
            credentials.session_token.as_deref(),
            Utc::now(),
        ));

        self.set_state(ConnectionState::Connecting);
        tracing::debug!(endpoint = %self.config.endpoint, "connecting with freshly signed url");

        let transport = self.transport.clone();
        let Some(result) = self
            .with_commands(async move { transport.connect(&url).await })
            .await
        else {
            return Next::Shutdown;
        };
        let mut link = match result {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(error = %e, "transport connect failed");
                self.report(e);
                self.set_state(ConnectionState::Reconnecting);
                return Next::Backoff;
            }
        };

        if !self.install(&link) {
            link.teardown();
            return Next::Shutdown;
        }

        match self.await_connected(&mut link).await {
            Ok(()) => self.live(link).await,
            Err(next) => {
                self.retire(link);
                next
            }
        }
    }

    /// Wait for the transport's connected signal, dropping publishes meanwhile.
    async fn await_connected(&mut self, link: &mut Link) -> Result<(), Next> {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_offline(command),
                    None => return Err(Next::Shutdown),
                },
                event = link.events.recv() => match event {
                    Some(TransportEvent::Connected) => return Ok(()),
                    Some(TransportEvent::Message { topic, .. }) => {
                        tracing::debug!(topic = %topic, "ignoring message before connect");
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        tracing::warn!(reason = %reason, "connection closed while connecting");
                        self.report(IotError::Connection(reason));
                        return Err(Next::Backoff);
                    }
                    Some(TransportEvent::ReconnectRequested) | None => {
                        tracing::warn!("connection ended while connecting");
                        return Err(Next::Backoff);
                    }
                },
            }
        }
    }

    async fn live(&mut self, mut link: Link) -> Next {
        self.set_state(ConnectionState::Live);
        tracing::info!(
            endpoint = %self.config.endpoint,
            topics = self.topics.len(),
            "iot connection live"
        );

        for topic in self.topics.clone() {
            if let Err(e) = link.connection.subscribe(&topic).await {
                return self.fail_live(link, e);
            }
        }

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    None => {
                        self.retire(link);
                        return Next::Shutdown;
                    }
                    Some(Command::Subscribe(topic)) => {
                        if self.add_topic(&topic) {
                            if let Err(e) = link.connection.subscribe(&topic).await {
                                return self.fail_live(link, e);
                            }
                        }
                    }
                    Some(Command::Publish { topic, payload, options }) => {
                        if let Err(e) = link.connection.publish(&topic, payload.as_bytes(), options).await {
                            return self.fail_live(link, e);
                        }
                    }
                    Some(Command::Reconnect) => {
                        tracing::info!("reconnect requested while live");
                        self.retire(link);
                        return Next::Authenticate;
                    }
                },
                event = link.events.recv() => match event {
                    Some(TransportEvent::Message { topic, payload }) => {
                        self.deliver(Message::from_bytes(topic, &payload));
                    }
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::Closed { reason }) => {
                        tracing::info!(reason = %reason, "iot connection closed, reconnecting");
                        self.retire(link);
                        return Next::Backoff;
                    }
                    Some(TransportEvent::ReconnectRequested) | None => {
                        tracing::info!("iot connection no longer usable, reconnecting");
                        self.retire(link);
                        return Next::Backoff;
                    }
                },
            }
        }
    }

    fn fail_live(&mut self, link: Link, error: IotError) -> Next {
        tracing::warn!(error = %error, "transport operation failed, reconnecting");
        self.report(error);
        self.retire(link);
        Next::Backoff
    }

    /// Wait for an external trigger after a credential failure.
    async fn idle(&mut self) -> Next {
        self.set_state(ConnectionState::Idle);
        loop {
            match self.commands.recv().await {
                None => return Next::Shutdown,
                Some(Command::Reconnect) => return Next::Authenticate,
                Some(command) => self.handle_offline(command),
            }
        }
    }

    /// Optional pause before the next attempt.
    ///
    /// Always suspends at least once: collaborators that fail without ever
    /// returning `Pending` would otherwise keep this task on the executor.
    async fn backoff(&mut self) -> Next {
        let delay = self.config.reconnect_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return Next::Authenticate;
        }
        tracing::debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
        match self.with_commands(tokio::time::sleep(delay)).await {
            Some(()) => Next::Authenticate,
            None => Next::Shutdown,
        }
    }

    /// Drive `fut` while servicing commands with offline semantics.
    /// `None` when the manager handle is gone.
    async fn with_commands<T>(&mut self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_offline(command),
                    None => return None,
                },
                out = &mut fut => return Some(out),
            }
        }
    }

    fn handle_offline(&mut self, command: Command) {
        match command {
            Command::Subscribe(topic) => {
                if self.add_topic(&topic) {
                    tracing::debug!(topic = %topic, "subscription queued until live");
                }
            }
            Command::Publish { topic, .. } => {
                tracing::debug!(topic = %topic, "dropping publish, no live connection");
            }
            Command::Reconnect => {
                tracing::debug!("reconnect ignored, attempt already in progress");
            }
        }
    }

    /// Record `topic`; true if it was not already in the set.
    fn add_topic(&mut self, topic: &str) -> bool {
        if self.topics.iter().any(|t| t == topic) {
            return false;
        }
        self.topics.push(topic.to_string());
        true
    }

    fn deliver(&self, message: Message) {
        let mut shared = lock(&self.shared);
        if shared.disposed {
            return;
        }
        let delivered = shared.fanout.deliver(&message);
        tracing::debug!(topic = %message.topic, subscribers = delivered, "message delivered");
    }

    /// Make `link` the connection `dispose` will close. False once disposed.
    fn install(&self, link: &Link) -> bool {
        let mut shared = lock(&self.shared);
        if shared.disposed {
            return false;
        }
        shared.connection = Some(link.connection.clone());
        true
    }

    /// Enter Reconnecting and fully dispose of `link`.
    fn retire(&self, link: Link) {
        self.set_state(ConnectionState::Reconnecting);
        lock(&self.shared).connection = None;
        link.teardown();
    }

    fn set_state(&self, state: ConnectionState) {
        let shared = lock(&self.shared);
        if !shared.disposed {
            self.state.send_replace(state);
        }
    }

    fn report(&self, error: IotError) {
        let _ = self.errors.send(error);
    }
}
