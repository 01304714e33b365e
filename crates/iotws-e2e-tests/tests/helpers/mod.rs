//! Shared test harness for E2E driver tests.
//!
//! Wires an `IotDriver` to a `MockTransport` and a scripted
//! `MockCredentialProvider`, exercising the real manager, signer and
//! fan-out code paths.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use iotws_channel::{
    ConnectionState, IotConfig, IotDriver, IotError, Message, MockCredentialProvider,
    MockTransport, Subscription, TransportCall,
};

/// Upper bound for any single wait in a scenario.
pub const WAIT: Duration = Duration::from_secs(5);

pub const REGION: &str = "us-east-1";
pub const POOL_ID: &str = "abc-123";
pub const ENDPOINT: &str = "abc.iot.us-east-1.amazonaws.com";

pub fn sample_config() -> IotConfig {
    IotConfig::new(REGION, POOL_ID, ENDPOINT)
}

/// Route driver logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Driver plus its mock collaborators.
pub struct TestHarness {
    pub driver: IotDriver,
    pub transport: Arc<MockTransport>,
    pub credentials: Arc<MockCredentialProvider>,
    /// Subscribed before the session task first runs, so no error is missed.
    pub errors: broadcast::Receiver<IotError>,
}

impl TestHarness {
    /// Connections report `Connected` as soon as they open.
    pub fn auto_connect() -> Self {
        Self::build(sample_config(), MockTransport::auto_connect(), MockCredentialProvider::new())
    }

    /// Connections wait for the test to emit `Connected`.
    pub fn manual() -> Self {
        Self::build(sample_config(), MockTransport::new(), MockCredentialProvider::new())
    }

    /// Custom config and collaborators (script them before calling).
    pub fn build(
        config: IotConfig,
        transport: MockTransport,
        credentials: MockCredentialProvider,
    ) -> Self {
        init_tracing();
        let transport = Arc::new(transport);
        let credentials = Arc::new(credentials);
        let driver =
            IotDriver::with_collaborators(config, credentials.clone(), transport.clone())
                .expect("valid test config");
        let errors = driver.errors();
        Self {
            driver,
            transport,
            credentials,
            errors,
        }
    }

    /// Build with auto-connect and wait until the first connection is live.
    pub async fn live() -> Self {
        let h = Self::auto_connect();
        h.wait_state(ConnectionState::Live).await;
        h
    }

    pub async fn wait_state(&self, want: ConnectionState) {
        let mut state = self.driver.state();
        timeout(WAIT, state.wait_for(|s| *s == want))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
            .expect("state channel closed");
    }

    pub async fn wait_connects(&self, n: usize) {
        timeout(WAIT, self.transport.wait_for_connects(n))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} connects"));
    }

    /// Wait until connection `connection` has seen `n` subscribe calls.
    pub async fn wait_subscriptions(&self, connection: usize, n: usize) {
        timeout(
            WAIT,
            self.transport
                .wait_for_calls(|calls| subscribe_count(calls, connection) >= n),
        )
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {n} subscribes on #{connection}"));
    }

    /// Wait until `n` publish calls were made across all connections.
    pub async fn wait_publishes(&self, n: usize) {
        timeout(
            WAIT,
            self.transport.wait_for_calls(|calls| publishes(calls).len() >= n),
        )
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {n} publishes"));
    }

    /// Next error, failing the test if none arrives.
    pub async fn next_error(&mut self) -> IotError {
        timeout(WAIT, self.errors.recv())
            .await
            .expect("timed out waiting for an error")
            .expect("error channel closed")
    }

    /// `(connection, topic, payload)` of every publish call, in order.
    pub fn published(&self) -> Vec<(usize, String, String)> {
        publishes(&self.transport.calls())
    }

    /// Position of the `n`th (zero-based) connect call in the call log.
    pub fn connect_position(&self, n: usize) -> usize {
        self.transport
            .calls()
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, TransportCall::Connect { .. }))
            .nth(n)
            .map(|(i, _)| i)
            .unwrap_or_else(|| panic!("connect #{n} was never made"))
    }

    /// Position of `call` in the call log.
    pub fn position(&self, call: &TransportCall) -> usize {
        self.transport
            .calls()
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{call:?} was never made"))
    }
}

/// Receive the next message or fail the test.
pub async fn recv(sub: &mut Subscription) -> Message {
    timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("subscription ended")
}

fn subscribe_count(calls: &[TransportCall], connection: usize) -> usize {
    calls
        .iter()
        .filter(|c| matches!(c, TransportCall::Subscribe { connection: n, .. } if *n == connection))
        .count()
}

fn publishes(calls: &[TransportCall]) -> Vec<(usize, String, String)> {
    calls
        .iter()
        .filter_map(|c| match c {
            TransportCall::Publish {
                connection,
                topic,
                payload,
                ..
            } => Some((*connection, topic.clone(), payload.clone())),
            _ => None,
        })
        .collect()
}
