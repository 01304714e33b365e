//! Caller-facing IoT driver.
//!
//! `IotDriver` wires a credential provider and a transport into a
//! `ConnectionManager` and exposes the subscribe/publish surface used by the
//! hosting application.

use std::sync::Arc;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::cognito::CognitoCredentialProvider;
use crate::config::IotConfig;
use crate::credentials::CredentialProvider;
use crate::error::{IotError, IotResult};
use crate::fanout::Subscription;
use crate::manager::{ConnectionManager, ConnectionState};
use crate::transport::{PublishOptions, Transport};
use crate::websocket::WebSocketTransport;

/// Publish options as they arrive from the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOptions {
    /// MQTT QoS level, 0 to 2.
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

impl TryFrom<MessageOptions> for PublishOptions {
    type Error = IotError;

    fn try_from(options: MessageOptions) -> IotResult<Self> {
        let qos = match options.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            other => {
                return Err(IotError::Publish(format!("invalid QoS level {other}")));
            }
        };
        Ok(PublishOptions {
            qos,
            retain: options.retain,
        })
    }
}

/// An application publish: `{ "topic": ..., "message": ..., "options": {...} }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    #[serde(rename = "message")]
    pub payload: String,
    #[serde(default)]
    pub options: MessageOptions,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            options: MessageOptions::default(),
        }
    }
}

/// Self-healing AWS IoT channel.
///
/// Connecting starts as soon as the driver is built. Dropping the driver
/// disposes it.
pub struct IotDriver {
    manager: ConnectionManager,
}

impl IotDriver {
    /// Build a driver using anonymous Cognito credentials and the rumqttc
    /// WebSocket transport. Must be called inside a tokio runtime.
    pub fn new(config: IotConfig) -> IotResult<Self> {
        config.validate()?;
        let credentials = Arc::new(CognitoCredentialProvider::from_config(&config));
        let transport = Arc::new(WebSocketTransport::from_config(&config));
        tracing::info!(
            region = %config.region,
            endpoint = %config.endpoint,
            client_id = %transport.client_id(),
            "starting iot driver"
        );
        Self::with_collaborators(config, credentials, transport)
    }

    /// Build a driver over caller-supplied collaborators.
    pub fn with_collaborators(
        config: IotConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> IotResult<Self> {
        let manager = ConnectionManager::start(config, credentials, transport)?;
        Ok(Self { manager })
    }

    /// Messages on `topic`. The topic is subscribed on the broker once, no
    /// matter how many subscriptions share it.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.manager.subscribe(topic)
    }

    /// Every inbound message across all subscribed topics.
    pub fn messages(&self) -> Subscription {
        self.manager.messages()
    }

    /// Publish with default options. Dropped when not live.
    pub fn publish(&self, topic: &str, payload: &str) {
        self.manager.publish(topic, payload, PublishOptions::default());
    }

    pub fn publish_with(&self, topic: &str, payload: &str, options: PublishOptions) {
        self.manager.publish(topic, payload, options);
    }

    /// Serialize `value` as JSON and publish it.
    pub fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> IotResult<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| IotError::Other(format!("serialization error: {e}")))?;
        self.publish(topic, &payload);
        Ok(())
    }

    /// Publish an application message. Fails only on invalid options.
    pub fn send(&self, message: OutboundMessage) -> IotResult<()> {
        let options = PublishOptions::try_from(message.options)?;
        self.manager.publish(&message.topic, &message.payload, options);
        Ok(())
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.manager.current_state()
    }

    pub fn errors(&self) -> broadcast::Receiver<IotError> {
        self.manager.errors()
    }

    /// Retry after a credential failure, or force a fresh connection.
    pub fn reconnect(&self) -> IotResult<()> {
        self.manager.reconnect()
    }

    pub fn dispose(&mut self) {
        self.manager.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.manager.is_disposed()
    }
}
