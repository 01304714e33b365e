//! Self-healing AWS IoT channel over MQTT-on-WebSocket.
//!
//! Provides the connection side of the IoT driver:
//! - `IotDriver` caller surface (subscribe, publish, dispose)
//! - `ConnectionManager` state machine that re-authenticates and re-signs
//!   on every reconnect
//! - `CognitoCredentialProvider` for anonymous Cognito credentials
//! - `WebSocketTransport` over rumqttc
//! - mock collaborators for testing without AWS

pub mod cognito;
pub mod config;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod fanout;
pub mod manager;
pub mod mock;
pub mod transport;
pub mod websocket;

// Re-exports for convenience.
pub use cognito::CognitoCredentialProvider;
pub use config::IotConfig;
pub use credentials::{CredentialProvider, Credentials, StaticCredentialProvider};
pub use driver::{IotDriver, MessageOptions, OutboundMessage};
pub use error::{IotError, IotResult};
pub use fanout::{Message, Subscription};
pub use manager::{ConnectionManager, ConnectionState};
pub use mock::{MockCredentialProvider, MockTransport, TransportCall};
pub use transport::{Connection, Link, PublishOptions, Transport, TransportEvent};
pub use websocket::WebSocketTransport;
