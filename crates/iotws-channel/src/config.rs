use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{IotError, IotResult};

/// Driver configuration, loadable from TOML or environment.
#[derive(Debug, Clone, Deserialize)]
pub struct IotConfig {
    /// AWS region (e.g., "us-east-1").
    #[serde(default)]
    pub region: String,
    /// Cognito identity pool GUID, without the region prefix.
    #[serde(default)]
    pub identity_pool_id: String,
    /// AWS IoT data endpoint (`aws iot describe-endpoint`).
    #[serde(default)]
    pub endpoint: String,
    /// MQTT client ID. Generated per driver when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// Pause before re-authenticating after a dropped connection. Zero retries immediately.
    #[serde(default)]
    pub reconnect_delay_ms: u64,
    /// Capacity of the MQTT client's outgoing request queue. Publishes and
    /// subscribes wait for room once it is full.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_keepalive() -> u16 {
    30
}

fn default_request_capacity() -> usize {
    64
}

impl IotConfig {
    pub fn new(
        region: impl Into<String>,
        identity_pool_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            identity_pool_id: identity_pool_id.into(),
            endpoint: endpoint.into(),
            client_id: None,
            keepalive_secs: default_keepalive(),
            reconnect_delay_ms: 0,
            request_capacity: default_request_capacity(),
        }
    }

    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> IotResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| IotError::Configuration(format!("invalid config '{path}': {e}")))
    }

    /// Load config from `IOT_REGION`, `IOT_IDENTITY_POOL_ID`, `IOT_ENDPOINT`
    /// and the optional `IOT_CLIENT_ID`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(
            lookup("IOT_REGION").unwrap_or_default(),
            lookup("IOT_IDENTITY_POOL_ID").unwrap_or_default(),
            lookup("IOT_ENDPOINT").unwrap_or_default(),
        );
        config.client_id = lookup("IOT_CLIENT_ID").filter(|id| !id.trim().is_empty());
        config
    }

    /// Reject configs missing a required field, in region, pool, endpoint order.
    pub fn validate(&self) -> IotResult<()> {
        if self.region.trim().is_empty() {
            return Err(IotError::Configuration("Specify a region".into()));
        }
        if self.identity_pool_id.trim().is_empty() {
            return Err(IotError::Configuration(
                "Specify an identityPoolId, the cognito guid".into(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(IotError::Configuration("Specify an IOT endpoint".into()));
        }
        if self.request_capacity == 0 {
            return Err(IotError::Configuration(
                "request_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Identity pool id in the `<region>:<guid>` form Cognito expects.
    pub fn cognito_pool_id(&self) -> String {
        format!("{}:{}", self.region, self.identity_pool_id)
    }

    /// Configured client ID, or a fresh `iotws-<uuid>` one.
    pub fn resolve_client_id(&self) -> String {
        self.client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("iotws-{}", Uuid::now_v7().simple()))
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.into())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
