//! Anonymous Cognito identity credentials.
//!
//! Resolves an unauthenticated identity in the pool (`GetId`) and exchanges
//! it for temporary credentials (`GetCredentialsForIdentity`). Both calls are
//! unsigned, so the SDK is built without ambient credentials.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cognitoidentity::Client as CognitoClient;
use aws_sdk_cognitoidentity::error::DisplayErrorContext;
use tokio::sync::{Mutex, OnceCell};

use crate::config::IotConfig;
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{IotError, IotResult};

/// Credential provider backed by a Cognito identity pool.
///
/// The identity id is cached after the first `GetId`; credentials are
/// fetched fresh on every call.
pub struct CognitoCredentialProvider {
    region: String,
    pool_id: String,
    client: OnceCell<CognitoClient>,
    identity_id: Mutex<Option<String>>,
}

impl CognitoCredentialProvider {
    /// `pool_id` is the full `<region>:<guid>` identifier.
    pub fn new(region: impl Into<String>, pool_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            pool_id: pool_id.into(),
            client: OnceCell::new(),
            identity_id: Mutex::new(None),
        }
    }

    pub fn from_config(config: &IotConfig) -> Self {
        Self::new(config.region.clone(), config.cognito_pool_id())
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    async fn client(&self) -> &CognitoClient {
        self.client
            .get_or_init(|| async {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.region.clone()))
                    .no_credentials()
                    .load()
                    .await;
                CognitoClient::new(&sdk_config)
            })
            .await
    }

    async fn identity_id(&self, client: &CognitoClient) -> IotResult<String> {
        let mut cached = self.identity_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let output = client
            .get_id()
            .identity_pool_id(&self.pool_id)
            .send()
            .await
            .map_err(|e| IotError::Credentials(format!("GetId failed: {}", DisplayErrorContext(&e))))?;

        let id = output
            .identity_id()
            .ok_or_else(|| IotError::Credentials("GetId returned no identity id".into()))?
            .to_string();

        tracing::debug!(pool_id = %self.pool_id, identity_id = %id, "cognito identity resolved");
        *cached = Some(id.clone());
        Ok(id)
    }

    async fn forget_identity(&self) {
        self.identity_id.lock().await.take();
    }
}

#[async_trait]
impl CredentialProvider for CognitoCredentialProvider {
    async fn credentials(&self) -> IotResult<Credentials> {
        let client = self.client().await;
        let identity_id = self.identity_id(client).await?;

        let output = match client
            .get_credentials_for_identity()
            .identity_id(&identity_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                // A stale or revoked identity is resolved again next attempt.
                self.forget_identity().await;
                return Err(IotError::Credentials(format!(
                    "GetCredentialsForIdentity failed: {}",
                    DisplayErrorContext(&e)
                )));
            }
        };

        let creds = output.credentials().ok_or_else(|| {
            IotError::Credentials("GetCredentialsForIdentity returned no credentials".into())
        })?;

        let credentials = Credentials::new(
            creds.access_key_id().unwrap_or_default(),
            creds.secret_key().unwrap_or_default(),
            creds.session_token().map(str::to_string),
        );
        credentials.validate()?;
        Ok(credentials)
    }
}
