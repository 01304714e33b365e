//! Credential collaborator contract.
//!
//! The manager borrows one immutable `Credentials` snapshot per connect
//! attempt and never caches it past that attempt.

use std::fmt;

use async_trait::async_trait;

use crate::error::{IotError, IotResult};

/// Temporary AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Reject snapshots that cannot sign a request.
    pub fn validate(&self) -> IotResult<()> {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(IotError::Credentials(
                "credential provider returned an empty access key or secret".into(),
            ));
        }
        Ok(())
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Source of temporary credentials, invoked once per connect attempt.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> IotResult<Credentials>;
}

/// Hands out the same credentials on every call (development and tests).
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self) -> IotResult<Credentials> {
        Ok(self.credentials.clone())
    }
}
