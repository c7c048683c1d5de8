//! Opaque backend credentials
//!
//! Tokens are minted and refreshed by an external auth collaborator. The
//! core never inspects them beyond checking expiry before a call.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bearer credential with an optional expiry
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn bearer(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Credential valid for `ttl` from now
    pub fn expiring_in(token: impl Into<String>, ttl: Duration) -> Self {
        Self::bearer(token, Some(Utc::now() + ttl))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Value for the `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies the current credential for one backend
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current credential; callers must reject it when expired
    async fn credential(&self) -> Result<Credential>;
}

/// Provider holding a credential replaced from outside
pub struct StaticCredentialProvider {
    current: RwLock<Credential>,
}

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(credential),
        })
    }

    /// Install a refreshed credential
    pub async fn replace(&self, credential: Credential) {
        *self.current.write().await = credential;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credential(&self) -> Result<Credential> {
        Ok(self.current.read().await.clone())
    }
}

/// Fetch a credential and fail fast when it has expired
pub async fn valid_credential(provider: &dyn CredentialProvider, backend: &str) -> Result<Credential> {
    let credential = provider.credential().await?;
    if credential.is_expired() {
        tracing::warn!(backend, "Credential expired before backend call");
        return Err(AppError::ExpiredCredential {
            backend: backend.to_string(),
        });
    }
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::bearer("secret-token", None);
        assert!(!format!("{:?}", credential).contains("secret-token"));
        assert_eq!(credential.authorization_header(), "Bearer secret-token");
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let credential = Credential::bearer("t", Some(now));
        assert!(credential.is_expired_at(now));
        assert!(!credential.is_expired_at(now - Duration::seconds(1)));
        assert!(!Credential::bearer("t", None).is_expired());
    }

    #[tokio::test]
    async fn test_valid_credential_rejects_expired_and_accepts_refresh() {
        let provider = StaticCredentialProvider::new(Credential::expiring_in("old", Duration::seconds(-5)));
        let err = valid_credential(provider.as_ref(), "livelink").await.unwrap_err();
        assert!(matches!(err, AppError::ExpiredCredential { .. }));

        provider
            .replace(Credential::expiring_in("new", Duration::minutes(5)))
            .await;
        tokio_test::assert_ok!(valid_credential(provider.as_ref(), "livelink").await);
    }
}
