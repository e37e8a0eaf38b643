//! Session Authority
//!
//! Issues, validates and revokes bearer tokens. Credentials come from the
//! [`CredentialStore`], revocation markers live in the shared [`Ledger`]
//! under `revoked:<jti>`, so a logout on one instance is seen by every
//! instance sharing the ledger.

use shared::util::{now_millis, now_secs};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use super::password::{hash_password, verify_password};
use super::token::{Claims, TokenService};
use super::{AuthError, CurrentUser};
use crate::store::{CredentialRecord, CredentialStore, Ledger};

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 6;

/// Hash verified for unknown identities so lookups and mismatches cost the same
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("dummy-password-for-timing").ok());

/// Key of the revocation marker for a token ID
pub fn revocation_key(jti: &str) -> String {
    format!("revoked:{jti}")
}

/// A freshly issued token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub user_id: String,
    pub username: String,
    /// Seconds until expiry
    pub expires_in: u64,
    pub claims: Claims,
}

#[derive(Clone)]
pub struct SessionAuthority {
    tokens: Arc<TokenService>,
    credentials: Arc<dyn CredentialStore>,
    ledger: Arc<dyn Ledger>,
}

impl SessionAuthority {
    pub fn new(
        tokens: TokenService,
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            tokens: Arc::new(tokens),
            credentials,
            ledger,
        }
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    /// Register a new identity
    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialRecord, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::InvalidInput("Username is required".into()));
        }
        // A taken name reports as taken whatever password came with it
        if self.credentials.find(username).await?.is_some() {
            return Err(AuthError::DuplicateIdentity(username.to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooShort);
        }

        let password = password.to_owned();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .map_err(|e| AuthError::Hashing(e.to_string()))?;

        let record = CredentialRecord {
            user_id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            created_at: now_millis(),
        };

        // Insert-if-absent settles concurrent registrations of one name
        if !self.credentials.insert(record.clone()).await? {
            return Err(AuthError::DuplicateIdentity(record.username));
        }

        tracing::info!(user = %record.username, user_id = %record.user_id, "Identity registered");
        Ok(record)
    }

    /// Verify credentials and issue a token
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedToken, AuthError> {
        self.login_at(username, password, now_secs()).await
    }

    /// [`login`](Self::login) against an explicit clock (Unix seconds)
    pub async fn login_at(
        &self,
        username: &str,
        password: &str,
        now: i64,
    ) -> Result<IssuedToken, AuthError> {
        let record = self.credentials.find(username.trim()).await?;

        let stored_hash = match &record {
            Some(r) => Some(r.password_hash.clone()),
            None => DUMMY_HASH.clone(),
        };
        let password = password.to_owned();
        let verified = match stored_hash {
            Some(hash) => tokio::task::spawn_blocking(move || verify_password(&password, &hash))
                .await
                .map_err(|e| AuthError::Hashing(e.to_string()))?,
            None => false,
        };

        let record = match record {
            Some(r) if verified => r,
            _ => return Err(AuthError::InvalidCredentials),
        };

        let (access_token, claims) = self.tokens.issue(&record.user_id, &record.username, now)?;
        let expires_in = (claims.exp - now).max(0) as u64;

        tracing::info!(user = %record.username, jti = %claims.jti, "Session token issued");
        Ok(IssuedToken {
            access_token,
            user_id: record.user_id,
            username: record.username,
            expires_in,
            claims,
        })
    }

    /// Validate a bearer token
    pub async fn validate(&self, token: &str) -> Result<CurrentUser, AuthError> {
        self.validate_at(token, now_secs()).await
    }

    /// [`validate`](Self::validate) against an explicit clock (Unix seconds)
    pub async fn validate_at(&self, token: &str, now: i64) -> Result<CurrentUser, AuthError> {
        let claims = self.tokens.decode(token)?;

        if now > claims.exp {
            return Err(AuthError::TokenExpired);
        }
        if self.ledger.exists(&revocation_key(&claims.jti)).await? {
            return Err(AuthError::TokenRevoked);
        }

        Ok(CurrentUser::from(claims))
    }

    /// Revoke a token for the rest of its lifetime
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.logout_at(token, now_secs()).await
    }

    /// [`logout`](Self::logout) against an explicit clock (Unix seconds)
    pub async fn logout_at(&self, token: &str, now: i64) -> Result<(), AuthError> {
        let user = self.validate_at(token, now).await?;

        // The marker lives exactly as long as the token would
        let remaining = (user.expires_at - now).max(1) as u64;
        self.ledger
            .set_if_absent(&revocation_key(&user.jti), Duration::from_secs(remaining))
            .await?;

        tracing::info!(user = %user.username, jti = %user.jti, "Session token revoked");
        Ok(())
    }
}
