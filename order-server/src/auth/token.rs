//! Session token signing and decoding
//!
//! Tokens are HS256 JWTs. Decoding here checks signature, structure, issuer
//! and audience only; expiry and revocation are decided by the
//! [`SessionAuthority`](super::SessionAuthority) against an explicit clock.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Token configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HMAC secret (at least 32 bytes outside development)
    pub secret: String,
    /// Token issuer
    pub issuer: String,
    /// Token audience
    pub audience: String,
    /// Token lifetime in seconds
    pub lifetime_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: "dev-JWT_SECRET-not-for-production".to_string(),
            issuer: "order-server".to_string(),
            audience: "order-clients".to_string(),
            lifetime_secs: 3600,
        }
    }
}

/// Claims carried in a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity name
    pub sub: String,
    /// User ID
    pub uid: String,
    /// Token ID, the revocation handle
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Signs and decodes session tokens
#[derive(Clone)]
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&config.audience]);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss", "aud"]);
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Token lifetime in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.config.lifetime_secs
    }

    /// Build and sign a token issued at `now` (Unix seconds)
    pub fn issue(
        &self,
        user_id: &str,
        username: &str,
        now: i64,
    ) -> Result<(String, Claims), AuthError> {
        let claims = Claims {
            sub: username.to_string(),
            uid: user_id.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.lifetime_secs,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok((token, claims))
    }

    /// Verify signature and structure, returning the claims
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => {
                    AuthError::TokenMalformed("invalid signature".into())
                }
                ErrorKind::InvalidIssuer => AuthError::TokenMalformed("invalid issuer".into()),
                ErrorKind::InvalidAudience => AuthError::TokenMalformed("invalid audience".into()),
                _ => AuthError::TokenMalformed(e.to_string()),
            })
    }

    /// Extract the token from an `Authorization` header value
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}
