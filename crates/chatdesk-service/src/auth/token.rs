//! HS256 bearer tokens.
//!
//! # Security
//!
//! - Tokens are size-checked before parsing
//! - Only HS256 is accepted
//! - Every validation failure maps to the same generic `InvalidToken` message

use crate::auth::claims::Claims;
use crate::errors::ChatError;
use crate::models::Identity;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::instrument;

/// Tokens larger than this are rejected without parsing.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

const INVALID_TOKEN: &str = "The access token is invalid or expired";

/// Issues and validates bearer tokens with the configured signing secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_seconds,
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Sign a token for `identity`.
    #[instrument(skip_all)]
    pub fn issue(&self, identity: &Identity) -> Result<String, ChatError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: identity.identity_id.to_string(),
            tenant_id: identity.tenant_id,
            role: identity.role,
            exp: now + self.ttl_seconds,
            iat: now,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ChatError::Internal(format!("token signing failed: {e}")))
    }

    /// Verify signature and expiry and return the claims.
    #[instrument(skip_all)]
    pub fn validate(&self, token: &str) -> Result<Claims, ChatError> {
        if token.len() > MAX_TOKEN_SIZE_BYTES {
            tracing::debug!(target: "chatdesk.auth.token", size = token.len(), "Oversized token rejected");
            return Err(ChatError::InvalidToken(INVALID_TOKEN.to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!(target: "chatdesk.auth.token", error = %e, "Token verification failed");
            ChatError::InvalidToken(INVALID_TOKEN.to_string())
        })?;

        // Reject tokens whose subject does not parse.
        data.claims.identity_id()?;
        Ok(data.claims)
    }
}
