//! Bearer token claims.
//!
//! The `sub` field is redacted in Debug output to keep identity ids out of
//! logs.

use crate::errors::ChatError;
use crate::models::Role;
use common::types::{IdentityId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id within `tenant_id` - redacted in Debug output.
    pub sub: String,

    pub tenant_id: TenantId,

    pub role: Role,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("role", &self.role)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

impl Claims {
    pub fn identity_id(&self) -> Result<IdentityId, ChatError> {
        self.sub
            .parse::<i64>()
            .map(IdentityId)
            .map_err(|_| ChatError::InvalidToken("The access token is invalid or expired".to_string()))
    }

    /// Administrative endpoints only.
    pub fn require_administrator(&self) -> Result<(), ChatError> {
        if self.role == Role::Administrator {
            Ok(())
        } else {
            Err(ChatError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }
}
