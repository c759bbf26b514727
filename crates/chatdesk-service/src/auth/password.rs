//! Credential hashing and generation.
//!
//! bcrypt runs on the blocking pool; a cost-12 hash takes long enough to
//! stall a runtime worker.

use crate::config::{MAX_BCRYPT_COST, MIN_BCRYPT_COST};
use crate::errors::ChatError;
use common::secret::{ExposeSecret, SecretString};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::instrument;

/// Bytes of entropy in a generated credential (hex encoded, so twice as many
/// characters).
pub const GENERATED_CREDENTIAL_BYTES: usize = 18;

/// Compared against when the identity does not exist, so unknown usernames
/// cost the same as wrong passwords.
const DUMMY_HASH: &str = "$2b$12$LQv3c1yqBWVHxkd0LHAkCOYz6TtxMQJqhN8/LewY5GyYqExt7YD3a";

/// Hash a credential. `cost` must be within the accepted bcrypt range.
#[instrument(skip_all)]
pub async fn hash_credential(password: SecretString, cost: u32) -> Result<String, ChatError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(ChatError::Internal(format!(
            "invalid bcrypt cost {cost} (must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST})"
        )));
    }

    tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret(), cost))
        .await
        .map_err(|e| ChatError::Internal(format!("hashing task failed: {e}")))?
        .map_err(|e| ChatError::Internal(format!("credential hashing failed: {e}")))
}

/// Check a credential against a stored hash. `None` runs the comparison
/// against a dummy hash and always returns false.
#[instrument(skip_all)]
pub async fn verify_credential(
    password: SecretString,
    hash: Option<String>,
) -> Result<bool, ChatError> {
    let known = hash.is_some();
    let hash = hash.unwrap_or_else(|| DUMMY_HASH.to_string());

    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password.expose_secret(), &hash))
        .await
        .map_err(|e| ChatError::Internal(format!("verification task failed: {e}")))?
        .unwrap_or(false);

    Ok(known && matches)
}

/// Random credential for bootstrap accounts.
pub fn generate_credential() -> Result<SecretString, ChatError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; GENERATED_CREDENTIAL_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| ChatError::Internal("random credential generation failed".to_string()))?;
    Ok(SecretString::from(hex::encode(bytes)))
}
