use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::ServiceError;

/// Entropy of one-time login tokens and session tokens.
pub const TOKEN_BYTES: usize = 32;

/// A fresh URL-safe random token (43 characters of unpadded base64url).
pub fn generate_token() -> Result<String, ServiceError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| ServiceError::internal("system random generator failed"))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
