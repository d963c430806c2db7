//! Code and token generation for the portal login.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

const CODE_MIN: u32 = 100_000;
const CODE_SPAN: u32 = 900_000;
// Largest multiple of CODE_SPAN that fits in a u32; draws above it are rejected.
const CODE_ZONE: u32 = u32::MAX - (u32::MAX % CODE_SPAN);

/// Six-digit numeric code, uniform over `100000..=999999`.
pub fn generate_code() -> Result<String> {
    loop {
        let mut bytes = [0u8; 4];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate portal code")?;
        let draw = u32::from_le_bytes(bytes);
        if draw < CODE_ZONE {
            return Ok((CODE_MIN + draw % CODE_SPAN).to_string());
        }
    }
}

/// Create a new portal bearer token (256 bits, base64url without padding).
///
/// The raw value is returned once to the client; the database stores a hash.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate portal token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a portal token so raw values never touch the database.
#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
