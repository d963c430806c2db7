//! PKCE verifier/challenge pairs and authorization `state` values.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use secrecy::SecretString;
use sha2::{Digest, Sha256};

pub const CHALLENGE_METHOD: &str = "S256";

#[derive(Clone, Debug)]
pub struct PkcePair {
    pub verifier: SecretString,
    pub challenge: String,
}

fn random_urlsafe(len: usize, what: &'static str) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng.try_fill_bytes(&mut bytes).context(what)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// 32 random bytes encode to a 43-character verifier, the PKCE minimum.
pub fn generate_pkce() -> Result<PkcePair> {
    let verifier = random_urlsafe(32, "failed to generate code verifier")?;
    let challenge = challenge_for(&verifier);
    Ok(PkcePair {
        verifier: SecretString::from(verifier),
        challenge,
    })
}

/// base64url(SHA-256(verifier)) without padding.
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn generate_state() -> Result<String> {
    random_urlsafe(32, "failed to generate oauth state")
}
