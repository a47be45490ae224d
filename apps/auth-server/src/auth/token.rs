// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Random credentials and PKCE derivation.
//!
//! Session tokens, challenge states and PKCE verifiers are all 256 bits from
//! the OS RNG, base64url-encoded without padding (43 characters, which also
//! satisfies the RFC 7636 verifier length bounds).

use base64ct::{Base64UrlUnpadded, Encoding};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use super::error::AuthError;

/// Entropy of every generated credential, in bytes.
pub const TOKEN_BYTES: usize = 32;

/// Characters kept by [`redact`].
const REDACTED_PREFIX_LEN: usize = 8;

/// Generate a fresh random credential.
pub fn random_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::Internal("system random source unavailable".to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// PKCE S256 challenge: `BASE64URL(SHA256(verifier))`.
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

/// Short prefix of a credential, safe to log.
pub fn redact(token: &str) -> &str {
    match token.char_indices().nth(REDACTED_PREFIX_LEN) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}
