// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ID token verification against Google's published signing keys.
//!
//! ## Security
//!
//! - JWKS is fetched via HTTPS only
//! - Keys are cached with a configurable TTL
//! - An unknown `kid` forces one refresh (Google rotates keys regularly)
//! - Signature, `exp`, `iss` and `aud` are all checked; `aud` must be the
//!   configured client id

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use tokio::sync::RwLock;
use tracing::debug;

use super::claims::IdTokenClaims;
use super::error::AuthError;

pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Both issuer spellings Google uses in ID tokens.
pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Verifies a raw ID token and returns its claims.
#[async_trait]
pub trait IdTokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<IdTokenClaims, AuthError>;
}

/// JWKS cache entry.
struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// JWKS manager with caching.
#[derive(Clone)]
pub struct JwksManager {
    jwks_url: String,
    cache_ttl: Duration,
    cache: Arc<RwLock<Option<CacheEntry>>>,
    client: reqwest::Client,
}

impl JwksManager {
    /// `client` should carry a request timeout.
    pub fn new(jwks_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(None)),
            client,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Fetch JWKS (with caching).
    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = &*cache {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.jwks.clone());
                }
            }
        }

        self.refresh().await
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(format!("JWKS fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::ProviderUnavailable(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(format!("invalid JWKS document: {e}")))
    }

    /// Decoding key for `kid`, refreshing once if the cached set lacks it.
    pub async fn get_decoding_key(
        &self,
        kid: Option<&str>,
    ) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;
        match find_key(&jwks, kid) {
            Ok(found) => Ok(found),
            Err(_) if kid.is_some() => {
                debug!(kid, "Signing key not cached, refreshing JWKS");
                let jwks = self.refresh().await?;
                find_key(&jwks, kid)
            }
            Err(e) => Err(e),
        }
    }

    /// Force refresh the JWKS cache.
    pub async fn refresh(&self) -> Result<JwkSet, AuthError> {
        let jwks = self.fetch_jwks().await?;
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        let cache = self.cache.read().await;
        match &*cache {
            Some(entry) => entry.fetched_at.elapsed() < self.cache_ttl,
            None => false,
        }
    }
}

/// Pick the key matching `kid`, or the first usable key when the token has
/// no `kid`.
fn find_key(jwks: &JwkSet, kid: Option<&str>) -> Result<(DecodingKey, Algorithm), AuthError> {
    match kid {
        Some(kid) => {
            let jwk = jwks
                .keys
                .iter()
                .find(|k| k.common.key_id.as_deref() == Some(kid))
                .ok_or_else(|| AuthError::ProviderRejected(format!("no signing key '{kid}'")))?;
            jwk_to_decoding_key(jwk)
        }
        None => jwks
            .keys
            .iter()
            .find_map(|jwk| jwk_to_decoding_key(jwk).ok())
            .ok_or_else(|| AuthError::ProviderRejected("no usable signing key".to_string())),
    }
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AuthError::Internal(format!("failed to build RSA key: {e}")))?;
            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| AuthError::Internal(format!("failed to build EC key: {e}")))?;
            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok((key, alg))
        }
        _ => Err(AuthError::Internal(
            "unsupported key type in JWKS".to_string(),
        )),
    }
}

/// Validate signature and registered claims of `token` with a known key.
pub fn decode_claims(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
    issuers: &[&str],
    audience: &str,
) -> Result<IdTokenClaims, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    validation.set_issuer(issuers);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

    decode::<IdTokenClaims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::InvalidClaims("token expired".into()),
            ErrorKind::ImmatureSignature => AuthError::InvalidClaims("token not yet valid".into()),
            ErrorKind::InvalidIssuer => AuthError::InvalidClaims("issuer mismatch".into()),
            ErrorKind::InvalidAudience => AuthError::InvalidClaims("audience mismatch".into()),
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::InvalidClaims(format!("missing claim '{claim}'"))
            }
            ErrorKind::InvalidSignature => AuthError::ProviderRejected("bad signature".into()),
            _ => AuthError::ProviderRejected(format!("malformed ID token: {e}")),
        })
}

/// Production verifier: Google JWKS, Google issuers, our client id.
pub struct JwksVerifier {
    jwks: JwksManager,
    audience: String,
}

impl JwksVerifier {
    pub fn new(jwks: JwksManager, audience: impl Into<String>) -> Self {
        Self {
            jwks,
            audience: audience.into(),
        }
    }
}

#[async_trait]
impl IdTokenVerifier for JwksVerifier {
    async fn verify(&self, id_token: &str) -> Result<IdTokenClaims, AuthError> {
        let header = decode_header(id_token)
            .map_err(|e| AuthError::ProviderRejected(format!("malformed ID token header: {e}")))?;
        let (key, algorithm) = self.jwks.get_decoding_key(header.kid.as_deref()).await?;
        if header.alg != algorithm {
            return Err(AuthError::ProviderRejected(format!(
                "algorithm {:?} does not match signing key",
                header.alg
            )));
        }
        decode_claims(id_token, &key, algorithm, &GOOGLE_ISSUERS, &self.audience)
    }
}
