// cloudpipe-broker/src/verifier.rs
// ============================================================================
// Module: OIDC Verifier
// Description: Bearer token verification scoped to a specific pipe.
// Purpose: Authenticate peer brokers by issuer discovery and claim matching.
// Dependencies: jsonwebtoken, reqwest, regex
// ============================================================================

//! ## Overview
//! A peer's bearer token is accepted only for the pipe it was minted for. The
//! issuer is read from the unverified payload, gated by the pipe's stored
//! issuer pattern, and then the token is fully verified against the issuer's
//! own published JWKS, fetched by OIDC discovery and cached per issuer for
//! the process lifetime. Audience and subject claims must match the pipe's
//! stored URI patterns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::Validation;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Timeout for discovery and JWKS fetches.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised during bearer token verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Token is not a three-segment JWT or its payload is unreadable.
    #[error("malformed jwt: {0}")]
    Malformed(String),
    /// Token issuer does not match the pipe's issuer pattern.
    #[error("unmatched issuer: {0}")]
    IssuerMismatch(String),
    /// Issuer discovery or JWKS fetch failed.
    #[error("failed to create provider: {0}")]
    Discovery(String),
    /// No usable signing key was published by the issuer.
    #[error("no usable jwks key for issuer")]
    NoKey,
    /// Signature or registered claim verification failed.
    #[error("invalid token: {0}")]
    Invalid(String),
    /// No audience entry matches the pipe's URI pattern.
    #[error("unmatched audience")]
    AudienceMismatch,
    /// Subject does not match the peer URI pattern.
    #[error("unmatched subject: {0}")]
    SubjectMismatch(String),
    /// A stored pipe field is not a valid pattern.
    #[error("invalid claim pattern: {0}")]
    Pattern(String),
}

// ============================================================================
// SECTION: Claim Rules
// ============================================================================

/// Claim patterns a token must satisfy for one specific pipe.
#[derive(Debug)]
pub struct ClaimRules {
    /// Pattern for the token issuer (the pipe's `other.issuer`).
    pub iss: Regex,
    /// Pattern for the token audience (the pipe's `this.uri`).
    pub aud: Regex,
    /// Pattern for the token subject (the pipe's `other.uri`).
    pub sub: Regex,
}

impl ClaimRules {
    /// Compiles claim rules from the stored pipe fields.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Pattern`] when a stored field is not a valid
    /// pattern.
    pub fn compile(issuer: &str, this_uri: &str, other_uri: &str) -> Result<Self, VerifyError> {
        Ok(Self {
            iss: Regex::new(issuer).map_err(|err| VerifyError::Pattern(err.to_string()))?,
            aud: Regex::new(this_uri).map_err(|err| VerifyError::Pattern(err.to_string()))?,
            sub: Regex::new(other_uri).map_err(|err| VerifyError::Pattern(err.to_string()))?,
        })
    }
}

// ============================================================================
// SECTION: Wire Documents
// ============================================================================

/// Discovery document subset the verifier needs.
#[derive(Debug, Clone, Deserialize)]
struct DiscoveryDocument {
    /// Location of the issuer's JWKS.
    jwks_uri: String,
}

/// Published JWKS.
#[derive(Debug, Clone, Deserialize)]
struct JwksDocument {
    /// Signing keys.
    keys: Vec<Jwk>,
}

/// Single published key.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    /// Key type; only RSA keys are usable.
    kty: String,
    /// Optional key identifier.
    #[serde(default)]
    kid: Option<String>,
    /// Base64url modulus.
    #[serde(default)]
    n: Option<String>,
    /// Base64url public exponent.
    #[serde(default)]
    e: Option<String>,
}

/// Verified claims extracted from a mirror token.
#[derive(Debug, Deserialize)]
struct PeerClaims {
    /// Token subject.
    #[serde(default)]
    sub: String,
    /// Token audience, a single value or a list.
    #[serde(default)]
    aud: Option<Value>,
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Bearer token verifier with a process-wide per-issuer JWKS cache.
pub struct OidcVerifier {
    /// Client used for discovery and JWKS fetches.
    http: reqwest::Client,
    /// JWKS cache keyed by issuer.
    cache: RwLock<HashMap<String, Arc<JwksDocument>>>,
}

impl OidcVerifier {
    /// Builds a verifier with a bounded discovery client.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Discovery`] when the client cannot be built.
    pub fn new() -> Result<Self, VerifyError> {
        let http = reqwest::Client::builder()
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .map_err(|err| VerifyError::Discovery(err.to_string()))?;
        Ok(Self {
            http,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Validates a bearer token against the claim rules of one pipe.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] describing the first check that failed; the
    /// caller treats any failure as unauthenticated.
    pub async fn validate(&self, raw_token: &str, rules: &ClaimRules) -> Result<(), VerifyError> {
        let issuer = issuer_of(raw_token)?;
        if !rules.iss.is_match(&issuer) {
            return Err(VerifyError::IssuerMismatch(issuer));
        }

        let jwks = self.jwks_for(&issuer).await?;
        let key = select_key(&jwks, raw_token)?;

        let mut validation = Validation::new(Algorithm::RS256);
        // Audience and subject are matched against the pipe's stored patterns
        // below, not against a fixed expected value.
        validation.validate_aud = false;
        let verified = jsonwebtoken::decode::<PeerClaims>(raw_token, &key, &validation)
            .map_err(|err| VerifyError::Invalid(err.to_string()))?;

        let audiences = audience_entries(verified.claims.aud.as_ref());
        if !audiences.iter().any(|aud| rules.aud.is_match(aud)) {
            return Err(VerifyError::AudienceMismatch);
        }
        if rules.sub.find(&verified.claims.sub).is_none() {
            return Err(VerifyError::SubjectMismatch(verified.claims.sub));
        }
        Ok(())
    }

    /// Returns the issuer's JWKS, fetching and caching it on first use.
    async fn jwks_for(&self, issuer: &str) -> Result<Arc<JwksDocument>, VerifyError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(jwks) = cache.get(issuer) {
                return Ok(Arc::clone(jwks));
            }
        }

        let discovery_url =
            format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));
        debug!(%issuer, "discovering oidc provider");
        let discovery: DiscoveryDocument = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|err| VerifyError::Discovery(err.to_string()))?
            .error_for_status()
            .map_err(|err| VerifyError::Discovery(err.to_string()))?
            .json()
            .await
            .map_err(|err| VerifyError::Discovery(err.to_string()))?;
        let jwks: JwksDocument = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|err| VerifyError::Discovery(err.to_string()))?
            .error_for_status()
            .map_err(|err| VerifyError::Discovery(err.to_string()))?
            .json()
            .await
            .map_err(|err| VerifyError::Discovery(err.to_string()))?;

        let jwks = Arc::new(jwks);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(issuer.to_string(), Arc::clone(&jwks));
        }
        Ok(jwks)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the issuer claim from an unverified token payload.
///
/// # Errors
///
/// Returns [`VerifyError::Malformed`] when the token is not a JWT.
pub fn issuer_of(raw_token: &str) -> Result<String, VerifyError> {
    let parts: Vec<&str> = raw_token.split('.').collect();
    if parts.len() < 3 {
        return Err(VerifyError::Malformed(format!("expected 3 parts got {}", parts.len())));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|err| VerifyError::Malformed(err.to_string()))?;
    let claims: Value = serde_json::from_slice(&payload)
        .map_err(|err| VerifyError::Malformed(err.to_string()))?;
    Ok(claims.get("iss").and_then(Value::as_str).unwrap_or_default().to_string())
}

/// Selects the signing key for a token, preferring a matching `kid`.
fn select_key(jwks: &JwksDocument, raw_token: &str) -> Result<DecodingKey, VerifyError> {
    let wanted_kid = jsonwebtoken::decode_header(raw_token).ok().and_then(|header| header.kid);
    let selected = jwks
        .keys
        .iter()
        .find(|key| key.kty == "RSA" && key.kid.as_deref() == wanted_kid.as_deref())
        .or_else(|| jwks.keys.iter().find(|key| key.kty == "RSA"));
    let Some(key) = selected else {
        return Err(VerifyError::NoKey);
    };
    let (Some(n), Some(e)) = (&key.n, &key.e) else {
        return Err(VerifyError::NoKey);
    };
    DecodingKey::from_rsa_components(n, e).map_err(|err| VerifyError::Invalid(err.to_string()))
}

/// Collects audience entries from a string or list claim.
fn audience_entries(aud: Option<&Value>) -> Vec<String> {
    match aud {
        Some(Value::String(single)) => vec![single.clone()],
        Some(Value::Array(many)) => many
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
