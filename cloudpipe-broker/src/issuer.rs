// cloudpipe-broker/src/issuer.rs
// ============================================================================
// Module: Embedded OIDC Issuer
// Description: In-memory RSA keypair, discovery documents, and token minting.
// Purpose: Sign outbound mirror calls and let peers verify them by discovery.
// Dependencies: jsonwebtoken, rsa, base64
// ============================================================================

//! ## Overview
//! Each broker process generates a fresh 2048-bit RSA keypair at startup and
//! publishes it through the standard OIDC discovery endpoints. The key never
//! leaves process memory; a restart rotates it. Tokens are minted only for
//! outbound mirror calls, carrying the peer pipe URI as audience and the
//! local pipe URI as subject.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Algorithm;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Key identifier published in the JWKS and stamped into token headers.
pub const KEY_ID: &str = "example-key-id";

/// RSA modulus size for the process keypair.
const RSA_BITS: usize = 2048;

/// Token lifetime in seconds.
const TOKEN_LIFETIME_SECS: u64 = 3_600;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the embedded issuer.
#[derive(Debug, Error)]
pub enum IssuerError {
    /// Keypair generation or encoding failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    /// Token signing failed.
    #[error("failed to sign token: {0}")]
    Signing(String),
    /// System clock is before the Unix epoch.
    #[error("system clock is before the unix epoch")]
    Clock,
}

// ============================================================================
// SECTION: Claims
// ============================================================================

/// Claims minted for outbound mirror calls.
#[derive(Debug, Serialize)]
struct MirrorClaims<'a> {
    /// Issuing broker's public prefix.
    iss: &'a str,
    /// Peer pipe URI the token is scoped to.
    aud: &'a str,
    /// Local pipe URI identifying the caller.
    sub: &'a str,
    /// Issued-at timestamp.
    iat: u64,
    /// Expiry timestamp, one hour after issuance.
    exp: u64,
}

// ============================================================================
// SECTION: Issuer
// ============================================================================

/// Embedded OIDC issuer holding the process keypair.
pub struct OidcIssuer {
    /// PKCS#1 signing key for RS256.
    encoding_key: EncodingKey,
    /// Base64url modulus published in the JWKS.
    jwk_n: String,
    /// Base64url public exponent published in the JWKS.
    jwk_e: String,
}

impl OidcIssuer {
    /// Generates a fresh keypair for this process.
    ///
    /// # Errors
    ///
    /// Returns [`IssuerError::KeyGeneration`] when the keypair cannot be
    /// generated or encoded.
    pub fn generate() -> Result<Self, IssuerError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|err| IssuerError::KeyGeneration(err.to_string()))?;
        let document = private_key
            .to_pkcs1_der()
            .map_err(|err| IssuerError::KeyGeneration(err.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_der(document.as_bytes());
        let jwk_n = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
        let jwk_e = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());
        Ok(Self {
            encoding_key,
            jwk_n,
            jwk_e,
        })
    }

    /// Mints an RS256 token for an outbound mirror call.
    ///
    /// # Errors
    ///
    /// Returns [`IssuerError`] when the clock is unusable or signing fails.
    pub fn generate_token(
        &self,
        issuer: &str,
        audience: &str,
        subject: &str,
    ) -> Result<String, IssuerError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| IssuerError::Clock)?
            .as_secs();
        let claims = MirrorClaims {
            iss: issuer,
            aud: audience,
            sub: subject,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KEY_ID.to_string());
        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|err| IssuerError::Signing(err.to_string()))
    }

    /// OIDC discovery document for this broker's public prefix.
    #[must_use]
    pub fn discovery_document(&self, prefix: &str) -> Value {
        json!({
            "issuer": prefix,
            "authorization_endpoint": format!("{prefix}/authorize"),
            "token_endpoint": format!("{prefix}/token"),
            "jwks_uri": format!("{prefix}/.well-known/jwks.json"),
            "response_types_supported": [],
            "grant_types_supported": [],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
        })
    }

    /// JWKS document carrying the single process key.
    #[must_use]
    pub fn jwks_document(&self) -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "kid": KEY_ID,
                "use": "sig",
                "alg": "RS256",
                "n": self.jwk_n,
                "e": self.jwk_e,
            }],
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only issuer assertions.")]

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::Value;

    use super::KEY_ID;
    use super::OidcIssuer;

    #[test]
    fn discovery_document_points_at_jwks() {
        let issuer = OidcIssuer::generate().unwrap();
        let document = issuer.discovery_document("http://localhost:8000");
        assert_eq!(document["issuer"], "http://localhost:8000");
        assert_eq!(document["jwks_uri"], "http://localhost:8000/.well-known/jwks.json");
        assert_eq!(document["subject_types_supported"], serde_json::json!(["public"]));
        assert_eq!(
            document["id_token_signing_alg_values_supported"],
            serde_json::json!(["RS256"])
        );
    }

    #[test]
    fn jwks_document_carries_one_rsa_key() {
        let issuer = OidcIssuer::generate().unwrap();
        let document = issuer.jwks_document();
        let keys = document["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0]["kty"], "RSA");
        assert_eq!(keys[0]["kid"], KEY_ID);
        assert!(keys[0]["n"].as_str().unwrap().len() > 300);
    }

    #[test]
    fn minted_token_carries_scoped_claims() {
        let issuer = OidcIssuer::generate().unwrap();
        let token = issuer
            .generate_token("http://localhost:8000", "http://peer/pipes/p1", "http://me/pipes/p1")
            .unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["kid"], KEY_ID);

        let claims: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["iss"], "http://localhost:8000");
        assert_eq!(claims["aud"], "http://peer/pipes/p1");
        assert_eq!(claims["sub"], "http://me/pipes/p1");
        let lifetime = claims["exp"].as_u64().unwrap() - claims["iat"].as_u64().unwrap();
        assert_eq!(lifetime, 3_600);
    }
}
