// crates/ob-conformance-crypto/src/verify.rs
// ============================================================================
// Module: Detached JWS Verification
// Description: Validates `x-jws-signature` values returned by the ASPSP.
// Purpose: Resolve the signing key through the issuer JWKS and verify the
//          detached signature over the response body.
// Dependencies: reqwest, x509-parser, base64, serde_json
// ============================================================================

//! ## Overview
//! Validation proceeds in fixed steps; each failure reports its
//! [`SignatureStep`]:
//! 1. Decode the detached form, read `kid`, and require `alg` PS256.
//! 2. Resolve the key from the [`JwksCache`], fetching the JWKS on a miss.
//! 3. Parse the leading `x5c` certificate (or the bare modulus).
//! 4. Check the advertised issuer against the certificate subject, unless
//!    the trust anchor is one of the relaxed HSBC anchors.
//! 5. Rebuild the signing input per the `b64` flag and verify under PS256.
//!
//! The cache is explicit and monotonic: entries are only ever added.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::BigUint;
use rsa::RsaPublicKey;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use x509_parser::parse_x509_certificate;

use crate::algorithm::SigningAlgorithm;
use crate::certificate::SubjectNames;
use crate::certificate::rsa_public_key;
use crate::error::SignatureError;
use crate::error::SignatureStep;
use crate::signer::HEADER_ISS;
use crate::signer::HEADER_TAN;
use crate::signer::decode_header;
use crate::signer::signing_input;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// HSBC trust anchors and hosts exempt from the directory issuer check.
const RELAXED_TRUST_ANCHORS: &[&str] = &[
    "hsbc.com",
    "https://hsbc.com",
    "www.hsbc.com",
    "hsbc.co.uk",
    "www.hsbc.co.uk",
    "ob.hsbc.co.uk",
    "https://ob.hsbc.co.uk",
    "api.ob.hsbc.co.uk",
    "https://api.ob.hsbc.co.uk",
];

/// Only algorithm accepted on response signatures.
const RESPONSE_ALGORITHM: SigningAlgorithm = SigningAlgorithm::PS256;

/// Upper bound on JWKS documents.
const MAX_JWKS_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: JWKS Types
// ============================================================================

/// JSON Web Key as published in a directory JWKS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key identifier.
    pub kid: String,
    /// Key type.
    #[serde(default)]
    pub kty: String,
    /// Intended algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Intended use.
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Certificate chain (standard base64 DER), leaf first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x5c: Vec<String>,
}

/// JSON Web Key Set document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// Published keys.
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Monotonic key-id to JWK cache shared by one run.
#[derive(Debug, Default)]
pub struct JwksCache {
    /// Cached keys by key identifier.
    keys: Mutex<BTreeMap<String, Jwk>>,
}

impl JwksCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached key for `kid`.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Jwk> {
        self.entries().get(kid).cloned()
    }

    /// Adds every key of `jwks` that is not cached yet.
    pub fn extend(&self, jwks: Jwks) {
        let mut keys = self.entries();
        for jwk in jwks.keys {
            keys.entry(jwk.kid.clone()).or_insert(jwk);
        }
    }

    /// Returns the number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Locks the key map. Entries are only ever inserted whole, so a map
    /// left behind by a panicking holder is still consistent.
    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Jwk>> {
        self.keys.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("jwks cache lock poisoned; recovering cached keys");
            poisoned.into_inner()
        })
    }

    /// Returns true when no key is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the key for `kid`, fetching `jwks_uri` on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] at [`SignatureStep::JwksUnreachable`] when
    /// the fetch fails, or [`SignatureStep::KeyNotFound`] when the fetched
    /// set has no such key.
    pub async fn resolve(
        &self,
        client: &reqwest::Client,
        jwks_uri: &str,
        kid: &str,
    ) -> Result<Jwk, SignatureError> {
        if let Some(jwk) = self.get(kid) {
            return Ok(jwk);
        }
        let jwks = fetch_jwks(client, jwks_uri).await?;
        tracing::debug!(jwks_uri, keys = jwks.keys.len(), "jwks fetched");
        self.extend(jwks);
        self.get(kid).ok_or_else(|| {
            SignatureError::new(SignatureStep::KeyNotFound, format!("kid {kid} not in {jwks_uri}"))
        })
    }
}

/// Fetches and decodes a JWKS document.
async fn fetch_jwks(client: &reqwest::Client, jwks_uri: &str) -> Result<Jwks, SignatureError> {
    let unreachable =
        |detail: String| SignatureError::new(SignatureStep::JwksUnreachable, detail);
    let response =
        client.get(jwks_uri).send().await.map_err(|err| unreachable(format!("{jwks_uri}: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(unreachable(format!("{jwks_uri}: status {}", status.as_u16())));
    }
    let bytes = response.bytes().await.map_err(|err| unreachable(format!("{jwks_uri}: {err}")))?;
    if bytes.len() > MAX_JWKS_BYTES {
        return Err(unreachable(format!("{jwks_uri}: document exceeds size limit")));
    }
    serde_json::from_slice(&bytes).map_err(|err| unreachable(format!("{jwks_uri}: {err}")))
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Key material resolved from a JWK.
struct ResolvedKey {
    /// RSA public key.
    public_key: RsaPublicKey,
    /// Certificate subject, when the JWK carried `x5c`.
    subject: Option<SubjectNames>,
}

/// Reads the public key from the leading `x5c` entry or the bare modulus.
fn resolve_key(jwk: &Jwk) -> Result<ResolvedKey, SignatureError> {
    let unparseable = |detail: String| SignatureError::new(SignatureStep::X5cUnparseable, detail);
    if let Some(leaf) = jwk.x5c.first() {
        let der = STANDARD.decode(leaf).map_err(|err| unparseable(err.to_string()))?;
        let (_, certificate) =
            parse_x509_certificate(&der).map_err(|err| unparseable(err.to_string()))?;
        let public_key = rsa_public_key(&certificate).map_err(|err| unparseable(err.to_string()))?;
        return Ok(ResolvedKey {
            public_key,
            subject: Some(SubjectNames::from_x509(&certificate)),
        });
    }
    let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
        return Err(unparseable(format!("kid {} has neither x5c nor modulus", jwk.kid)));
    };
    let decode = |value: &str| {
        URL_SAFE_NO_PAD
            .decode(value)
            .map(|bytes| BigUint::from_bytes_be(&bytes))
            .map_err(|err| unparseable(err.to_string()))
    };
    let public_key =
        RsaPublicKey::new(decode(n)?, decode(e)?).map_err(|err| unparseable(err.to_string()))?;
    Ok(ResolvedKey {
        public_key,
        subject: None,
    })
}

/// Returns true when the trust anchor is exempt from the issuer check.
fn is_relaxed_anchor(anchor: &str) -> bool {
    RELAXED_TRUST_ANCHORS.iter().any(|relaxed| relaxed.eq_ignore_ascii_case(anchor))
}

/// Validates a detached JWS over `body`.
///
/// `b64` selects whether the payload is base64url-encoded into the signing
/// input; see [`crate::b64_flag`].
///
/// # Errors
///
/// Returns [`SignatureError`] naming the failed [`SignatureStep`].
pub async fn validate_jws(
    jws: &str,
    body: &str,
    jwks_uri: &str,
    b64: bool,
    cache: &JwksCache,
    client: &reqwest::Client,
) -> Result<(), SignatureError> {
    let decode_error = |detail: String| SignatureError::new(SignatureStep::Decode, detail);
    let (encoded_header, encoded_signature) = jws
        .split_once("..")
        .ok_or_else(|| decode_error("not a detached jws".to_string()))?;
    let header = decode_header(jws).map_err(|err| decode_error(err.to_string()))?;
    let signature =
        URL_SAFE_NO_PAD.decode(encoded_signature).map_err(|err| decode_error(err.to_string()))?;

    let kid = header
        .get("kid")
        .and_then(Value::as_str)
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| SignatureError::new(SignatureStep::KidMissing, "header has no kid"))?;
    let alg = header.get("alg").and_then(Value::as_str).unwrap_or_default();
    if alg != RESPONSE_ALGORITHM.as_str() {
        return Err(SignatureError::new(
            SignatureStep::Algorithm,
            format!("alg \"{alg}\", responses must be signed with {RESPONSE_ALGORITHM}"),
        ));
    }

    let jwk = cache.resolve(client, jwks_uri, kid).await?;
    let key = resolve_key(&jwk)?;

    let anchor = header.get(HEADER_TAN).and_then(Value::as_str).unwrap_or_default();
    if is_relaxed_anchor(anchor) {
        tracing::debug!(anchor, "issuer check relaxed for trust anchor");
    } else if let (Some(subject), Some(issuer)) =
        (&key.subject, header.get(HEADER_ISS).and_then(Value::as_str))
        && !subject.matches_issuer(issuer)
    {
        return Err(SignatureError::new(
            SignatureStep::Issuer,
            format!("issuer {issuer} does not match {}", subject.distinguished_name),
        ));
    }

    let input = signing_input(encoded_header, body, b64);
    if !RESPONSE_ALGORITHM.verify(&key.public_key, input.as_bytes(), &signature) {
        return Err(SignatureError::new(
            SignatureStep::SignatureMismatch,
            format!("{RESPONSE_ALGORITHM} signature does not verify for kid {kid}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Jwk;
    use super::Jwks;
    use super::JwksCache;
    use super::is_relaxed_anchor;

    fn jwk(kid: &str, alg: &str) -> Jwk {
        Jwk {
            kid: kid.to_string(),
            kty: "RSA".to_string(),
            alg: Some(alg.to_string()),
            key_use: None,
            n: None,
            e: None,
            x5c: Vec::new(),
        }
    }

    #[test]
    fn cache_never_replaces_entries() {
        let cache = JwksCache::new();
        cache.extend(Jwks {
            keys: vec![jwk("a", "PS256")],
        });
        cache.extend(Jwks {
            keys: vec![jwk("a", "RS256"), jwk("b", "PS256")],
        });
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").and_then(|key| key.alg), Some("PS256".to_string()));
    }

    #[test]
    #[allow(clippy::panic, reason = "The helper thread panics to poison the lock.")]
    fn poisoned_cache_keeps_its_keys() {
        let cache = Arc::new(JwksCache::new());
        cache.extend(Jwks {
            keys: vec![jwk("a", "PS256")],
        });
        let holder = Arc::clone(&cache);
        let joined = std::thread::spawn(move || {
            let _guard = holder.keys.lock();
            panic!("holder failed while locked");
        })
        .join();
        assert!(joined.is_err());
        assert!(cache.keys.is_poisoned());

        assert_eq!(cache.get("a").map(|key| key.kid), Some("a".to_string()));
        cache.extend(Jwks {
            keys: vec![jwk("b", "PS256")],
        });
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn relaxed_anchors_are_case_insensitive() {
        assert!(is_relaxed_anchor("OB.HSBC.CO.UK"));
        assert!(!is_relaxed_anchor("openbanking.org.uk"));
        assert!(!is_relaxed_anchor(""));
    }
}
