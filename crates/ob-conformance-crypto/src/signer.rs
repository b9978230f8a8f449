// crates/ob-conformance-crypto/src/signer.rs
// ============================================================================
// Module: Detached JWS Signer
// Description: Builds and re-signs `x-jws-signature` values.
// Purpose: Produce detached JWS under the Open Banking header rules for each
//          payment API version.
// Dependencies: base64, serde_json, time, tracing
// ============================================================================

//! ## Overview
//! A detached JWS has the form `<header>..<signature>`: the payload segment is
//! elided and rebuilt from the HTTP body by the verifier.
//!
//! Header composition by payment API version:
//! - v3.0: `b64=false`, `crit` = `[b64, iat, iss]`.
//! - v3.1.0 to v3.1.3: v3.0 plus `tan`, in the header and in `crit`.
//! - v3.1.4 and later: no `b64` header; the body is base64url-encoded into the
//!   signing input.
//!
//! Signing parameters travel in an explicit [`SignerContext`]; there is no
//! process-wide signing state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ob_conformance_core::ApiVersion;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;

use crate::algorithm::SigningAlgorithm;
use crate::certificate::Certificate;
use crate::error::CryptoError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Open Banking `iat` header claim.
pub const HEADER_IAT: &str = "http://openbanking.org.uk/iat";
/// Open Banking `iss` header claim.
pub const HEADER_ISS: &str = "http://openbanking.org.uk/iss";
/// Open Banking `tan` header claim.
pub const HEADER_TAN: &str = "http://openbanking.org.uk/tan";
/// Default trust anchor of the Open Banking directory.
pub const DEFAULT_TRUST_ANCHOR: &str = "openbanking.org.uk";

/// First payment API version that base64url-encodes the payload.
const B64_TRUE_SINCE: ApiVersion = ApiVersion::new(3, 1, 4);

// ============================================================================
// SECTION: Signer Context
// ============================================================================

/// Parameters of a detached signature.
#[derive(Debug, Clone)]
pub struct SignerContext {
    /// Signing certificate and key.
    pub certificate: Arc<Certificate>,
    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,
    /// Payment API version selecting the header layout.
    pub api_version: ApiVersion,
    /// Key identifier override (for keys registered outside the directory).
    pub kid_override: Option<String>,
    /// Issuer override (for non-directory trust anchors).
    pub issuer_override: Option<String>,
    /// Render the v3.1 issuer from the full subject (eIDAS certificates).
    pub hashed_issuer: bool,
    /// Trust anchor advertised in `tan`.
    pub trust_anchor: String,
    /// Fixed issued-at time; the current time when unset.
    pub issued_at: Option<i64>,
}

impl SignerContext {
    /// Creates a PS256 signer context with directory defaults.
    #[must_use]
    pub fn new(certificate: Arc<Certificate>, api_version: ApiVersion) -> Self {
        Self {
            certificate,
            algorithm: SigningAlgorithm::PS256,
            api_version,
            kid_override: None,
            issuer_override: None,
            hashed_issuer: false,
            trust_anchor: DEFAULT_TRUST_ANCHOR.to_string(),
            issued_at: None,
        }
    }

    /// Returns the key identifier to advertise.
    #[must_use]
    pub fn kid(&self) -> String {
        self.kid_override.clone().unwrap_or_else(|| self.certificate.kid().to_string())
    }

    /// Returns the issuer to advertise.
    #[must_use]
    pub fn issuer(&self) -> String {
        if let Some(issuer) = &self.issuer_override {
            return issuer.clone();
        }
        if self.api_version.is_v3_0() {
            self.certificate.distinguished_name().to_string()
        } else {
            self.certificate.signature_issuer(self.hashed_issuer)
        }
    }

    /// Returns the issued-at timestamp in seconds.
    fn issued_at(&self) -> i64 {
        self.issued_at.unwrap_or_else(|| OffsetDateTime::now_utc().unix_timestamp())
    }
}

/// Returns the `b64` flag dictated by a payment API version.
///
/// # Errors
///
/// Returns [`CryptoError::UnsupportedVersion`] for v3.0, which predates the
/// flag's version table.
pub fn b64_flag(version: ApiVersion) -> Result<bool, CryptoError> {
    if version.is_v3_0() {
        return Err(CryptoError::UnsupportedVersion(version.to_string()));
    }
    Ok(version >= B64_TRUE_SINCE)
}

// ============================================================================
// SECTION: Body Canonicalisation
// ============================================================================

/// Returns true when a content type names a JSON media type.
#[must_use]
pub fn is_json_content_type(content_type: &str) -> bool {
    let media = content_type.split(';').next().unwrap_or_default().trim();
    media.ends_with("/json") || media.ends_with("+json")
}

/// Returns the exact body bytes to send and sign.
///
/// JSON bodies are minified with key order preserved; other bodies pass
/// through unchanged.
///
/// # Errors
///
/// Returns [`CryptoError::Minify`] when a JSON body is malformed.
pub fn canonical_body(body: &str, content_type: &str) -> Result<String, CryptoError> {
    if is_json_content_type(content_type) { minify_json(body) } else { Ok(body.to_string()) }
}

/// Strips insignificant whitespace from a JSON document.
///
/// Works on the text instead of re-serializing a `serde_json::Value`: the
/// signature covers the body as the suite author wrote it, and a round-trip
/// would sort object keys and rewrite numbers (`1.10`) and escapes
/// (`\u00e9`). Everything but whitespace between tokens is kept byte for byte.
///
/// # Errors
///
/// Returns [`CryptoError::Minify`] when the input is not valid JSON.
pub fn minify_json(body: &str) -> Result<String, CryptoError> {
    serde_json::from_str::<serde::de::IgnoredAny>(body)
        .map_err(|err| CryptoError::Minify(err.to_string()))?;
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in body.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ' ' | '\t' | '\n' | '\r' => {}
            _ => out.push(ch),
        }
    }
    Ok(out)
}

// ============================================================================
// SECTION: Building
// ============================================================================

/// Builds the protected header for a signer context.
fn build_header(signer: &SignerContext) -> Map<String, Value> {
    let mut header = Map::new();
    header.insert("alg".to_string(), Value::from(signer.algorithm.as_str()));
    header.insert("kid".to_string(), Value::from(signer.kid()));
    header.insert("typ".to_string(), Value::from("JOSE"));
    header.insert("cty".to_string(), Value::from("application/json"));
    header.insert(HEADER_IAT.to_string(), Value::from(signer.issued_at()));
    header.insert(HEADER_ISS.to_string(), Value::from(signer.issuer()));

    let version = signer.api_version;
    let mut crit: Vec<&str> = Vec::new();
    if version < B64_TRUE_SINCE {
        header.insert("b64".to_string(), Value::Bool(false));
        crit.push("b64");
    }
    crit.push(HEADER_IAT);
    crit.push(HEADER_ISS);
    if !version.is_v3_0() {
        header.insert(HEADER_TAN.to_string(), Value::from(signer.trust_anchor.clone()));
        crit.push(HEADER_TAN);
    }
    header.insert("crit".to_string(), Value::from(crit));
    header
}

/// Builds a detached JWS over `body`.
///
/// # Errors
///
/// Returns [`CryptoError`] when minification, encoding, or signing fails.
pub fn build_detached_jws(
    body: &str,
    content_type: &str,
    signer: &SignerContext,
) -> Result<String, CryptoError> {
    let payload = canonical_body(body, content_type)?;
    let header = build_header(signer);
    sign_with_header(&header, &payload, signer)
}

/// Returns the `b64` value advertised by a header; absent means `true`.
fn header_b64(header: &Map<String, Value>) -> bool {
    header.get("b64").and_then(Value::as_bool).unwrap_or(true)
}

/// Encodes `header` and signs it together with `payload`.
fn sign_with_header(
    header: &Map<String, Value>,
    payload: &str,
    signer: &SignerContext,
) -> Result<String, CryptoError> {
    let algorithm: SigningAlgorithm = header
        .get("alg")
        .and_then(Value::as_str)
        .ok_or_else(|| CryptoError::InvalidJws("header has no alg".to_string()))?
        .parse()?;
    let header_bytes =
        serde_json::to_vec(header).map_err(|err| CryptoError::Encoding(err.to_string()))?;
    let encoded_header = URL_SAFE_NO_PAD.encode(header_bytes);
    let signing_input = signing_input(&encoded_header, payload, header_b64(header));
    let signature = signer.certificate.sign(algorithm, signing_input.as_bytes())?;
    Ok(format!("{encoded_header}..{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Assembles the JWS signing input for a payload.
#[must_use]
pub fn signing_input(encoded_header: &str, payload: &str, b64: bool) -> String {
    if b64 {
        format!("{encoded_header}.{}", URL_SAFE_NO_PAD.encode(payload.as_bytes()))
    } else {
        format!("{encoded_header}.{payload}")
    }
}

// ============================================================================
// SECTION: Modification
// ============================================================================

/// Header edit applied before re-signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JwsOperation {
    /// Remove header keys; `iat`, `iss`, and `tan` name the Open Banking
    /// claims.
    Remove(Vec<String>),
    /// Insert or overwrite header keys.
    Set(Map<String, Value>),
}

/// Expands the short Open Banking claim aliases.
fn expand_alias(key: &str) -> &str {
    match key {
        "iat" => HEADER_IAT,
        "iss" => HEADER_ISS,
        "tan" => HEADER_TAN,
        other => other,
    }
}

/// Decodes the protected header of a compact or detached JWS.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidJws`] when the header segment is malformed.
pub fn decode_header(jws: &str) -> Result<Map<String, Value>, CryptoError> {
    let encoded = jws
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| CryptoError::InvalidJws("missing header segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|err| CryptoError::InvalidJws(format!("header encoding: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CryptoError::InvalidJws(format!("header json: {err}")))
}

/// Applies header edits to an existing JWS and re-signs it over `body`.
///
/// The signature uses the `alg` of the edited header and the signer's
/// certificate. `body` is signed as given.
///
/// # Errors
///
/// Returns [`CryptoError`] when the JWS cannot be decoded, the edited `alg`
/// is unsupported, or signing fails.
pub fn modify_jws(
    jws: &str,
    body: &str,
    operations: &[JwsOperation],
    signer: &SignerContext,
) -> Result<String, CryptoError> {
    let mut header = decode_header(jws)?;
    for operation in operations {
        match operation {
            JwsOperation::Remove(keys) => {
                for key in keys {
                    let expanded = expand_alias(key);
                    if expanded != key {
                        tracing::info!(alias = %key, header = expanded, "jws header alias expanded");
                    }
                    header.remove(expanded);
                }
            }
            JwsOperation::Set(values) => {
                for (key, value) in values {
                    header.insert(key.clone(), value.clone());
                }
            }
        }
    }
    sign_with_header(&header, body, signer)
}

#[cfg(test)]
mod tests;
