// crates/ob-conformance-crypto/src/jwt.rs
// ============================================================================
// Module: Request Objects and Client Assertions
// Description: JWTs sent to the authorization and token endpoints.
// Purpose: Build the PSU consent URL and `private_key_jwt` assertions.
// Dependencies: base64, serde_json, time, url, uuid
// ============================================================================

//! ## Overview
//! The PSU consent URL embeds a request object as the `request` query
//! parameter of the authorization endpoint. The request object is unsigned
//! (`alg=none`, empty signature segment) unless a signer is supplied.
//! Client assertions are always signed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use time::Duration;
use time::OffsetDateTime;
use url::Url;

use crate::error::CryptoError;
use crate::signer::SignerContext;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lifetime of request objects that carry `exp`.
const REQUEST_OBJECT_LIFETIME: Duration = Duration::minutes(30);

/// Lifetime of client assertions.
const CLIENT_ASSERTION_LIFETIME: Duration = Duration::minutes(5);

/// Default OAuth response type of the hybrid flow.
pub const DEFAULT_RESPONSE_TYPE: &str = "code id_token";

// ============================================================================
// SECTION: Consent URL
// ============================================================================

/// Inputs of a PSU consent URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentUrlRequest {
    /// Authorization endpoint the PSU visits.
    pub authorization_endpoint: String,
    /// OAuth client identifier.
    pub client_id: String,
    /// Consent identifier issued by the ASPSP.
    pub consent_id: String,
    /// Requested scope.
    pub scope: String,
    /// Registered redirect URI.
    pub redirect_uri: String,
    /// Audience of the request object.
    pub audience: String,
    /// Issuer of the request object; the client id when empty.
    pub issuer: String,
    /// Response type; `code id_token` when empty.
    pub response_type: String,
    /// Optional state, echoed on redirect.
    pub state: Option<String>,
    /// Optional nonce claim.
    pub nonce: Option<String>,
    /// Add an `exp` claim thirty minutes ahead.
    pub with_expiry: bool,
}

impl ConsentUrlRequest {
    /// Returns the effective issuer.
    fn issuer(&self) -> &str {
        if self.issuer.is_empty() { &self.client_id } else { &self.issuer }
    }

    /// Returns the effective response type.
    fn response_type(&self) -> &str {
        if self.response_type.is_empty() { DEFAULT_RESPONSE_TYPE } else { &self.response_type }
    }
}

/// Builds the request object claims.
fn consent_claims(request: &ConsentUrlRequest) -> Map<String, Value> {
    let mut claims = Map::new();
    claims.insert("iss".to_string(), Value::from(request.issuer()));
    claims.insert("scope".to_string(), Value::from(request.scope.clone()));
    claims.insert("aud".to_string(), Value::from(request.audience.clone()));
    claims.insert("redirect_uri".to_string(), Value::from(request.redirect_uri.clone()));
    claims.insert(
        "claims".to_string(),
        json!({
            "id_token": {
                "openbanking_intent_id": {
                    "essential": true,
                    "value": request.consent_id,
                }
            }
        }),
    );
    if request.with_expiry {
        let exp = OffsetDateTime::now_utc() + REQUEST_OBJECT_LIFETIME;
        claims.insert("exp".to_string(), Value::from(exp.unix_timestamp()));
    }
    if let Some(nonce) = &request.nonce {
        claims.insert("nonce".to_string(), Value::from(nonce.clone()));
    }
    if let Some(state) = &request.state {
        claims.insert("state".to_string(), Value::from(state.clone()));
    }
    claims
}

/// Builds the URL the PSU visits to authorize a consent.
///
/// # Errors
///
/// Returns [`CryptoError`] when the authorization endpoint is not a URL or
/// signing fails.
pub fn psu_consent_url(
    request: &ConsentUrlRequest,
    signer: Option<&SignerContext>,
) -> Result<String, CryptoError> {
    let claims = consent_claims(request);
    let request_object = match signer {
        Some(signer) => encode_signed_jwt(&claims, signer)?,
        None => encode_unsigned_jwt(&claims)?,
    };
    let mut url = Url::parse(&request.authorization_endpoint)
        .map_err(|err| CryptoError::InvalidUrl(format!("{}: {err}", request.authorization_endpoint)))?;
    url.query_pairs_mut()
        .append_pair("client_id", &request.client_id)
        .append_pair("response_type", request.response_type())
        .append_pair("scope", &request.scope)
        .append_pair("request", &request_object)
        .append_pair("state", request.state.as_deref().unwrap_or(&request.consent_id));
    Ok(url.to_string())
}

// ============================================================================
// SECTION: Client Assertion
// ============================================================================

/// Builds a `private_key_jwt` client assertion for the token endpoint.
///
/// # Errors
///
/// Returns [`CryptoError`] when encoding or signing fails.
pub fn client_assertion(
    client_id: &str,
    token_endpoint: &str,
    signer: &SignerContext,
) -> Result<String, CryptoError> {
    let now = OffsetDateTime::now_utc();
    let mut claims = Map::new();
    claims.insert("iss".to_string(), Value::from(client_id));
    claims.insert("sub".to_string(), Value::from(client_id));
    claims.insert("aud".to_string(), Value::from(token_endpoint));
    claims.insert("jti".to_string(), Value::from(uuid::Uuid::new_v4().to_string()));
    claims.insert("iat".to_string(), Value::from(now.unix_timestamp()));
    claims.insert(
        "exp".to_string(),
        Value::from((now + CLIENT_ASSERTION_LIFETIME).unix_timestamp()),
    );
    encode_signed_jwt(&claims, signer)
}

// ============================================================================
// SECTION: Encoding
// ============================================================================

/// Encodes a JSON object as unpadded base64url.
fn encode_segment(value: &Map<String, Value>) -> Result<String, CryptoError> {
    let bytes = serde_json::to_vec(value).map_err(|err| CryptoError::Encoding(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Encodes an unsigned JWT with an empty signature segment.
fn encode_unsigned_jwt(claims: &Map<String, Value>) -> Result<String, CryptoError> {
    let mut header = Map::new();
    header.insert("alg".to_string(), Value::from("none"));
    Ok(format!("{}.{}.", encode_segment(&header)?, encode_segment(claims)?))
}

/// Encodes and signs a JWT with the signer's algorithm and key id.
fn encode_signed_jwt(
    claims: &Map<String, Value>,
    signer: &SignerContext,
) -> Result<String, CryptoError> {
    let mut header = Map::new();
    header.insert("alg".to_string(), Value::from(signer.algorithm.as_str()));
    header.insert("kid".to_string(), Value::from(signer.kid()));
    header.insert("typ".to_string(), Value::from("JWT"));
    let input = format!("{}.{}", encode_segment(&header)?, encode_segment(claims)?);
    let signature = signer.certificate.sign(signer.algorithm, input.as_bytes())?;
    Ok(format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Decodes the claims segment of a compact JWT without verifying it.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidJws`] when the token is malformed.
pub fn decode_claims(token: &str) -> Result<Map<String, Value>, CryptoError> {
    let segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| CryptoError::InvalidJws("missing claims segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| CryptoError::InvalidJws(format!("claims encoding: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CryptoError::InvalidJws(format!("claims json: {err}")))
}
