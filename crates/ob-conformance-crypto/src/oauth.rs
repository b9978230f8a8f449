// crates/ob-conformance-crypto/src/oauth.rs
// ============================================================================
// Module: OAuth Helpers
// Description: Client authentication values and ID token hash claims.
// Dependencies: base64, sha2
// ============================================================================

//! Helpers for token-endpoint client authentication and `c_hash`
//! verification of hybrid-flow ID tokens.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::Digest;
use sha2::Sha256;
use sha2::Sha384;
use sha2::Sha512;

use crate::error::CryptoError;

/// Returns the `Authorization` header value for `client_secret_basic`.
#[must_use]
pub fn basic_auth_value(client_id: &str, client_secret: &str) -> String {
    format!("Basic {}", basic_auth_credentials(client_id, client_secret))
}

/// Returns the base64 credentials of `client_secret_basic`.
#[must_use]
pub fn basic_auth_credentials(client_id: &str, client_secret: &str) -> String {
    STANDARD.encode(format!("{client_id}:{client_secret}"))
}

/// Computes the `c_hash` of an authorization code for a JOSE algorithm.
///
/// The hash is the left half of the algorithm's digest of `code`, unpadded
/// base64url-encoded.
///
/// # Errors
///
/// Returns [`CryptoError::UnsupportedAlgorithm`] for algorithms outside the
/// ES, PS, and RS families at 256, 384, and 512 bits.
pub fn c_hash(alg: &str, code: &str) -> Result<String, CryptoError> {
    let digest = match alg {
        "ES256" | "PS256" | "RS256" => Sha256::digest(code.as_bytes()).to_vec(),
        "ES384" | "PS384" | "RS384" => Sha384::digest(code.as_bytes()).to_vec(),
        "ES512" | "PS512" | "RS512" => Sha512::digest(code.as_bytes()).to_vec(),
        other => return Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
    };
    let half = digest.get(.. digest.len() / 2).unwrap_or_default();
    Ok(URL_SAFE_NO_PAD.encode(half))
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::basic_auth_credentials;
    use super::basic_auth_value;
    use super::c_hash;

    #[test]
    fn basic_auth_matches_reference_value() {
        let credentials = basic_auth_credentials(
            "dc3a363e-2cc3-4187-b6df-579f21bad6c8",
            "e648104b-f52a-43e1-a2e0-fe3a047497cf",
        );
        assert_eq!(
            credentials,
            "ZGMzYTM2M2UtMmNjMy00MTg3LWI2ZGYtNTc5ZjIxYmFkNmM4OmU2NDgxMDRiLWY1MmEtNDNlMS1hMmUwLWZlM2EwNDc0OTdjZg=="
        );
        assert!(basic_auth_value("a", "b").starts_with("Basic "));
    }

    #[test]
    fn c_hash_matches_reference_values() {
        let code = "80bf17a3-e617-4983-9d62-b50bd8e6fce4";
        assert_eq!(c_hash("ES256", code).unwrap(), "EE_Bf-grXWv5GGhs5FZ0ug");
        assert_eq!(c_hash("PS256", code).unwrap(), "EE_Bf-grXWv5GGhs5FZ0ug");
        assert_eq!(c_hash("ES256", "").unwrap(), "47DEQpj8HBSa-_TImW-5JA");
        assert_eq!(c_hash("RS512", code).unwrap().len(), 43);
    }

    #[test]
    fn c_hash_rejects_unknown_algorithm() {
        let err = c_hash("bad-algorithm", "code").unwrap_err();
        assert_eq!(err.to_string(), "\"bad-algorithm\" algorithm not supported");
    }
}
