// crates/ob-conformance-crypto/src/algorithm.rs
// ============================================================================
// Module: Signing Algorithms
// Description: RSA signature algorithms used by Open Banking JWS.
// Dependencies: rsa, sha2, rand
// ============================================================================

//! PS256 and RS256 over RSA keys. PS256 uses a salt length equal to the
//! SHA-256 output length.

use std::fmt;
use std::str::FromStr;

use rsa::RsaPrivateKey;
use rsa::RsaPublicKey;
use rsa::pkcs1v15;
use rsa::pss;
use rsa::signature::RandomizedSigner;
use rsa::signature::SignatureEncoding;
use rsa::signature::Signer;
use rsa::signature::Verifier;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;

use crate::error::CryptoError;

/// JWS signing algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PSS with SHA-256.
    #[default]
    PS256,
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    RS256,
}

impl SigningAlgorithm {
    /// Returns the JOSE `alg` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PS256 => "PS256",
            Self::RS256 => "RS256",
        }
    }

    /// Signs `message` with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Signing`] when the RSA operation fails.
    pub fn sign(self, key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::PS256 => {
                let signing_key = pss::SigningKey::<Sha256>::new(key.clone());
                let signature = signing_key
                    .try_sign_with_rng(&mut rand::thread_rng(), message)
                    .map_err(|err| CryptoError::Signing(err.to_string()))?;
                Ok(signature.to_vec())
            }
            Self::RS256 => {
                let signing_key = pkcs1v15::SigningKey::<Sha256>::new(key.clone());
                let signature = signing_key
                    .try_sign(message)
                    .map_err(|err| CryptoError::Signing(err.to_string()))?;
                Ok(signature.to_vec())
            }
        }
    }

    /// Returns true when `signature` is valid for `message` under `key`.
    #[must_use]
    pub fn verify(self, key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::PS256 => {
                let verifying_key = pss::VerifyingKey::<Sha256>::new(key.clone());
                pss::Signature::try_from(signature)
                    .is_ok_and(|signature| verifying_key.verify(message, &signature).is_ok())
            }
            Self::RS256 => {
                let verifying_key = pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                pkcs1v15::Signature::try_from(signature)
                    .is_ok_and(|signature| verifying_key.verify(message, &signature).is_ok())
            }
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PS256" => Ok(Self::PS256),
            "RS256" => Ok(Self::RS256),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}
