// crates/ob-conformance-crypto/src/error.rs
// ============================================================================
// Module: Crypto Errors
// Description: Error types for certificates, signing, and signature checks.
// Dependencies: thiserror
// ============================================================================

//! Error types for the crypto crate. [`CryptoError`] covers local failures
//! (parsing, signing, configuration); [`SignatureError`] covers remote
//! signature validation and records the step that failed.

use std::fmt;

use thiserror::Error;

/// Local cryptographic failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// PEM or DER material could not be decoded.
    #[error("invalid pem: {0}")]
    Pem(String),
    /// X.509 certificate could not be parsed.
    #[error("invalid certificate: {0}")]
    Certificate(String),
    /// Key material is not RSA.
    #[error("not a valid RSA key")]
    NotRsa,
    /// Sign-then-verify self check failed.
    #[error("certificate key pair self-verification failed: {0}")]
    KeyPairMismatch(String),
    /// Signing operation failed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// Algorithm is not supported by the operation.
    #[error("\"{0}\" algorithm not supported")]
    UnsupportedAlgorithm(String),
    /// API version does not define a `b64` flag.
    #[error("b64 flag undefined for api version {0}")]
    UnsupportedVersion(String),
    /// JSON body could not be minified.
    #[error("body minification failed: {0}")]
    Minify(String),
    /// JWS or JWT could not be decoded.
    #[error("invalid jws: {0}")]
    InvalidJws(String),
    /// JSON encoding failed.
    #[error("encoding failed: {0}")]
    Encoding(String),
    /// URL could not be parsed or built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// TLS configuration could not be built.
    #[error("tls configuration failed: {0}")]
    Tls(String),
}

/// Step of detached signature validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStep {
    /// Splitting and decoding the compact form.
    Decode,
    /// Reading the `kid` header.
    KidMissing,
    /// Reading the `alg` header.
    Algorithm,
    /// Fetching the issuer JWKS.
    JwksUnreachable,
    /// Locating the key in the JWKS.
    KeyNotFound,
    /// Parsing the leading `x5c` certificate.
    X5cUnparseable,
    /// Checking the advertised issuer.
    Issuer,
    /// Verifying the signature.
    SignatureMismatch,
}

impl fmt::Display for SignatureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Decode => "decode",
            Self::KidMissing => "kid missing",
            Self::Algorithm => "unsupported algorithm",
            Self::JwksUnreachable => "jwks unreachable",
            Self::KeyNotFound => "key not found",
            Self::X5cUnparseable => "x5c unparseable",
            Self::Issuer => "issuer mismatch",
            Self::SignatureMismatch => "signature mismatch",
        };
        f.write_str(label)
    }
}

/// Detached signature validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signature validation failed ({step}): {detail}")]
pub struct SignatureError {
    /// Step that failed.
    pub step: SignatureStep,
    /// Failure detail.
    pub detail: String,
}

impl SignatureError {
    /// Creates a signature error for a step.
    pub(crate) fn new(step: SignatureStep, detail: impl Into<String>) -> Self {
        Self {
            step,
            detail: detail.into(),
        }
    }
}
