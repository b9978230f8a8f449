// crates/ob-conformance-crypto/src/lib.rs
// ============================================================================
// Module: Open Banking Conformance Crypto
// Description: Certificates, mutual TLS, and detached JWS handling.
// Purpose: Provide the signing and transport primitives used by test cases
//          and the consent orchestrator.
// Dependencies: rsa, x509-parser, rustls, reqwest, base64, sha1, sha2
// ============================================================================

//! ## Overview
//! This crate loads the signing and transport [`Certificate`]s, builds the
//! mutual-TLS client configuration, and produces and verifies the detached
//! JWS signatures required by the Open Banking payment profiles. It also
//! builds the PSU consent URL and token-endpoint client authentication.
//! Invariants:
//! - A [`Certificate`] only exists for a key pair that passed sign/verify.
//! - Signing parameters are passed explicitly through [`SignerContext`].
//! - The [`JwksCache`] only grows during a run.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod algorithm;
pub mod certificate;
pub mod error;
pub mod jwt;
pub mod oauth;
pub mod signer;
pub mod tls;
pub mod verify;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use algorithm::SigningAlgorithm;
pub use certificate::Certificate;
pub use certificate::calc_kid;
pub use error::CryptoError;
pub use error::SignatureError;
pub use error::SignatureStep;
pub use jwt::ConsentUrlRequest;
pub use jwt::client_assertion;
pub use jwt::psu_consent_url;
pub use oauth::basic_auth_value;
pub use oauth::c_hash;
pub use signer::JwsOperation;
pub use signer::SignerContext;
pub use signer::b64_flag;
pub use signer::build_detached_jws;
pub use signer::canonical_body;
pub use signer::modify_jws;
pub use tls::TrustPolicy;
pub use tls::new_tls_config;
pub use verify::Jwk;
pub use verify::Jwks;
pub use verify::JwksCache;
pub use verify::validate_jws;
