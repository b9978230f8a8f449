// crates/ob-conformance-crypto/src/certificate.rs
// ============================================================================
// Module: Certificates
// Description: RSA key pairs bound to X.509 certificates.
// Purpose: Load signing and transport certificates, verify the key pair, and
//          derive key identifiers and issuer strings.
// Dependencies: rsa, x509-parser, sha1, base64, rustls-pki-types
// ============================================================================

//! ## Overview
//! A [`Certificate`] pairs an X.509 certificate with its RSA private key.
//! Construction signs a fixed plaintext with PKCS#1 v1.5 / SHA-256 and
//! verifies it with the certificate's public key; a mismatching pair never
//! yields a value.
//!
//! The key identifier is the unpadded URL-safe base64 SHA-1 of the canonical
//! JWK `{"e":"AQAB","kty":"RSA","n":"<modulus>"}`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::RsaPrivateKey;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::PrivatePkcs8KeyDer;
use sha1::Digest;
use sha1::Sha1;
use x509_parser::certificate::X509Certificate;
use x509_parser::oid_registry::OID_PKCS1_RSAENCRYPTION;
use x509_parser::pem::parse_x509_pem;

use crate::algorithm::SigningAlgorithm;
use crate::error::CryptoError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Plaintext signed during the construction self-check.
const SELF_CHECK_PLAINTEXT: &[u8] = b"ob-conformance key pair self-check";

// ============================================================================
// SECTION: Certificate
// ============================================================================

/// RSA key pair bound to an X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    /// Public key taken from the certificate.
    public_key: RsaPublicKey,
    /// Private key loaded from PEM.
    private_key: RsaPrivateKey,
    /// DER encoding of the certificate.
    certificate_der: Vec<u8>,
    /// PKCS#8 DER encoding of the private key.
    private_key_der: Vec<u8>,
    /// Subject names used for issuer strings.
    subject: SubjectNames,
    /// Derived key identifier.
    kid: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("kid", &self.kid)
            .field("distinguished_name", &self.subject.distinguished_name)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    /// Loads a certificate and private key from PEM text.
    ///
    /// The private key may be PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8
    /// (`PRIVATE KEY`).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotRsa`] for non-RSA material,
    /// [`CryptoError::KeyPairMismatch`] when the pair fails the sign/verify
    /// self-check, and [`CryptoError::Pem`] or [`CryptoError::Certificate`]
    /// for undecodable input.
    pub fn new(public_pem: &str, private_pem: &str) -> Result<Self, CryptoError> {
        let (_, pem) = parse_x509_pem(public_pem.as_bytes())
            .map_err(|err| CryptoError::Pem(format!("certificate: {err}")))?;
        let parsed = pem.parse_x509().map_err(|err| CryptoError::Certificate(err.to_string()))?;
        let public_key = rsa_public_key(&parsed)?;
        let private_key = parse_private_key(private_pem)?;

        let check = SigningAlgorithm::RS256.sign(&private_key, SELF_CHECK_PLAINTEXT)?;
        if !SigningAlgorithm::RS256.verify(&public_key, SELF_CHECK_PLAINTEXT, &check) {
            return Err(CryptoError::KeyPairMismatch(
                "private key does not match certificate".to_string(),
            ));
        }

        let subject = SubjectNames::from_x509(&parsed);
        let private_key_der = private_key
            .to_pkcs8_der()
            .map_err(|err| CryptoError::Pem(format!("private key: {err}")))?
            .as_bytes()
            .to_vec();
        let kid = calc_kid(&URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()));

        Ok(Self {
            public_key,
            private_key,
            certificate_der: pem.contents.clone(),
            private_key_der,
            subject,
            kid,
        })
    }

    /// Returns the RSA public key.
    #[must_use]
    pub const fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Returns the RSA private key.
    #[must_use]
    pub const fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Returns the derived key identifier.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Returns the subject distinguished name, used as the v3.0 issuer.
    #[must_use]
    pub fn distinguished_name(&self) -> &str {
        &self.subject.distinguished_name
    }

    /// Returns the issuer string advertised in v3.1 signatures.
    #[must_use]
    pub fn signature_issuer(&self, hashed: bool) -> String {
        self.subject.signature_issuer(hashed)
    }

    /// Returns the certificate chain presented during TLS handshakes.
    #[must_use]
    pub fn tls_certificate_chain(&self) -> Vec<CertificateDer<'static>> {
        vec![CertificateDer::from(self.certificate_der.clone())]
    }

    /// Returns the private key presented during TLS handshakes.
    #[must_use]
    pub fn tls_private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.private_key_der.clone()))
    }

    /// Signs `message` with the private key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Signing`] when the RSA operation fails.
    pub fn sign(&self, algorithm: SigningAlgorithm, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        algorithm.sign(&self.private_key, message)
    }

    /// Verifies `signature` over `message` with the public key.
    #[must_use]
    pub fn verify(&self, algorithm: SigningAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        algorithm.verify(&self.public_key, message, signature)
    }
}

// ============================================================================
// SECTION: Subject Names
// ============================================================================

/// Subject attributes used to derive issuer strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubjectNames {
    /// Subject distinguished name as rendered by the parser.
    pub(crate) distinguished_name: String,
    /// Subject organisational unit, if present.
    organisational_unit: Option<String>,
    /// Subject common name, if present.
    common_name: Option<String>,
}

impl SubjectNames {
    /// Reads the subject of a parsed certificate.
    pub(crate) fn from_x509(certificate: &X509Certificate<'_>) -> Self {
        let subject = certificate.subject();
        let first = |attr: Option<&x509_parser::x509::AttributeTypeAndValue<'_>>| {
            attr.and_then(|attr| attr.as_str().ok()).map(str::to_string)
        };
        Self {
            distinguished_name: subject.to_string(),
            organisational_unit: first(subject.iter_organizational_unit().next()),
            common_name: first(subject.iter_common_name().next()),
        }
    }

    /// Directory certificates yield `<OU>/<CN>`. With `hashed` set (eIDAS
    /// certificates) the subject is rendered RFC 4514 style, most specific
    /// attribute first.
    pub(crate) fn signature_issuer(&self, hashed: bool) -> String {
        if hashed {
            return self.distinguished_name.rsplit(", ").collect::<Vec<_>>().join(",");
        }
        format!(
            "{}/{}",
            self.organisational_unit.as_deref().unwrap_or_default(),
            self.common_name.as_deref().unwrap_or_default()
        )
    }

    /// Returns true when `issuer` names this subject in any accepted form.
    pub(crate) fn matches_issuer(&self, issuer: &str) -> bool {
        issuer == self.distinguished_name
            || issuer == self.signature_issuer(false)
            || issuer == self.signature_issuer(true)
    }
}

// ============================================================================
// SECTION: Key Identifiers
// ============================================================================

/// Derives the key identifier from a base64url-encoded RSA modulus.
#[must_use]
pub fn calc_kid(modulus_b64url: &str) -> String {
    let jwk = format!(r#"{{"e":"AQAB","kty":"RSA","n":"{modulus_b64url}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha1::digest(jwk.as_bytes()))
}

// ============================================================================
// SECTION: Parsing Helpers
// ============================================================================

/// Extracts the RSA public key from a parsed certificate.
pub(crate) fn rsa_public_key(certificate: &X509Certificate<'_>) -> Result<RsaPublicKey, CryptoError> {
    let spki = certificate.public_key();
    if spki.algorithm.algorithm != OID_PKCS1_RSAENCRYPTION {
        return Err(CryptoError::NotRsa);
    }
    RsaPublicKey::from_public_key_der(spki.raw).map_err(|_| CryptoError::NotRsa)
}

/// Parses a PKCS#8 or PKCS#1 RSA private key.
fn parse_private_key(private_pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    let trimmed = private_pem.trim();
    if trimmed.contains("BEGIN RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(trimmed).map_err(|_| CryptoError::NotRsa);
    }
    if trimmed.contains("BEGIN PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs8_pem(trimmed).map_err(|_| CryptoError::NotRsa);
    }
    if trimmed.contains("-----BEGIN") {
        return Err(CryptoError::NotRsa);
    }
    Err(CryptoError::Pem("private key: no PEM block found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::calc_kid;

    #[test]
    fn kid_is_deterministic_and_unpadded() {
        let kid = calc_kid("tGzvc5H2KLufptikvbL1");
        assert_eq!(kid, calc_kid("tGzvc5H2KLufptikvbL1"));
        assert_eq!(kid.len(), 27);
        assert!(!kid.contains('='));
        assert_ne!(kid, calc_kid("tGzvc5H2KLufptikvbL2"));
    }
}
