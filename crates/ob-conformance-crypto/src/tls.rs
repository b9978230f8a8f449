// crates/ob-conformance-crypto/src/tls.rs
// ============================================================================
// Module: Mutual TLS Configuration
// Description: rustls client configuration carrying the transport certificate.
// Purpose: Build the TLS configuration used for every request to the ASPSP.
// Dependencies: rustls, rustls-pki-types, webpki-roots
// ============================================================================

//! ## Overview
//! [`new_tls_config`] always presents the transport certificate when the
//! server requests client authentication. Server certificates are checked
//! according to a [`TrustPolicy`] chosen by the host:
//! - [`TrustPolicy::WebPki`] uses the Mozilla root set.
//! - [`TrustPolicy::CustomRoots`] trusts only the supplied roots.
//! - [`TrustPolicy::AcceptAny`] skips chain validation for sandbox targets
//!   with self-issued certificates. Handshake signatures are still verified.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use rustls::ClientConfig;
use rustls::DigitallySignedStruct;
use rustls::RootCertStore;
use rustls::SignatureScheme;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::client::danger::ServerCertVerified;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::crypto::aws_lc_rs;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::ServerName;
use rustls_pki_types::UnixTime;
use rustls_pki_types::pem::PemObject;

use crate::certificate::Certificate;
use crate::error::CryptoError;

// ============================================================================
// SECTION: Trust Policy
// ============================================================================

/// Server certificate trust policy.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    /// Trust the bundled WebPKI roots.
    #[default]
    WebPki,
    /// Trust only the given root certificates.
    CustomRoots(Vec<CertificateDer<'static>>),
    /// Accept any server certificate chain.
    AcceptAny,
}

impl TrustPolicy {
    /// Builds a custom-roots policy from PEM-encoded certificates.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Pem`] when no certificate can be decoded.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        let roots = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CryptoError::Pem(format!("root certificates: {err}")))?;
        if roots.is_empty() {
            return Err(CryptoError::Pem("root certificates: none found".to_string()));
        }
        Ok(Self::CustomRoots(roots))
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Builds a mutual-TLS client configuration for the transport certificate.
///
/// # Errors
///
/// Returns [`CryptoError::Tls`] when a root certificate or the transport key
/// is rejected by rustls.
pub fn new_tls_config(
    transport: &Certificate,
    policy: &TrustPolicy,
) -> Result<ClientConfig, CryptoError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|err| CryptoError::Tls(err.to_string()))?;
    let builder = match policy {
        TrustPolicy::WebPki => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots)
        }
        TrustPolicy::CustomRoots(certificates) => {
            let mut roots = RootCertStore::empty();
            for certificate in certificates {
                roots
                    .add(certificate.clone())
                    .map_err(|err| CryptoError::Tls(format!("root certificate: {err}")))?;
            }
            builder.with_root_certificates(roots)
        }
        TrustPolicy::AcceptAny => {
            tracing::warn!("server certificate validation disabled");
            builder.dangerous().with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert {
                provider,
            }))
        }
    };
    builder
        .with_client_auth_cert(transport.tls_certificate_chain(), transport.tls_private_key())
        .map_err(|err| CryptoError::Tls(format!("transport certificate: {err}")))
}

// ============================================================================
// SECTION: Accept-Any Verifier
// ============================================================================

/// Verifier that accepts every chain but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    /// Provider whose algorithms verify handshake signatures.
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
