// crates/ob-conformance-crypto/tests/certificate.rs
// ============================================================================
// Module: Certificate Tests
// Description: Key pair loading, key identifiers, issuers, and TLS configs.
// ============================================================================

//! Certificate loading and TLS configuration tests.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use ob_conformance_crypto::Certificate;
use ob_conformance_crypto::CryptoError;
use ob_conformance_crypto::SigningAlgorithm;
use ob_conformance_crypto::TrustPolicy;
use ob_conformance_crypto::new_tls_config;

const SIGNING_PEM: &str = include_str!("fixtures/signing.pem");
const SIGNING_KEY: &str = include_str!("fixtures/signing.key");
const SIGNING_KEY_PKCS1: &str = include_str!("fixtures/signing_pkcs1.key");
const TRANSPORT_PEM: &str = include_str!("fixtures/transport.pem");
const TRANSPORT_KEY: &str = include_str!("fixtures/transport.key");
const EC_PEM: &str = include_str!("fixtures/ec.pem");
const EC_KEY: &str = include_str!("fixtures/ec_pkcs8.key");

#[test]
fn pkcs8_and_pkcs1_keys_load_the_same_pair() {
    let pkcs8 = Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap();
    let pkcs1 = Certificate::new(SIGNING_PEM, SIGNING_KEY_PKCS1).unwrap();
    assert_eq!(pkcs8.kid(), pkcs1.kid());
    assert_eq!(pkcs8.public_key(), pkcs1.public_key());
}

#[test]
fn kid_is_derived_from_the_modulus() {
    let certificate = Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap();
    assert_eq!(certificate.kid(), "QT995QqF6R0offqaicTgMLCunl8");
}

#[test]
fn issuers_follow_subject_attributes() {
    let certificate = Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap();
    assert_eq!(certificate.signature_issuer(false), "0015800001041RbAAI/Ly5UKT9SOUc1a1RTc2Zb");
    assert!(certificate.distinguished_name().contains("OU=0015800001041RbAAI"));
    let hashed = certificate.signature_issuer(true);
    assert!(hashed.starts_with("CN=Ly5UKT9SOUc1a1RTc2Zb,"));
    assert!(hashed.ends_with("C=GB"));
}

#[test]
fn signatures_verify_for_loaded_pairs() {
    let certificate = Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap();
    for message in [b"".as_slice(), b"payload", &[0_u8; 512]] {
        for algorithm in [SigningAlgorithm::PS256, SigningAlgorithm::RS256] {
            let signature = certificate.sign(algorithm, message).unwrap();
            assert!(certificate.verify(algorithm, message, &signature));
        }
    }
}

#[test]
fn mismatched_pair_is_rejected() {
    let err = Certificate::new(SIGNING_PEM, TRANSPORT_KEY).unwrap_err();
    assert!(matches!(err, CryptoError::KeyPairMismatch(_)));
}

#[test]
fn non_rsa_material_is_rejected() {
    let err = Certificate::new(EC_PEM, EC_KEY).unwrap_err();
    assert_eq!(err, CryptoError::NotRsa);
    assert_eq!(err.to_string(), "not a valid RSA key");
    assert_eq!(Certificate::new(SIGNING_PEM, EC_KEY).unwrap_err(), CryptoError::NotRsa);
}

#[test]
fn garbage_pem_is_rejected() {
    assert!(matches!(Certificate::new("nope", SIGNING_KEY), Err(CryptoError::Pem(_))));
    assert!(matches!(Certificate::new(SIGNING_PEM, "nope"), Err(CryptoError::Pem(_))));
}

#[test]
fn tls_configs_build_for_each_policy() {
    let transport = Certificate::new(TRANSPORT_PEM, TRANSPORT_KEY).unwrap();
    let policies = [
        TrustPolicy::WebPki,
        TrustPolicy::from_pem(TRANSPORT_PEM.as_bytes()).unwrap(),
        TrustPolicy::AcceptAny,
    ];
    for policy in &policies {
        let config = new_tls_config(&transport, policy).unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());
    }
    assert!(TrustPolicy::from_pem(b"no certificates here").is_err());
}
