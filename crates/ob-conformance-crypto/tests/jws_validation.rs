// crates/ob-conformance-crypto/tests/jws_validation.rs
// ============================================================================
// Module: Detached JWS Validation Tests
// Description: Verification against a local JWKS endpoint.
// ============================================================================

//! ## Overview
//! Serves `fixtures/jwks.json` from a local `tiny_http` server and validates
//! both pre-computed signatures and signatures produced by the signer.

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

use std::sync::Arc;
use std::thread;

use ob_conformance_core::ApiVersion;
use ob_conformance_crypto::Certificate;
use ob_conformance_crypto::JwksCache;
use ob_conformance_crypto::SignatureStep;
use ob_conformance_crypto::SignerContext;
use ob_conformance_crypto::b64_flag;
use ob_conformance_crypto::build_detached_jws;
use ob_conformance_crypto::canonical_body;
use ob_conformance_crypto::validate_jws;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const JWKS: &str = include_str!("fixtures/jwks.json");
const BODY: &str = include_str!("fixtures/funds_confirmation_body.json");
const PS256_JWS: &str = include_str!("fixtures/funds_confirmation_ps256.jws");
const RS256_UNENCODED_JWS: &str = include_str!("fixtures/funds_confirmation_rs256_unencoded.jws");
const SIGNING_PEM: &str = include_str!("fixtures/signing.pem");
const SIGNING_KEY: &str = include_str!("fixtures/signing.key");

/// Serves the JWKS for up to `requests` requests and returns its URL.
fn jwks_server(requests: usize) -> (String, thread::JoinHandle<usize>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let handle = thread::spawn(move || {
        let mut served = 0;
        while served < requests {
            let Ok(Some(request)) = server.recv_timeout(std::time::Duration::from_secs(2)) else {
                break;
            };
            let header = Header::from_bytes("Content-Type", "application/json").unwrap();
            let _ = request.respond(Response::from_string(JWKS).with_header(header));
            served += 1;
        }
        served
    });
    (format!("http://{addr}/jwks.json"), handle)
}

fn flip_last_signature_char(jws: &str) -> String {
    let mut chars: Vec<char> = jws.trim().chars().collect();
    let last = chars.len() - 2;
    chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn encoded_signature_verifies_only_with_b64_true() {
    let (uri, handle) = jwks_server(1);
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    validate_jws(PS256_JWS.trim(), BODY.trim(), &uri, true, &cache, &client).await.unwrap();
    let err =
        validate_jws(PS256_JWS.trim(), BODY.trim(), &uri, false, &cache, &client).await.unwrap_err();
    assert_eq!(err.step, SignatureStep::SignatureMismatch);
    assert_eq!(handle.join().unwrap(), 1, "second validation must hit the cache");
}

#[tokio::test]
async fn rs256_response_is_rejected_before_key_lookup() {
    let (uri, handle) = jwks_server(1);
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    for b64 in [false, true] {
        let err = validate_jws(RS256_UNENCODED_JWS.trim(), BODY.trim(), &uri, b64, &cache, &client)
            .await
            .unwrap_err();
        assert_eq!(err.step, SignatureStep::Algorithm);
        assert!(err.detail.contains("RS256"), "{}", err.detail);
    }
    assert!(cache.is_empty());
    assert_eq!(handle.join().unwrap(), 0, "jwks must not be fetched for a rejected alg");
}

#[tokio::test]
async fn ps256_signature_fails_with_b64_false() {
    let (uri, handle) = jwks_server(1);
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    let err = validate_jws(PS256_JWS.trim(), BODY.trim(), &uri, false, &cache, &client)
        .await
        .unwrap_err();
    assert_eq!(err.step, SignatureStep::SignatureMismatch);
    assert!(err.detail.starts_with("PS256"), "{}", err.detail);
    handle.join().unwrap();
}

#[tokio::test]
async fn tampering_is_detected() {
    let (uri, handle) = jwks_server(1);
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    let flipped = flip_last_signature_char(PS256_JWS);
    let err = validate_jws(&flipped, BODY.trim(), &uri, true, &cache, &client).await.unwrap_err();
    assert_eq!(err.step, SignatureStep::SignatureMismatch);
    let other_body = BODY.trim().replace("true", "false");
    let err =
        validate_jws(PS256_JWS.trim(), &other_body, &uri, true, &cache, &client).await.unwrap_err();
    assert_eq!(err.step, SignatureStep::SignatureMismatch);
    handle.join().unwrap();
}

#[tokio::test]
async fn signer_output_round_trips_through_validation() {
    let (uri, handle) = jwks_server(1);
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    let certificate = Arc::new(Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap());
    for version in ["v3.1.2", "v3.1.4", "v3.1.10"] {
        let version = ApiVersion::parse(version).unwrap();
        let signer = SignerContext::new(Arc::clone(&certificate), version);
        let pretty = "{\n  \"Data\": {\"ConsentId\": \"pdc-1\"}\n}";
        let jws = build_detached_jws(pretty, "application/json", &signer).unwrap();
        let sent = canonical_body(pretty, "application/json").unwrap();
        let b64 = b64_flag(version).unwrap();
        validate_jws(&jws, &sent, &uri, b64, &cache, &client).await.unwrap();
        let err = validate_jws(&jws, &sent, &uri, !b64, &cache, &client).await.unwrap_err();
        assert_eq!(err.step, SignatureStep::SignatureMismatch);
    }
    handle.join().unwrap();
}

#[tokio::test]
async fn structural_failures_name_their_step() {
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    let err = validate_jws("abc.def.ghi", BODY, "http://127.0.0.1:9/jwks", true, &cache, &client)
        .await
        .unwrap_err();
    assert_eq!(err.step, SignatureStep::Decode);

    let err =
        validate_jws(PS256_JWS.trim(), BODY, "http://127.0.0.1:9/jwks", true, &cache, &client)
            .await
            .unwrap_err();
    assert_eq!(err.step, SignatureStep::JwksUnreachable);
}

#[tokio::test]
async fn unknown_kid_is_reported() {
    let (uri, handle) = jwks_server(1);
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    let certificate = Arc::new(Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap());
    let mut signer = SignerContext::new(certificate, ApiVersion::new(3, 1, 4));
    signer.kid_override = Some("unregistered".to_string());
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let err = validate_jws(&jws, BODY, &uri, true, &cache, &client).await.unwrap_err();
    assert_eq!(err.step, SignatureStep::KeyNotFound);
    handle.join().unwrap();
}

#[tokio::test]
async fn foreign_issuer_is_rejected_unless_anchor_is_relaxed() {
    let (uri, handle) = jwks_server(1);
    let cache = JwksCache::new();
    let client = reqwest::Client::new();
    let certificate = Arc::new(Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap());
    let mut signer = SignerContext::new(certificate, ApiVersion::new(3, 1, 4));
    signer.issuer_override = Some("someone/else".to_string());
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let err = validate_jws(&jws, BODY, &uri, true, &cache, &client).await.unwrap_err();
    assert_eq!(err.step, SignatureStep::Issuer);

    signer.trust_anchor = "ob.hsbc.co.uk".to_string();
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    validate_jws(&jws, BODY, &uri, true, &cache, &client).await.unwrap();
    handle.join().unwrap();
}
