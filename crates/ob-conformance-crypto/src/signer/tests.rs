// crates/ob-conformance-crypto/src/signer/tests.rs
// ============================================================================
// Module: Signer Unit Tests
// Description: Header layout, signing input, and header edits.
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ob_conformance_core::ApiVersion;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use super::HEADER_IAT;
use super::HEADER_ISS;
use super::HEADER_TAN;
use super::JwsOperation;
use super::SignerContext;
use super::b64_flag;
use super::build_detached_jws;
use super::canonical_body;
use super::decode_header;
use super::minify_json;
use super::modify_jws;
use super::signing_input;
use crate::algorithm::SigningAlgorithm;
use crate::certificate::Certificate;

const SIGNING_PEM: &str = include_str!("../../tests/fixtures/signing.pem");
const SIGNING_KEY: &str = include_str!("../../tests/fixtures/signing.key");
const BODY: &str = r#"{ "Data": { "Initiation": { "InstructionIdentification": "ACME 412" } } }"#;

fn signer(version: &str) -> SignerContext {
    let certificate = Arc::new(Certificate::new(SIGNING_PEM, SIGNING_KEY).unwrap());
    let mut signer = SignerContext::new(certificate, ApiVersion::parse(version).unwrap());
    signer.issued_at = Some(1_588_587_682);
    signer
}

fn verify_detached(jws: &str, payload: &str, b64: bool, signer: &SignerContext) -> bool {
    let (header, signature) = jws.split_once("..").unwrap();
    let alg: SigningAlgorithm =
        decode_header(jws).unwrap()["alg"].as_str().unwrap().parse().unwrap();
    let input = signing_input(header, payload, b64);
    let signature = URL_SAFE_NO_PAD.decode(signature).unwrap();
    signer.certificate.verify(alg, input.as_bytes(), &signature)
}

fn crit(header: &Map<String, Value>) -> Vec<&str> {
    header["crit"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect()
}

#[test]
fn v3_0_header_has_b64_without_tan() {
    let signer = signer("v3.0");
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let header = decode_header(&jws).unwrap();
    assert_eq!(header["b64"], json!(false));
    assert!(header.get(HEADER_TAN).is_none());
    assert_eq!(crit(&header), vec!["b64", HEADER_IAT, HEADER_ISS]);
    assert_eq!(header[HEADER_ISS], json!(signer.certificate.distinguished_name()));
    assert_eq!(header["typ"], json!("JOSE"));
    assert_eq!(header["cty"], json!("application/json"));
}

#[test]
fn v3_1_3_header_adds_tan_to_crit() {
    let signer = signer("v3.1.3");
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let header = decode_header(&jws).unwrap();
    assert_eq!(header["b64"], json!(false));
    assert_eq!(header[HEADER_TAN], json!("openbanking.org.uk"));
    assert_eq!(crit(&header), vec!["b64", HEADER_IAT, HEADER_ISS, HEADER_TAN]);
    assert_eq!(header[HEADER_ISS], json!("0015800001041RbAAI/Ly5UKT9SOUc1a1RTc2Zb"));
    assert_eq!(header["kid"], json!("QT995QqF6R0offqaicTgMLCunl8"));
}

#[test]
fn v3_1_4_header_drops_b64() {
    let signer = signer("v3.1.4");
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let header = decode_header(&jws).unwrap();
    assert!(header.get("b64").is_none());
    assert_eq!(crit(&header), vec![HEADER_IAT, HEADER_ISS, HEADER_TAN]);
}

#[test]
fn unencoded_payload_verifies_raw_body() {
    let signer = signer("v3.1.2");
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let minified = minify_json(BODY).unwrap();
    assert!(verify_detached(&jws, &minified, false, &signer));
    assert!(!verify_detached(&jws, &minified, true, &signer));
    assert!(!verify_detached(&jws, BODY, false, &signer));
}

#[test]
fn encoded_payload_verifies_base64_body() {
    let signer = signer("v3.1.8");
    let jws = build_detached_jws(BODY, "application/json; charset=utf-8", &signer).unwrap();
    let minified = minify_json(BODY).unwrap();
    assert!(verify_detached(&jws, &minified, true, &signer));
    assert!(!verify_detached(&jws, &minified, false, &signer));
    assert!(jws.contains(".."));
}

#[test]
fn b64_flag_follows_version_table() {
    assert!(b64_flag(ApiVersion::parse("v3.0").unwrap()).is_err());
    assert!(!b64_flag(ApiVersion::parse("v3.1").unwrap()).unwrap());
    assert!(!b64_flag(ApiVersion::parse("v3.1.3").unwrap()).unwrap());
    assert!(b64_flag(ApiVersion::parse("v3.1.4").unwrap()).unwrap());
    assert!(b64_flag(ApiVersion::parse("v3.1.10").unwrap()).unwrap());
}

#[test]
fn minify_preserves_order_and_string_whitespace() {
    let minified = minify_json("{ \"b\" : \"x y\",\n \"a\" : [1, 2] }").unwrap();
    assert_eq!(minified, r#"{"b":"x y","a":[1,2]}"#);
    assert_eq!(minify_json(r#"{"q":"say \"hi there\""}"#).unwrap(), r#"{"q":"say \"hi there\""}"#);
    assert!(minify_json("{ not json").is_err());
    assert_eq!(canonical_body("a b", "text/plain").unwrap(), "a b");
    assert_eq!(canonical_body("{ }", "application/jose+json").unwrap(), "{}");
}

#[test]
fn minify_keeps_number_and_escape_spelling() {
    let body = "{\n  \"z\": 1.10,\n  \"a\": \"caf\\u00e9\",\n  \"m\": 1e2\n}";
    let minified = minify_json(body).unwrap();
    assert_eq!(minified, r#"{"z":1.10,"a":"caf\u00e9","m":1e2}"#);
    let reserialized = serde_json::to_string(&serde_json::from_str::<Value>(body).unwrap()).unwrap();
    assert_ne!(minified, reserialized);
}

#[test]
fn overrides_replace_derived_values() {
    let mut signer = signer("v3.1.5");
    signer.kid_override = Some("eidas-kid".to_string());
    signer.issuer_override = Some("CN=eidas,O=Bank".to_string());
    signer.trust_anchor = "hsbc.com".to_string();
    let header = decode_header(&build_detached_jws(BODY, "application/json", &signer).unwrap())
        .unwrap();
    assert_eq!(header["kid"], json!("eidas-kid"));
    assert_eq!(header[HEADER_ISS], json!("CN=eidas,O=Bank"));
    assert_eq!(header[HEADER_TAN], json!("hsbc.com"));
}

#[test]
fn modify_expands_aliases_and_resigns_with_new_alg() {
    let signer = signer("v3.1.3");
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let mut set = Map::new();
    set.insert("alg".to_string(), json!("RS256"));
    let operations = vec![JwsOperation::Remove(vec!["iat".to_string()]), JwsOperation::Set(set)];
    let minified = minify_json(BODY).unwrap();
    let modified = modify_jws(&jws, &minified, &operations, &signer).unwrap();
    let header = decode_header(&modified).unwrap();
    assert!(header.get(HEADER_IAT).is_none());
    assert_eq!(header["alg"], json!("RS256"));
    assert!(verify_detached(&modified, &minified, false, &signer));
}

#[test]
fn modify_rejects_unsupported_alg() {
    let signer = signer("v3.1.4");
    let jws = build_detached_jws(BODY, "application/json", &signer).unwrap();
    let mut set = Map::new();
    set.insert("alg".to_string(), json!("HS256"));
    let err = modify_jws(&jws, BODY, &[JwsOperation::Set(set)], &signer).unwrap_err();
    assert_eq!(err.to_string(), "\"HS256\" algorithm not supported");
}
