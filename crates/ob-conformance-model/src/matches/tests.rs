// crates/ob-conformance-model/src/matches/tests.rs
// ============================================================================
// Module: Response Match Tests
// Description: Unit tests for match decoding and evaluation.
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use ob_conformance_core::Context;
use ob_conformance_core::ContextValue;
use serde_json::Value;
use serde_json::json;

use super::Match;
use super::Predicate;
use crate::http::HttpResponse;

fn decode(value: Value) -> Match {
    serde_json::from_value(value).unwrap()
}

fn accounts_response() -> (HttpResponse, Value) {
    let body = json!({
        "Data": {
            "Account": [
                {"AccountId": "500000000000000000000001", "Currency": "GBP"},
                {"AccountId": "500000000000000000000002", "Currency": "EUR"}
            ]
        }
    });
    let response = HttpResponse::new(200, body.to_string())
        .with_header("Content-Type", "application/json; charset=utf-8")
        .with_header("x-fapi-interaction-id", "93bac548-d2de-4546-b106-880a5018460d");
    (response, body)
}

#[test]
fn field_combinations_select_predicates() {
    assert!(matches!(decode(json!({"status": 201})).predicate, Predicate::Status(201)));
    assert!(matches!(
        decode(json!({"header": "Content-Type", "regex": "json"})).predicate,
        Predicate::HeaderRegex { .. }
    ));
    assert!(matches!(
        decode(json!({"json": "Data.Account", "count": 2})).predicate,
        Predicate::JsonCount { count: 2, .. }
    ));
    assert!(matches!(
        decode(json!({"json": "Data.Account.0.AccountId", "name": "AccountId"})).predicate,
        Predicate::JsonPresent(_)
    ));
    assert!(matches!(decode(json!({"bodyLength": 0})).predicate, Predicate::BodyLength(0)));
}

#[test]
fn empty_or_invalid_declarations_are_rejected() {
    assert!(serde_json::from_value::<Match>(json!({"description": "nothing"})).is_err());
    assert!(serde_json::from_value::<Match>(json!({"regex": "("})).is_err());
    assert!(serde_json::from_value::<Match>(json!({"status": 200, "bogus": 1})).is_err());
}

#[test]
fn json_present_extracts_value() {
    let (response, body) = accounts_response();
    let matcher = decode(json!({"json": "Data.Account.0.AccountId", "contextName": "AccountId"}));
    let value = matcher.evaluate(&response, Some(&body), &Context::new()).unwrap();
    assert_eq!(value, ContextValue::from("500000000000000000000001"));
    assert_eq!(matcher.context_name.as_deref(), Some("AccountId"));
}

#[test]
fn json_count_counts_array_elements() {
    let (response, body) = accounts_response();
    let ok = decode(json!({"json": "Data.Account", "count": 2}));
    assert!(ok.evaluate(&response, Some(&body), &Context::new()).is_ok());
    let wildcard = decode(json!({"json": "$.Data.Account[*]", "count": 2}));
    assert!(wildcard.evaluate(&response, Some(&body), &Context::new()).is_ok());
    let wrong = decode(json!({"json": "Data.Account", "count": 3}));
    let err = wrong.evaluate(&response, Some(&body), &Context::new()).unwrap_err();
    assert_eq!(err, "expected 3 elements, got 2");
}

#[test]
fn json_value_substitutes_expected_template() {
    let (response, body) = accounts_response();
    let mut ctx = Context::new();
    ctx.put_string("currency", "EUR");
    let matcher = decode(json!({"json": "Data.Account.1.Currency", "value": "$currency"}));
    assert!(matcher.evaluate(&response, Some(&body), &ctx).is_ok());
    ctx.put_string("currency", "USD");
    assert!(matcher.evaluate(&response, Some(&body), &ctx).is_err());
}

#[test]
fn header_lookup_ignores_case_and_captures_group() {
    let (response, body) = accounts_response();
    let matcher = decode(json!({"header": "X-Fapi-Interaction-Id", "regex": "^([0-9a-f]{8})-"}));
    let value = matcher.evaluate(&response, Some(&body), &Context::new()).unwrap();
    assert_eq!(value, ContextValue::from("93bac548"));
    let missing = Match::new(Predicate::HeaderPresent("x-jws-signature".to_string()));
    assert_eq!(
        missing.evaluate(&response, Some(&body), &Context::new()).unwrap_err(),
        "header missing"
    );
}

#[test]
fn json_predicates_fail_on_non_json_body() {
    let response = HttpResponse::new(500, "<html>oops</html>");
    let matcher = decode(json!({"json": "Data"}));
    assert_eq!(
        matcher.evaluate(&response, None, &Context::new()).unwrap_err(),
        "body is not JSON"
    );
    let regex = decode(json!({"regex": "oops"}));
    assert_eq!(
        regex.evaluate(&response, None, &Context::new()).unwrap(),
        ContextValue::from("oops")
    );
}
