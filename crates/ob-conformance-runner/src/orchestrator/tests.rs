// crates/ob-conformance-runner/src/orchestrator/tests.rs
// ============================================================================
// Module: Run Orchestrator Tests
// Description: Token planning across account, payment, and funds suites.
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use ob_conformance_core::TokenFamily;
use ob_conformance_model::Suite;
use serde_json::json;

use super::plan_tokens;
use crate::error::RunError;

fn suite(value: serde_json::Value) -> Suite {
    Suite::from_json(&value.to_string()).unwrap()
}

fn account_suite() -> Suite {
    suite(json!({
        "id": "accounts",
        "name": "Accounts",
        "specification": "account-transaction-v3.1",
        "testCases": [
            {
                "id": "t1",
                "name": "basic only",
                "input": {"method": "GET", "endpoint": "/accounts"},
                "permissions": ["ReadAccountsBasic"],
                "permissionsExcluded": ["ReadAccountsDetail"]
            },
            {
                "id": "t2",
                "name": "detail",
                "input": {"method": "GET", "endpoint": "/accounts/$AccountId"},
                "permissions": ["ReadAccountsDetail"]
            },
            {
                "id": "t3",
                "name": "balances",
                "input": {"method": "GET", "endpoint": "/accounts/$AccountId/balances"}
            },
            {
                "id": "t4",
                "name": "consent lookup",
                "input": {"method": "GET", "endpoint": "/account-access-consents/$ConsentId"}
            }
        ]
    }))
}

fn payment_suite(id: &str) -> Suite {
    suite(json!({
        "id": id,
        "name": "Domestic payments",
        "specification": "payment-initiation-v3.1.4",
        "consent": {
            "endpoint": "/domestic-payment-consents",
            "body": "{\"Data\":{\"Initiation\":{\"InstructionIdentification\":\"$instructionIdentificationID\"}},\"Risk\":{}}"
        },
        "testCases": [
            {"id": "p1", "name": "create", "input": {"method": "POST", "endpoint": "/domestic-payments", "bodyData": "{}"}}
        ]
    }))
}

#[test]
fn exclusive_account_groups_get_separate_tokens() {
    let plan = plan_tokens(&[account_suite()]).unwrap();
    assert_eq!(plan.jobs.len(), 2);
    assert_eq!(plan.jobs[0].token_name, "account_token_001");
    assert_eq!(plan.jobs[0].permissions, vec!["ReadAccountsBasic".to_string(), "ReadBalances".to_string()]);
    assert_eq!(plan.jobs[1].permissions, vec!["ReadAccountsDetail".to_string()]);
    assert_eq!(plan.token_for("accounts", "t1"), Some("account_token_001"));
    assert_eq!(plan.token_for("accounts", "t2"), Some("account_token_002"));
    assert_eq!(plan.token_for("accounts", "t3"), Some("account_token_001"));
    assert_eq!(plan.token_for("accounts", "t4"), Some("account_token_001"));
    assert_eq!(plan.token_for("accounts", "missing"), None);
}

#[test]
fn payment_suites_get_one_token_each() {
    let plan = plan_tokens(&[payment_suite("pay-a"), payment_suite("pay-b")]).unwrap();
    let names: Vec<&str> = plan.jobs.iter().map(|job| job.token_name.as_str()).collect();
    assert_eq!(names, vec!["payment_token_001", "payment_token_002"]);
    assert!(plan.jobs.iter().all(|job| job.family == TokenFamily::Payment && job.scope == "payments"));
    assert_eq!(plan.jobs[0].consent_endpoint, "/domestic-payment-consents");
    assert_eq!(plan.token_for("pay-b", "p1"), Some("payment_token_002"));
}

#[test]
fn suites_without_scoped_cases_need_no_account_token() {
    let only_consents = suite(json!({
        "id": "consents",
        "name": "Consents",
        "specification": "account-transaction-v3.1",
        "testCases": [
            {"id": "c1", "name": "create", "input": {"method": "POST", "endpoint": "/account-access-consents", "bodyData": "{}"}}
        ]
    }));
    let plan = plan_tokens(&[only_consents]).unwrap();
    assert!(plan.jobs.is_empty());
    assert_eq!(plan.token_for("consents", "c1"), None);
}

#[test]
fn contradictory_permissions_fail_planning() {
    let broken = suite(json!({
        "id": "broken",
        "name": "Broken",
        "specification": "account-transaction-v3.1",
        "testCases": [{
            "id": "b1",
            "name": "both",
            "input": {"method": "GET", "endpoint": "/accounts"},
            "permissions": ["ReadAccountsBasic"],
            "permissionsExcluded": ["ReadAccountsBasic"]
        }]
    }));
    assert!(matches!(plan_tokens(&[broken]), Err(RunError::Planning(_))));
}
