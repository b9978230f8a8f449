// crates/ob-conformance-model/src/jsonpath.rs
// ============================================================================
// Module: JSON Selectors
// Description: Dotted-path and JSONPath selection over response bodies.
// Dependencies: jsonpath_lib, serde_json
// ============================================================================

//! Suites address response fields either with JSONPath (`$.Data.Account[0]`)
//! or with dotted paths (`Data.Account.0.AccountId`). Dotted paths are
//! rewritten to JSONPath before selection.

use jsonpath_lib::select;
use serde_json::Value;

/// Rewrites a dotted path to JSONPath; JSONPath input is returned unchanged.
#[must_use]
pub fn to_jsonpath(selector: &str) -> String {
    if selector.starts_with('$') {
        return selector.to_string();
    }
    let mut path = String::from("$");
    for segment in selector.split('.').filter(|segment| !segment.is_empty()) {
        if segment.chars().all(|ch| ch.is_ascii_digit()) {
            path.push('[');
            path.push_str(segment);
            path.push(']');
        } else if segment.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            path.push('.');
            path.push_str(segment);
        } else {
            path.push_str("['");
            path.push_str(&segment.replace('\'', "\\'"));
            path.push_str("']");
        }
    }
    path
}

/// Selects every value addressed by `selector`.
///
/// # Errors
///
/// Returns a description of the selector error when it is not valid JSONPath.
pub fn select_values(document: &Value, selector: &str) -> Result<Vec<Value>, String> {
    let path = to_jsonpath(selector);
    select(document, &path)
        .map(|values| values.into_iter().cloned().collect())
        .map_err(|_| format!("invalid selector {selector}"))
}

/// Selects the first value addressed by `selector`.
///
/// # Errors
///
/// Returns a description of the selector error when it is not valid JSONPath.
pub fn select_first(document: &Value, selector: &str) -> Result<Option<Value>, String> {
    Ok(select_values(document, selector)?.into_iter().next())
}
