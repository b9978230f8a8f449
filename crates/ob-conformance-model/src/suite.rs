// crates/ob-conformance-model/src/suite.rs
// ============================================================================
// Module: Suites
// Description: Suite files grouping test cases under one specification.
// Purpose: Load and validate suites, and derive their declared endpoints and
//          permission groups.
// Dependencies: serde, serde_json, serde_yaml
// ============================================================================

//! ## Overview
//! A suite file (JSON or YAML) names a specification identifier and lists
//! test cases. Endpoints are written relative to the resource server
//! (`/accounts/$AccountId`); the runner prefixes the base URL. For
//! conditionality, `$Name` segments read as `{Name}` templates.
//!
//! Payment and funds-confirmation suites carry the consent endpoint and body
//! template used to obtain their tokens.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use ob_conformance_core::ApiFamily;
use ob_conformance_core::DeclaredEndpoint;
use ob_conformance_core::PermissionGroup;
use ob_conformance_core::TokenFamily;
use ob_conformance_core::lookup_specification;
use serde::Deserialize;

use crate::error::SuiteError;
use crate::test_case::TestCase;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum suite file size in bytes.
pub const MAX_SUITE_BYTES: u64 = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Suite
// ============================================================================

/// Consent template used to obtain payment and funds-confirmation tokens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConsentTemplate {
    /// Consent endpoint relative to the resource server.
    pub endpoint: String,
    /// Consent body template.
    pub body: String,
}

/// Group of test cases against one specification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Suite {
    /// Suite identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Specification identifier, e.g. `account-transaction-v3.1`.
    pub specification: String,
    /// Consent template for payment and funds-confirmation tokens.
    #[serde(default)]
    pub consent: Option<ConsentTemplate>,
    /// Test cases in execution order.
    pub test_cases: Vec<TestCase>,
}

impl Suite {
    /// Loads a suite file; `.yaml` and `.yml` files are YAML, others JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError`] when the file is unreadable, too large,
    /// malformed, or invalid.
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let metadata =
            fs::metadata(path).map_err(|err| SuiteError::Io(format!("{}: {err}", path.display())))?;
        if metadata.len() > MAX_SUITE_BYTES {
            return Err(SuiteError::Invalid(format!(
                "{} exceeds {MAX_SUITE_BYTES} bytes",
                path.display()
            )));
        }
        let text = fs::read_to_string(path)
            .map_err(|err| SuiteError::Io(format!("{}: {err}", path.display())))?;
        let yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if yaml { Self::from_yaml(&text) } else { Self::from_json(&text) }
    }

    /// Parses and validates a JSON suite.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::Parse`] or [`SuiteError::Invalid`].
    pub fn from_json(text: &str) -> Result<Self, SuiteError> {
        let suite: Self = serde_json::from_str(text).map_err(|err| SuiteError::Parse(err.to_string()))?;
        suite.validate()?;
        Ok(suite)
    }

    /// Parses and validates a YAML suite.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::Parse`] or [`SuiteError::Invalid`].
    pub fn from_yaml(text: &str) -> Result<Self, SuiteError> {
        let suite: Self = serde_yaml::from_str(text).map_err(|err| SuiteError::Parse(err.to_string()))?;
        suite.validate()?;
        Ok(suite)
    }

    /// Checks structural rules that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError`] naming the first violation.
    pub fn validate(&self) -> Result<(), SuiteError> {
        if self.id.trim().is_empty() {
            return Err(SuiteError::Invalid("suite id is empty".to_string()));
        }
        lookup_specification(&self.specification)
            .map_err(|err| SuiteError::Invalid(err.to_string()))?;
        let mut seen = BTreeSet::new();
        for case in &self.test_cases {
            if case.id.trim().is_empty() {
                return Err(SuiteError::Invalid(format!("suite {}: test case without id", self.id)));
            }
            if !seen.insert(case.id.as_str()) {
                return Err(SuiteError::Invalid(format!("duplicate test case id {}", case.id)));
            }
            if case.input.endpoint.trim().is_empty() {
                return Err(SuiteError::Invalid(format!("test {}: endpoint is empty", case.id)));
            }
            if case.input.jws && !case.input.method.eq_ignore_ascii_case("POST") {
                return Err(SuiteError::Invalid(format!(
                    "test {}: jws signature requested on {} request",
                    case.id, case.input.method
                )));
            }
            if !case.input.jws_operations.is_empty() && !case.input.jws {
                return Err(SuiteError::Invalid(format!(
                    "test {}: jws operations require jws",
                    case.id
                )));
            }
        }
        if self.token_family() != TokenFamily::Account && self.consent.is_none() {
            return Err(SuiteError::Invalid(format!(
                "suite {}: {} suites must declare a consent template",
                self.id,
                self.token_family()
            )));
        }
        Ok(())
    }

    /// Returns the API family of the suite's specification.
    #[must_use]
    pub fn family(&self) -> Option<ApiFamily> {
        lookup_specification(&self.specification).ok().map(|info| info.family)
    }

    /// Returns the token family that serves this suite.
    #[must_use]
    pub fn token_family(&self) -> TokenFamily {
        match self.family() {
            Some(ApiFamily::PaymentInitiation | ApiFamily::VariableRecurringPayments) => {
                TokenFamily::Payment
            }
            Some(ApiFamily::ConfirmationFunds) => TokenFamily::Cbpii,
            _ => TokenFamily::Account,
        }
    }

    /// Returns the endpoints the suite exercises, as path templates.
    #[must_use]
    pub fn declared_endpoints(&self) -> Vec<DeclaredEndpoint> {
        self.test_cases
            .iter()
            .map(|case| {
                DeclaredEndpoint::new(
                    case.input.method.to_ascii_uppercase(),
                    endpoint_template(&case.input.endpoint),
                )
            })
            .collect()
    }

    /// Returns one permission group per test case, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::Permission`] for unknown or contradictory codes.
    pub fn permission_groups(&self) -> Result<Vec<PermissionGroup>, SuiteError> {
        self.test_cases
            .iter()
            .map(|case| {
                PermissionGroup::for_endpoint(
                    case.id.clone(),
                    &endpoint_template(&case.input.endpoint),
                    &case.permissions,
                    &case.permissions_excluded,
                )
                .map_err(SuiteError::from)
            })
            .collect()
    }
}

/// Rewrites an endpoint template into a path template.
///
/// The query string and any leading `$variable` base URL are dropped and
/// `$Name` segments become `{Name}`.
#[must_use]
pub fn endpoint_template(endpoint: &str) -> String {
    let path = endpoint.split('?').next().unwrap_or_default();
    let mut segments: Vec<String> = Vec::new();
    for (index, segment) in path.split('/').enumerate() {
        if segment.is_empty() || (index == 0 && segment.starts_with('$')) {
            continue;
        }
        match segment.strip_prefix('$') {
            Some(name) => segments.push(format!("{{{name}}}")),
            None => segments.push(segment.to_string()),
        }
    }
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::endpoint_template;

    #[test]
    fn endpoint_templates_normalise_variables() {
        assert_eq!(endpoint_template("/accounts/$AccountId/balances"), "/accounts/{AccountId}/balances");
        assert_eq!(endpoint_template("$resource_server/accounts?page=2"), "/accounts");
        assert_eq!(endpoint_template("/account-access-consents/$ConsentId"), "/account-access-consents/{ConsentId}");
    }
}
