// crates/ob-conformance-core/src/conditionality.rs
// ============================================================================
// Module: Conditionality Table
// Description: Mandatory, conditional, and optional endpoints per profile.
// Purpose: Classify declared endpoints and report unsatisfied mandatory ones.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! The table maps each specification identifier to `(method, endpoint, class)`
//! rows. Rows carry the version that introduced them, so one family table
//! serves every version of the profile. Endpoint comparison is literal:
//! `/accounts/{AccountId}` only matches `/accounts/{AccountId}`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::specs::ApiFamily;
use crate::specs::ApiVersion;
use crate::specs::SpecError;
use crate::specs::lookup_specification;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Classification of an endpoint within a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conditionality {
    /// The ASPSP must implement the endpoint.
    Mandatory,
    /// The ASPSP must implement the endpoint if it offers the feature.
    Conditional,
    /// The endpoint is optional.
    Optional,
    /// The endpoint is not part of the profile.
    Unknown,
}

impl fmt::Display for Conditionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Mandatory => "mandatory",
            Self::Conditional => "conditional",
            Self::Optional => "optional",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// One classified endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConditionalityEntry {
    /// HTTP method in upper case.
    pub method: &'static str,
    /// Endpoint path template.
    pub endpoint: &'static str,
    /// Classification.
    pub condition: Conditionality,
}

impl fmt::Display for ConditionalityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.method, self.endpoint, self.condition)
    }
}

/// Method and endpoint declared by a suite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclaredEndpoint {
    /// HTTP method.
    pub method: String,
    /// Endpoint path template.
    pub endpoint: String,
}

impl DeclaredEndpoint {
    /// Creates a declared endpoint.
    #[must_use]
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Returns true when the declaration names the table entry.
    fn matches(&self, entry: &ConditionalityEntry) -> bool {
        self.method.eq_ignore_ascii_case(entry.method) && self.endpoint == entry.endpoint
    }
}

/// Conditionality lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionalityError {
    /// Specification identifier is not recognised.
    #[error("conditionality unavailable: {0}")]
    Specification(#[from] SpecError),
}

// ============================================================================
// SECTION: Tables
// ============================================================================

/// Table row: entry plus the version that introduced it.
struct Row {
    /// Classified endpoint.
    entry: ConditionalityEntry,
    /// First version carrying the endpoint.
    since: ApiVersion,
}

/// Builds a row available since v3.0.
const fn row(method: &'static str, endpoint: &'static str, condition: Conditionality) -> Row {
    since(method, endpoint, condition, 3, 0, 0)
}

/// Builds a row introduced by a later version.
const fn since(
    method: &'static str,
    endpoint: &'static str,
    condition: Conditionality,
    major: u8,
    minor: u8,
    patch: u8,
) -> Row {
    Row {
        entry: ConditionalityEntry {
            method,
            endpoint,
            condition,
        },
        since: ApiVersion::new(major, minor, patch),
    }
}

use Conditionality::Conditional as C;
use Conditionality::Mandatory as M;
use Conditionality::Optional as O;

/// Account and transaction profile.
const ACCOUNT_ROWS: &[Row] = &[
    row("POST", "/account-access-consents", M),
    row("GET", "/account-access-consents/{ConsentId}", M),
    row("DELETE", "/account-access-consents/{ConsentId}", M),
    row("GET", "/accounts", M),
    row("GET", "/accounts/{AccountId}", M),
    row("GET", "/accounts/{AccountId}/balances", M),
    row("GET", "/balances", O),
    row("GET", "/accounts/{AccountId}/beneficiaries", C),
    row("GET", "/beneficiaries", O),
    row("GET", "/accounts/{AccountId}/direct-debits", C),
    row("GET", "/direct-debits", O),
    row("GET", "/accounts/{AccountId}/offers", O),
    row("GET", "/offers", O),
    row("GET", "/accounts/{AccountId}/party", C),
    since("GET", "/accounts/{AccountId}/parties", C, 3, 1, 2),
    row("GET", "/party", C),
    row("GET", "/accounts/{AccountId}/product", C),
    row("GET", "/products", O),
    row("GET", "/accounts/{AccountId}/scheduled-payments", C),
    row("GET", "/scheduled-payments", O),
    row("GET", "/accounts/{AccountId}/standing-orders", C),
    row("GET", "/standing-orders", O),
    row("GET", "/accounts/{AccountId}/statements", C),
    row("GET", "/statements", O),
    row("GET", "/accounts/{AccountId}/statements/{StatementId}", C),
    row("GET", "/accounts/{AccountId}/statements/{StatementId}/file", O),
    row("GET", "/accounts/{AccountId}/statements/{StatementId}/transactions", C),
    row("GET", "/accounts/{AccountId}/transactions", M),
    row("GET", "/transactions", O),
];

/// Payment initiation profile.
const PAYMENT_ROWS: &[Row] = &[
    row("POST", "/domestic-payment-consents", M),
    row("GET", "/domestic-payment-consents/{ConsentId}", M),
    row("GET", "/domestic-payment-consents/{ConsentId}/funds-confirmation", C),
    row("POST", "/domestic-payments", M),
    row("GET", "/domestic-payments/{DomesticPaymentId}", M),
    since("GET", "/domestic-payments/{DomesticPaymentId}/payment-details", O, 3, 1, 3),
    row("POST", "/domestic-scheduled-payment-consents", C),
    row("GET", "/domestic-scheduled-payment-consents/{ConsentId}", C),
    row("POST", "/domestic-scheduled-payments", C),
    row("GET", "/domestic-scheduled-payments/{DomesticScheduledPaymentId}", C),
    row("POST", "/domestic-standing-order-consents", C),
    row("GET", "/domestic-standing-order-consents/{ConsentId}", C),
    row("POST", "/domestic-standing-orders", C),
    row("GET", "/domestic-standing-orders/{DomesticStandingOrderId}", C),
    row("POST", "/international-payment-consents", C),
    row("GET", "/international-payment-consents/{ConsentId}", C),
    row("GET", "/international-payment-consents/{ConsentId}/funds-confirmation", C),
    row("POST", "/international-payments", C),
    row("GET", "/international-payments/{InternationalPaymentId}", C),
    row("POST", "/international-scheduled-payment-consents", C),
    row("GET", "/international-scheduled-payment-consents/{ConsentId}", C),
    row("POST", "/international-scheduled-payments", C),
    row("GET", "/international-scheduled-payments/{InternationalScheduledPaymentId}", C),
    row("POST", "/international-standing-order-consents", C),
    row("GET", "/international-standing-order-consents/{ConsentId}", C),
    row("POST", "/international-standing-orders", C),
    row("GET", "/international-standing-orders/{InternationalStandingOrderPaymentId}", C),
    row("POST", "/file-payment-consents", C),
    row("GET", "/file-payment-consents/{ConsentId}", C),
    row("POST", "/file-payment-consents/{ConsentId}/file", C),
    row("GET", "/file-payment-consents/{ConsentId}/file", C),
    row("POST", "/file-payments", C),
    row("GET", "/file-payments/{FilePaymentId}", C),
    row("GET", "/file-payments/{FilePaymentId}/report-file", O),
];

/// Confirmation of funds profile.
const FUNDS_ROWS: &[Row] = &[
    row("POST", "/funds-confirmation-consents", M),
    row("GET", "/funds-confirmation-consents/{ConsentId}", M),
    row("DELETE", "/funds-confirmation-consents/{ConsentId}", M),
    row("POST", "/funds-confirmations", M),
];

/// Returns the rows for a family; families without a table yield none.
const fn family_rows(family: ApiFamily) -> &'static [Row] {
    match family {
        ApiFamily::AccountTransaction => ACCOUNT_ROWS,
        ApiFamily::PaymentInitiation => PAYMENT_ROWS,
        ApiFamily::ConfirmationFunds => FUNDS_ROWS,
        ApiFamily::EventNotificationAspsp
        | ApiFamily::EventNotificationTpp
        | ApiFamily::VariableRecurringPayments => &[],
    }
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Returns the table entries for a specification identifier in table order.
///
/// # Errors
///
/// Returns [`ConditionalityError::Specification`] for unknown identifiers.
pub fn entries(spec: &str) -> Result<Vec<ConditionalityEntry>, ConditionalityError> {
    let info = lookup_specification(spec)?;
    Ok(family_rows(info.family)
        .iter()
        .filter(|row| row.since <= info.version)
        .map(|row| row.entry)
        .collect())
}

/// Classifies a method and endpoint within a specification.
///
/// # Errors
///
/// Returns [`ConditionalityError::Specification`] for unknown identifiers.
pub fn classify(
    method: &str,
    endpoint: &str,
    spec: &str,
) -> Result<Conditionality, ConditionalityError> {
    let declared = DeclaredEndpoint::new(method, endpoint);
    Ok(entries(spec)?
        .iter()
        .find(|entry| declared.matches(entry))
        .map_or(Conditionality::Unknown, |entry| entry.condition))
}

/// Returns the mandatory entries not covered by `declared`, in table order.
///
/// # Errors
///
/// Returns [`ConditionalityError::Specification`] for unknown identifiers.
pub fn missing_mandatory(
    declared: &[DeclaredEndpoint],
    spec: &str,
) -> Result<Vec<ConditionalityEntry>, ConditionalityError> {
    Ok(entries(spec)?
        .into_iter()
        .filter(|entry| entry.condition == Conditionality::Mandatory)
        .filter(|entry| !declared.iter().any(|item| item.matches(entry)))
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::Conditionality;
    use super::DeclaredEndpoint;
    use super::classify;
    use super::entries;
    use super::missing_mandatory;

    #[test]
    fn missing_mandatory_for_accounts_profile() {
        let declared = vec![
            DeclaredEndpoint::new("GET", "/accounts"),
            DeclaredEndpoint::new("GET", "/accounts/{AccountId}"),
        ];
        let missing = missing_mandatory(&declared, "account-transaction-v3.1").unwrap();
        let rendered: Vec<String> =
            missing.iter().map(|entry| format!("{} {}", entry.method, entry.endpoint)).collect();
        assert_eq!(
            rendered,
            vec![
                "POST /account-access-consents",
                "GET /account-access-consents/{ConsentId}",
                "DELETE /account-access-consents/{ConsentId}",
                "GET /accounts/{AccountId}/balances",
                "GET /accounts/{AccountId}/transactions",
            ]
        );
    }

    #[test]
    fn missing_mandatory_ignores_declaration_order() {
        let forward = vec![
            DeclaredEndpoint::new("GET", "/accounts"),
            DeclaredEndpoint::new("POST", "/account-access-consents"),
        ];
        let reversed: Vec<DeclaredEndpoint> = forward.iter().rev().cloned().collect();
        assert_eq!(
            missing_mandatory(&forward, "account-transaction-v3.1.8").unwrap(),
            missing_mandatory(&reversed, "account-transaction-v3.1.8").unwrap()
        );
    }

    #[test]
    fn classify_compares_templates_literally() {
        let spec = "account-transaction-v3.1.8";
        assert_eq!(classify("GET", "/accounts", spec).unwrap(), Conditionality::Mandatory);
        assert_eq!(
            classify("get", "/accounts/{AccountId}/beneficiaries", spec).unwrap(),
            Conditionality::Conditional
        );
        assert_eq!(classify("GET", "/accounts/123", spec).unwrap(), Conditionality::Unknown);
        assert!(classify("GET", "/accounts", "account-transaction-v9").is_err());
    }

    #[test]
    fn later_endpoints_are_version_gated() {
        let parties = |spec: &str| {
            entries(spec).unwrap().iter().any(|entry| entry.endpoint.ends_with("/parties"))
        };
        assert!(!parties("account-transaction-v3.1.1"));
        assert!(parties("account-transaction-v3.1.2"));
    }

    #[test]
    fn funds_profile_is_fully_mandatory() {
        let missing = missing_mandatory(&[], "confirmation-funds-v3.1.3").unwrap();
        assert_eq!(missing.len(), 4);
        assert!(missing_mandatory(&[], "event-notification-tpp-v3.1").unwrap().is_empty());
    }
}
