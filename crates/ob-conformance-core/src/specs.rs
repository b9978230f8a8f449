// crates/ob-conformance-core/src/specs.rs
// ============================================================================
// Module: Specification Identifiers
// Description: Frozen set of Open Banking profile identifiers and versions.
// Purpose: Resolve identifiers such as `account-transaction-v3.1.8` to their
//          API family, version, and response schema location.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Every suite names the profile it exercises with a specification
//! identifier. The set is closed: identifiers outside the table are rejected
//! so conditionality and schema lookups never silently fall back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Base location of the published Read/Write API definitions.
const SCHEMA_BASE_URL: &str = "https://raw.githubusercontent.com/OpenBankingUK/read-write-api-specs";

/// Versions shared by the account, payment, and funds-confirmation profiles.
const CORE_VERSIONS: &[(u8, u8, u8)] = &[
    (3, 0, 0),
    (3, 1, 0),
    (3, 1, 1),
    (3, 1, 2),
    (3, 1, 3),
    (3, 1, 4),
    (3, 1, 5),
    (3, 1, 6),
    (3, 1, 7),
    (3, 1, 8),
    (3, 1, 9),
    (3, 1, 10),
];

/// Versions of the ASPSP event-notification profile.
const ASPSP_EVENT_VERSIONS: &[(u8, u8, u8)] = &[(3, 0, 0), (3, 1, 0), (3, 1, 1), (3, 1, 2)];

/// Versions of the TPP event-notification profile.
const TPP_EVENT_VERSIONS: &[(u8, u8, u8)] = &[(3, 0, 0), (3, 1, 0)];

/// Versions of the variable-recurring-payments profile.
const VRP_VERSIONS: &[(u8, u8, u8)] = &[(3, 1, 8), (3, 1, 9), (3, 1, 10)];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Specification lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// Identifier is not part of the frozen set.
    #[error("unknown specification identifier: {0}")]
    UnknownSpecification(String),
    /// Version string could not be parsed.
    #[error("invalid api version: {0}")]
    InvalidVersion(String),
}

// ============================================================================
// SECTION: API Version
// ============================================================================

/// Semantic version of an Open Banking API profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl ApiVersion {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `v3.1.4`, `3.1.4`, `v3.1`, or `3.0` forms.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::InvalidVersion`] for malformed input.
    pub fn parse(input: &str) -> Result<Self, SpecError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut parts = digits.split('.');
        let mut next = |required: bool| -> Result<u8, SpecError> {
            match parts.next() {
                Some(part) => {
                    part.parse::<u8>().map_err(|_| SpecError::InvalidVersion(input.to_string()))
                }
                None if required => Err(SpecError::InvalidVersion(input.to_string())),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(SpecError::InvalidVersion(input.to_string()));
        }
        Ok(Self::new(major, minor, patch))
    }

    /// Returns true when the version belongs to the v3.0 line.
    #[must_use]
    pub const fn is_v3_0(&self) -> bool {
        self.major == 3 && self.minor == 0
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "v{}.{}", self.major, self.minor)
        } else {
            write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl FromStr for ApiVersion {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ApiVersion> for String {
    fn from(value: ApiVersion) -> Self {
        value.to_string()
    }
}

// ============================================================================
// SECTION: API Families
// ============================================================================

/// Open Banking API family covered by a specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFamily {
    /// Account and transaction information.
    AccountTransaction,
    /// Payment initiation.
    PaymentInitiation,
    /// Confirmation of funds.
    ConfirmationFunds,
    /// Event notifications served by the ASPSP.
    EventNotificationAspsp,
    /// Event notifications received by the TPP.
    EventNotificationTpp,
    /// Variable recurring payments.
    VariableRecurringPayments,
}

impl ApiFamily {
    /// All families in identifier order.
    pub const ALL: [Self; 6] = [
        Self::AccountTransaction,
        Self::PaymentInitiation,
        Self::ConfirmationFunds,
        Self::EventNotificationAspsp,
        Self::EventNotificationTpp,
        Self::VariableRecurringPayments,
    ];

    /// Returns the identifier prefix for the family.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::AccountTransaction => "account-transaction",
            Self::PaymentInitiation => "payment-initiation",
            Self::ConfirmationFunds => "confirmation-funds",
            Self::EventNotificationAspsp => "event-notification-aspsp",
            Self::EventNotificationTpp => "event-notification-tpp",
            Self::VariableRecurringPayments => "variable-recurring-payments",
        }
    }

    /// Returns the OAuth scope used for client-credential grants.
    #[must_use]
    pub const fn scope(self) -> &'static str {
        match self {
            Self::AccountTransaction | Self::EventNotificationAspsp | Self::EventNotificationTpp => {
                "accounts"
            }
            Self::PaymentInitiation | Self::VariableRecurringPayments => "payments",
            Self::ConfirmationFunds => "fundsconfirmations",
        }
    }

    /// Returns the base name of the published API definition file.
    const fn schema_name(self) -> &'static str {
        match self {
            Self::AccountTransaction => "account-info",
            Self::PaymentInitiation => "payment-initiation",
            Self::ConfirmationFunds => "confirmation-funds",
            Self::EventNotificationAspsp => "aspsp-event-notifications",
            Self::EventNotificationTpp => "tpp-event-notifications",
            Self::VariableRecurringPayments => "vrp",
        }
    }

    /// Returns the versions published for the family.
    const fn versions(self) -> &'static [(u8, u8, u8)] {
        match self {
            Self::AccountTransaction | Self::PaymentInitiation | Self::ConfirmationFunds => {
                CORE_VERSIONS
            }
            Self::EventNotificationAspsp => ASPSP_EVENT_VERSIONS,
            Self::EventNotificationTpp => TPP_EVENT_VERSIONS,
            Self::VariableRecurringPayments => VRP_VERSIONS,
        }
    }
}

impl fmt::Display for ApiFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

// ============================================================================
// SECTION: Specification Table
// ============================================================================

/// Metadata for one recognised specification identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecificationInfo {
    /// Identifier such as `account-transaction-v3.1.8`.
    pub identifier: String,
    /// API family.
    pub family: ApiFamily,
    /// Profile version.
    pub version: ApiVersion,
    /// Location of the API definition used for schema validation.
    pub schema_url: String,
}

/// Returns the frozen table of recognised specifications.
#[must_use]
pub fn known_specifications() -> &'static [SpecificationInfo] {
    static TABLE: OnceLock<Vec<SpecificationInfo>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::new();
        for family in ApiFamily::ALL {
            for &(major, minor, patch) in family.versions() {
                let version = ApiVersion::new(major, minor, patch);
                table.push(SpecificationInfo {
                    identifier: format!("{}-{version}", family.prefix()),
                    family,
                    version,
                    schema_url: schema_url(family, version),
                });
            }
        }
        table
    })
}

/// Looks up a specification identifier.
///
/// # Errors
///
/// Returns [`SpecError::UnknownSpecification`] when the identifier is not
/// part of the frozen set.
pub fn lookup_specification(identifier: &str) -> Result<&'static SpecificationInfo, SpecError> {
    known_specifications()
        .iter()
        .find(|info| info.identifier == identifier)
        .ok_or_else(|| SpecError::UnknownSpecification(identifier.to_string()))
}

/// Builds the schema location for a family and version.
fn schema_url(family: ApiFamily, version: ApiVersion) -> String {
    let name = family.schema_name();
    let tag = format!("v{}.{}.{}", version.major, version.minor, version.patch);
    if version < ApiVersion::new(3, 1, 3) {
        format!("{SCHEMA_BASE_URL}/{tag}/dist/swagger/{name}-swagger.json")
    } else {
        format!("{SCHEMA_BASE_URL}/{tag}/dist/openapi/{name}-openapi.json")
    }
}
