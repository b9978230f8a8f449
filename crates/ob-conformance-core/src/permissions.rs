// crates/ob-conformance-core/src/permissions.rs
// ============================================================================
// Module: Permission Solver
// Description: Groups per-test permission requirements into token scopes.
// Purpose: Compute a small set of mutually compatible permission sets that
//          covers every test case, and name the resulting tokens.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Each test case contributes a [`PermissionGroup`]: the codes it needs and
//! the codes that must be absent from its token. [`solve_permissions`] walks
//! the groups in input order and greedily attaches, merges, or opens sets.
//! The result is deterministic for a fixed input order, not provably
//! optimal.
//!
//! Invariants:
//! - Every group lands in exactly one set.
//! - A set's codes cover the included codes of every member.
//! - A set's codes avoid the excluded codes of every member.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Vocabulary
// ============================================================================

/// Account-information permission codes recognised by the solver.
pub const KNOWN_PERMISSIONS: &[&str] = &[
    "ReadAccountsBasic",
    "ReadAccountsDetail",
    "ReadBalances",
    "ReadBeneficiariesBasic",
    "ReadBeneficiariesDetail",
    "ReadDirectDebits",
    "ReadOffers",
    "ReadPAN",
    "ReadParty",
    "ReadPartyPSU",
    "ReadProducts",
    "ReadScheduledPaymentsBasic",
    "ReadScheduledPaymentsDetail",
    "ReadStandingOrdersBasic",
    "ReadStandingOrdersDetail",
    "ReadStatementsBasic",
    "ReadStatementsDetail",
    "ReadTransactionsBasic",
    "ReadTransactionsCredits",
    "ReadTransactionsDebits",
    "ReadTransactionsDetail",
];

/// Default permissions for account endpoints, used when a case declares none.
const ENDPOINT_DEFAULTS: &[(&str, &[&str])] = &[
    ("/accounts", &["ReadAccountsBasic"]),
    ("/accounts/{AccountId}", &["ReadAccountsBasic"]),
    ("/accounts/{AccountId}/balances", &["ReadBalances"]),
    ("/balances", &["ReadBalances"]),
    ("/accounts/{AccountId}/beneficiaries", &["ReadBeneficiariesBasic"]),
    ("/beneficiaries", &["ReadBeneficiariesBasic"]),
    ("/accounts/{AccountId}/direct-debits", &["ReadDirectDebits"]),
    ("/direct-debits", &["ReadDirectDebits"]),
    ("/accounts/{AccountId}/offers", &["ReadOffers"]),
    ("/offers", &["ReadOffers"]),
    ("/accounts/{AccountId}/party", &["ReadParty"]),
    ("/accounts/{AccountId}/parties", &["ReadParty"]),
    ("/party", &["ReadPartyPSU"]),
    ("/accounts/{AccountId}/product", &["ReadProducts"]),
    ("/products", &["ReadProducts"]),
    ("/accounts/{AccountId}/scheduled-payments", &["ReadScheduledPaymentsBasic"]),
    ("/scheduled-payments", &["ReadScheduledPaymentsBasic"]),
    ("/accounts/{AccountId}/standing-orders", &["ReadStandingOrdersBasic"]),
    ("/standing-orders", &["ReadStandingOrdersBasic"]),
    ("/accounts/{AccountId}/statements", &["ReadStatementsBasic"]),
    ("/statements", &["ReadStatementsBasic"]),
    ("/accounts/{AccountId}/statements/{StatementId}", &["ReadStatementsBasic"]),
    ("/accounts/{AccountId}/statements/{StatementId}/file", &["ReadStatementsDetail"]),
    (
        "/accounts/{AccountId}/statements/{StatementId}/transactions",
        &["ReadTransactionsBasic", "ReadTransactionsCredits", "ReadTransactionsDebits"],
    ),
    (
        "/accounts/{AccountId}/transactions",
        &["ReadTransactionsBasic", "ReadTransactionsCredits", "ReadTransactionsDebits"],
    ),
    (
        "/transactions",
        &["ReadTransactionsBasic", "ReadTransactionsCredits", "ReadTransactionsDebits"],
    ),
];

/// Returns the default permissions for an endpoint, if the endpoint has any.
#[must_use]
pub fn default_permissions(endpoint: &str) -> Option<&'static [&'static str]> {
    ENDPOINT_DEFAULTS.iter().find(|(path, _)| *path == endpoint).map(|(_, codes)| *codes)
}

/// Returns true when `code` is a recognised permission code.
#[must_use]
pub fn is_known_permission(code: &str) -> bool {
    KNOWN_PERMISSIONS.contains(&code)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Permission declaration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// Code is not part of the permission vocabulary.
    #[error("test {test_id}: unknown permission code {code}")]
    UnknownCode {
        /// Declaring test case.
        test_id: String,
        /// Offending code.
        code: String,
    },
    /// Code is both required and excluded.
    #[error("test {test_id}: permission {code} is both included and excluded")]
    Contradiction {
        /// Declaring test case.
        test_id: String,
        /// Offending code.
        code: String,
    },
}

// ============================================================================
// SECTION: Groups and Sets
// ============================================================================

/// Permission requirement of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    /// Test case identifier.
    pub test_id: String,
    /// Codes the token must carry.
    pub included: BTreeSet<String>,
    /// Codes the token must not carry.
    pub excluded: BTreeSet<String>,
}

impl PermissionGroup {
    /// Creates a validated permission group.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError`] when a code is unknown or appears in both
    /// the included and excluded sets.
    pub fn new<I, E, S>(
        test_id: impl Into<String>,
        included: I,
        excluded: E,
    ) -> Result<Self, PermissionError>
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let test_id = test_id.into();
        let included: BTreeSet<String> = included.into_iter().map(Into::into).collect();
        let excluded: BTreeSet<String> = excluded.into_iter().map(Into::into).collect();
        for code in included.iter().chain(excluded.iter()) {
            if !is_known_permission(code) {
                return Err(PermissionError::UnknownCode {
                    test_id,
                    code: code.clone(),
                });
            }
        }
        if let Some(code) = included.intersection(&excluded).next() {
            return Err(PermissionError::Contradiction {
                code: code.clone(),
                test_id,
            });
        }
        Ok(Self {
            test_id,
            included,
            excluded,
        })
    }

    /// Creates a group for a case, falling back to the endpoint defaults
    /// when the case declares no included permissions.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError`] under the same rules as [`Self::new`].
    pub fn for_endpoint(
        test_id: impl Into<String>,
        endpoint: &str,
        included: &[String],
        excluded: &[String],
    ) -> Result<Self, PermissionError> {
        if included.is_empty() {
            let defaults = default_permissions(endpoint).unwrap_or_default();
            return Self::new(
                test_id,
                defaults.iter().map(|code| (*code).to_string()),
                excluded.iter().cloned(),
            );
        }
        Self::new(test_id, included.iter().cloned(), excluded.iter().cloned())
    }

    /// Returns true when two groups may share a token.
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        self.excluded.is_disjoint(&other.included) && other.excluded.is_disjoint(&self.included)
    }
}

/// Output of the solver: a token scope and the cases it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    /// Codes granted by the token.
    pub codes: BTreeSet<String>,
    /// Test cases served, in attachment order.
    pub test_ids: Vec<String>,
}

/// Working set that remembers its member groups.
struct WorkingSet<'a> {
    /// Union of the members' included codes.
    codes: BTreeSet<String>,
    /// Member groups.
    members: Vec<&'a PermissionGroup>,
}

impl WorkingSet<'_> {
    /// Returns true when the set already satisfies `group`.
    fn satisfies(&self, group: &PermissionGroup) -> bool {
        group.included.is_subset(&self.codes) && self.codes.is_disjoint(&group.excluded)
    }

    /// Returns true when `group` is compatible with every member.
    fn accepts(&self, group: &PermissionGroup) -> bool {
        self.codes.is_disjoint(&group.excluded)
            && self.members.iter().all(|member| member.compatible_with(group))
    }
}

// ============================================================================
// SECTION: Solver
// ============================================================================

/// Groups permission requirements into the fewest sets the greedy pass finds.
///
/// Groups are processed in input order. A group attaches to the first set
/// that already satisfies it, else merges into the first set compatible with
/// every member, else opens a new set.
#[must_use]
pub fn solve_permissions(groups: &[PermissionGroup]) -> Vec<PermissionSet> {
    let mut sets: Vec<WorkingSet<'_>> = Vec::new();
    for group in groups {
        if let Some(set) = sets.iter_mut().find(|set| set.satisfies(group)) {
            set.members.push(group);
            continue;
        }
        if let Some(set) = sets.iter_mut().find(|set| set.accepts(group)) {
            set.codes.extend(group.included.iter().cloned());
            set.members.push(group);
            continue;
        }
        sets.push(WorkingSet {
            codes: group.included.clone(),
            members: vec![group],
        });
    }
    sets.into_iter()
        .map(|set| PermissionSet {
            codes: set.codes,
            test_ids: set.members.iter().map(|member| member.test_id.clone()).collect(),
        })
        .collect()
}

// ============================================================================
// SECTION: Token Naming
// ============================================================================

/// Family of a named token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFamily {
    /// Account-information token.
    Account,
    /// Payment token.
    Payment,
    /// Confirmation-of-funds token.
    Cbpii,
}

impl TokenFamily {
    /// Returns the token-name prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Payment => "payment",
            Self::Cbpii => "cbpii",
        }
    }

    /// Returns the family of a token name such as `account_token_001`.
    #[must_use]
    pub fn of_token(name: &str) -> Option<Self> {
        [Self::Account, Self::Payment, Self::Cbpii]
            .into_iter()
            .find(|family| name.starts_with(family.prefix()))
    }

    /// Returns the name of the `index`-th token (zero based).
    #[must_use]
    pub fn token_name(self, index: usize) -> String {
        format!("{}_token_{:03}", self.prefix(), index + 1)
    }
}

impl fmt::Display for TokenFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
