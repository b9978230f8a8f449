// crates/ob-conformance-model/src/error.rs
// ============================================================================
// Module: Model Errors
// Description: Preparation, validation, schema, and suite loading errors.
// Dependencies: thiserror
// ============================================================================

//! Error types for the test-case model. Preparation errors are fatal for one
//! case; validation failures are collected and reported together.

use ob_conformance_core::ContextError;
use ob_conformance_core::PermissionError;
use ob_conformance_crypto::CryptoError;
use thiserror::Error;

/// Request preparation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrepareError {
    /// Template substitution failed.
    #[error("substitution failed: {0}")]
    Context(#[from] ContextError),
    /// `jws` was requested on a method other than POST.
    #[error("jws signature requested on {0} request; only POST may be signed")]
    JwsOnNonPost(String),
    /// `jws` was requested without signing material.
    #[error("jws signature requested but no signer is configured")]
    MissingSigner,
    /// Signing or encoding failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Consent URL claim is missing.
    #[error("consent url claim missing: {0}")]
    MissingClaim(String),
}

/// One reason a response failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    /// Status code differs from the expectation.
    #[error("test {test_id}: expected status {expected}, got {actual}")]
    StatusMismatch {
        /// Test case identifier.
        test_id: String,
        /// Expected status.
        expected: u16,
        /// Received status.
        actual: u16,
    },
    /// A match predicate failed.
    #[error("test {test_id}: match {selector} failed: {detail}")]
    MatchFailed {
        /// Test case identifier.
        test_id: String,
        /// Header name, JSON path, or other selector.
        selector: String,
        /// Failure detail.
        detail: String,
    },
    /// Response body violates the schema.
    #[error("test {test_id}: schema: {detail}")]
    Schema {
        /// Test case identifier.
        test_id: String,
        /// Violation detail.
        detail: String,
    },
    /// Response signature failed validation.
    #[error("test {test_id}: {detail}")]
    Signature {
        /// Test case identifier.
        test_id: String,
        /// Signature failure detail.
        detail: String,
    },
    /// No `expect_one_of` alternative passed.
    #[error("test {test_id}: none of {alternatives} alternative expectations passed")]
    NoAlternative {
        /// Test case identifier.
        test_id: String,
        /// Number of alternatives tried.
        alternatives: usize,
    },
}

/// Schema document errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Document could not be read.
    #[error("schema io error: {0}")]
    Io(String),
    /// Document could not be parsed.
    #[error("schema parse error: {0}")]
    Parse(String),
    /// No operation matches the request.
    #[error("no schema operation for {method} {endpoint}")]
    OperationNotFound {
        /// HTTP method.
        method: String,
        /// Request path.
        endpoint: String,
    },
    /// Response schema could not be compiled.
    #[error("schema compile error: {0}")]
    Compile(String),
}

/// Suite loading errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuiteError {
    /// Suite file could not be read.
    #[error("suite io error: {0}")]
    Io(String),
    /// Suite file could not be parsed.
    #[error("suite parse error: {0}")]
    Parse(String),
    /// Suite content is invalid.
    #[error("invalid suite: {0}")]
    Invalid(String),
    /// Permission annotations are invalid.
    #[error(transparent)]
    Permission(#[from] PermissionError),
}
