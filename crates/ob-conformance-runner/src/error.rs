// crates/ob-conformance-runner/src/error.rs
// ============================================================================
// Module: Runner Errors
// Description: Dispatch, consent, probe, and run errors.
// Dependencies: thiserror
// ============================================================================

//! Error types for the runner. Only [`RunError`] aborts a run; the others
//! are recorded against the test case or token that produced them.

use ob_conformance_config::ConfigError;
use ob_conformance_core::ContextError;
use ob_conformance_crypto::CryptoError;
use ob_conformance_model::SchemaError;
use thiserror::Error;

/// HTTP dispatch errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(String),
    /// Endpoint is not a valid URL.
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body is larger than the dispatcher accepts.
    #[error("response from {url} exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Request URL.
        url: String,
        /// Configured limit in bytes.
        limit: usize,
    },
}

/// Token acquisition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsentError {
    /// Token endpoint rejected a request.
    #[error("token endpoint: {0}")]
    TokenEndpoint(String),
    /// Consent creation failed.
    #[error("consent creation: {0}")]
    ConsentCreation(String),
    /// PSU authorization did not yield a code.
    #[error("authorization: {0}")]
    Authorization(String),
    /// Consent job is incomplete.
    #[error("invalid consent job: {0}")]
    InvalidJob(String),
    /// HTTP dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Signing failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Context lookup or substitution failed.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Resource probe errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Probe request failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Probe response had an unexpected status.
    #[error("probe {endpoint} returned status {status}")]
    Status {
        /// Probed endpoint.
        endpoint: String,
        /// Received status.
        status: u16,
    },
    /// Account listing was empty.
    #[error("probe {0} returned no accounts")]
    NoAccounts(String),
    /// Context lookup failed.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Errors that abort a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A required collaborator is missing.
    #[error("run pre-check failed: {0}")]
    PreCheck(String),
    /// HTTP client construction failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// API definition could not be loaded.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Suite planning failed.
    #[error("run planning failed: {0}")]
    Planning(String),
}
