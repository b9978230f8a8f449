// crates/ob-conformance-model/src/lib.rs
// ============================================================================
// Module: Open Banking Conformance Model
// Description: Test cases, matches, schema validation, and suites.
// Purpose: Describe what a conformance run sends and how responses are judged.
// Dependencies: ob-conformance-core, ob-conformance-crypto, jsonpath_lib,
//               jsonschema, regex, serde_yaml
// ============================================================================

//! ## Overview
//! Suites are loaded from JSON or YAML into immutable [`TestCase`] values.
//! A case prepares a [`PreparedRequest`] from a [`ob_conformance_core::Context`]
//! and later validates the [`HttpResponse`] it received. This crate performs
//! no network I/O; dispatch lives in the runner.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod error;
pub mod http;
pub mod jsonpath;
pub mod matches;
pub mod schema;
pub mod suite;
pub mod test_case;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::PrepareError;
pub use error::SchemaError;
pub use error::SuiteError;
pub use error::ValidationFailure;
pub use http::HttpResponse;
pub use http::PreparedRequest;
pub use matches::Match;
pub use matches::Predicate;
pub use schema::SchemaRegistry;
pub use schema::SchemaValidator;
pub use suite::ConsentTemplate;
pub use suite::Suite;
pub use test_case::ConsentUrlStrategy;
pub use test_case::Expect;
pub use test_case::Input;
pub use test_case::TestCase;
