// crates/ob-conformance-config/src/lib.rs
// ============================================================================
// Module: Open Banking Conformance Config
// Description: Configuration document and key material for conformance runs.
// Purpose: Load, validate, and apply run configuration.
// Dependencies: ob-conformance-core, ob-conformance-crypto, serde, url
// ============================================================================

//! ## Overview
//! Configuration is the only error class that aborts a run. Everything a
//! run needs from the operator (endpoints, client registration, keys, trust
//! policy) is validated here before the first request is sent.

pub mod config;

pub use config::CONFIG_FILE_NAME;
pub use config::ConfigError;
pub use config::ConformanceConfig;
pub use config::Credentials;
pub use config::LoadedConfig;
pub use config::PemSource;
pub use config::TokenEndpointAuthMethod;
