// crates/ob-conformance-config/src/config.rs
// ============================================================================
// Module: Conformance Configuration
// Description: Configuration loading and validation for conformance runs.
// Purpose: Provide strict, fail-closed config parsing with hard limits, load
//          signing and transport certificates, and seed the run context.
// Dependencies: ob-conformance-core, ob-conformance-crypto, serde, url
// ============================================================================

//! ## Overview
//! A configuration directory holds `config.json` plus four PEM files:
//! `certSigning.pem`, `privateKeySigning.key`, `certTransport.pem` and
//! `privateKeyTransport.key`. Each PEM file that is absent is read from the
//! environment instead (`SIGNING_PUBLIC_CERT`, `SIGNING_PRIVATE_KEY`,
//! `TRANSPORT_PUBLIC_CERT`, `TRANSPORT_PRIVATE_KEY`).
//!
//! Unknown fields are rejected. Every URL is parsed before the
//! configuration is accepted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ob_conformance_core::ApiVersion;
use ob_conformance_core::Context;
use ob_conformance_core::keys;
use ob_conformance_crypto::Certificate;
use ob_conformance_crypto::SignerContext;
use ob_conformance_crypto::TrustPolicy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the configuration document inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.json";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum PEM file size in bytes.
pub(crate) const MAX_PEM_FILE_SIZE: usize = 256 * 1024;
/// Default consent acquisition deadline in seconds.
pub const DEFAULT_CONSENT_TIMEOUT_SECS: u64 = 30;
/// Upper bound of the consent acquisition deadline in seconds.
pub(crate) const MAX_CONSENT_TIMEOUT_SECS: u64 = 3600;
/// Default payment API version.
const DEFAULT_PAYMENT_API_VERSION: ApiVersion = ApiVersion::new(3, 1, 4);

/// PEM material: file name and environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemSource {
    /// Signing certificate.
    SigningCertificate,
    /// Signing private key.
    SigningKey,
    /// Transport certificate.
    TransportCertificate,
    /// Transport private key.
    TransportKey,
}

impl PemSource {
    /// Returns the file name inside the configuration directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::SigningCertificate => "certSigning.pem",
            Self::SigningKey => "privateKeySigning.key",
            Self::TransportCertificate => "certTransport.pem",
            Self::TransportKey => "privateKeyTransport.key",
        }
    }

    /// Returns the environment variable used when the file is absent.
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::SigningCertificate => "SIGNING_PUBLIC_CERT",
            Self::SigningKey => "SIGNING_PRIVATE_KEY",
            Self::TransportCertificate => "TRANSPORT_PUBLIC_CERT",
            Self::TransportKey => "TRANSPORT_PRIVATE_KEY",
        }
    }
}

// ============================================================================
// SECTION: Document
// ============================================================================

/// Token endpoint client authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// HTTP Basic with client id and secret.
    #[default]
    ClientSecretBasic,
    /// Signed client assertion.
    PrivateKeyJwt,
    /// Mutual TLS; the client id travels as a form field.
    TlsClientAuth,
}

impl TokenEndpointAuthMethod {
    /// Returns the registration name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::PrivateKeyJwt => "private_key_jwt",
            Self::TlsClientAuth => "tls_client_auth",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration document (`config.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConformanceConfig {
    /// Directory software statement identifier.
    pub software_statement_id: String,
    /// Key identifier registered for the signing certificate.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Scopes registered for the client, space separated.
    pub client_scopes: String,
    /// Token endpoint URL.
    pub token_url: String,
    /// Audience of request objects and client assertions.
    pub aud: String,
    /// Host under test, used as the default resource base.
    #[serde(default)]
    pub target_host: Option<String>,
    /// Directory holding API definition documents.
    #[serde(default)]
    pub spec_location: Option<PathBuf>,
    /// Address the daemon binds to.
    #[serde(default)]
    pub bind_address: Option<String>,
    /// Raise log verbosity.
    #[serde(default)]
    pub verbose: bool,
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret, required for `client_secret_basic`.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Token endpoint authentication method.
    #[serde(default)]
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Registered redirect URL.
    pub redirect_url: String,
    /// Resource server base URL; `targetHost` when absent.
    #[serde(default)]
    pub resource_base_url: Option<String>,
    /// Payment API version selecting the JWS profile.
    #[serde(default = "default_payment_api_version")]
    pub payment_api_version: ApiVersion,
    /// Issuer of request objects; the client id when absent.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Trust anchor advertised in signatures.
    #[serde(default)]
    pub trust_anchor: Option<String>,
    /// JWKS URL of the ASPSP, for response signature checks.
    #[serde(default)]
    pub aspsp_jwks_uri: Option<String>,
    /// `x-fapi-financial-id` of the ASPSP.
    #[serde(default)]
    pub fapi_financial_id: Option<String>,
    /// Start of the transaction window requested in account consents.
    #[serde(default)]
    pub transaction_from_date: Option<String>,
    /// End of the transaction window requested in account consents.
    #[serde(default)]
    pub transaction_to_date: Option<String>,
    /// Consent acquisition deadline in seconds.
    #[serde(default = "default_consent_timeout_secs")]
    pub consent_timeout_secs: u64,
    /// Accept any server certificate.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// PEM bundle of trusted roots, relative to the configuration directory.
    #[serde(default)]
    pub root_ca_file: Option<PathBuf>,
}

/// Serde default for `paymentApiVersion`.
const fn default_payment_api_version() -> ApiVersion {
    DEFAULT_PAYMENT_API_VERSION
}

/// Serde default for `consentTimeoutSecs`.
const fn default_consent_timeout_secs() -> u64 {
    DEFAULT_CONSENT_TIMEOUT_SECS
}

/// Signing and transport key material.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Certificate that signs request bodies and JWTs.
    pub signing: Arc<Certificate>,
    /// Certificate presented during TLS handshakes.
    pub transport: Arc<Certificate>,
}

/// Validated configuration with its key material and trust policy.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Configuration document.
    pub config: ConformanceConfig,
    /// Loaded certificates.
    pub credentials: Credentials,
    /// Server certificate trust policy.
    pub trust_policy: TrustPolicy,
    /// Directory the configuration was loaded from.
    pub directory: PathBuf,
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl ConformanceConfig {
    /// Loads configuration and certificates from `dir`, falling back to the
    /// process environment for absent PEM files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(dir: &Path) -> Result<LoadedConfig, ConfigError> {
        Self::load_with_env(dir, |name| env::var(name).ok())
    }

    /// Loads configuration with an explicit environment lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load_with_env<F>(dir: &Path, lookup: F) -> Result<LoadedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::from_file(&dir.join(CONFIG_FILE_NAME))?;
        let read = |source: PemSource| read_pem(dir, source, &lookup);
        let signing = Certificate::new(
            &read(PemSource::SigningCertificate)?,
            &read(PemSource::SigningKey)?,
        )
        .map_err(|err| ConfigError::Invalid(format!("signing certificate: {err}")))?;
        let transport = Certificate::new(
            &read(PemSource::TransportCertificate)?,
            &read(PemSource::TransportKey)?,
        )
        .map_err(|err| ConfigError::Invalid(format!("transport certificate: {err}")))?;
        let trust_policy = config.trust_policy(dir)?;
        tracing::debug!(
            signing_kid = signing.kid(),
            transport_kid = transport.kid(),
            "certificates loaded"
        );
        Ok(LoadedConfig {
            config,
            credentials: Credentials {
                signing: Arc::new(signing),
                transport: Arc::new(transport),
            },
            trust_policy,
            directory: dir.to_path_buf(),
        })
    }

    /// Reads and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when reading, parsing, or validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            serde_json::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("softwareStatementId", &self.software_statement_id)?;
        require_non_empty("clientId", &self.client_id)?;
        require_non_empty("clientScopes", &self.client_scopes)?;
        require_non_empty("aud", &self.aud)?;
        require_url("tokenUrl", &self.token_url)?;
        require_url("authorizationEndpoint", &self.authorization_endpoint)?;
        require_url("redirectUrl", &self.redirect_url)?;
        require_url("resourceBaseUrl", &self.resource_base_url()?)?;
        if let Some(jwks_uri) = &self.aspsp_jwks_uri {
            require_url("aspspJwksUri", jwks_uri)?;
        }
        if self.token_endpoint_auth_method == TokenEndpointAuthMethod::ClientSecretBasic
            && self.client_secret.as_deref().is_none_or(|secret| secret.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "clientSecret is required for client_secret_basic".to_string(),
            ));
        }
        if self.consent_timeout_secs == 0 || self.consent_timeout_secs > MAX_CONSENT_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "consentTimeoutSecs must be between 1 and {MAX_CONSENT_TIMEOUT_SECS}"
            )));
        }
        if self.payment_api_version.is_v3_0() {
            return Err(ConfigError::Invalid(
                "paymentApiVersion v3.0 has no detached signature profile".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the resource server base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when neither `resourceBaseUrl` nor
    /// `targetHost` is set.
    pub fn resource_base_url(&self) -> Result<String, ConfigError> {
        self.resource_base_url
            .clone()
            .or_else(|| self.target_host.clone())
            .map(|base| base.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                ConfigError::Invalid("resourceBaseUrl or targetHost is required".to_string())
            })
    }

    /// Returns the consent acquisition deadline.
    #[must_use]
    pub const fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    /// Resolves the server certificate trust policy.
    fn trust_policy(&self, dir: &Path) -> Result<TrustPolicy, ConfigError> {
        if self.accept_invalid_certs {
            tracing::warn!("acceptInvalidCerts is set; server certificates are not verified");
            return Ok(TrustPolicy::AcceptAny);
        }
        let Some(file) = &self.root_ca_file else {
            return Ok(TrustPolicy::WebPki);
        };
        let path = dir.join(file);
        let pem = fs::read(&path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        TrustPolicy::from_pem(&pem).map_err(|err| ConfigError::Invalid(format!("rootCaFile: {err}")))
    }

    /// Writes the configuration into the run context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the resource base is missing.
    pub fn seed_context(&self, ctx: &mut Context) -> Result<(), ConfigError> {
        ctx.put_string(keys::CLIENT_ID, self.client_id.clone());
        if let Some(secret) = &self.client_secret {
            ctx.put_string(keys::CLIENT_SECRET, secret.clone());
        }
        ctx.put_string(keys::TOKEN_ENDPOINT, self.token_url.clone());
        ctx.put_string(keys::TOKEN_ENDPOINT_AUTH_METHOD, self.token_endpoint_auth_method.as_str());
        ctx.put_string(keys::AUTHORIZATION_ENDPOINT, self.authorization_endpoint.clone());
        ctx.put_string(keys::REDIRECT_URL, self.redirect_url.clone());
        ctx.put_string(keys::RESOURCE_BASE_URL, self.resource_base_url()?);
        ctx.put_string(keys::AUDIENCE, self.aud.clone());
        ctx.put_string(keys::SOFTWARE_STATEMENT_ID, self.software_statement_id.clone());
        ctx.put_string(keys::CLIENT_SCOPES, self.client_scopes.clone());
        ctx.put_string(keys::PAYMENT_API_VERSION, self.payment_api_version.to_string());
        ctx.put_string(keys::ISSUER, self.issuer.clone().unwrap_or_else(|| self.client_id.clone()));
        let optional = [
            (keys::FAPI_FINANCIAL_ID, &self.fapi_financial_id),
            (keys::TRANSACTION_FROM_DATE, &self.transaction_from_date),
            (keys::TRANSACTION_TO_DATE, &self.transaction_to_date),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                ctx.put_string(key, value.clone());
            }
        }
        Ok(())
    }
}

impl LoadedConfig {
    /// Builds the signer context for request signatures.
    #[must_use]
    pub fn signer_context(&self) -> SignerContext {
        let mut signer = SignerContext::new(
            Arc::clone(&self.credentials.signing),
            self.config.payment_api_version,
        );
        signer.kid_override = self.config.key_id.clone().filter(|kid| !kid.is_empty());
        if let Some(anchor) = &self.config.trust_anchor {
            signer.trust_anchor = anchor.clone();
        }
        signer
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// JSON parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// PEM file absent and its environment variable unset.
    #[error("missing environment variable {0}")]
    MissingEnvironment(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a PEM file, or its environment variable when the file is absent.
fn read_pem<F>(dir: &Path, source: PemSource, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = dir.join(source.file_name());
    if path.is_file() {
        let bytes = fs::read(&path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if bytes.len() > MAX_PEM_FILE_SIZE {
            return Err(ConfigError::Invalid(format!("{} exceeds size limit", source.file_name())));
        }
        return String::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid(format!("{} must be utf-8", source.file_name())));
    }
    tracing::debug!(variable = source.env_var(), "pem file absent, reading environment");
    lookup(source.env_var())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvironment(source.env_var().to_string()))
}

/// Rejects empty or whitespace-only values.
fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    Ok(())
}

/// Rejects values that are not absolute http(s) URLs.
fn require_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|err| ConfigError::Invalid(format!("{field} is not a url: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!("{field} must use http or https")));
    }
    Ok(())
}
