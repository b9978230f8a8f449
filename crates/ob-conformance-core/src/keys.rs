// crates/ob-conformance-core/src/keys.rs
// ============================================================================
// Module: Context Keys
// Description: Well-known context key names shared across crates.
// ============================================================================

//! Well-known [`Context`](crate::Context) keys. Suite templates reference
//! these as `$name` tokens, so renaming any of them breaks existing suites.

/// OAuth client identifier.
pub const CLIENT_ID: &str = "client_id";
/// OAuth client secret for `client_secret_basic`.
pub const CLIENT_SECRET: &str = "client_secret";
/// Token endpoint URL.
pub const TOKEN_ENDPOINT: &str = "token_endpoint";
/// Token endpoint authentication method.
pub const TOKEN_ENDPOINT_AUTH_METHOD: &str = "token_endpoint_auth_method";
/// PSU authorization endpoint URL.
pub const AUTHORIZATION_ENDPOINT: &str = "authorisation_endpoint";
/// Redirect URL registered for the client.
pub const REDIRECT_URL: &str = "redirect_url";
/// Base URL of the resource server under test.
pub const RESOURCE_BASE_URL: &str = "resource_server";
/// Audience of consent request objects.
pub const AUDIENCE: &str = "aud";
/// Software statement identifier.
pub const SOFTWARE_STATEMENT_ID: &str = "software_statement_id";
/// Scopes granted to the client.
pub const CLIENT_SCOPES: &str = "client_scopes";
/// Payment API version used to select signature headers.
pub const PAYMENT_API_VERSION: &str = "payment_api_version";
/// Issuer of request objects and client assertions.
pub const ISSUER: &str = "issuer";
/// Consent URL stored by cases that do not dispatch.
pub const CONSENT_URL: &str = "consent_url";
/// Consent identifier extracted from the last consent response.
pub const CONSENT_ID: &str = "ConsentId";
/// Bearer token of the current case.
pub const ACCESS_TOKEN: &str = "access_token";
/// Account identifier discovered by the resource probe.
pub const ACCOUNT_ID: &str = "AccountId";
/// Statement identifier discovered by the resource probe.
pub const STATEMENT_ID: &str = "StatementId";
/// Start of the transaction window in account consents.
pub const TRANSACTION_FROM_DATE: &str = "transactionFromDate";
/// End of the transaction window in account consents.
pub const TRANSACTION_TO_DATE: &str = "transactionToDate";
/// Financial identifier header value.
pub const FAPI_FINANCIAL_ID: &str = "x_fapi_financial_id";
