// crates/ob-conformance-model/src/test_case.rs
// ============================================================================
// Module: Test Cases
// Description: Declarative test cases with request preparation and response
//              validation.
// Purpose: Turn a case declaration plus a context into a dispatchable request,
//          then judge the response and commit extracted values.
// Dependencies: ob-conformance-core, ob-conformance-crypto, serde, time,
//               tracing
// ============================================================================

//! ## Overview
//! A [`TestCase`] is immutable after loading. Preparation substitutes
//! `$variables` from a per-case context snapshot, optionally builds a PSU
//! consent URL, signs POST bodies, and injects an idempotency key. Header
//! removals run last so a case can strip headers it added itself.
//!
//! Validation runs in a fixed order: status, matches (first failure aborts),
//! schema (one failure per violation), then context extraction. Extracted
//! values are committed only when the expectation passes. With
//! `expectOneOf`, each alternative is evaluated against the unmodified
//! context and only the first passing alternative's values are committed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use ob_conformance_core::Context;
use ob_conformance_core::ContextValue;
use ob_conformance_core::keys;
use ob_conformance_crypto::ConsentUrlRequest;
use ob_conformance_crypto::JwsOperation;
use ob_conformance_crypto::SignerContext;
use ob_conformance_crypto::build_detached_jws;
use ob_conformance_crypto::canonical_body;
use ob_conformance_crypto::modify_jws;
use ob_conformance_crypto::psu_consent_url;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::PrepareError;
use crate::error::ValidationFailure;
use crate::http::HttpResponse;
use crate::http::PreparedRequest;
use crate::matches::Match;
use crate::schema::SchemaValidator;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the detached request signature.
pub const JWS_SIGNATURE_HEADER: &str = "x-jws-signature";

/// Header carrying the idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// Content type assumed for signed bodies without a `Content-Type` header.
const DEFAULT_CONTENT_TYPE: &str = "application/json";

// ============================================================================
// SECTION: Declarations
// ============================================================================

/// How a case obtains a PSU consent URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentUrlStrategy {
    /// Request object with `alg=none`; the URL replaces the endpoint.
    Unsigned,
    /// Signed request object; the URL replaces the endpoint.
    Signed,
    /// Build the URL, store it under `consent_url`, and skip dispatch.
    DoNotCall,
}

/// Request template of a test case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Input {
    /// HTTP method.
    pub method: String,
    /// Endpoint template; paths are relative to the resource server.
    pub endpoint: String,
    /// Header templates.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Headers removed after every addition.
    #[serde(default)]
    pub remove_headers: Vec<String>,
    /// Form field templates.
    #[serde(default)]
    pub form_data: BTreeMap<String, String>,
    /// Query parameter templates.
    #[serde(default)]
    pub query_parameters: BTreeMap<String, String>,
    /// Body template.
    #[serde(default)]
    pub body_data: Option<String>,
    /// Consent request claims; missing claims fall back to context keys.
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
    /// Consent URL strategy.
    #[serde(default)]
    pub consent_url: Option<ConsentUrlStrategy>,
    /// Sign the body into `x-jws-signature`.
    #[serde(default)]
    pub jws: bool,
    /// Header edits applied to the signature after signing.
    #[serde(default)]
    pub jws_operations: Vec<JwsOperation>,
    /// Inject `x-idempotency-key`.
    #[serde(default)]
    pub idempotency: bool,
}

/// Expected response of a test case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Expect {
    /// Expected status code.
    #[serde(default, alias = "status-code")]
    pub status_code: Option<u16>,
    /// Validate the body against the API definition.
    #[serde(default, alias = "schema-validation")]
    pub schema_validation: bool,
    /// Validate the response `x-jws-signature`.
    #[serde(default)]
    pub signature: bool,
    /// Predicates that must all hold.
    #[serde(default)]
    pub matches: Vec<Match>,
    /// Extractions written to the context after success.
    #[serde(default)]
    pub context_put: Vec<Match>,
}

/// Declarative conformance test case.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestCase {
    /// Unique identifier within the suite.
    #[serde(alias = "@id")]
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional statement of intent.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Request template.
    pub input: Input,
    /// Context values layered over the parent context.
    #[serde(default)]
    pub context: BTreeMap<String, ContextValue>,
    /// Primary expectation.
    #[serde(default)]
    pub expect: Expect,
    /// Alternatives tried when `expect` declares no status code.
    #[serde(default)]
    pub expect_one_of: Vec<Expect>,
    /// Permission codes the case's token must carry.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Permission codes the case's token must not carry.
    #[serde(default)]
    pub permissions_excluded: Vec<String>,
}

// ============================================================================
// SECTION: Preparation
// ============================================================================

impl TestCase {
    /// Returns the parent context overlaid with the case's own values.
    #[must_use]
    pub fn scoped_context(&self, parent: &Context) -> Context {
        let mut ctx = parent.snapshot();
        for (key, value) in &self.context {
            ctx.put(key.clone(), value.clone());
        }
        ctx
    }

    /// Returns the context keys this case may write back to its parent.
    #[must_use]
    pub fn declared_keys(&self) -> Vec<String> {
        let mut names: Vec<String> = std::iter::once(&self.expect)
            .chain(&self.expect_one_of)
            .flat_map(|expect| expect.matches.iter().chain(&expect.context_put))
            .filter_map(|matcher| matcher.context_name.clone())
            .collect();
        if self.input.consent_url == Some(ConsentUrlStrategy::DoNotCall) {
            names.push(keys::CONSENT_URL.to_string());
        }
        names.sort();
        names.dedup();
        names
    }

    /// Returns true when any expectation asks for response signature checks.
    #[must_use]
    pub fn expects_signature(&self) -> bool {
        self.expect.signature || self.expect_one_of.iter().any(|expect| expect.signature)
    }

    /// Builds the request to dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`PrepareError`] when substitution fails, a consent claim is
    /// missing, `jws` is set on a non-POST request or without a signer, or
    /// signing fails.
    pub fn prepare(
        &self,
        ctx: &mut Context,
        signer: Option<&SignerContext>,
    ) -> Result<PreparedRequest, PrepareError> {
        let input = &self.input;
        let method = input.method.to_ascii_uppercase();
        let mut request = PreparedRequest {
            test_id: self.id.clone(),
            method,
            endpoint: ctx.replace(&input.endpoint)?,
            headers: substitute_pairs(ctx, &input.headers)?,
            query: substitute_pairs(ctx, &input.query_parameters)?,
            form: substitute_pairs(ctx, &input.form_data)?,
            body: input.body_data.as_deref().map(|body| ctx.replace(body)).transpose()?,
            dispatch: true,
        };

        if let Some(strategy) = input.consent_url {
            let url = self.consent_url(ctx, &request.endpoint, strategy, signer)?;
            if strategy == ConsentUrlStrategy::DoNotCall {
                ctx.put_string(keys::CONSENT_URL, url);
                request.dispatch = false;
            } else {
                request.endpoint = url;
            }
        }

        if input.jws {
            if request.method != "POST" {
                return Err(PrepareError::JwsOnNonPost(request.method));
            }
            let signer = signer.ok_or(PrepareError::MissingSigner)?;
            let content_type =
                request.header("content-type").unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
            let body = canonical_body(request.body.as_deref().unwrap_or_default(), &content_type)?;
            let mut signature = build_detached_jws(&body, &content_type, signer)?;
            if !input.jws_operations.is_empty() {
                signature = modify_jws(&signature, &body, &input.jws_operations, signer)?;
            }
            request.set_header(JWS_SIGNATURE_HEADER, signature);
            request.body = Some(body);
        }

        if input.idempotency {
            let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
            request.set_header(IDEMPOTENCY_HEADER, format!("{}-{millis}", self.id));
        }

        for name in &input.remove_headers {
            request.remove_header(name);
        }
        tracing::debug!(test_id = %self.id, endpoint = %request.endpoint, "request prepared");
        Ok(request)
    }

    /// Builds the PSU consent URL for the case.
    fn consent_url(
        &self,
        ctx: &Context,
        authorization_endpoint: &str,
        strategy: ConsentUrlStrategy,
        signer: Option<&SignerContext>,
    ) -> Result<String, PrepareError> {
        let claim = |name: &str, fallback: &str| -> Result<Option<String>, PrepareError> {
            if let Some(template) = self.input.claims.get(name) {
                return Ok(Some(ctx.replace(template)?));
            }
            if ctx.is_set(fallback) {
                return Ok(Some(ctx.get_string(fallback)?));
            }
            Ok(None)
        };
        let required = |name: &str, fallback: &str| -> Result<String, PrepareError> {
            claim(name, fallback)?.ok_or_else(|| PrepareError::MissingClaim(name.to_string()))
        };

        let client_id = required("clientId", keys::CLIENT_ID)?;
        let request = ConsentUrlRequest {
            authorization_endpoint: authorization_endpoint.to_string(),
            consent_id: required("consentId", keys::CONSENT_ID)?,
            scope: required("scope", keys::CLIENT_SCOPES)?,
            redirect_uri: required("redirectUrl", keys::REDIRECT_URL)?,
            audience: required("aud", keys::AUDIENCE)?,
            issuer: claim("iss", keys::CLIENT_ID)?.unwrap_or_else(|| client_id.clone()),
            response_type: self.input.claims.get("responseType").cloned().unwrap_or_default(),
            state: claim("state", "state")?,
            nonce: claim("nonce", "nonce")?,
            with_expiry: self.input.claims.get("exp").is_some_and(|value| value == "true"),
            client_id,
        };
        let signer = match strategy {
            ConsentUrlStrategy::Unsigned => None,
            ConsentUrlStrategy::Signed => Some(signer.ok_or(PrepareError::MissingSigner)?),
            ConsentUrlStrategy::DoNotCall => signer,
        };
        Ok(psu_consent_url(&request, signer)?)
    }
}

/// Substitutes every value of a template map.
fn substitute_pairs(
    ctx: &Context,
    templates: &BTreeMap<String, String>,
) -> Result<Vec<(String, String)>, PrepareError> {
    templates
        .iter()
        .map(|(key, template)| Ok((key.clone(), ctx.replace(template)?)))
        .collect()
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Values extracted by a passing expectation.
type Extractions = Vec<(String, ContextValue)>;

impl Expect {
    /// Evaluates the expectation without touching the context.
    fn evaluate(
        &self,
        case: &TestCase,
        request: &PreparedRequest,
        response: &HttpResponse,
        ctx: &Context,
        schema: Option<&SchemaValidator>,
    ) -> Result<Extractions, Vec<ValidationFailure>> {
        let test_id = case.id.clone();
        if let Some(expected) = self.status_code
            && response.status != expected
        {
            return Err(vec![ValidationFailure::StatusMismatch {
                test_id,
                expected,
                actual: response.status,
            }]);
        }

        let body: Option<Value> = serde_json::from_str(&response.body).ok();
        let mut extracted = Vec::new();
        for matcher in self.matches.iter().chain(&self.context_put) {
            match matcher.evaluate(response, body.as_ref(), ctx) {
                Ok(value) => {
                    if let Some(name) = &matcher.context_name {
                        extracted.push((name.clone(), value));
                    }
                }
                Err(detail) => {
                    return Err(vec![ValidationFailure::MatchFailed {
                        test_id,
                        selector: matcher.selector(),
                        detail,
                    }]);
                }
            }
        }

        if self.schema_validation {
            let violations = match schema {
                Some(schema) => schema
                    .validate(&request.method, &request.endpoint, response.status, &response.body)
                    .unwrap_or_else(|err| vec![err.to_string()]),
                None => vec!["no api definition available".to_string()],
            };
            if !violations.is_empty() {
                return Err(violations
                    .into_iter()
                    .map(|detail| ValidationFailure::Schema {
                        test_id: test_id.clone(),
                        detail,
                    })
                    .collect());
            }
        }
        Ok(extracted)
    }
}

impl TestCase {
    /// Validates a response and commits extracted values into `ctx`.
    ///
    /// # Errors
    ///
    /// Returns every [`ValidationFailure`] of the deciding expectation.
    pub fn validate(
        &self,
        request: &PreparedRequest,
        response: &HttpResponse,
        ctx: &mut Context,
        schema: Option<&SchemaValidator>,
    ) -> Result<(), Vec<ValidationFailure>> {
        let extracted = if self.expect.status_code.is_none() && !self.expect_one_of.is_empty() {
            let mut failures = Vec::new();
            let mut winner = None;
            for expect in &self.expect_one_of {
                match expect.evaluate(self, request, response, ctx, schema) {
                    Ok(extracted) => {
                        winner = Some(extracted);
                        break;
                    }
                    Err(errors) => failures.extend(errors),
                }
            }
            match winner {
                Some(extracted) => extracted,
                None => {
                    failures.insert(0, ValidationFailure::NoAlternative {
                        test_id: self.id.clone(),
                        alternatives: self.expect_one_of.len(),
                    });
                    return Err(failures);
                }
            }
        } else {
            self.expect.evaluate(self, request, response, ctx, schema)?
        };
        for (name, value) in extracted {
            ctx.put(name, value);
        }
        Ok(())
    }
}
