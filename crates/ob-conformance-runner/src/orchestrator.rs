// crates/ob-conformance-runner/src/orchestrator.rs
// ============================================================================
// Module: Run Orchestrator
// Description: Plans tokens, acquires them, and executes suites case by case.
// Purpose: Drive prepare, dispatch, and validate for every declared test
//          case and report one record per case.
// Dependencies: tokio, ob-conformance-model, ob-conformance-crypto
// ============================================================================

//! ## Overview
//! A run is: pre-check, conditionality report per suite, token planning from
//! the permission solver, concurrent token acquisition, then suites in
//! declaration order (or concurrently, each on its own context snapshot).
//! Within a suite cases run in order and the stop flag is checked before
//! each one.
//!
//! Errors never unwind past the orchestrator: every executed case yields a
//! [`TestRecord`]. Only a failed pre-check aborts the run, and even then the
//! terminal `run-complete` event is emitted exactly once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use ob_conformance_config::LoadedConfig;
use ob_conformance_core::ApiVersion;
use ob_conformance_core::Context;
use ob_conformance_core::PermissionGroup;
use ob_conformance_core::RunSummary;
use ob_conformance_core::TestRecord;
use ob_conformance_core::TokenFamily;
use ob_conformance_core::keys;
use ob_conformance_core::lookup_specification;
use ob_conformance_core::missing_mandatory;
use ob_conformance_core::solve_permissions;
use ob_conformance_crypto::JwksCache;
use ob_conformance_crypto::SignerContext;
use ob_conformance_crypto::b64_flag;
use ob_conformance_crypto::validate_jws;
use ob_conformance_model::HttpResponse;
use ob_conformance_model::SchemaRegistry;
use ob_conformance_model::SchemaValidator;
use ob_conformance_model::Suite;
use ob_conformance_model::TestCase;
use ob_conformance_model::test_case::JWS_SIGNATURE_HEADER;
use tokio::task::JoinSet;

use crate::consent::Authorizer;
use crate::consent::ConsentJob;
use crate::consent::ConsentOrchestrator;
use crate::consent::ConsentWorker;
use crate::consent::HeadlessAuthorizer;
use crate::consent::TokenClient;
use crate::consent::consent_id_key;
use crate::daemon::DaemonController;
use crate::dispatch::HttpDispatcher;
use crate::error::RunError;
use crate::events::RunEvent;
use crate::events::RunEventSink;
use crate::probe::ResourceProbe;

// ============================================================================
// SECTION: Token Planning
// ============================================================================

/// Context keys a run needs before any case executes.
const REQUIRED_CONTEXT_KEYS: [&str; 5] = [
    keys::CLIENT_ID,
    keys::TOKEN_ENDPOINT,
    keys::AUTHORIZATION_ENDPOINT,
    keys::REDIRECT_URL,
    keys::RESOURCE_BASE_URL,
];

/// Consent jobs of a run and the token serving each case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPlan {
    /// Jobs in token-name order per family.
    pub jobs: Vec<ConsentJob>,
    /// Token name by `suite id/test id`.
    assignments: BTreeMap<String, String>,
}

impl TokenPlan {
    /// Returns the token serving a case.
    #[must_use]
    pub fn token_for(&self, suite_id: &str, test_id: &str) -> Option<&str> {
        self.assignments.get(&assignment_key(suite_id, test_id)).map(String::as_str)
    }
}

/// Key of a case in the assignment table.
fn assignment_key(suite_id: &str, test_id: &str) -> String {
    format!("{suite_id}/{test_id}")
}

/// Plans the tokens a run needs.
///
/// Account suites share tokens: their cases' permission groups go through
/// the solver and each resulting set becomes one `account_token_NNN`.
/// Cases whose endpoints need no permission use the first account token.
/// Payment and funds-confirmation suites get one token per suite from the
/// suite's consent template.
///
/// # Errors
///
/// Returns [`RunError::Planning`] for invalid permission annotations or a
/// suite without the consent template its family requires.
pub fn plan_tokens(suites: &[Suite]) -> Result<TokenPlan, RunError> {
    let mut plan = TokenPlan::default();
    let mut groups: Vec<PermissionGroup> = Vec::new();
    let mut unscoped: Vec<String> = Vec::new();
    for suite in suites.iter().filter(|suite| suite.token_family() == TokenFamily::Account) {
        let suite_groups =
            suite.permission_groups().map_err(|err| RunError::Planning(err.to_string()))?;
        for mut group in suite_groups {
            let key = assignment_key(&suite.id, &group.test_id);
            if group.included.is_empty() {
                unscoped.push(key);
            } else {
                group.test_id = key;
                groups.push(group);
            }
        }
    }
    for (index, set) in solve_permissions(&groups).into_iter().enumerate() {
        let token_name = TokenFamily::Account.token_name(index);
        for key in set.test_ids {
            plan.assignments.insert(key, token_name.clone());
        }
        plan.jobs.push(ConsentJob::accounts(token_name, set.codes.into_iter().collect()));
    }
    if let Some(first) = plan.jobs.first().map(|job| job.token_name.clone()) {
        for key in unscoped {
            plan.assignments.insert(key, first.clone());
        }
    }

    let mut counters: BTreeMap<&'static str, usize> = BTreeMap::new();
    for suite in suites.iter().filter(|suite| suite.token_family() != TokenFamily::Account) {
        let family = suite.token_family();
        let template = suite.consent.as_ref().ok_or_else(|| {
            RunError::Planning(format!("suite {} has no consent template", suite.id))
        })?;
        let scope = suite.family().map_or("accounts", |api| api.scope());
        let counter = counters.entry(family.prefix()).or_insert(0);
        let token_name = family.token_name(*counter);
        *counter += 1;
        for case in &suite.test_cases {
            plan.assignments.insert(assignment_key(&suite.id, &case.id), token_name.clone());
        }
        plan.jobs.push(ConsentJob::from_template(token_name, family, scope, template));
    }
    Ok(plan)
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Run-level switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Execute suites concurrently.
    pub parallel: bool,
    /// Fetch API definitions from their published URL when not on disk.
    pub fetch_schemas: bool,
    /// JWKS URL for response signature checks.
    pub jwks_uri: Option<String>,
    /// API version selecting the response signature profile.
    pub api_version: ApiVersion,
}

/// PSU authorization mode of a run.
pub enum Authorization {
    /// Capture the code from the authorization endpoint's redirect.
    Headless,
    /// Wait for operator-submitted codes.
    Manual(Arc<dyn Authorizer>),
}

/// Collaborators of a run.
pub struct RunParts {
    /// Resource server dispatcher.
    pub dispatcher: Arc<HttpDispatcher>,
    /// Request signer.
    pub signer: Option<Arc<SignerContext>>,
    /// Token acquisition.
    pub consent: ConsentOrchestrator,
    /// API definitions.
    pub schemas: SchemaRegistry,
    /// Event sink.
    pub sink: Arc<dyn RunEventSink>,
    /// Stop flag and accumulator.
    pub daemon: Arc<DaemonController>,
    /// Switches.
    pub settings: RunSettings,
}

/// Shared state of a run.
struct RunShared {
    /// Resource server dispatcher.
    dispatcher: Arc<HttpDispatcher>,
    /// Request signer.
    signer: Option<Arc<SignerContext>>,
    /// Token acquisition.
    consent: ConsentOrchestrator,
    /// Account probe.
    probe: ResourceProbe,
    /// API definitions.
    schemas: Mutex<SchemaRegistry>,
    /// Specifications whose definition could not be obtained.
    unavailable: Mutex<BTreeSet<String>>,
    /// ASPSP signing keys.
    jwks: JwksCache,
    /// Event sink.
    sink: Arc<dyn RunEventSink>,
    /// Stop flag and accumulator.
    daemon: Arc<DaemonController>,
    /// Switches.
    settings: RunSettings,
}

/// Executes suites against one ASPSP.
#[derive(Clone)]
pub struct RunOrchestrator {
    /// Shared state.
    shared: Arc<RunShared>,
}

impl RunOrchestrator {
    /// Creates an orchestrator from its collaborators.
    #[must_use]
    pub fn new(parts: RunParts) -> Self {
        let probe = ResourceProbe::new(Arc::clone(&parts.dispatcher));
        Self {
            shared: Arc::new(RunShared {
                dispatcher: parts.dispatcher,
                signer: parts.signer,
                consent: parts.consent,
                probe,
                schemas: Mutex::new(parts.schemas),
                unavailable: Mutex::new(BTreeSet::new()),
                jwks: JwksCache::new(),
                sink: parts.sink,
                daemon: parts.daemon,
                settings: parts.settings,
            }),
        }
    }

    /// Wires an orchestrator from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the resource base is missing or the mutual
    /// TLS client cannot be built.
    pub fn from_config(
        loaded: &LoadedConfig,
        authorization: Authorization,
        sink: Arc<dyn RunEventSink>,
        daemon: Arc<DaemonController>,
        parallel: bool,
    ) -> Result<Self, RunError> {
        let config = &loaded.config;
        let base_url = config.resource_base_url()?;
        let dispatcher = Arc::new(HttpDispatcher::new(
            &loaded.credentials.transport,
            &loaded.trust_policy,
            &base_url,
        )?);
        let signer = Arc::new(loaded.signer_context());
        let tokens = TokenClient::new(
            Arc::clone(&dispatcher),
            config.token_url.clone(),
            config.client_id.clone(),
            config.token_endpoint_auth_method,
        )
        .with_secret(config.client_secret.clone())
        .with_signer(Some(Arc::clone(&signer)));
        let authorizer: Arc<dyn Authorizer> = match authorization {
            Authorization::Headless => Arc::new(HeadlessAuthorizer::new(Arc::clone(&dispatcher))),
            Authorization::Manual(authorizer) => authorizer,
        };
        let worker = ConsentWorker::new(
            tokens,
            authorizer,
            Arc::clone(&dispatcher),
            Some(Arc::clone(&signer)),
        );
        let consent =
            ConsentOrchestrator::new(worker, Arc::clone(&sink)).with_timeout(config.consent_timeout());
        let schemas =
            SchemaRegistry::new(config.spec_location.as_ref().map(|path| loaded.directory.join(path)));
        Ok(Self::new(RunParts {
            dispatcher,
            signer: Some(signer),
            consent,
            schemas,
            sink,
            daemon,
            settings: RunSettings {
                parallel,
                fetch_schemas: true,
                jwks_uri: config.aspsp_jwks_uri.clone(),
                api_version: config.payment_api_version,
            },
        }))
    }

    /// Returns the run's daemon controller.
    #[must_use]
    pub fn daemon(&self) -> Arc<DaemonController> {
        Arc::clone(&self.shared.daemon)
    }

    /// Executes `suites` and returns the run's counters.
    ///
    /// Emits `run-complete` exactly once, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the pre-check or token planning fails; no
    /// case executes in that event.
    pub async fn run(&self, suites: Vec<Suite>, ctx: &mut Context) -> Result<RunSummary, RunError> {
        let outcome = self.execute(suites, ctx).await;
        if let Err(err) = &outcome {
            tracing::error!(error = %err, "run aborted");
        }
        let summary = self.shared.daemon.complete();
        self.shared.sink.record(&RunEvent::RunComplete(summary));
        outcome.map(|()| summary)
    }

    /// Runs every phase up to the last suite.
    async fn execute(&self, suites: Vec<Suite>, ctx: &mut Context) -> Result<(), RunError> {
        self.pre_check(&suites, ctx)?;
        for suite in &suites {
            self.report_conditionality(suite);
        }
        let plan = Arc::new(plan_tokens(&suites)?);
        if !plan.jobs.is_empty() {
            let outcome = self
                .shared
                .consent
                .acquire(plan.jobs.clone(), ctx, self.shared.daemon.cancellation())
                .await;
            outcome.publish(ctx);
            if !outcome.is_complete() {
                tracing::warn!(
                    granted = outcome.granted.len(),
                    requested = plan.jobs.len(),
                    "continuing with partial tokens"
                );
            }
        }

        if self.shared.settings.parallel && suites.len() > 1 {
            let mut tasks = JoinSet::new();
            for suite in suites {
                let runner = self.clone();
                let plan = Arc::clone(&plan);
                let mut scoped = ctx.snapshot();
                tasks.spawn(async move { runner.run_suite(&suite, &mut scoped, &plan).await });
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "suite task failed");
                }
            }
        } else {
            for suite in &suites {
                if !self.run_suite(suite, ctx, &plan).await {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Checks that the run can start.
    fn pre_check(&self, suites: &[Suite], ctx: &Context) -> Result<(), RunError> {
        if let Some(key) = REQUIRED_CONTEXT_KEYS.iter().find(|key| !ctx.is_set(key)) {
            return Err(RunError::PreCheck(format!("context has no {key}")));
        }
        let needs_signer = suites.iter().any(|suite| {
            suite.token_family() == TokenFamily::Payment
                || suite.test_cases.iter().any(|case| case.input.jws)
        });
        if needs_signer && self.shared.signer.is_none() {
            return Err(RunError::PreCheck("signing certificate is not loaded".to_string()));
        }
        Ok(())
    }

    /// Emits the mandatory endpoints a suite leaves untested.
    fn report_conditionality(&self, suite: &Suite) {
        match missing_mandatory(&suite.declared_endpoints(), &suite.specification) {
            Ok(missing) => {
                let missing: Vec<String> = missing
                    .iter()
                    .map(|entry| format!("{} {}", entry.method, entry.endpoint))
                    .collect();
                if !missing.is_empty() {
                    tracing::warn!(suite_id = %suite.id, missing = missing.len(), "mandatory endpoints not covered");
                }
                self.shared.sink.record(&RunEvent::Conditionality {
                    suite_id: suite.id.clone(),
                    specification: suite.specification.clone(),
                    missing,
                });
            }
            Err(err) => tracing::warn!(suite_id = %suite.id, error = %err, "conditionality unavailable"),
        }
    }

    /// Runs one suite; returns false when the run was stopped.
    async fn run_suite(&self, suite: &Suite, ctx: &mut Context, plan: &TokenPlan) -> bool {
        let probes_accounts = suite.token_family() == TokenFamily::Account
            && suite.declared_endpoints().iter().any(|declared| {
                declared.endpoint.contains("{AccountId}") || declared.endpoint.contains("{StatementId}")
            });
        let schema = if suite.test_cases.iter().any(needs_schema) {
            self.schema_for(&suite.specification).await
        } else {
            None
        };
        tracing::info!(suite_id = %suite.id, cases = suite.test_cases.len(), "suite started");
        for (index, case) in suite.test_cases.iter().enumerate() {
            if self.shared.daemon.is_stopped() {
                let skipped = suite.test_cases.len() - index;
                tracing::info!(suite_id = %suite.id, skipped, "run stopped");
                let stopped = RunEvent::RunStopped { skipped };
                self.shared.daemon.publish(&stopped);
                self.shared.sink.record(&stopped);
                return false;
            }
            let token = plan.token_for(&suite.id, &case.id);
            let record = self
                .run_case(suite, case, token, probes_accounts, schema.as_deref(), ctx)
                .await;
            if record.pass {
                tracing::info!(test_id = %record.test_id, "passed");
            } else {
                tracing::warn!(test_id = %record.test_id, errors = record.errors.len(), "failed");
            }
            self.shared.daemon.record(record.clone());
            self.shared.sink.record(&RunEvent::TestResult(record));
        }
        true
    }

    /// Prepares, dispatches, and validates one case.
    async fn run_case(
        &self,
        suite: &Suite,
        case: &TestCase,
        token: Option<&str>,
        probes_accounts: bool,
        schema: Option<&SchemaValidator>,
        ctx: &mut Context,
    ) -> TestRecord {
        let failed = |endpoint: &str, errors: Vec<String>| {
            TestRecord::failed_before_dispatch(
                suite.id.as_str(),
                case.id.as_str(),
                case.name.as_str(),
                case.input.method.to_ascii_uppercase(),
                endpoint,
                errors,
            )
        };

        let mut scoped = case.scoped_context(ctx);
        if let Some(token_name) = token {
            if let Ok(access_token) = ctx.get_string(token_name) {
                scoped.put_string(keys::ACCESS_TOKEN, access_token);
            }
            if !scoped.is_set(keys::CONSENT_ID)
                && let Ok(consent_id) = ctx.get_string(&consent_id_key(token_name))
            {
                scoped.put_string(keys::CONSENT_ID, consent_id);
            }
            if probes_accounts && TokenFamily::of_token(token_name) == Some(TokenFamily::Account) {
                match self.shared.probe.resources(token_name, ctx).await {
                    Ok(resources) => {
                        let overridden: Vec<&str> = case.context.keys().map(String::as_str).collect();
                        resources.apply(&mut scoped, &overridden);
                    }
                    Err(err) => return failed(&case.input.endpoint, vec![err.to_string()]),
                }
            }
        }

        let request = match case.prepare(&mut scoped, self.shared.signer.as_deref()) {
            Ok(request) => request,
            Err(err) => return failed(&case.input.endpoint, vec![err.to_string()]),
        };
        if !request.dispatch {
            ctx.merge_keys(&scoped, &case.declared_keys());
            let mut record = failed(&request.endpoint, Vec::new());
            record.pass = true;
            return record;
        }
        let response = match self.shared.dispatcher.send(&request).await {
            Ok(response) => response,
            Err(err) => return failed(&request.endpoint, vec![err.to_string()]),
        };

        let mut errors: Vec<String> = match case.validate(&request, &response, &mut scoped, schema) {
            Ok(()) => Vec::new(),
            Err(failures) => failures.iter().map(ToString::to_string).collect(),
        };
        if case.expects_signature()
            && let Err(err) = self.check_signature(&response).await
        {
            errors.push(format!("{}: {err}", case.id));
        }
        ctx.merge_keys(&scoped, &case.declared_keys());

        TestRecord {
            status_code: Some(response.status),
            elapsed_ms: u64::try_from(response.elapsed.as_millis()).unwrap_or(u64::MAX),
            response_size: u64::try_from(response.body.len()).unwrap_or(u64::MAX),
            pass: errors.is_empty(),
            errors,
            ..failed(&request.endpoint, Vec::new())
        }
    }

    /// Validates the response's detached signature against the ASPSP JWKS.
    async fn check_signature(&self, response: &HttpResponse) -> Result<(), String> {
        let jwks_uri = self
            .shared
            .settings
            .jwks_uri
            .as_deref()
            .ok_or_else(|| "no ASPSP JWKS URL configured".to_string())?;
        let jws = response
            .header(JWS_SIGNATURE_HEADER)
            .ok_or_else(|| format!("response has no {JWS_SIGNATURE_HEADER} header"))?;
        let b64 = b64_flag(self.shared.settings.api_version).map_err(|err| err.to_string())?;
        validate_jws(
            jws,
            &response.body,
            jwks_uri,
            b64,
            &self.shared.jwks,
            self.shared.dispatcher.client(),
        )
        .await
        .map_err(|err| err.to_string())
    }

    /// Returns the API definition of a specification.
    async fn schema_for(&self, specification: &str) -> Option<Arc<SchemaValidator>> {
        let local = match self.shared.schemas.lock() {
            Ok(mut registry) => registry.get(specification),
            Err(_) => return None,
        };
        match local {
            Ok(Some(validator)) => return Some(validator),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(specification, error = %err, "api definition unusable");
                return None;
            }
        }
        if !self.shared.settings.fetch_schemas
            || self.shared.unavailable.lock().map_or(true, |set| set.contains(specification))
        {
            return None;
        }
        let info = lookup_specification(specification).ok()?;
        match self.fetch_schema(&info.schema_url).await {
            Ok(validator) => {
                let mut registry = self.shared.schemas.lock().ok()?;
                registry.insert(specification, validator);
                registry.get(specification).ok().flatten()
            }
            Err(err) => {
                tracing::warn!(specification, url = %info.schema_url, error = %err, "api definition fetch failed");
                if let Ok(mut unavailable) = self.shared.unavailable.lock() {
                    unavailable.insert(specification.to_string());
                }
                None
            }
        }
    }

    /// Downloads and parses a published API definition.
    async fn fetch_schema(&self, url: &str) -> Result<SchemaValidator, String> {
        let response = self
            .shared
            .dispatcher
            .client()
            .get(url)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status().as_u16()));
        }
        let text = response.text().await.map_err(|err| err.to_string())?;
        SchemaValidator::from_text(&text).map_err(|err| err.to_string())
    }
}

/// Returns true when any expectation of the case validates the schema.
fn needs_schema(case: &TestCase) -> bool {
    case.expect.schema_validation || case.expect_one_of.iter().any(|expect| expect.schema_validation)
}

#[cfg(test)]
mod tests;
