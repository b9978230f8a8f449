// crates/ob-conformance-runner/src/consent.rs
// ============================================================================
// Module: Consent and Token Orchestration
// Description: Token endpoint client, consent creation, PSU authorization,
//              and the concurrent token coordinator.
// Purpose: Turn consent jobs into named access tokens in the run context.
// Dependencies: async-trait, regex, tokio, ob-conformance-crypto
// ============================================================================

//! ## Overview
//! Each [`ConsentJob`] names one token. The [`ConsentOrchestrator`] spawns
//! one task per job; each task runs the client-credential grant, creates the
//! consent, has the PSU authorize it through an [`Authorizer`], and exchanges
//! the authorization code for the access token. Tasks report on a bounded
//! channel. The coordinator stops when every job reported, when its deadline
//! passes, or when the run is cancelled; outstanding tasks are aborted and
//! the partial outcome is returned.
//!
//! Security posture: access tokens and client secrets never reach the event
//! sinks or the logs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ob_conformance_config::TokenEndpointAuthMethod;
use ob_conformance_core::Context;
use ob_conformance_core::TokenFamily;
use ob_conformance_core::keys;
use ob_conformance_core::macros::format_date_time;
use ob_conformance_crypto::ConsentUrlRequest;
use ob_conformance_crypto::SignerContext;
use ob_conformance_crypto::basic_auth_value;
use ob_conformance_crypto::build_detached_jws;
use ob_conformance_crypto::canonical_body;
use ob_conformance_crypto::client_assertion;
use ob_conformance_crypto::psu_consent_url;
use ob_conformance_model::ConsentTemplate;
use ob_conformance_model::HttpResponse;
use ob_conformance_model::PreparedRequest;
use regex::Regex;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio::time::timeout_at;

use crate::dispatch::HttpDispatcher;
use crate::error::ConsentError;
use crate::events::RunEvent;
use crate::events::RunEventSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capacity of the task-to-coordinator channel.
pub const CONSENT_CHANNEL_CAPACITY: usize = 100;

/// Default coordinator deadline.
pub const DEFAULT_CONSENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client assertion type of `private_key_jwt`.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Pattern capturing the authorization code from a redirect location.
const CODE_PATTERN: &str = "code=([^&]*)&";

/// Account-access consent endpoint.
const ACCOUNT_CONSENT_ENDPOINT: &str = "/account-access-consents";

/// Default transaction window either side of now, in days.
const TRANSACTION_WINDOW_DAYS: i64 = 365;

// ============================================================================
// SECTION: Jobs and Items
// ============================================================================

/// Token acquisition job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentJob {
    /// Context key receiving the access token.
    pub token_name: String,
    /// Token family.
    pub family: TokenFamily,
    /// OAuth scope of the client-credential grant.
    pub scope: String,
    /// Consent-creation endpoint relative to the resource server.
    pub consent_endpoint: String,
    /// Consent body template; generated for account jobs.
    pub consent_body: Option<String>,
    /// Permission codes of account consents.
    pub permissions: Vec<String>,
}

impl ConsentJob {
    /// Creates an account-access job granting `permissions`.
    #[must_use]
    pub fn accounts(token_name: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            token_name: token_name.into(),
            family: TokenFamily::Account,
            scope: "accounts".to_string(),
            consent_endpoint: ACCOUNT_CONSENT_ENDPOINT.to_string(),
            consent_body: None,
            permissions,
        }
    }

    /// Creates a job from a suite's consent template.
    #[must_use]
    pub fn from_template(
        token_name: impl Into<String>,
        family: TokenFamily,
        scope: impl Into<String>,
        template: &ConsentTemplate,
    ) -> Self {
        Self {
            token_name: token_name.into(),
            family,
            scope: scope.into(),
            consent_endpoint: template.endpoint.clone(),
            consent_body: Some(template.body.clone()),
            permissions: Vec::new(),
        }
    }

    /// Builds the consent request body.
    fn body(&self, ctx: &Context) -> Result<String, ConsentError> {
        if let Some(template) = &self.consent_body {
            return Ok(ctx.replace(template)?);
        }
        if self.family != TokenFamily::Account {
            return Err(ConsentError::InvalidJob(format!(
                "{}: {} consent has no body template",
                self.token_name, self.family
            )));
        }
        if self.permissions.is_empty() {
            return Err(ConsentError::InvalidJob(format!(
                "{}: account consent without permissions",
                self.token_name
            )));
        }
        let now = OffsetDateTime::now_utc();
        let window = time::Duration::days(TRANSACTION_WINDOW_DAYS);
        let from = ctx
            .get_string(keys::TRANSACTION_FROM_DATE)
            .unwrap_or_else(|_| format_date_time(now - window));
        let to = ctx
            .get_string(keys::TRANSACTION_TO_DATE)
            .unwrap_or_else(|_| format_date_time(now + window));
        let body = json!({
            "Data": {
                "Permissions": self.permissions,
                "TransactionFromDateTime": from,
                "TransactionToDateTime": to,
            },
            "Risk": {},
        });
        Ok(body.to_string())
    }
}

/// Consent and the access token granted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentItem {
    /// Token name.
    pub token_name: String,
    /// Consent identifier issued by the ASPSP.
    pub consent_id: String,
    /// URL the PSU visited.
    pub consent_url: String,
    /// Granted access token.
    pub access_token: String,
}

// ============================================================================
// SECTION: Token Client
// ============================================================================

/// Client of the ASPSP token endpoint.
pub struct TokenClient {
    /// Dispatcher presenting the transport certificate.
    dispatcher: Arc<HttpDispatcher>,
    /// Token endpoint URL.
    token_endpoint: String,
    /// OAuth client identifier.
    client_id: String,
    /// Client secret for `client_secret_basic`.
    client_secret: Option<String>,
    /// Client authentication mode.
    auth_method: TokenEndpointAuthMethod,
    /// Signer for `private_key_jwt` assertions.
    signer: Option<Arc<SignerContext>>,
}

impl TokenClient {
    /// Creates a token client.
    #[must_use]
    pub fn new(
        dispatcher: Arc<HttpDispatcher>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        auth_method: TokenEndpointAuthMethod,
    ) -> Self {
        Self {
            dispatcher,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: None,
            auth_method,
            signer: None,
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.client_secret = secret;
        self
    }

    /// Sets the assertion signer.
    #[must_use]
    pub fn with_signer(mut self, signer: Option<Arc<SignerContext>>) -> Self {
        self.signer = signer;
        self
    }

    /// Returns the OAuth client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Builds an authenticated token request carrying `form`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::TokenEndpoint`] when the configured mode lacks
    /// its credential, or [`ConsentError::Crypto`] when signing fails.
    pub fn token_request(
        &self,
        mut form: Vec<(String, String)>,
    ) -> Result<PreparedRequest, ConsentError> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        match self.auth_method {
            TokenEndpointAuthMethod::ClientSecretBasic => {
                let secret = self.client_secret.as_deref().ok_or_else(|| {
                    ConsentError::TokenEndpoint(
                        "client_secret_basic requires a client secret".to_string(),
                    )
                })?;
                headers.push(("Authorization".to_string(), basic_auth_value(&self.client_id, secret)));
            }
            TokenEndpointAuthMethod::PrivateKeyJwt => {
                let signer = self.signer.as_deref().ok_or_else(|| {
                    ConsentError::TokenEndpoint(
                        "private_key_jwt requires a signing certificate".to_string(),
                    )
                })?;
                let assertion = client_assertion(&self.client_id, &self.token_endpoint, signer)?;
                form.push(("client_assertion_type".to_string(), CLIENT_ASSERTION_TYPE.to_string()));
                form.push(("client_assertion".to_string(), assertion));
            }
            TokenEndpointAuthMethod::TlsClientAuth => {
                form.push(("client_id".to_string(), self.client_id.clone()));
            }
        }
        Ok(PreparedRequest {
            test_id: "token-endpoint".to_string(),
            method: "POST".to_string(),
            endpoint: self.token_endpoint.clone(),
            headers,
            query: Vec::new(),
            form,
            body: None,
            dispatch: true,
        })
    }

    /// Runs a client-credential grant for `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when the request fails or no token is issued.
    pub async fn client_credentials(&self, scope: &str) -> Result<String, ConsentError> {
        let form = vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("scope".to_string(), scope.to_string()),
        ];
        self.request_token(form).await
    }

    /// Exchanges an authorization code for an access token.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when the request fails or no token is issued.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scope: &str,
    ) -> Result<String, ConsentError> {
        let form = vec![
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("scope".to_string(), scope.to_string()),
        ];
        self.request_token(form).await
    }

    /// Sends a token request and reads `access_token`.
    async fn request_token(&self, form: Vec<(String, String)>) -> Result<String, ConsentError> {
        let request = self.token_request(form)?;
        let response = self.dispatcher.send(&request).await?;
        if !(200 .. 300).contains(&response.status) {
            return Err(ConsentError::TokenEndpoint(format!(
                "{} returned status {}",
                self.token_endpoint, response.status
            )));
        }
        let document: Value = serde_json::from_str(&response.body)
            .map_err(|err| ConsentError::TokenEndpoint(format!("response is not JSON: {err}")))?;
        document
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ConsentError::TokenEndpoint("response has no access_token".to_string()))
    }
}

// ============================================================================
// SECTION: Authorization
// ============================================================================

/// PSU authorization of a consent URL.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Returns the authorization code for the consent behind `consent_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Authorization`] when no code is obtained.
    async fn authorize(&self, token_name: &str, consent_url: &str) -> Result<String, ConsentError>;
}

/// Extracts the authorization code from a redirect location.
#[must_use]
pub fn capture_code(location: &str) -> Option<String> {
    let pattern = Regex::new(CODE_PATTERN).ok()?;
    pattern
        .captures(location)
        .and_then(|captures| captures.get(1))
        .map(|code| code.as_str().to_string())
        .filter(|code| !code.is_empty())
}

/// Authorizer for ASPSPs that grant consents without PSU interaction.
///
/// # Invariants
/// - The dispatcher must not follow redirects.
pub struct HeadlessAuthorizer {
    /// Dispatcher used to visit the consent URL.
    dispatcher: Arc<HttpDispatcher>,
}

impl HeadlessAuthorizer {
    /// Creates a headless authorizer.
    #[must_use]
    pub const fn new(dispatcher: Arc<HttpDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Authorizer for HeadlessAuthorizer {
    async fn authorize(&self, token_name: &str, consent_url: &str) -> Result<String, ConsentError> {
        let request = PreparedRequest {
            test_id: token_name.to_string(),
            method: "GET".to_string(),
            endpoint: consent_url.to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            form: Vec::new(),
            body: None,
            dispatch: true,
        };
        let response: HttpResponse = self.dispatcher.send(&request).await?;
        if !(300 .. 400).contains(&response.status) {
            return Err(ConsentError::Authorization(format!(
                "expected a redirect, got status {}",
                response.status
            )));
        }
        let location = response
            .header("location")
            .ok_or_else(|| ConsentError::Authorization("redirect has no location".to_string()))?;
        capture_code(location)
            .ok_or_else(|| ConsentError::Authorization("redirect carries no code".to_string()))
    }
}

/// Code slot of the manual authorizer.
enum PendingCode {
    /// A task waits for the code.
    Waiting(oneshot::Sender<String>),
    /// The code arrived before the task asked for it.
    Ready(String),
}

/// Authorizer that waits for codes submitted by the operator.
///
/// Consent URLs reach the operator through the `consent-issued` event.
#[derive(Default)]
pub struct ManualAuthorizer {
    /// Codes by token name.
    pending: Mutex<BTreeMap<String, PendingCode>>,
}

impl ManualAuthorizer {
    /// Creates an authorizer with no pending consents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits the authorization code for `token_name`.
    ///
    /// Returns false when a code was already submitted.
    pub fn submit_code(&self, token_name: &str, code: impl Into<String>) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        match pending.remove(token_name) {
            Some(PendingCode::Waiting(sender)) if !sender.is_closed() => sender.send(code.into()).is_ok(),
            Some(ready @ PendingCode::Ready(_)) => {
                pending.insert(token_name.to_string(), ready);
                false
            }
            Some(PendingCode::Waiting(_)) | None => {
                pending.insert(token_name.to_string(), PendingCode::Ready(code.into()));
                true
            }
        }
    }
}

/// Clears a token's `Waiting` slot when its wait ends, including when the
/// waiting task is aborted.
struct WaitingSlot<'a> {
    /// Registry holding the slot.
    pending: &'a Mutex<BTreeMap<String, PendingCode>>,
    /// Token the slot belongs to.
    token_name: &'a str,
}

impl Drop for WaitingSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock()
            && matches!(pending.get(self.token_name), Some(PendingCode::Waiting(_)))
        {
            pending.remove(self.token_name);
            tracing::debug!(token_name = self.token_name, "abandoned code wait cleared");
        }
    }
}

#[async_trait]
impl Authorizer for ManualAuthorizer {
    async fn authorize(&self, token_name: &str, _consent_url: &str) -> Result<String, ConsentError> {
        let receiver = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| ConsentError::Authorization("code registry poisoned".to_string()))?;
            if let Some(PendingCode::Ready(code)) = pending.remove(token_name) {
                return Ok(code);
            }
            let (sender, receiver) = oneshot::channel();
            pending.insert(token_name.to_string(), PendingCode::Waiting(sender));
            receiver
        };
        let _slot = WaitingSlot {
            pending: &self.pending,
            token_name,
        };
        receiver
            .await
            .map_err(|_| ConsentError::Authorization(format!("{token_name}: code never submitted")))
    }
}

// ============================================================================
// SECTION: Consent Worker
// ============================================================================

/// Collaborators shared by every token task.
pub struct ConsentWorker {
    /// Token endpoint client.
    tokens: TokenClient,
    /// PSU authorization strategy.
    authorizer: Arc<dyn Authorizer>,
    /// Dispatcher for consent creation.
    dispatcher: Arc<HttpDispatcher>,
    /// Signer for consent URLs and payment consent bodies.
    signer: Option<Arc<SignerContext>>,
}

impl ConsentWorker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        tokens: TokenClient,
        authorizer: Arc<dyn Authorizer>,
        dispatcher: Arc<HttpDispatcher>,
        signer: Option<Arc<SignerContext>>,
    ) -> Self {
        Self {
            tokens,
            authorizer,
            dispatcher,
            signer,
        }
    }

    /// Creates the consent under a client-credential token and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when the body cannot be built, the request
    /// fails, or the response carries no `Data.ConsentId`.
    pub async fn create_consent(
        &self,
        job: &ConsentJob,
        access_token: &str,
        ctx: &Context,
    ) -> Result<String, ConsentError> {
        let content_type = "application/json";
        let body = canonical_body(&job.body(ctx)?, content_type)?;
        let mut request = PreparedRequest {
            test_id: job.token_name.clone(),
            method: "POST".to_string(),
            endpoint: job.consent_endpoint.clone(),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {access_token}")),
                ("Content-Type".to_string(), content_type.to_string()),
                ("Accept".to_string(), content_type.to_string()),
            ],
            query: Vec::new(),
            form: Vec::new(),
            body: None,
            dispatch: true,
        };
        if let Ok(financial_id) = ctx.get_string(keys::FAPI_FINANCIAL_ID) {
            request.set_header("x-fapi-financial-id", financial_id);
        }
        if job.family == TokenFamily::Payment {
            let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
            request.set_header("x-idempotency-key", format!("{}-{millis}", job.token_name));
            if let Some(signer) = &self.signer {
                request.set_header("x-jws-signature", build_detached_jws(&body, content_type, signer)?);
            }
        }
        request.body = Some(body);

        let response = self.dispatcher.send(&request).await?;
        if response.status != 200 && response.status != 201 {
            return Err(ConsentError::ConsentCreation(format!(
                "{} returned status {}",
                job.consent_endpoint, response.status
            )));
        }
        let document: Value = serde_json::from_str(&response.body)
            .map_err(|err| ConsentError::ConsentCreation(format!("response is not JSON: {err}")))?;
        document
            .pointer("/Data/ConsentId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ConsentError::ConsentCreation("response has no Data.ConsentId".to_string()))
    }

    /// Builds the URL the PSU visits for `consent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when a context value is missing or signing
    /// fails.
    pub fn consent_url(
        &self,
        job: &ConsentJob,
        consent_id: &str,
        ctx: &Context,
    ) -> Result<String, ConsentError> {
        let request = ConsentUrlRequest {
            authorization_endpoint: ctx.get_string(keys::AUTHORIZATION_ENDPOINT)?,
            client_id: self.tokens.client_id().to_string(),
            consent_id: consent_id.to_string(),
            scope: format!("openid {}", job.scope),
            redirect_uri: ctx.get_string(keys::REDIRECT_URL)?,
            audience: ctx.get_string(keys::AUDIENCE)?,
            issuer: ctx.get_string(keys::ISSUER).unwrap_or_default(),
            with_expiry: true,
            ..ConsentUrlRequest::default()
        };
        Ok(psu_consent_url(&request, self.signer.as_deref())?)
    }

    /// Runs the whole acquisition sequence for one job.
    async fn acquire(
        &self,
        job: &ConsentJob,
        ctx: &Context,
        updates: &mpsc::Sender<ConsentMessage>,
    ) -> Result<ConsentItem, ConsentError> {
        let credential = self.tokens.client_credentials(&job.scope).await?;
        let consent_id = self.create_consent(job, &credential, ctx).await?;
        let consent_url = self.consent_url(job, &consent_id, ctx)?;
        tracing::info!(token_name = %job.token_name, consent_id = %consent_id, "consent issued");
        let _ = updates
            .send(ConsentMessage::Issued {
                token_name: job.token_name.clone(),
                consent_id: consent_id.clone(),
                consent_url: consent_url.clone(),
            })
            .await;
        let code = self.authorizer.authorize(&job.token_name, &consent_url).await?;
        let redirect_uri = ctx.get_string(keys::REDIRECT_URL)?;
        let access_token = self.tokens.exchange_code(&code, &redirect_uri, &job.scope).await?;
        Ok(ConsentItem {
            token_name: job.token_name.clone(),
            consent_id,
            consent_url,
            access_token,
        })
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Message from a token task to the coordinator.
enum ConsentMessage {
    /// Consent created and awaiting authorization.
    Issued {
        /// Token name.
        token_name: String,
        /// Consent identifier.
        consent_id: String,
        /// PSU consent URL.
        consent_url: String,
    },
    /// Token granted.
    Granted(ConsentItem),
    /// Token acquisition failed.
    Failed {
        /// Token name.
        token_name: String,
        /// Failure.
        error: ConsentError,
    },
}

/// Result of one acquisition round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsentOutcome {
    /// Granted tokens in arrival order.
    pub granted: Vec<ConsentItem>,
    /// Failed tokens with their failure.
    pub failed: Vec<(String, String)>,
    /// Tokens still outstanding at the deadline or cancellation.
    pub outstanding: Vec<String>,
}

impl ConsentOutcome {
    /// Returns true when every requested token was granted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.outstanding.is_empty()
    }

    /// Writes every granted token into `ctx` under its token name, and its
    /// consent identifier under [`consent_id_key`].
    pub fn publish(&self, ctx: &mut Context) {
        for item in &self.granted {
            ctx.put_string(item.token_name.clone(), item.access_token.clone());
            ctx.put_string(consent_id_key(&item.token_name), item.consent_id.clone());
        }
    }
}

/// Returns the context key holding the consent identifier behind a token.
#[must_use]
pub fn consent_id_key(token_name: &str) -> String {
    format!("{token_name}_consent_id")
}

/// Concurrent token acquisition coordinator.
pub struct ConsentOrchestrator {
    /// Shared task collaborators.
    worker: Arc<ConsentWorker>,
    /// Event sink.
    sink: Arc<dyn RunEventSink>,
    /// Coordinator deadline.
    timeout: Duration,
}

impl ConsentOrchestrator {
    /// Creates a coordinator with the default deadline.
    #[must_use]
    pub fn new(worker: ConsentWorker, sink: Arc<dyn RunEventSink>) -> Self {
        Self {
            worker: Arc::new(worker),
            sink,
            timeout: DEFAULT_CONSENT_TIMEOUT,
        }
    }

    /// Sets the coordinator deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Acquires one token per job.
    ///
    /// Returns once every job reported, the deadline passed, or `cancel`
    /// turned true. Unfinished tasks are aborted.
    pub async fn acquire(
        &self,
        jobs: Vec<ConsentJob>,
        ctx: &Context,
        mut cancel: watch::Receiver<bool>,
    ) -> ConsentOutcome {
        let expected = jobs.len();
        let mut outcome = ConsentOutcome::default();
        let mut pending: BTreeSet<String> = jobs.iter().map(|job| job.token_name.clone()).collect();
        if *cancel.borrow() {
            outcome.outstanding = pending.into_iter().collect();
            return outcome;
        }

        let (sender, mut receiver) = mpsc::channel(CONSENT_CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();
        for job in jobs {
            let worker = Arc::clone(&self.worker);
            let updates = sender.clone();
            let scoped = ctx.snapshot();
            tasks.spawn(async move {
                let message = match worker.acquire(&job, &scoped, &updates).await {
                    Ok(item) => ConsentMessage::Granted(item),
                    Err(error) => ConsentMessage::Failed {
                        token_name: job.token_name.clone(),
                        error,
                    },
                };
                let _ = updates.send(message).await;
            });
        }
        drop(sender);

        let deadline = Instant::now() + self.timeout;
        let mut watching = true;
        while !pending.is_empty() {
            tokio::select! {
                received = timeout_at(deadline, receiver.recv()) => match received {
                    Ok(Some(message)) => self.handle(message, &mut pending, &mut outcome),
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(outstanding = pending.len(), "consent acquisition timed out");
                        break;
                    }
                },
                changed = cancel.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    } else if *cancel.borrow() {
                        tracing::info!(outstanding = pending.len(), "consent acquisition cancelled");
                        break;
                    }
                }
            }
        }
        tasks.abort_all();

        for token_name in &pending {
            self.sink.record(&RunEvent::TokenFailed {
                token_name: token_name.clone(),
                error: "token acquisition did not finish".to_string(),
            });
        }
        outcome.outstanding = pending.into_iter().collect();
        if outcome.granted.len() == expected {
            self.sink.record(&RunEvent::AcquiredAll { count: expected });
        }
        outcome
    }

    /// Applies one task message.
    fn handle(
        &self,
        message: ConsentMessage,
        pending: &mut BTreeSet<String>,
        outcome: &mut ConsentOutcome,
    ) {
        match message {
            ConsentMessage::Issued {
                token_name,
                consent_id,
                consent_url,
            } => self.sink.record(&RunEvent::ConsentIssued {
                token_name,
                consent_id,
                consent_url,
            }),
            ConsentMessage::Granted(item) => {
                tracing::info!(token_name = %item.token_name, "token granted");
                pending.remove(&item.token_name);
                self.sink.record(&RunEvent::TokenGranted {
                    token_name: item.token_name.clone(),
                });
                outcome.granted.push(item);
            }
            ConsentMessage::Failed { token_name, error } => {
                tracing::warn!(token_name = %token_name, error = %error, "token acquisition failed");
                pending.remove(&token_name);
                self.sink.record(&RunEvent::TokenFailed {
                    token_name: token_name.clone(),
                    error: error.to_string(),
                });
                outcome.failed.push((token_name, error.to_string()));
            }
        }
    }
}
