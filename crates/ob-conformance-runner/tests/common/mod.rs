// crates/ob-conformance-runner/tests/common/mod.rs
// ============================================================================
// Module: Fake ASPSP
// Description: Local `tiny_http` server standing in for an ASPSP.
// ============================================================================

//! Serves the token, consent, authorization, and account endpoints a run
//! touches. Consent ids are `aac-1`, `aac-2`, ... in creation order; the
//! authorization endpoint redirects with `code=code-<consent id>` and the
//! token endpoint exchanges that code for `at-<consent id>`. `GET /large`
//! and `GET /large-stream` return [`LARGE_BODY_BYTES`] of filler, the first
//! with a `Content-Length` and the second chunked.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared test helpers; not every test uses every helper."
)]

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use ob_conformance_config::TokenEndpointAuthMethod;
use ob_conformance_core::ApiVersion;
use ob_conformance_core::Context;
use ob_conformance_core::keys;
use ob_conformance_model::SchemaRegistry;
use ob_conformance_model::Suite;
use ob_conformance_runner::Authorizer;
use ob_conformance_runner::ConsentOrchestrator;
use ob_conformance_runner::ConsentWorker;
use ob_conformance_runner::DaemonController;
use ob_conformance_runner::HeadlessAuthorizer;
use ob_conformance_runner::HttpDispatcher;
use ob_conformance_runner::MemoryEventSink;
use ob_conformance_runner::RunEventSink;
use ob_conformance_runner::RunOrchestrator;
use ob_conformance_runner::RunParts;
use ob_conformance_runner::RunSettings;
use ob_conformance_runner::TokenClient;
use serde_json::json;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;
use tiny_http::StatusCode;
use url::form_urlencoded;

/// Account identifier served by the fake.
pub const ACCOUNT_ID: &str = "22289";

/// Redirect URL registered for the test client.
pub const REDIRECT_URL: &str = "https://tpp.example.com/cb";

/// Size of the oversized bodies.
pub const LARGE_BODY_BYTES: usize = 64 * 1024;

/// What `GET /accounts` lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accounts {
    /// One account, [`ACCOUNT_ID`].
    One,
    /// An empty `Data.Account` array.
    Empty,
}

/// Request observed by the fake.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Path and query.
    pub url: String,
    /// Headers with lower-case names.
    pub headers: BTreeMap<String, String>,
    /// Body text.
    pub body: String,
}

impl RecordedRequest {
    /// Returns a form field of the body.
    pub fn form(&self, name: &str) -> Option<String> {
        form_urlencoded::parse(self.body.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Running fake ASPSP.
pub struct FakeAspsp {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Requests in arrival order.
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Stop flag of the server thread.
    stop: Arc<AtomicBool>,
}

impl FakeAspsp {
    /// Starts the fake on an ephemeral port.
    pub fn start() -> Self {
        Self::start_with(Accounts::One)
    }

    /// Starts the fake with the given account listing.
    pub fn start_with(accounts: Accounts) -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let consents = AtomicUsize::new(0);
        let recorded = Arc::clone(&requests);
        let stopped = Arc::clone(&stop);
        thread::spawn(move || {
            while !stopped.load(Ordering::SeqCst) {
                let Ok(Some(mut request)) = server.recv_timeout(Duration::from_millis(50)) else {
                    continue;
                };
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let observed = RecordedRequest {
                    method: request.method().as_str().to_string(),
                    url: request.url().to_string(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|header| {
                            (header.field.as_str().as_str().to_ascii_lowercase(), header.value.to_string())
                        })
                        .collect(),
                    body,
                };
                if observed.url == "/large-stream" {
                    recorded.lock().unwrap().push(observed);
                    let filler = Cursor::new(vec![b' '; LARGE_BODY_BYTES]);
                    let _ = request.respond(Response::new(StatusCode(200), Vec::new(), filler, None, None));
                    continue;
                }
                let (status, headers, payload) = route(&observed, &consents, accounts);
                recorded.lock().unwrap().push(observed);
                let mut response = Response::from_string(payload).with_status_code(status);
                for (name, value) in headers {
                    response = response.with_header(Header::from_bytes(name, value).unwrap());
                }
                let _ = request.respond(response);
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            requests,
            stop,
        }
    }

    /// Returns the requests whose path starts with `prefix`.
    pub fn requests_to(&self, method: &str, prefix: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.method == method && request.url.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Builds a run context pointing at the fake.
    pub fn context(&self) -> Context {
        let mut ctx = Context::new();
        ctx.put_string(keys::CLIENT_ID, "client-1");
        ctx.put_string(keys::CLIENT_SECRET, "secret-1");
        ctx.put_string(keys::TOKEN_ENDPOINT, format!("{}/token", self.base_url));
        ctx.put_string(keys::AUTHORIZATION_ENDPOINT, format!("{}/authorize", self.base_url));
        ctx.put_string(keys::REDIRECT_URL, REDIRECT_URL);
        ctx.put_string(keys::RESOURCE_BASE_URL, self.base_url.clone());
        ctx.put_string(keys::AUDIENCE, self.base_url.clone());
        ctx.put_string(keys::ISSUER, "client-1");
        ctx
    }

    /// Builds an orchestrator with a headless authorizer.
    pub fn orchestrator(
        &self,
        sink: &Arc<MemoryEventSink>,
        daemon: &Arc<DaemonController>,
        parallel: bool,
    ) -> RunOrchestrator {
        let dispatcher = Arc::new(HttpDispatcher::without_identity(&self.base_url).unwrap());
        let authorizer: Arc<dyn Authorizer> = Arc::new(HeadlessAuthorizer::new(Arc::clone(&dispatcher)));
        self.orchestrator_with(sink, daemon, parallel, authorizer, Duration::from_secs(10))
    }

    /// Builds an orchestrator with an explicit authorizer and deadline.
    pub fn orchestrator_with(
        &self,
        sink: &Arc<MemoryEventSink>,
        daemon: &Arc<DaemonController>,
        parallel: bool,
        authorizer: Arc<dyn Authorizer>,
        timeout: Duration,
    ) -> RunOrchestrator {
        let dispatcher = Arc::new(HttpDispatcher::without_identity(&self.base_url).unwrap());
        let event_sink: Arc<dyn RunEventSink> = Arc::clone(sink) as Arc<dyn RunEventSink>;
        let consent = self.consent(&dispatcher, authorizer, &event_sink).with_timeout(timeout);
        RunOrchestrator::new(RunParts {
            dispatcher,
            signer: None,
            consent,
            schemas: SchemaRegistry::new(None),
            sink: event_sink,
            daemon: Arc::clone(daemon),
            settings: RunSettings {
                parallel,
                fetch_schemas: false,
                jwks_uri: None,
                api_version: ApiVersion::new(3, 1, 4),
            },
        })
    }

    /// Builds a consent orchestrator using `client_secret_basic`.
    pub fn consent(
        &self,
        dispatcher: &Arc<HttpDispatcher>,
        authorizer: Arc<dyn Authorizer>,
        sink: &Arc<dyn RunEventSink>,
    ) -> ConsentOrchestrator {
        let tokens = TokenClient::new(
            Arc::clone(dispatcher),
            format!("{}/token", self.base_url),
            "client-1",
            TokenEndpointAuthMethod::ClientSecretBasic,
        )
        .with_secret(Some("secret-1".to_string()));
        let worker = ConsentWorker::new(tokens, authorizer, Arc::clone(dispatcher), None);
        ConsentOrchestrator::new(worker, Arc::clone(sink))
    }
}

impl Drop for FakeAspsp {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Routes one request to its canned response.
fn route(
    request: &RecordedRequest,
    consents: &AtomicUsize,
    accounts: Accounts,
) -> (u16, Vec<(&'static str, String)>, String) {
    let json_header = vec![("Content-Type", "application/json".to_string())];
    let path = request.url.split('?').next().unwrap_or_default();
    let bearer = request.headers.get("authorization").cloned().unwrap_or_default();
    match (request.method.as_str(), path) {
        ("POST", "/token") => match request.form("grant_type").as_deref() {
            Some("client_credentials") => {
                (200, json_header, json!({"access_token": "cc-token", "token_type": "Bearer"}).to_string())
            }
            Some("authorization_code") => {
                let code = request.form("code").unwrap_or_default();
                match code.strip_prefix("code-") {
                    Some(consent_id) => (
                        200,
                        json_header,
                        json!({"access_token": format!("at-{consent_id}"), "token_type": "Bearer"}).to_string(),
                    ),
                    None => (400, json_header, json!({"error": "invalid_grant"}).to_string()),
                }
            }
            _ => (400, json_header, json!({"error": "unsupported_grant_type"}).to_string()),
        },
        ("POST", "/account-access-consents" | "/domestic-payment-consents") if bearer == "Bearer cc-token" => {
            let id = consents.fetch_add(1, Ordering::SeqCst) + 1;
            (201, json_header, json!({"Data": {"ConsentId": format!("aac-{id}"), "Status": "AwaitingAuthorisation"}}).to_string())
        }
        ("GET", "/authorize") => {
            let state = form_urlencoded::parse(request.url.split_once('?').map_or("", |(_, query)| query).as_bytes())
                .find(|(key, _)| key == "state")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            let location = format!("{REDIRECT_URL}#code=code-{state}&state={state}");
            (302, vec![("Location", location)], String::new())
        }
        ("GET", _) if !bearer.starts_with("Bearer at-") => {
            (401, json_header, json!({"Code": "UK.OBIE.Unauthorised"}).to_string())
        }
        ("GET", "/large") => (200, json_header, " ".repeat(LARGE_BODY_BYTES)),
        ("GET", "/accounts") => {
            let listed = match accounts {
                Accounts::One => json!([{"AccountId": ACCOUNT_ID, "Currency": "GBP"}]),
                Accounts::Empty => json!([]),
            };
            (
                200,
                vec![("Content-Type", "application/json".to_string()), ("x-fapi-interaction-id", "93bac548".to_string())],
                json!({"Data": {"Account": listed}}).to_string(),
            )
        }
        ("GET", path) if path == format!("/accounts/{ACCOUNT_ID}") => (
            200,
            json_header,
            json!({"Data": {"Account": [{"AccountId": ACCOUNT_ID, "Nickname": "Bills"}]}}).to_string(),
        ),
        ("GET", path) if path == format!("/accounts/{ACCOUNT_ID}/balances") => (
            200,
            json_header,
            json!({"Data": {"Balance": [{"AccountId": ACCOUNT_ID, "Amount": {"Amount": "1230.00", "Currency": "GBP"}}]}}).to_string(),
        ),
        _ => (404, json_header, json!({"Code": "UK.OBIE.NotFound"}).to_string()),
    }
}

/// Parses a suite document.
pub fn suite(value: serde_json::Value) -> Suite {
    Suite::from_json(&value.to_string()).unwrap()
}

/// Account suite whose three cases pass against the fake.
pub fn account_suite(id: &str) -> Suite {
    suite(json!({
        "id": id,
        "name": "Account basics",
        "specification": "account-transaction-v3.1",
        "testCases": [
            {
                "id": "OB-301-ACC-811741",
                "name": "Get accounts",
                "input": {
                    "method": "GET",
                    "endpoint": "/accounts",
                    "headers": {"Authorization": "Bearer $access_token"}
                },
                "expect": {
                    "statusCode": 200,
                    "matches": [{"header": "x-fapi-interaction-id"}],
                    "contextPut": [{"json": "Data.Account.0.AccountId", "name": "FirstAccount"}]
                }
            },
            {
                "id": "OB-301-ACC-120382",
                "name": "Get account",
                "input": {
                    "method": "GET",
                    "endpoint": "/accounts/$AccountId",
                    "headers": {"Authorization": "Bearer $access_token"}
                },
                "expect": {
                    "statusCode": 200,
                    "matches": [{"json": "Data.Account.0.Nickname", "value": "Bills"}]
                }
            },
            {
                "id": "OB-301-ACC-413255",
                "name": "Get balances",
                "input": {
                    "method": "GET",
                    "endpoint": "/accounts/$FirstAccount/balances",
                    "headers": {"Authorization": "Bearer $access_token"}
                },
                "expect": {"statusCode": 200}
            }
        ]
    }))
}
