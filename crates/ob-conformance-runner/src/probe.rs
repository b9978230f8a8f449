// crates/ob-conformance-runner/src/probe.rs
// ============================================================================
// Module: Dynamic Resource Probe
// Description: Discovers account and statement identifiers under a token.
// Purpose: Supply `$AccountId` and `$StatementId` to account suites.
// Dependencies: ob-conformance-model, serde_json
// ============================================================================

//! ## Overview
//! The first case that runs under an `account*` token triggers a
//! `GET /accounts` with that token. The first account's identifier is cached
//! per token name and written into every later case's context. A statement
//! identifier is looked up the same way; its absence is not an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use ob_conformance_core::Context;
use ob_conformance_core::keys;
use ob_conformance_model::PreparedRequest;
use ob_conformance_model::jsonpath::select_first;
use serde_json::Value;

use crate::dispatch::HttpDispatcher;
use crate::error::ProbeError;

/// Account listing endpoint.
const ACCOUNTS_ENDPOINT: &str = "/accounts";

/// Identifiers discovered under one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedResources {
    /// First account identifier.
    pub account_id: String,
    /// First statement identifier of that account, when any.
    pub statement_id: Option<String>,
}

impl ProbedResources {
    /// Writes the identifiers into `ctx` unless the case overrides them.
    pub fn apply(&self, ctx: &mut Context, overridden: &[&str]) {
        if !overridden.contains(&keys::ACCOUNT_ID) {
            ctx.put_string(keys::ACCOUNT_ID, self.account_id.clone());
        }
        if let Some(statement_id) = &self.statement_id
            && !overridden.contains(&keys::STATEMENT_ID)
        {
            ctx.put_string(keys::STATEMENT_ID, statement_id.clone());
        }
    }
}

/// Probe with a per-token cache.
pub struct ResourceProbe {
    /// Dispatcher bound to the resource server.
    dispatcher: Arc<HttpDispatcher>,
    /// Discovered identifiers by token name.
    discovered: Mutex<BTreeMap<String, ProbedResources>>,
}

impl ResourceProbe {
    /// Creates a probe with an empty cache.
    #[must_use]
    pub fn new(dispatcher: Arc<HttpDispatcher>) -> Self {
        Self {
            dispatcher,
            discovered: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the cached identifiers for `token_name`.
    #[must_use]
    pub fn cached(&self, token_name: &str) -> Option<ProbedResources> {
        self.discovered.lock().ok().and_then(|cache| cache.get(token_name).cloned())
    }

    /// Returns the identifiers for `token_name`, probing on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the token is not in `ctx`, the listing
    /// fails, or it holds no account.
    pub async fn resources(
        &self,
        token_name: &str,
        ctx: &Context,
    ) -> Result<ProbedResources, ProbeError> {
        if let Some(resources) = self.cached(token_name) {
            return Ok(resources);
        }
        let token = ctx.get_string(token_name)?;
        let accounts = self.get_json(ACCOUNTS_ENDPOINT, &token, ctx).await?;
        let account_id = select_first(&accounts, "Data.Account.0.AccountId")
            .ok()
            .flatten()
            .and_then(|value| value.as_str().map(str::to_string))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProbeError::NoAccounts(ACCOUNTS_ENDPOINT.to_string()))?;

        let statements_endpoint = format!("{ACCOUNTS_ENDPOINT}/{account_id}/statements");
        let statement_id = match self.get_json(&statements_endpoint, &token, ctx).await {
            Ok(statements) => select_first(&statements, "Data.Statement.0.StatementId")
                .ok()
                .flatten()
                .and_then(|value| value.as_str().map(str::to_string)),
            Err(err) => {
                tracing::debug!(token_name, error = %err, "statement probe skipped");
                None
            }
        };

        tracing::info!(token_name, account_id = %account_id, "account probed");
        let resources = ProbedResources {
            account_id,
            statement_id,
        };
        if let Ok(mut cache) = self.discovered.lock() {
            cache.entry(token_name.to_string()).or_insert_with(|| resources.clone());
        }
        Ok(resources)
    }

    /// Sends an authorized GET and parses the JSON body.
    async fn get_json(
        &self,
        endpoint: &str,
        token: &str,
        ctx: &Context,
    ) -> Result<Value, ProbeError> {
        let mut request = PreparedRequest {
            test_id: "resource-probe".to_string(),
            method: "GET".to_string(),
            endpoint: endpoint.to_string(),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {token}")),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            query: Vec::new(),
            form: Vec::new(),
            body: None,
            dispatch: true,
        };
        if let Ok(financial_id) = ctx.get_string(keys::FAPI_FINANCIAL_ID) {
            request.set_header("x-fapi-financial-id", financial_id);
        }
        let response = self.dispatcher.send(&request).await?;
        if response.status != 200 {
            return Err(ProbeError::Status {
                endpoint: endpoint.to_string(),
                status: response.status,
            });
        }
        serde_json::from_str(&response.body).map_err(|_| ProbeError::NoAccounts(endpoint.to_string()))
    }
}
