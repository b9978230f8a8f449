// crates/ob-conformance-runner/src/dispatch.rs
// ============================================================================
// Module: HTTP Dispatch
// Description: Sends prepared requests over a mutual-TLS client.
// Purpose: Own the reqwest client configured from the transport certificate
//          and translate between model requests and HTTP exchanges.
// Dependencies: reqwest, ob-conformance-crypto, url
// ============================================================================

//! ## Overview
//! The dispatcher never follows redirects: a `302` is a response like any
//! other, which is what PSU redirect capture relies on. Relative endpoints
//! (`/accounts`) are resolved against the resource server base URL. Query
//! parameters and form bodies are encoded here so the client needs no
//! optional reqwest features.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use ob_conformance_crypto::Certificate;
use ob_conformance_crypto::TrustPolicy;
use ob_conformance_crypto::new_tls_config;
use ob_conformance_model::HttpResponse;
use ob_conformance_model::PreparedRequest;
use reqwest::Method;
use reqwest::redirect::Policy;
use url::Url;
use url::form_urlencoded;

use crate::error::DispatchError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum response body size in bytes.
pub const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// HTTP client bound to one ASPSP.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    /// Underlying client.
    client: reqwest::Client,
    /// Base URL for relative endpoints, without trailing slash.
    base_url: String,
    /// Largest response body read before the exchange is abandoned.
    max_response_bytes: usize,
}

impl HttpDispatcher {
    /// Builds a dispatcher presenting `transport` during TLS handshakes.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Client`] when the TLS configuration or the
    /// client cannot be built.
    pub fn new(
        transport: &Certificate,
        policy: &TrustPolicy,
        base_url: &str,
    ) -> Result<Self, DispatchError> {
        let tls = new_tls_config(transport, policy)
            .map_err(|err| DispatchError::Client(err.to_string()))?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .redirect(Policy::none())
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| DispatchError::Client(err.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Builds a dispatcher that presents no client certificate, for plain
    /// HTTP targets such as local ASPSP simulators.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Client`] when the client cannot be built.
    pub fn without_identity(base_url: &str) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| DispatchError::Client(err.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }

    /// Replaces the response body limit.
    #[must_use]
    pub const fn with_response_limit(mut self, max_response_bytes: usize) -> Self {
        self.max_response_bytes = max_response_bytes;
        self
    }

    /// Returns the underlying client, for JWKS fetches.
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Returns the base URL for relative endpoints.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves an endpoint to an absolute URL with the request's query.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidEndpoint`] when the result is not a
    /// URL.
    pub fn resolve(&self, endpoint: &str, query: &[(String, String)]) -> Result<Url, DispatchError> {
        let absolute = if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            endpoint.to_string()
        };
        let mut url =
            Url::parse(&absolute).map_err(|err| DispatchError::InvalidEndpoint(format!("{absolute}: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Sends a prepared request and reads the whole response.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the request cannot be built or sent,
    /// or the body cannot be read. Bodies over the response limit fail with
    /// [`DispatchError::ResponseTooLarge`] without being buffered whole.
    pub async fn send(&self, request: &PreparedRequest) -> Result<HttpResponse, DispatchError> {
        let url = self.resolve(&request.endpoint, &request.query)?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|err| DispatchError::Transport(format!("method {}: {err}", request.method)))?;
        let mut builder = self.client.request(method, url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        } else if !request.form.is_empty() {
            if request.header("content-type").is_none() {
                builder = builder.header("content-type", "application/x-www-form-urlencoded");
            }
            builder = builder.body(encode_form(&request.form));
        }

        tracing::debug!(test_id = %request.test_id, method = %request.method, endpoint = %url, "dispatching");
        let started = Instant::now();
        let mut response = builder
            .send()
            .await
            .map_err(|err| DispatchError::Transport(format!("{url}: {err}")))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_ascii_lowercase(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();
        let bytes = self.read_body_limited(&url, &mut response).await?;
        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            elapsed: started.elapsed(),
        })
    }

    /// Reads the response body, giving up as soon as it passes the limit.
    async fn read_body_limited(
        &self,
        url: &Url,
        response: &mut reqwest::Response,
    ) -> Result<Vec<u8>, DispatchError> {
        let too_large = || DispatchError::ResponseTooLarge {
            url: url.to_string(),
            limit: self.max_response_bytes,
        };
        let limit = u64::try_from(self.max_response_bytes).unwrap_or(u64::MAX);
        if let Some(length) = response.content_length()
            && length > limit
        {
            return Err(too_large());
        }
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| DispatchError::Transport(format!("{url}: {err}")))?
        {
            let next_len = body.len().checked_add(chunk.len()).ok_or_else(too_large)?;
            if next_len > self.max_response_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Encodes form fields as `application/x-www-form-urlencoded`.
#[must_use]
pub fn encode_form(fields: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::HttpDispatcher;
    use super::encode_form;

    #[test]
    fn relative_endpoints_resolve_against_base() {
        let dispatcher =
            HttpDispatcher::with_client(reqwest::Client::new(), "https://rs.example.com/open-banking/v3.1/");
        let url = dispatcher
            .resolve("/accounts", &[("page".to_string(), "2".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "https://rs.example.com/open-banking/v3.1/accounts?page=2");
        let absolute = dispatcher.resolve("https://as.example.com/authorize?x=1", &[]).unwrap();
        assert_eq!(absolute.as_str(), "https://as.example.com/authorize?x=1");
        assert!(dispatcher.resolve("not a url", &[]).is_err());
    }

    #[test]
    fn form_fields_are_url_encoded() {
        let form = encode_form(&[
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("scope".to_string(), "openid accounts".to_string()),
        ]);
        assert_eq!(form, "grant_type=client_credentials&scope=openid+accounts");
    }
}
