// crates/ob-conformance-model/src/http.rs
// ============================================================================
// Module: Prepared Requests and Responses
// Description: Transport-neutral request and response values.
// Dependencies: serde
// ============================================================================

//! [`PreparedRequest`] is the output of test-case preparation and the input
//! of dispatch. [`HttpResponse`] is what dispatch hands back to validation.
//! Neither type performs I/O.

use std::time::Duration;

use serde::Serialize;

/// Request ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedRequest {
    /// Test case that produced the request.
    pub test_id: String,
    /// HTTP method in upper case.
    pub method: String,
    /// Absolute URL or path relative to the resource server.
    pub endpoint: String,
    /// Request headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Form fields; sent form-encoded when non-empty and no body is set.
    pub form: Vec<(String, String)>,
    /// Request body.
    pub body: Option<String>,
    /// False when the case only prepares state and must not be sent.
    pub dispatch: bool,
}

impl PreparedRequest {
    /// Returns the first header value named `name`, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Inserts or replaces a header, ignoring case.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    /// Removes every header named `name`, ignoring case.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }
}

/// Response received from the ASPSP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers with lower-case names.
    pub headers: Vec<(String, String)>,
    /// Response body as text.
    pub body: String,
    /// Time from send to last body byte.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl HttpResponse {
    /// Creates a response with a status and body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Self::default()
        }
    }

    /// Adds a header, lower-casing its name.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Returns the first header value named `name`, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
