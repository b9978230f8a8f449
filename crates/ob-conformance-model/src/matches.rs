// crates/ob-conformance-model/src/matches.rs
// ============================================================================
// Module: Response Matches
// Description: Typed predicates over HTTP responses.
// Purpose: Decode suite match declarations into predicates and evaluate them,
//          yielding the value to store under the match's context name.
// Dependencies: regex, serde, serde_json
// ============================================================================

//! ## Overview
//! Suites declare matches as flat objects. The combination of fields selects
//! the predicate:
//!
//! | Fields | Predicate |
//! |--------|-----------|
//! | `status` | status equality |
//! | `headerPresent` | header present |
//! | `header` + `value` | header equality |
//! | `header` + `regex` | header regex |
//! | `header` | header present, value extracted |
//! | `json` + `count` | JSON path count |
//! | `json` + `value` | JSON path value equality |
//! | `json` + `regex` | JSON path regex |
//! | `json` | JSON path present, value extracted |
//! | `regex` | body regex |
//! | `bodyLength` | body length |
//!
//! String values are substituted from the context before comparison. Regex
//! predicates extract the first capture group when the pattern has one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use ob_conformance_core::Context;
use ob_conformance_core::ContextValue;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::http::HttpResponse;
use crate::jsonpath::select_values;

// ============================================================================
// SECTION: Declarations
// ============================================================================

/// Flat match declaration as written in suite files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MatchSpec {
    /// Human-readable description.
    #[serde(default)]
    description: Option<String>,
    /// Context key receiving the matched value.
    #[serde(default, alias = "name")]
    context_name: Option<String>,
    /// Expected status code.
    #[serde(default)]
    status: Option<u16>,
    /// Header selector.
    #[serde(default)]
    header: Option<String>,
    /// Header that must be present.
    #[serde(default)]
    header_present: Option<String>,
    /// Expected value.
    #[serde(default)]
    value: Option<Value>,
    /// Regular expression.
    #[serde(default)]
    regex: Option<String>,
    /// JSON path selector.
    #[serde(default)]
    json: Option<String>,
    /// Expected element count.
    #[serde(default)]
    count: Option<usize>,
    /// Expected body length in bytes.
    #[serde(default)]
    body_length: Option<usize>,
}

/// Predicate applied to a response.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Status code equals the value.
    Status(u16),
    /// Header is present; its value is extracted.
    HeaderPresent(String),
    /// Header equals a value.
    HeaderValue {
        /// Header name.
        header: String,
        /// Expected value template.
        value: String,
    },
    /// Header matches a regex.
    HeaderRegex {
        /// Header name.
        header: String,
        /// Pattern.
        regex: Regex,
    },
    /// Body matches a regex.
    BodyRegex(Regex),
    /// Body has an exact byte length.
    BodyLength(usize),
    /// JSON path selects at least one value.
    JsonPresent(String),
    /// JSON path selects a number of elements.
    JsonCount {
        /// Selector.
        path: String,
        /// Expected count.
        count: usize,
    },
    /// JSON path value equals the expectation.
    JsonValue {
        /// Selector.
        path: String,
        /// Expected value; strings are templates.
        value: Value,
    },
    /// JSON path value matches a regex.
    JsonRegex {
        /// Selector.
        path: String,
        /// Pattern.
        regex: Regex,
    },
}

/// Typed response predicate with an optional context name.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "MatchSpec")]
pub struct Match {
    /// Human-readable description.
    pub description: Option<String>,
    /// Context key receiving the matched value.
    pub context_name: Option<String>,
    /// Predicate to apply.
    pub predicate: Predicate,
}

impl TryFrom<MatchSpec> for Match {
    type Error = String;

    fn try_from(spec: MatchSpec) -> Result<Self, Self::Error> {
        let compile =
            |pattern: &str| Regex::new(pattern).map_err(|err| format!("invalid regex {pattern}: {err}"));
        let predicate = if let Some(status) = spec.status {
            Predicate::Status(status)
        } else if let Some(header) = spec.header_present {
            Predicate::HeaderPresent(header)
        } else if let Some(header) = spec.header {
            match (spec.regex, spec.value) {
                (Some(pattern), _) => Predicate::HeaderRegex {
                    header,
                    regex: compile(&pattern)?,
                },
                (None, Some(value)) => Predicate::HeaderValue {
                    header,
                    value: render_expected(&value),
                },
                (None, None) => Predicate::HeaderPresent(header),
            }
        } else if let Some(path) = spec.json {
            match (spec.count, spec.regex, spec.value) {
                (Some(count), _, _) => Predicate::JsonCount { path, count },
                (None, Some(pattern), _) => Predicate::JsonRegex {
                    path,
                    regex: compile(&pattern)?,
                },
                (None, None, Some(value)) => Predicate::JsonValue { path, value },
                (None, None, None) => Predicate::JsonPresent(path),
            }
        } else if let Some(pattern) = spec.regex {
            Predicate::BodyRegex(compile(&pattern)?)
        } else if let Some(length) = spec.body_length {
            Predicate::BodyLength(length)
        } else {
            return Err("match declares no predicate".to_string());
        };
        Ok(Self {
            description: spec.description,
            context_name: spec.context_name,
            predicate,
        })
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

impl Match {
    /// Creates a match without description or context name.
    #[must_use]
    pub const fn new(predicate: Predicate) -> Self {
        Self {
            description: None,
            context_name: None,
            predicate,
        }
    }

    /// Names the context key that receives the matched value.
    #[must_use]
    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = Some(name.into());
        self
    }

    /// Returns the selector used in failure messages.
    #[must_use]
    pub fn selector(&self) -> String {
        match &self.predicate {
            Predicate::Status(_) => "status".to_string(),
            Predicate::HeaderPresent(header)
            | Predicate::HeaderValue { header, .. }
            | Predicate::HeaderRegex { header, .. } => format!("header {header}"),
            Predicate::BodyRegex(_) => "body regex".to_string(),
            Predicate::BodyLength(_) => "body length".to_string(),
            Predicate::JsonPresent(path)
            | Predicate::JsonCount { path, .. }
            | Predicate::JsonValue { path, .. }
            | Predicate::JsonRegex { path, .. } => format!("json {path}"),
        }
    }

    /// Applies the predicate and returns the matched value.
    ///
    /// `body` is the response body parsed as JSON, when it parses.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn evaluate(
        &self,
        response: &HttpResponse,
        body: Option<&Value>,
        ctx: &Context,
    ) -> Result<ContextValue, String> {
        match &self.predicate {
            Predicate::Status(expected) => {
                if response.status == *expected {
                    Ok(ContextValue::Int(i64::from(response.status)))
                } else {
                    Err(format!("expected status {expected}, got {}", response.status))
                }
            }
            Predicate::HeaderPresent(header) => response
                .header(header)
                .map(ContextValue::from)
                .ok_or_else(|| "header missing".to_string()),
            Predicate::HeaderValue { header, value } => {
                let actual = response.header(header).ok_or_else(|| "header missing".to_string())?;
                let expected = ctx.replace(value).map_err(|err| err.to_string())?;
                if actual == expected {
                    Ok(ContextValue::from(actual))
                } else {
                    Err(format!("expected \"{expected}\", got \"{actual}\""))
                }
            }
            Predicate::HeaderRegex { header, regex } => {
                let actual = response.header(header).ok_or_else(|| "header missing".to_string())?;
                capture(regex, actual)
            }
            Predicate::BodyRegex(regex) => capture(regex, &response.body),
            Predicate::BodyLength(expected) => {
                let actual = response.body.len();
                if actual == *expected {
                    Ok(ContextValue::Int(i64::try_from(actual).unwrap_or(i64::MAX)))
                } else {
                    Err(format!("expected body length {expected}, got {actual}"))
                }
            }
            Predicate::JsonPresent(path) => {
                let value = first_value(body, path)?;
                Ok(ContextValue::from(value))
            }
            Predicate::JsonCount { path, count } => {
                let document = body.ok_or_else(|| "body is not JSON".to_string())?;
                let values = select_values(document, path)?;
                let actual = match values.as_slice() {
                    [Value::Array(items)] => items.len(),
                    other => other.len(),
                };
                if actual == *count {
                    Ok(ContextValue::Int(i64::try_from(actual).unwrap_or(i64::MAX)))
                } else {
                    Err(format!("expected {count} elements, got {actual}"))
                }
            }
            Predicate::JsonValue { path, value } => {
                let actual = first_value(body, path)?;
                let expected = match value {
                    Value::String(template) => {
                        Value::String(ctx.replace(template).map_err(|err| err.to_string())?)
                    }
                    other => other.clone(),
                };
                if actual == expected || render_expected(&actual) == render_expected(&expected) {
                    Ok(ContextValue::from(actual))
                } else {
                    Err(format!("expected {expected}, got {actual}"))
                }
            }
            Predicate::JsonRegex { path, regex } => {
                let actual = first_value(body, path)?;
                capture(regex, &render_expected(&actual))
            }
        }
    }
}

/// Returns the first value selected by `path`.
fn first_value(body: Option<&Value>, path: &str) -> Result<Value, String> {
    let document = body.ok_or_else(|| "body is not JSON".to_string())?;
    select_values(document, path)?
        .into_iter()
        .next()
        .ok_or_else(|| "path selects nothing".to_string())
}

/// Applies `regex` to `text`, returning the first capture group or the
/// whole match.
fn capture(regex: &Regex, text: &str) -> Result<ContextValue, String> {
    let captures = regex
        .captures(text)
        .ok_or_else(|| format!("\"{text}\" does not match {}", regex.as_str()))?;
    let matched = captures.get(1).or_else(|| captures.get(0)).map_or("", |m| m.as_str());
    Ok(ContextValue::from(matched))
}

/// Renders a JSON value as comparison text; strings are unquoted.
fn render_expected(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests;
