// crates/ob-conformance-model/src/schema.rs
// ============================================================================
// Module: Response Schema Validation
// Description: OpenAPI 3 and Swagger 2 response schema checks.
// Purpose: Locate the documented operation for a request and validate the
//          response body against the schema declared for its status code.
// Dependencies: jsonschema, serde_json, serde_yaml, tracing
// ============================================================================

//! ## Overview
//! A [`SchemaValidator`] owns one API definition document. Operations are
//! located by method and path template: templates are matched against the
//! request path from the right, so server prefixes and base paths need not
//! be known; `{Param}` segments match any segment. When several templates
//! match, the longest wins, then the one with the most literal segments.
//!
//! The response schema is compiled as Draft 4 with the document's
//! `definitions` and `components` available to local `$ref`s. Each
//! violation is reported separately.
//!
//! [`SchemaRegistry`] maps specification identifiers to loaded documents.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use jsonschema::Draft;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::error::SchemaError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum size of an API definition document.
pub const MAX_SCHEMA_BYTES: usize = 16 * 1024 * 1024;

/// Maximum `$ref` hops followed when resolving response objects.
const MAX_REF_DEPTH: usize = 8;

/// HTTP methods that may key an operation in a path item.
const OPERATION_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch"];

/// File extensions probed by the registry, in order.
const SCHEMA_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Response validator over one API definition document.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    /// Parsed document.
    document: Value,
}

impl SchemaValidator {
    /// Wraps a parsed API definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] when the document has no `paths` object.
    pub fn new(document: Value) -> Result<Self, SchemaError> {
        if !document.get("paths").is_some_and(Value::is_object) {
            return Err(SchemaError::Parse("document has no paths object".to_string()));
        }
        Ok(Self { document })
    }

    /// Parses JSON or YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] when the text is neither.
    pub fn from_text(text: &str) -> Result<Self, SchemaError> {
        if text.len() > MAX_SCHEMA_BYTES {
            return Err(SchemaError::Parse("document exceeds size limit".to_string()));
        }
        let document = match serde_json::from_str::<Value>(text) {
            Ok(document) => document,
            Err(_) => serde_yaml::from_str::<Value>(text)
                .map_err(|err| SchemaError::Parse(err.to_string()))?,
        };
        Self::new(document)
    }

    /// Loads a document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Io`] when the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let text = fs::read_to_string(path)
            .map_err(|err| SchemaError::Io(format!("{}: {err}", path.display())))?;
        Self::from_text(&text)
    }

    /// Validates a response body and returns one message per violation.
    ///
    /// An empty list means the body conforms. Responses documented without
    /// a body schema always conform.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when no operation matches or the schema does
    /// not compile.
    pub fn validate(
        &self,
        method: &str,
        endpoint: &str,
        status: u16,
        body: &str,
    ) -> Result<Vec<String>, SchemaError> {
        let operation = self.find_operation(method, endpoint)?;
        let Some(responses) = operation.get("responses").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        let Some(response) = responses.get(&status.to_string()).or_else(|| responses.get("default"))
        else {
            return Ok(vec![format!("status {status} is not documented")]);
        };
        let response = self.resolve(response)?;
        let Some(schema) = response_schema(response) else {
            return Ok(Vec::new());
        };
        let instance: Value = match serde_json::from_str(body) {
            Ok(instance) => instance,
            Err(err) => return Ok(vec![format!("body is not JSON: {err}")]),
        };

        let mut root = Map::new();
        root.insert("allOf".to_string(), json!([schema]));
        for key in ["definitions", "components"] {
            if let Some(section) = self.document.get(key) {
                root.insert(key.to_string(), section.clone());
            }
        }
        let validator = jsonschema::options()
            .with_draft(Draft::Draft4)
            .build(&Value::Object(root))
            .map_err(|err| SchemaError::Compile(err.to_string()))?;
        Ok(validator.iter_errors(&instance).map(|err| err.to_string()).collect())
    }

    /// Locates the operation object for a request.
    fn find_operation(&self, method: &str, endpoint: &str) -> Result<&Value, SchemaError> {
        let not_found = || SchemaError::OperationNotFound {
            method: method.to_ascii_uppercase(),
            endpoint: endpoint.to_string(),
        };
        let segments = path_segments(endpoint);
        let method = method.to_ascii_lowercase();
        if !OPERATION_METHODS.contains(&method.as_str()) {
            return Err(not_found());
        }
        let paths = self.document.get("paths").and_then(Value::as_object).ok_or_else(not_found)?;

        let mut best: Option<((usize, usize), &Value)> = None;
        for (template, item) in paths {
            let Some(operation) = item.get(&method) else {
                continue;
            };
            let Some(rank) = template_rank(template, &segments) else {
                continue;
            };
            if best.as_ref().is_none_or(|(current, _)| rank > *current) {
                best = Some((rank, operation));
            }
        }
        best.map(|(_, operation)| operation).ok_or_else(not_found)
    }

    /// Follows local `$ref`s until a concrete object is reached.
    fn resolve<'a>(&'a self, mut value: &'a Value) -> Result<&'a Value, SchemaError> {
        for _ in 0 .. MAX_REF_DEPTH {
            let Some(reference) = value.get("$ref").and_then(Value::as_str) else {
                return Ok(value);
            };
            let pointer = reference
                .strip_prefix('#')
                .ok_or_else(|| SchemaError::Parse(format!("non-local reference {reference}")))?;
            value = self
                .document
                .pointer(pointer)
                .ok_or_else(|| SchemaError::Parse(format!("unresolved reference {reference}")))?;
        }
        Err(SchemaError::Parse("reference chain too deep".to_string()))
    }
}

/// Returns the body schema of a Swagger 2 or OpenAPI 3 response object.
fn response_schema(response: &Value) -> Option<Value> {
    if let Some(schema) = response.get("schema") {
        return Some(schema.clone());
    }
    let content = response.get("content")?.as_object()?;
    content
        .iter()
        .find(|(media, _)| media.contains("json"))
        .and_then(|(_, entry)| entry.get("schema"))
        .cloned()
}

/// Splits a URL or path into path segments, dropping scheme, host and query.
fn path_segments(endpoint: &str) -> Vec<&str> {
    let without_query = endpoint.split(['?', '#']).next().unwrap_or_default();
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |index| &rest[index ..]),
        None => without_query,
    };
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Ranks a path template against request segments, matching from the right.
///
/// Returns `(segment count, literal count)` or `None` when it does not match.
fn template_rank(template: &str, segments: &[&str]) -> Option<(usize, usize)> {
    let template_segments: Vec<&str> =
        template.split('/').filter(|segment| !segment.is_empty()).collect();
    if template_segments.len() > segments.len() {
        return None;
    }
    let mut literals = 0;
    for (expected, actual) in template_segments.iter().rev().zip(segments.iter().rev()) {
        if expected.starts_with('{') && expected.ends_with('}') {
            continue;
        }
        if expected != actual {
            return None;
        }
        literals += 1;
    }
    Some((template_segments.len(), literals))
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Loaded API definitions keyed by specification identifier.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    /// Directory probed for `<identifier>.json|yaml|yml`.
    location: Option<PathBuf>,
    /// Documents already loaded.
    loaded: BTreeMap<String, Arc<SchemaValidator>>,
}

impl SchemaRegistry {
    /// Creates a registry probing `location` for documents.
    #[must_use]
    pub fn new(location: Option<PathBuf>) -> Self {
        Self {
            location,
            loaded: BTreeMap::new(),
        }
    }

    /// Registers a document for an identifier.
    pub fn insert(&mut self, identifier: impl Into<String>, validator: SchemaValidator) {
        self.loaded.insert(identifier.into(), Arc::new(validator));
    }

    /// Returns the document for an identifier, loading it from disk on
    /// first use. Returns `Ok(None)` when no document is available.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when a document exists but cannot be loaded.
    pub fn get(&mut self, identifier: &str) -> Result<Option<Arc<SchemaValidator>>, SchemaError> {
        if let Some(validator) = self.loaded.get(identifier) {
            return Ok(Some(Arc::clone(validator)));
        }
        let Some(location) = &self.location else {
            return Ok(None);
        };
        for extension in SCHEMA_EXTENSIONS {
            let candidate = location.join(format!("{identifier}.{extension}"));
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "loading api definition");
                let validator = Arc::new(SchemaValidator::from_path(&candidate)?);
                self.loaded.insert(identifier.to_string(), Arc::clone(&validator));
                return Ok(Some(validator));
            }
        }
        Ok(None)
    }
}
