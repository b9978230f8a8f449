// crates/ob-conformance-core/src/context.rs
// ============================================================================
// Module: Conformance Context
// Description: Keyed bag of typed values threaded through a conformance run.
// Purpose: Carry state between test cases and drive `$variable` substitution.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`Context`] maps textual keys to a small sum type of values
//! ([`ContextValue`]). It is the single source of parameter substitution for
//! request templates: every `$identifier` token is replaced by the rendered
//! value of the matching key, and `$fn:name()` tokens invoke generators from a
//! [`MacroRegistry`].
//!
//! Invariants:
//! - Reads of a missing key fail with [`ContextError::NotSet`].
//! - Typed lists round-trip unchanged.
//! - Substitution fails when a referenced key is missing or empty.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::macros::MacroRegistry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of expansion rounds for nested templates.
pub const MAX_SUBSTITUTION_ROUNDS: usize = 8;

/// Prefix introducing a macro invocation inside a template.
const MACRO_PREFIX: &str = "fn:";

// ============================================================================
// SECTION: Values
// ============================================================================

/// Value stored in a [`Context`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[serde(from = "Value")]
pub enum ContextValue {
    /// Plain string value.
    String(String),
    /// Ordered list of strings.
    StringList(Vec<String>),
    /// Signed integer value.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Arbitrary JSON value that does not fit the other variants.
    Json(Value),
}

impl ContextValue {
    /// Returns a stable label for the value kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::StringList(_) => "string-list",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Json(_) => "json",
        }
    }

    /// Returns true when the value carries no usable content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(value) => value.is_empty(),
            Self::StringList(values) => values.is_empty(),
            Self::Int(_) | Self::Bool(_) => false,
            Self::Json(Value::Null) => true,
            Self::Json(Value::String(value)) => value.is_empty(),
            Self::Json(Value::Array(values)) => values.is_empty(),
            Self::Json(Value::Object(map)) => map.is_empty(),
            Self::Json(_) => false,
        }
    }

    /// Renders the value as it appears in substituted templates.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::StringList(values) => values.join(","),
            Self::Int(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
            Self::Json(Value::String(value)) => value.clone(),
            Self::Json(value) => value.to_string(),
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(value) => Self::String(value),
            Value::Bool(value) => Self::Bool(value),
            Value::Number(number) => {
                number.as_i64().map_or(Self::Json(Value::Number(number)), Self::Int)
            }
            Value::Array(items) if items.iter().all(Value::is_string) => Self::StringList(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(value) => Some(value),
                        _ => None,
                    })
                    .collect(),
            ),
            other => Self::Json(other),
        }
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(values: Vec<String>) -> Self {
        Self::StringList(values)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Context access and substitution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The requested key is absent.
    #[error("context key not set: {0}")]
    NotSet(String),
    /// The key holds a value of another kind.
    #[error("context key {key} holds a {found} value, expected {expected}")]
    TypeMismatch {
        /// Key that was read.
        key: String,
        /// Expected value kind.
        expected: &'static str,
        /// Stored value kind.
        found: &'static str,
    },
    /// A referenced key expanded to an empty value.
    #[error("substitution of ${0} produced an empty value")]
    EmptySubstitution(String),
    /// A `$fn:name()` token referenced an unregistered macro.
    #[error("unknown macro: {0}")]
    UnknownMacro(String),
    /// Expansion did not reach a fixed point within the round limit.
    #[error("substitution did not converge after {0} rounds")]
    SubstitutionDepth(usize),
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Keyed bag of typed values carried between test cases.
///
/// # Invariants
/// - Keys are unique; `put` shadows any previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    /// Stored values ordered by key.
    values: BTreeMap<String, ContextValue>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NotSet`] when the key is absent.
    pub fn get(&self, key: &str) -> Result<&ContextValue, ContextError> {
        self.values.get(key).ok_or_else(|| ContextError::NotSet(key.to_string()))
    }

    /// Stores a value under `key`, replacing any previous entry.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Stores a string value.
    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), ContextValue::String(value.into()));
    }

    /// Returns the string stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when the key is absent or not a string.
    pub fn get_string(&self, key: &str) -> Result<String, ContextError> {
        match self.get(key)? {
            ContextValue::String(value) | ContextValue::Json(Value::String(value)) => {
                Ok(value.clone())
            }
            other => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    /// Stores a list of strings.
    pub fn put_string_slice(&mut self, key: impl Into<String>, values: &[String]) {
        self.values.insert(key.into(), ContextValue::StringList(values.to_vec()));
    }

    /// Returns the list stored under `key`, casting JSON arrays element-wise.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when the key is absent, is not a list, or holds
    /// a non-string element.
    pub fn get_string_slice(&self, key: &str) -> Result<Vec<String>, ContextError> {
        match self.get(key)? {
            ContextValue::StringList(values) => Ok(values.clone()),
            ContextValue::Json(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(value) => Ok(value.clone()),
                    _ => Err(ContextError::TypeMismatch {
                        key: key.to_string(),
                        expected: "string element",
                        found: "json",
                    }),
                })
                .collect(),
            other => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: "string-list",
                found: other.kind(),
            }),
        }
    }

    /// Returns true when `key` holds a non-empty, non-null value.
    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|value| !value.is_empty())
    }

    /// Removes `key`, returning the previous value when present.
    pub fn delete(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    /// Returns an independent copy of the context.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Copies every entry of `other` into this context, overwriting keys.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Copies only the listed keys of `other` into this context.
    ///
    /// Keys absent from `other` are skipped.
    pub fn merge_keys<S: AsRef<str>>(&mut self, other: &Self, keys: &[S]) {
        for key in keys {
            if let Some(value) = other.values.get(key.as_ref()) {
                self.values.insert(key.as_ref().to_string(), value.clone());
            }
        }
    }

    /// Returns the stored keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when the context holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Expands `$key` and `$fn:name()` tokens using the built-in macros.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when a referenced key is missing or empty, a
    /// macro is unknown, or expansion does not converge.
    pub fn replace(&self, input: &str) -> Result<String, ContextError> {
        self.replace_with(input, MacroRegistry::builtin())
    }

    /// Expands tokens using an explicit macro registry.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] on the same conditions as [`Context::replace`].
    pub fn replace_with(
        &self,
        input: &str,
        macros: &MacroRegistry,
    ) -> Result<String, ContextError> {
        let mut current = input.to_string();
        for _ in 0 .. MAX_SUBSTITUTION_ROUNDS {
            if !current.contains('$') {
                return Ok(current);
            }
            let (expanded, replaced) = self.expand_once(&current, macros)?;
            if replaced == 0 {
                return Ok(expanded);
            }
            current = expanded;
        }
        let (_, pending) = self.expand_once(&current, macros)?;
        if pending == 0 {
            Ok(current)
        } else {
            Err(ContextError::SubstitutionDepth(MAX_SUBSTITUTION_ROUNDS))
        }
    }

    /// Performs one left-to-right expansion pass, returning the output and
    /// the number of tokens replaced.
    fn expand_once(
        &self,
        input: &str,
        macros: &MacroRegistry,
    ) -> Result<(String, usize), ContextError> {
        let mut output = String::with_capacity(input.len());
        let mut replaced = 0;
        let mut rest = input;
        while let Some(position) = rest.find('$') {
            output.push_str(&rest[.. position]);
            let after = &rest[position + 1 ..];
            if let Some((name, consumed)) = parse_macro_token(after) {
                let value = macros.invoke(name)?;
                if value.is_empty() {
                    return Err(ContextError::EmptySubstitution(format!("{MACRO_PREFIX}{name}()")));
                }
                output.push_str(&value);
                rest = &after[consumed ..];
                replaced += 1;
                continue;
            }
            let ident_len = identifier_len(after);
            if ident_len == 0 {
                output.push('$');
                rest = after;
                continue;
            }
            let key = &after[.. ident_len];
            let value = self.get(key)?;
            if value.is_empty() {
                return Err(ContextError::EmptySubstitution(key.to_string()));
            }
            output.push_str(&value.render());
            rest = &after[ident_len ..];
            replaced += 1;
        }
        output.push_str(rest);
        Ok((output, replaced))
    }
}

impl FromIterator<(String, ContextValue)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, ContextValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the byte length of the identifier at the start of `input`.
fn identifier_len(input: &str) -> usize {
    let mut len = 0;
    for (index, ch) in input.char_indices() {
        let valid = if index == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        if !valid {
            break;
        }
        len = index + ch.len_utf8();
    }
    len
}

/// Parses a `fn:name()` token, returning the macro name and consumed length.
fn parse_macro_token(input: &str) -> Option<(&str, usize)> {
    let body = input.strip_prefix(MACRO_PREFIX)?;
    let name_len = identifier_len(body);
    if name_len == 0 {
        return None;
    }
    let tail = &body[name_len ..];
    if !tail.starts_with("()") {
        return None;
    }
    Some((&body[.. name_len], MACRO_PREFIX.len() + name_len + 2))
}
