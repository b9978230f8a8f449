// crates/ob-conformance-core/src/macros.rs
// ============================================================================
// Module: Template Macros
// Description: Named zero-argument generators invoked from request templates.
// Purpose: Supply fresh identifiers and timestamps via `$fn:name()` tokens.
// Dependencies: rand, time, uuid
// ============================================================================

//! ## Overview
//! A [`MacroRegistry`] maps macro names to closures returning strings. The
//! built-in registry covers the generators used by payment and consent
//! templates (instruction identifiers, nonces, ISO date-times).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use rand::Rng;
use rand::distributions::Alphanumeric;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::context::ContextError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of generated instruction and end-to-end identifiers.
const IDENTIFICATION_LEN: usize = 35;

/// Days added to the current time for consent expiry timestamps.
const CONSENT_EXPIRY_DAYS: i64 = 90;

/// ISO date-time layout used by Open Banking payloads.
const ISO_DATE_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]+00:00");

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Macro generator signature.
pub type MacroFn = Box<dyn Fn() -> String + Send + Sync>;

/// Registry of named template macros.
#[derive(Default)]
pub struct MacroRegistry {
    /// Generators indexed by name.
    macros: BTreeMap<String, MacroFn>,
}

impl fmt::Debug for MacroRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroRegistry").field("macros", &self.macros.keys()).finish()
    }
}

impl MacroRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry preloaded with the built-in macros.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("instructionIdentificationID", || random_identifier(IDENTIFICATION_LEN));
        registry.register("endToEndIdentificationID", || random_identifier(IDENTIFICATION_LEN));
        registry.register("nonce", || uuid::Uuid::new_v4().to_string());
        registry.register("uuid", || uuid::Uuid::new_v4().to_string());
        registry.register("idempotencyKey", || uuid::Uuid::new_v4().simple().to_string());
        registry.register("nowDateTime", || format_date_time(OffsetDateTime::now_utc()));
        registry.register("nextDayDateTime", || {
            format_date_time(OffsetDateTime::now_utc() + Duration::days(1))
        });
        registry.register("consentExpiryDateTime", || {
            format_date_time(OffsetDateTime::now_utc() + Duration::days(CONSENT_EXPIRY_DAYS))
        });
        registry
    }

    /// Returns the shared built-in registry.
    #[must_use]
    pub fn builtin() -> &'static Self {
        static BUILTIN: OnceLock<MacroRegistry> = OnceLock::new();
        BUILTIN.get_or_init(Self::with_builtins)
    }

    /// Registers a macro, replacing any existing macro with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, generator: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.macros.insert(name.into(), Box::new(generator));
    }

    /// Invokes the named macro.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownMacro`] when no macro is registered.
    pub fn invoke(&self, name: &str) -> Result<String, ContextError> {
        self.macros
            .get(name)
            .map(|generator| generator())
            .ok_or_else(|| ContextError::UnknownMacro(name.to_string()))
    }

    /// Returns the registered macro names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }
}

// ============================================================================
// SECTION: Generators
// ============================================================================

/// Generates a random alphanumeric identifier of `len` characters.
fn random_identifier(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// Formats a timestamp in the Open Banking ISO date-time layout.
///
/// Formatting failures yield an empty string, which substitution rejects.
pub fn format_date_time(value: OffsetDateTime) -> String {
    value.format(ISO_DATE_TIME).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use time::macros::datetime;

    use super::MacroRegistry;
    use super::format_date_time;

    #[test]
    fn builtin_identifiers_have_expected_shape() {
        let registry = MacroRegistry::builtin();
        let id = registry.invoke("instructionIdentificationID").unwrap();
        assert_eq!(id.len(), 35);
        assert!(id.chars().all(|ch| ch.is_ascii_alphanumeric()));
        assert_ne!(id, registry.invoke("instructionIdentificationID").unwrap());
    }

    #[test]
    fn date_time_layout_is_iso() {
        let formatted = format_date_time(datetime!(2020-05-04 10:21:22 UTC));
        assert_eq!(formatted, "2020-05-04T10:21:22+00:00");
    }

    #[test]
    fn names_are_sorted() {
        let names: Vec<&str> = MacroRegistry::builtin().names().collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(names.contains(&"nonce"));
    }
}
