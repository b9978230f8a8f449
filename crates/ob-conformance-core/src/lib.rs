// crates/ob-conformance-core/src/lib.rs
// ============================================================================
// Module: Open Banking Conformance Core
// Description: Shared data model for conformance runs.
// Purpose: Provide the run context, template macros, specification table,
//          conditionality table, permission solver, and result records.
// Dependencies: serde, serde_json, thiserror, time, rand, uuid
// ============================================================================

//! ## Overview
//! This crate is the leaf of the workspace. Every other crate threads a
//! [`Context`] through its operations and consults the frozen tables defined
//! here. Nothing in this crate performs I/O.
//! Invariants:
//! - Context reads of missing keys fail instead of yielding defaults.
//! - Specification, conditionality, and permission tables are read-only.
//! - The permission solver is deterministic for a fixed input order.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod conditionality;
pub mod context;
pub mod keys;
pub mod macros;
pub mod permissions;
pub mod results;
pub mod specs;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use conditionality::Conditionality;
pub use conditionality::ConditionalityEntry;
pub use conditionality::ConditionalityError;
pub use conditionality::DeclaredEndpoint;
pub use conditionality::classify;
pub use conditionality::missing_mandatory;
pub use context::Context;
pub use context::ContextError;
pub use context::ContextValue;
pub use macros::MacroRegistry;
pub use permissions::PermissionError;
pub use permissions::PermissionGroup;
pub use permissions::PermissionSet;
pub use permissions::TokenFamily;
pub use permissions::solve_permissions;
pub use results::RunSummary;
pub use results::TestRecord;
pub use specs::ApiFamily;
pub use specs::ApiVersion;
pub use specs::SpecError;
pub use specs::SpecificationInfo;
pub use specs::lookup_specification;
