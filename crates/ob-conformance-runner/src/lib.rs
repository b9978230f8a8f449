// crates/ob-conformance-runner/src/lib.rs
// ============================================================================
// Module: Open Banking Conformance Runner
// Description: Dispatch, token acquisition, and run orchestration.
// Purpose: Execute conformance suites against one ASPSP and report results.
// Dependencies: reqwest, tokio, ob-conformance-model, ob-conformance-config
// ============================================================================

//! ## Overview
//! The runner owns everything that talks to the ASPSP: the mutual-TLS
//! [`HttpDispatcher`], the [`ConsentOrchestrator`] that turns consent jobs
//! into access tokens, the [`ResourceProbe`] that discovers account
//! identifiers, and the [`RunOrchestrator`] that executes suites. Progress is
//! reported as [`RunEvent`]s through a [`RunEventSink`]; the
//! [`DaemonController`] lets the host stop a run between cases.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod consent;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod probe;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use consent::Authorizer;
pub use consent::ConsentItem;
pub use consent::ConsentJob;
pub use consent::ConsentOrchestrator;
pub use consent::ConsentOutcome;
pub use consent::ConsentWorker;
pub use consent::HeadlessAuthorizer;
pub use consent::ManualAuthorizer;
pub use consent::TokenClient;
pub use daemon::DaemonController;
pub use dispatch::HttpDispatcher;
pub use error::ConsentError;
pub use error::DispatchError;
pub use error::ProbeError;
pub use error::RunError;
pub use events::ChannelEventSink;
pub use events::FanoutEventSink;
pub use events::FileEventSink;
pub use events::MemoryEventSink;
pub use events::RunEvent;
pub use events::RunEventSink;
pub use events::StderrEventSink;
pub use orchestrator::Authorization;
pub use orchestrator::RunOrchestrator;
pub use orchestrator::RunParts;
pub use orchestrator::RunSettings;
pub use orchestrator::TokenPlan;
pub use orchestrator::plan_tokens;
pub use probe::ProbedResources;
pub use probe::ResourceProbe;
