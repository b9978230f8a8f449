// crates/ob-conformance-cli/src/main.rs
// ============================================================================
// Module: Open Banking Conformance CLI Entry Point
// Description: Command dispatcher for conformance runs and suite inspection.
// Purpose: Run suites against an ASPSP and report plans, coverage, and specs.
// Dependencies: clap, ob-conformance-runner, tokio, tracing-subscriber.
// ============================================================================

//! ## Overview
//! `ob-conformance run` loads the configuration directory, seeds the run
//! context, and executes suites against the ASPSP, writing result events as
//! JSON lines. `permissions` prints the token plan the permission solver
//! derives for a set of suites, `conditionality` reports mandatory endpoints
//! suites leave untested, and `specs` lists the recognised specifications.
//!
//! While a run is active, stdin accepts control lines: `stop` ends the run
//! after the current case, and `code <token> <code>` submits an authorization
//! code when `--manual` is set.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::BufRead;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use ob_conformance_config::ConformanceConfig;
use ob_conformance_core::Context;
use ob_conformance_core::RunSummary;
use ob_conformance_core::conditionality::entries;
use ob_conformance_core::missing_mandatory;
use ob_conformance_core::specs::known_specifications;
use ob_conformance_model::Suite;
use ob_conformance_runner::Authorization;
use ob_conformance_runner::Authorizer;
use ob_conformance_runner::DaemonController;
use ob_conformance_runner::FanoutEventSink;
use ob_conformance_runner::FileEventSink;
use ob_conformance_runner::ManualAuthorizer;
use ob_conformance_runner::RunEvent;
use ob_conformance_runner::RunEventSink;
use ob_conformance_runner::RunOrchestrator;
use ob_conformance_runner::StderrEventSink;
use ob_conformance_runner::plan_tokens;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// How long the progress reporter may lag behind the finished run.
const REPORTER_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "ob-conformance", version, disable_help_subcommand = true)]
struct Cli {
    /// Raise the default log level to debug (`RUST_LOG` still wins).
    #[arg(long, short, action = ArgAction::SetTrue, global = true)]
    verbose: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run suites against the configured ASPSP.
    Run(RunCommand),
    /// Print the tokens and permissions a set of suites needs.
    Permissions(SuiteArgs),
    /// Report mandatory endpoints a set of suites leaves untested.
    Conditionality(ConditionalityCommand),
    /// List the recognised specification identifiers.
    Specs,
}

/// Configuration for the `run` command.
#[derive(Args, Debug)]
struct RunCommand {
    /// Directory holding `config.json` and the PEM files.
    #[arg(long, value_name = "DIR")]
    config: PathBuf,
    /// Append result events to this file as JSON lines.
    #[arg(long, value_name = "PATH")]
    events: Option<PathBuf>,
    /// Run suites concurrently, each with its own context.
    #[arg(long, action = ArgAction::SetTrue)]
    parallel: bool,
    /// Read authorization codes from stdin instead of following redirects.
    #[arg(long, action = ArgAction::SetTrue)]
    manual: bool,
    /// Suite files (JSON, or YAML by extension).
    #[arg(value_name = "SUITE", required = true)]
    suites: Vec<PathBuf>,
}

/// Suite file arguments.
#[derive(Args, Debug)]
struct SuiteArgs {
    /// Suite files (JSON, or YAML by extension).
    #[arg(value_name = "SUITE", required = true)]
    suites: Vec<PathBuf>,
}

/// Configuration for the `conditionality` command.
#[derive(Args, Debug)]
struct ConditionalityCommand {
    /// Print the full table of this specification instead of suite coverage.
    #[arg(long, value_name = "SPEC")]
    spec: Option<String>,
    /// Suite files to check.
    #[arg(value_name = "SUITE", required_unless_present = "spec")]
    suites: Vec<PathBuf>,
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// One planned access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenReport {
    /// Context key receiving the token.
    token_name: String,
    /// OAuth scope of the consent.
    scope: String,
    /// Consent-creation endpoint.
    consent_endpoint: String,
    /// Permission codes requested, account tokens only.
    permissions: Vec<String>,
    /// Cases served, as `suite/test`.
    tests: Vec<String>,
}

/// Coverage of one suite against its specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct CoverageReport {
    /// Suite identifier.
    suite_id: String,
    /// Specification identifier.
    specification: String,
    /// Mandatory endpoints not declared, as `METHOD path`.
    missing: Vec<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(command) => command_run(command, cli.verbose).await,
        Commands::Permissions(args) => {
            init_logging(cli.verbose);
            command_permissions(&args)
        }
        Commands::Conditionality(command) => {
            init_logging(cli.verbose);
            command_conditionality(&command)
        }
        Commands::Specs => {
            init_logging(cli.verbose);
            write_json(known_specifications())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Installs the stderr log subscriber.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Returns the filter used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

// ============================================================================
// SECTION: Run Command
// ============================================================================

/// Executes the `run` command.
async fn command_run(command: RunCommand, verbose: bool) -> CliResult<ExitCode> {
    let loaded = ConformanceConfig::load(&command.config)
        .map_err(|err| CliError::new(format!("failed to load configuration: {err}")))?;
    init_logging(verbose || loaded.config.verbose);
    let suites = load_suites(&command.suites)?;

    let mut ctx = Context::new();
    loaded
        .config
        .seed_context(&mut ctx)
        .map_err(|err| CliError::new(format!("failed to seed context: {err}")))?;

    let mut sinks: Vec<Arc<dyn RunEventSink>> = vec![Arc::new(StderrEventSink)];
    if let Some(path) = &command.events {
        let file = FileEventSink::new(path).map_err(|err| {
            CliError::new(format!("failed to open event log {}: {err}", path.display()))
        })?;
        sinks.push(Arc::new(file));
    }
    let sink: Arc<dyn RunEventSink> = Arc::new(FanoutEventSink::new(sinks));

    let daemon = Arc::new(DaemonController::new());
    let manual = command.manual.then(|| Arc::new(ManualAuthorizer::new()));
    let authorization = match &manual {
        Some(authorizer) => Authorization::Manual(Arc::clone(authorizer) as Arc<dyn Authorizer>),
        None => Authorization::Headless,
    };
    let orchestrator = RunOrchestrator::from_config(
        &loaded,
        authorization,
        sink,
        Arc::clone(&daemon),
        command.parallel,
    )
    .map_err(|err| CliError::new(format!("failed to prepare run: {err}")))?;

    let reporter = daemon.take_results().map(|results| tokio::spawn(report_progress(results)));
    spawn_control_reader(Arc::clone(&daemon), manual);
    let interrupt = Arc::clone(&daemon);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && interrupt.stop() {
            tracing::info!("interrupt received; stopping after the current case");
        }
    });

    let summary = orchestrator
        .run(suites, &mut ctx)
        .await
        .map_err(|err| CliError::new(format!("run failed: {err}")))?;
    if let Some(reporter) = reporter {
        match tokio::time::timeout(REPORTER_GRACE, reporter).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "progress reporter failed"),
            Err(_) => tracing::warn!("progress reporter did not see run completion"),
        }
    }
    write_json(&summary)?;
    Ok(exit_code(&summary))
}

/// Logs running totals from the result channel until the run completes.
async fn report_progress(mut results: mpsc::Receiver<RunEvent>) {
    let (mut passed, mut failed) = (0_usize, 0_usize);
    while let Some(event) = results.recv().await {
        match event {
            RunEvent::TestResult(record) => {
                if record.pass {
                    passed += 1;
                } else {
                    failed += 1;
                }
                tracing::debug!(test_id = %record.test_id, passed, failed, "progress");
            }
            RunEvent::RunStopped { skipped } => {
                tracing::info!(skipped, "cases skipped after stop");
            }
            RunEvent::RunComplete(summary) => {
                tracing::info!(
                    total = summary.total,
                    passed = summary.passed,
                    failed = summary.failed,
                    "run complete"
                );
                break;
            }
            _ => {}
        }
    }
}

/// Maps a summary to the process exit code.
fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Control line read from stdin during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ControlLine {
    /// Stop the run.
    Stop,
    /// Authorization code for a token.
    Code {
        /// Token name.
        token_name: String,
        /// Authorization code.
        code: String,
    },
}

/// Parses one control line; blank or unknown lines yield `None`.
fn parse_control_line(line: &str) -> Option<ControlLine> {
    let mut words = line.split_whitespace();
    match (words.next()?, words.next(), words.next(), words.next()) {
        ("stop", None, None, None) => Some(ControlLine::Stop),
        ("code", Some(token_name), Some(code), None) => Some(ControlLine::Code {
            token_name: token_name.to_string(),
            code: code.to_string(),
        }),
        _ => None,
    }
}

/// Reads control lines from stdin on a detached thread.
fn spawn_control_reader(daemon: Arc<DaemonController>, manual: Option<Arc<ManualAuthorizer>>) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_control_line(&line) {
                Some(ControlLine::Stop) => {
                    if daemon.stop() {
                        tracing::info!("stop requested; stopping after the current case");
                    }
                }
                Some(ControlLine::Code {
                    token_name,
                    code,
                }) => match &manual {
                    Some(authorizer) => {
                        if !authorizer.submit_code(&token_name, code) {
                            tracing::warn!(token_name = %token_name, "code already submitted");
                        }
                    }
                    None => tracing::warn!("codes are only read with --manual"),
                },
                None if line.trim().is_empty() => {}
                None => tracing::warn!(line = %line.trim(), "unrecognised control line"),
            }
        }
    });
}

// ============================================================================
// SECTION: Inspection Commands
// ============================================================================

/// Executes the `permissions` command.
fn command_permissions(args: &SuiteArgs) -> CliResult<ExitCode> {
    let suites = load_suites(&args.suites)?;
    write_json(&permission_report(&suites)?)?;
    Ok(ExitCode::SUCCESS)
}

/// Builds the token plan report for `suites`.
fn permission_report(suites: &[Suite]) -> CliResult<Vec<TokenReport>> {
    let plan = plan_tokens(suites).map_err(|err| CliError::new(err.to_string()))?;
    Ok(plan
        .jobs
        .iter()
        .map(|job| TokenReport {
            token_name: job.token_name.clone(),
            scope: job.scope.clone(),
            consent_endpoint: job.consent_endpoint.clone(),
            permissions: job.permissions.clone(),
            tests: suites
                .iter()
                .flat_map(|suite| {
                    suite
                        .test_cases
                        .iter()
                        .filter(|case| plan.token_for(&suite.id, &case.id) == Some(job.token_name.as_str()))
                        .map(|case| format!("{}/{}", suite.id, case.id))
                })
                .collect(),
        })
        .collect())
}

/// Executes the `conditionality` command.
fn command_conditionality(command: &ConditionalityCommand) -> CliResult<ExitCode> {
    if let Some(spec) = &command.spec {
        let table = entries(spec).map_err(|err| CliError::new(err.to_string()))?;
        write_json(&table)?;
        return Ok(ExitCode::SUCCESS);
    }
    let suites = load_suites(&command.suites)?;
    let report = coverage_report(&suites)?;
    write_json(&report)?;
    if report.iter().all(|coverage| coverage.missing.is_empty()) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Builds the mandatory-coverage report for `suites`.
fn coverage_report(suites: &[Suite]) -> CliResult<Vec<CoverageReport>> {
    suites
        .iter()
        .map(|suite| {
            let missing = missing_mandatory(&suite.declared_endpoints(), &suite.specification)
                .map_err(|err| CliError::new(format!("suite {}: {err}", suite.id)))?;
            Ok(CoverageReport {
                suite_id: suite.id.clone(),
                specification: suite.specification.clone(),
                missing: missing.iter().map(|entry| format!("{} {}", entry.method, entry.endpoint)).collect(),
            })
        })
        .collect()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads every suite file, failing on the first invalid one.
fn load_suites(paths: &[PathBuf]) -> CliResult<Vec<Suite>> {
    paths.iter().map(|path| load_suite(path)).collect()
}

/// Loads one suite file.
fn load_suite(path: &Path) -> CliResult<Suite> {
    Suite::load(path).map_err(|err| CliError::new(format!("failed to load suite: {err}")))
}

/// Writes pretty JSON to stdout.
fn write_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render output: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
