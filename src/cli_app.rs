//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use banker_sim::analysis::{SafetyVerdict, UnsafeReason, check_availability, check_request, detect};
use banker_sim::core::config::Config;
use banker_sim::core::errors::BankerError;
use banker_sim::ledger::{ResourceId, ResourceLedger, TaskId};
use banker_sim::logger::activity::{ActivityLoggerConfig, spawn_logger};
use banker_sim::protocol::ProtocolMode;
use banker_sim::scenario::{RunOptions, RunOutcome, run_scenario};
use banker_sim::watchdog::SignalHandler;

/// Banker's Algorithm simulator: scripted workers, a safety-checking arbiter
/// and a deadlock watchdog.
#[derive(Debug, Parser)]
#[command(
    name = "banker",
    author,
    version,
    about = "Banker's Algorithm resource arbiter simulator",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity (dump the ledger after every change).
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (no status lines).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the configured worker scripts against the arbiter.
    Run(RunArgs),
    /// Evaluate one hypothetical request without running anything.
    Check(CheckArgs),
    /// Print the ledger, optionally after applying grants.
    State(StateArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Protocol mode: avoidance, detection or both.
    #[arg(long, value_parser = parse_mode)]
    mode: Option<ProtocolMode>,
    /// Watchdog poll interval in milliseconds.
    #[arg(long, value_name = "MS")]
    watchdog_ms: Option<u64>,
    /// Bound on the first wait of a blocked request, in milliseconds.
    #[arg(long, value_name = "MS")]
    first_wait_ms: Option<u64>,
    /// Add up to this many random milliseconds to every pause.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    jitter_ms: u64,
    /// Also write the activity log as JSONL to this file.
    #[arg(long, value_name = "PATH")]
    jsonl: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CheckArgs {
    /// Requesting task (`T2` or `2`).
    #[arg(value_parser = parse_task)]
    task: TaskId,
    /// Resource label.
    resource: String,
    /// Units requested.
    amount: u32,
    /// Grants applied before the check, as TASK:RESOURCE:AMOUNT (repeatable).
    #[arg(long = "after", value_name = "GRANT", value_parser = parse_grant)]
    after: Vec<GrantSpec>,
    /// Check physical availability only, as when avoidance is off.
    #[arg(long)]
    availability_only: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct StateArgs {
    /// Grants applied before printing, as TASK:RESOURCE:AMOUNT (repeatable).
    #[arg(long = "after", value_name = "GRANT", value_parser = parse_grant)]
    after: Vec<GrantSpec>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

/// `T2:A:2` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GrantSpec {
    task: TaskId,
    resource: String,
    amount: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Ledger invariant violation.
    #[error("{0}")]
    Internal(String),
    /// The watchdog detected a deadlock.
    #[error("{0}")]
    Deadlock(String),
    /// The run was interrupted by a signal.
    #[error("interrupted")]
    Interrupted,
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Deadlock(_) => 4,
            Self::Interrupted => 130,
        }
    }
}

impl From<BankerError> for CliError {
    fn from(error: BankerError) -> Self {
        match error {
            BankerError::InvariantViolation { .. } => Self::Internal(error.to_string()),
            BankerError::InvalidConfig { .. }
            | BankerError::MissingConfig { .. }
            | BankerError::ConfigParse { .. }
            | BankerError::UnknownTask { .. }
            | BankerError::UnknownResource { .. }
            | BankerError::ClaimExceeded { .. } => Self::User(error.to_string()),
            BankerError::Io { .. }
            | BankerError::Serialization { .. }
            | BankerError::ChannelClosed { .. }
            | BankerError::Runtime { .. } => Self::Runtime(error.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_simulation(cli, args),
        Command::Check(args) => run_check(cli, args),
        Command::State(args) => run_state(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── run ────────────────────

fn run_simulation(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(protocol_mode) = args.mode {
        config.protocol.mode = protocol_mode;
    }
    if let Some(ms) = args.watchdog_ms {
        config.watchdog.poll_interval_ms = ms;
    }
    if let Some(ms) = args.first_wait_ms {
        config.protocol.first_wait_timeout_ms = ms;
    }
    if let Some(path) = &args.jsonl {
        config.logging.jsonl_path = Some(path.clone());
    }
    if cli.verbose {
        config.logging.state_dumps = true;
    }
    config.validate()?;

    let (logger, logger_join) = spawn_logger(ActivityLoggerConfig {
        console: config.logging.console && mode == OutputMode::Human && !cli.quiet,
        jsonl_path: config.logging.jsonl_path.clone(),
        decorator: Some(colorize_line),
        ..ActivityLoggerConfig::default()
    })?;

    let signals = SignalHandler::new();
    let options = RunOptions {
        jitter_ms: args.jitter_ms,
        interrupt: Some(signals.flag()),
    };
    let result = run_scenario(&config, Arc::new(logger.clone()), &options);

    logger.shutdown();
    if logger_join.join().is_err() {
        eprintln!("[BKR-LOG] logger thread panicked");
    }
    if logger.dropped_events() > 0 {
        eprintln!(
            "[BKR-LOG] {} activity events dropped",
            logger.dropped_events()
        );
    }

    let outcome = result?;
    report_outcome(mode, &config, &outcome)?;
    match outcome {
        RunOutcome::Completed { .. } => Ok(()),
        RunOutcome::Deadlocked { report, .. } => Err(CliError::Deadlock(format!(
            "deadlock detected: {} cannot finish",
            join_tasks(&report.tasks)
        ))),
        RunOutcome::Interrupted { .. } => Err(CliError::Interrupted),
    }
}

fn report_outcome(mode: OutputMode, config: &Config, outcome: &RunOutcome) -> Result<(), CliError> {
    let elapsed_ms = u64::try_from(outcome.elapsed().as_millis()).unwrap_or(u64::MAX);
    match mode {
        OutputMode::Human => match outcome {
            RunOutcome::Completed { watchdog_polls, .. } => {
                println!(
                    "{} {} tasks finished in {elapsed_ms} ms (mode {}, {watchdog_polls} watchdog polls)",
                    "OK".green().bold(),
                    config.tasks.len(),
                    config.protocol.mode
                );
            }
            RunOutcome::Deadlocked { report, .. } => {
                println!(
                    "{} {} blocked after {elapsed_ms} ms",
                    "DEADLOCK".red().bold(),
                    join_tasks(&report.tasks)
                );
                println!("{}", report.snapshot.render().trim_end());
            }
            RunOutcome::Interrupted { .. } => {
                println!("{} after {elapsed_ms} ms", "INTERRUPTED".yellow().bold());
            }
        },
        OutputMode::Json => {
            let (snapshot, deadlock) = match outcome {
                RunOutcome::Completed { snapshot, .. } | RunOutcome::Interrupted { snapshot, .. } => {
                    (serde_json::to_value(snapshot)?, Value::Null)
                }
                RunOutcome::Deadlocked { report, .. } => (
                    serde_json::to_value(&report.snapshot)?,
                    serde_json::to_value(report)?,
                ),
            };
            let polls = match outcome {
                RunOutcome::Completed { watchdog_polls, .. } => Value::from(*watchdog_polls),
                _ => Value::Null,
            };
            write_json_line(&json!({
                "command": "run",
                "outcome": outcome.label(),
                "mode": config.protocol.mode.as_str(),
                "elapsed_ms": elapsed_ms,
                "watchdog_polls": polls,
                "snapshot": snapshot,
                "deadlock": deadlock,
            }))?;
        }
    }
    Ok(())
}

fn colorize_line(task: Option<TaskId>, line: &str) -> String {
    match task.map(TaskId::index) {
        Some(0) => line.cyan().to_string(),
        Some(1) => line.yellow().to_string(),
        Some(2) => line.magenta().to_string(),
        Some(3) => line.green().to_string(),
        Some(_) => line.blue().to_string(),
        None => line.bold().to_string(),
    }
}

// ──────────────────── check / state ────────────────────

fn ledger_after(config: &Config, grants: &[GrantSpec]) -> Result<ResourceLedger, CliError> {
    let mut ledger = ResourceLedger::from_config(config)?;
    for grant in grants {
        let resource = ledger.resolve_resource(&grant.resource)?;
        ledger.check_task(grant.task)?;
        let remaining = ledger.remaining_need(grant.task)[resource.index()];
        let available = ledger.available()[resource.index()];
        if grant.amount > remaining || grant.amount > available {
            return Err(CliError::User(format!(
                "cannot apply {}:{}:{} (remaining need {remaining}, available {available})",
                grant.task, grant.resource, grant.amount
            )));
        }
        ledger.grant(grant.task, resource, grant.amount)?;
    }
    Ok(ledger)
}

fn run_check(cli: &Cli, args: &CheckArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let ledger = ledger_after(&config, &args.after)?;
    ledger.check_task(args.task)?;
    let resource: ResourceId = ledger.resolve_resource(&args.resource)?;

    let remaining = ledger.remaining_need(args.task)[resource.index()];
    if args.amount > remaining {
        return Err(BankerError::ClaimExceeded {
            task: args.task.to_string(),
            resource: args.resource.clone(),
            requested: args.amount,
            remaining,
        }
        .into());
    }

    let verdict = if args.availability_only {
        check_availability(&ledger, resource, args.amount)
    } else {
        check_request(&ledger, args.task, resource, args.amount)
    };

    match output_mode(cli) {
        OutputMode::Human => {
            let answer = if verdict.is_safe() {
                verdict.label().green().bold()
            } else {
                verdict.label().red().bold()
            };
            println!(
                "{}: is \"allocate({}, {})\" safe? : {answer}",
                args.task, args.resource, args.amount
            );
            println!("  {}", describe_verdict(&verdict));
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "check",
                "task": args.task.to_string(),
                "resource": args.resource,
                "amount": args.amount,
                "safe": verdict.is_safe(),
                "verdict": serde_json::to_value(&verdict)?,
            }))?;
        }
    }
    Ok(())
}

fn describe_verdict(verdict: &SafetyVerdict) -> String {
    match verdict {
        SafetyVerdict::Safe { order } if order.is_empty() => "units are available".to_string(),
        SafetyVerdict::Safe { order } => format!("safe sequence: {}", join_tasks(order)),
        SafetyVerdict::Unsafe {
            reason:
                UnsafeReason::Unavailable {
                    requested,
                    available,
                },
        } => format!("only {available} unit(s) free, {requested} requested"),
        SafetyVerdict::Unsafe {
            reason: UnsafeReason::NoSafeSequence { stuck },
        } => format!("no safe sequence; {} could not finish", join_tasks(stuck)),
    }
}

fn run_state(cli: &Cli, args: &StateArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let ledger = ledger_after(&config, &args.after)?;
    let snapshot = ledger.snapshot(None);
    let status = detect(&ledger);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", snapshot.render().trim_end());
            if status.is_deadlocked() {
                println!("deadlock detected? : {}", "yes".red().bold());
            } else {
                println!("deadlock detected? : {}", "no".green());
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "state",
                "snapshot": serde_json::to_value(&snapshot)?,
                "deadlock": serde_json::to_value(&status)?,
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml_string()?),
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let source = cli.config.clone().unwrap_or_else(Config::default_path);

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", source.display());
                        println!(
                            "  Resources: {} kinds, {} tasks",
                            config.resources.labels.len(),
                            config.tasks.len()
                        );
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": source.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── version / output ────────────────────

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("banker {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "binary": "banker",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            }))?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("BANKER_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

// ──────────────────── argument parsers ────────────────────

fn parse_mode(raw: &str) -> Result<ProtocolMode, String> {
    raw.parse()
}

fn parse_task(raw: &str) -> Result<TaskId, String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix('T')
        .or_else(|| trimmed.strip_prefix('t'))
        .unwrap_or(trimmed);
    match digits.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(TaskId(n - 1)),
        _ => Err(format!("invalid task {raw:?} (expected T1, T2, ... or 1, 2, ...)")),
    }
}

fn parse_grant(raw: &str) -> Result<GrantSpec, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [task, resource, amount] = parts.as_slice() else {
        return Err(format!("invalid grant {raw:?} (expected TASK:RESOURCE:AMOUNT)"));
    };
    let amount = amount
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid amount in {raw:?}: {e}"))?;
    Ok(GrantSpec {
        task: parse_task(task)?,
        resource: resource.trim().to_string(),
        amount,
    })
}

fn join_tasks(tasks: &[TaskId]) -> String {
    tasks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
