//! jretrofit - attach Java agents to running JVMs
//!
//! The main entry point, handling:
//! - Discovery and listing of Java processes
//! - One-shot injection (with dry run and confirmation)
//! - The periodic daemon
//! - Configuration display and validation

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use jr_common::config::Severity;
use jr_common::{format_error_human, Config, ConfigResolver, ConfigSnapshot, OutputFormat, StructuredError};
use jr_core::action::RestartPolicy;
use jr_core::classify::{AgentDescriptor, ClassifiedProcess};
use jr_core::daemon::{install_signal_handlers, Daemon, DaemonOptions};
use jr_core::exit_codes::ExitCode;
use jr_core::inject::{CancelToken, DiscoveryScope, FailureKind, Injector};
use jr_core::log_event;
use jr_core::logging::{
    event_names, init_logging, LogConfig, LogContext, LogFormat, LogLevel, Stage,
};
use jr_core::output::{self, SCHEMA_VERSION};
use jr_core::policy::{FilterSet, ProcessFilter};

/// jretrofit - restart running JVMs with Java agents attached
#[derive(Parser)]
#[command(name = "jretrofit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (defaults: $JR_CONFIG, ./jretrofit.yaml, XDG, /etc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "table")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover and list Java processes
    List(ListArgs),

    /// Restart processes with agents attached
    Inject(InjectArgs),

    /// Periodically scan and inject
    Daemon(DaemonArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Print version information
    Version,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct ListArgs {
    /// Only these pids
    #[arg(long = "pid")]
    pids: Vec<u32>,

    /// Only processes owned by these users
    #[arg(long = "user")]
    users: Vec<String>,

    /// Only these process names
    #[arg(long = "name")]
    names: Vec<String>,

    /// Regex against name, jar or main class
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// Only processes with at least one agent
    #[arg(long, conflicts_with = "no_agent")]
    agent: bool,

    /// Only processes without agents
    #[arg(long)]
    no_agent: bool,

    /// Include non-Java processes
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct InjectArgs {
    /// Target pids
    #[arg(long = "pid", conflicts_with = "all")]
    pids: Vec<u32>,

    /// Every Java process matching the configured filter
    #[arg(long)]
    all: bool,

    /// Agent jar to inject instead of the configured agents
    #[arg(long)]
    agent: Option<String>,

    /// Options for --agent
    #[arg(long, requires = "agent")]
    options: Option<String>,

    /// Print the rewritten command lines without restarting anything
    #[arg(long)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,

    /// Never escalate to SIGKILL
    #[arg(long)]
    no_force: bool,
}

#[derive(Args, Debug)]
struct DaemonArgs {
    /// Seconds between passes (overrides daemon.interval_secs)
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Pid file (overrides daemon.pid_file)
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the resolved config)
        path: Option<PathBuf>,
    },
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version render through the error path too.
            let code = if e.use_stderr() {
                ExitCode::ArgsError.as_i32()
            } else {
                ExitCode::Clean.as_i32()
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let loaded = ConfigResolver::new(cli.global.config.clone()).load();

    let cli_level = LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet);
    let (file_level, file_format) = match &loaded {
        Ok((config, _)) => (Some(config.log.level.as_str()), Some(config.log.format.as_str())),
        Err(_) => (None, None),
    };
    init_logging(&LogConfig::resolve(
        file_level,
        file_format,
        cli_level,
        cli.global.log_format,
    ));

    let ctx = LogContext::for_run();
    log_event!(
        ctx,
        DEBUG,
        event_names::RUN_STARTED,
        Stage::Init,
        format!("jretrofit {}", env!("CARGO_PKG_VERSION"))
    );

    let exit_code = match cli.command {
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
        Commands::Config(ConfigArgs {
            command: ConfigCommands::Validate { path },
        }) => run_config_validate(&cli.global, path),
        command => match loaded {
            Ok((config, source)) => {
                match ConfigSnapshot::new(&config, &source) {
                    Ok(snapshot) => log_event!(
                        ctx,
                        DEBUG,
                        event_names::CONFIG_LOADED,
                        Stage::Init,
                        format!(
                            "config from {} ({})",
                            snapshot.path.as_deref().unwrap_or("defaults"),
                            snapshot.resolution
                        ),
                        effective_hash = snapshot.effective_hash.as_str()
                    ),
                    Err(e) => log_event!(
                        ctx,
                        WARN,
                        event_names::CONFIG_WARNING,
                        Stage::Init,
                        format!("cannot snapshot config: {}", e)
                    ),
                }
                for issue in config.validate() {
                    log_event!(
                        ctx,
                        WARN,
                        event_names::CONFIG_WARNING,
                        Stage::Init,
                        issue.to_string(),
                        code = issue.code()
                    );
                }
                match command {
                    Commands::List(args) => run_list(&cli.global, &args, &config, &ctx),
                    Commands::Inject(args) => run_inject(&cli.global, &args, &config, &ctx),
                    Commands::Daemon(args) => run_daemon(&cli.global, &args, &config, &ctx),
                    Commands::Config(_) => run_config_show(&cli.global, &config, &source, &ctx),
                    Commands::Version => ExitCode::Clean,
                }
            }
            Err(e) => report_error(&cli.global, e),
        },
    };

    log_event!(
        ctx,
        DEBUG,
        event_names::RUN_FINISHED,
        Stage::Shutdown,
        format!("exit {}", exit_code),
        exit_code = exit_code.as_i32()
    );
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command implementations
// ============================================================================

/// Print a workspace error on stderr and map it to an exit code: structured
/// JSON for machine formats, headline and fix otherwise.
fn report_error(global: &GlobalOpts, err: jr_common::Error) -> ExitCode {
    if global.format.is_machine() {
        eprintln!("{}", StructuredError::from(&err).to_json());
    } else {
        eprintln!("{}", format_error_human(&err, io::stderr().is_terminal()));
    }
    ExitCode::from_error(&err)
}

/// Map a failed stdout write to an exit code. A closed pipe is not an error.
fn emitted(result: io::Result<()>) -> Option<ExitCode> {
    match result {
        Ok(()) => None,
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => None,
        Err(e) => {
            eprintln!("jretrofit: cannot write output: {}", e);
            Some(ExitCode::InternalError)
        }
    }
}

fn run_list(global: &GlobalOpts, args: &ListArgs, config: &Config, ctx: &LogContext) -> ExitCode {
    let filter = ProcessFilter {
        pids: args.pids.clone(),
        names: args.names.clone(),
        users: args.users.clone(),
        patterns: args.patterns.clone(),
        has_agent: match (args.agent, args.no_agent) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        },
        min_uptime: None,
    };
    let scope = if args.all {
        DiscoveryScope::All
    } else {
        DiscoveryScope::JavaOnly
    };

    let injector = Injector::from_config(config, ctx.clone());
    let filter = FilterSet::new(filter, ctx);
    match injector.discover_in(scope, &filter, &CancelToken::new()) {
        Ok(report) => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            emitted(output::write_discovery(&mut out, &report, global.format, &ctx.run_id))
                .unwrap_or(ExitCode::Clean)
        }
        Err(e) => report_error(global, e.into()),
    }
}

/// Agents from `--agent` or, failing that, the enabled config entries.
fn resolve_agents(args: &InjectArgs, config: &Config) -> Vec<AgentDescriptor> {
    match &args.agent {
        Some(path) => {
            let mut agent = AgentDescriptor::new(path);
            if let Some(opts) = &args.options {
                agent = agent.with_options(opts);
            }
            vec![agent]
        }
        None => config
            .enabled_agents()
            .into_iter()
            .map(AgentDescriptor::from)
            .collect(),
    }
}

fn run_inject(global: &GlobalOpts, args: &InjectArgs, config: &Config, ctx: &LogContext) -> ExitCode {
    if args.pids.is_empty() && !args.all {
        eprintln!("jretrofit: specify --pid <PID> or --all");
        return ExitCode::ArgsError;
    }
    let agents = resolve_agents(args, config);
    if agents.is_empty() {
        eprintln!("jretrofit: no agents configured; pass --agent <PATH> or enable one in the config");
        return ExitCode::ArgsError;
    }

    let mut policy = RestartPolicy::from(&config.restart);
    if args.no_force {
        policy.force_kill = false;
    }
    let injector = Injector::from_config(config, ctx.clone()).with_policy(policy);

    let filter = if args.all {
        ProcessFilter::from(&config.process)
    } else {
        ProcessFilter::by_pids(args.pids.iter().copied())
    };
    let cancel = CancelToken::new();
    let report = match injector.discover(&FilterSet::new(filter, ctx), &cancel) {
        Ok(r) => r,
        Err(e) => return report_error(global, e.into()),
    };

    for pid in &args.pids {
        if !report.processes.iter().any(|p| p.pid() == *pid) {
            eprintln!("jretrofit: process {} not found or not a Java process", pid);
        }
    }

    let targets: Vec<ClassifiedProcess> = report
        .processes
        .into_iter()
        .filter(|p| injector.needs_injection(p, &agents))
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if targets.is_empty() {
        if !global.format.is_machine() {
            let _ = writeln!(out, "Nothing to inject");
        }
        return ExitCode::NothingToDo;
    }

    if args.dry_run {
        let plans: Vec<_> = targets
            .iter()
            .map(|t| injector.plan(t, &injector.agents_for(t, &agents)))
            .collect();
        return emitted(output::write_plans(&mut out, &plans, global.format, &ctx.run_id))
            .unwrap_or(ExitCode::Clean);
    }

    if config.security.require_confirmation && !args.yes {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let lines: Vec<String> = targets
            .iter()
            .map(|t| {
                format!(
                    "{:<8} {:<10} {}",
                    t.pid(),
                    t.snapshot.user,
                    t.entry_point().unwrap_or("-")
                )
            })
            .collect();
        if !confirm(&lines, &mut input, &mut io::stderr()) {
            eprintln!("jretrofit: aborted");
            return ExitCode::Cancelled;
        }
    }

    if let Err(e) = install_signal_handlers(&cancel) {
        log_event!(
            ctx,
            WARN,
            event_names::INTERNAL_ERROR,
            Stage::Init,
            e.to_string()
        );
    }

    let results = injector.batch_inject(&targets, &agents, &cancel);
    if let Some(code) = emitted(output::write_results(&mut out, &results, global.format, &ctx.run_id)) {
        return code;
    }

    if cancel.is_cancelled() && results.len() < targets.len() {
        return ExitCode::Cancelled;
    }
    let summary = jr_core::inject::BatchSummary::from_results(&results);
    let failed: Vec<_> = results
        .iter()
        .filter(|r| !r.success && r.failure != Some(FailureKind::AlreadyInstrumented))
        .collect();
    let all_permission =
        !failed.is_empty() && failed.iter().all(|r| r.failure == Some(FailureKind::Permission));
    ExitCode::from_summary(&summary, all_permission)
}

/// Ask on `err` and read the answer from `input`. Only `y`/`yes` confirms.
fn confirm(targets: &[String], input: &mut dyn BufRead, err: &mut dyn Write) -> bool {
    let _ = writeln!(err, "The following process(es) will be restarted:");
    for line in targets {
        let _ = writeln!(err, "  {}", line);
    }
    let _ = write!(err, "Continue? [y/N] ");
    let _ = err.flush();

    let mut line = String::new();
    if input.read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn run_daemon(global: &GlobalOpts, args: &DaemonArgs, config: &Config, ctx: &LogContext) -> ExitCode {
    let agents: Vec<AgentDescriptor> = config
        .enabled_agents()
        .into_iter()
        .map(AgentDescriptor::from)
        .collect();
    if agents.is_empty() {
        eprintln!("jretrofit: no agents enabled in the config");
        return ExitCode::ConfigError;
    }

    let mut options = DaemonOptions::from_config(config);
    options.once = args.once;
    if let Some(secs) = args.interval {
        if secs == 0 {
            eprintln!("jretrofit: --interval must be positive");
            return ExitCode::ArgsError;
        }
        options.interval = std::time::Duration::from_secs(secs);
    }
    if let Some(path) = &args.pid_file {
        options.pid_file = Some(path.clone());
    }

    let cancel = CancelToken::new();
    if let Err(e) = install_signal_handlers(&cancel) {
        return report_error(global, e.into());
    }

    let injector = Injector::from_config(config, ctx.clone());
    let mut daemon = Daemon::new(injector, ProcessFilter::from(&config.process), agents, options);
    match daemon.run(&cancel) {
        Ok(_) => ExitCode::Clean,
        Err(e) => report_error(global, e.into()),
    }
}

fn run_config_show(
    global: &GlobalOpts,
    config: &Config,
    source: &jr_common::config::ConfigSource,
    ctx: &LogContext,
) -> ExitCode {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = match global.format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let snapshot = ConfigSnapshot::new(config, source).ok();
            let payload = serde_json::json!({ "source": snapshot, "config": config });
            serde_json::to_string_pretty(&output::envelope("config show", &ctx.run_id, payload))
                .map_err(io::Error::from)
                .and_then(|s| writeln!(out, "{}", s))
        }
        OutputFormat::Summary => writeln!(
            out,
            "config: {} ({} agent(s) enabled, {} exclusion rule(s))",
            source.path.as_deref().unwrap_or("built-in defaults"),
            config.enabled_agents().len(),
            config.exclude.len()
        ),
        OutputFormat::Table => match serde_yaml::to_string(config) {
            Ok(yaml) => writeln!(
                out,
                "# source: {}\n{}",
                source.path.as_deref().unwrap_or("built-in defaults"),
                yaml
            ),
            Err(e) => Err(io::Error::other(e)),
        },
    };
    emitted(result).unwrap_or(ExitCode::Clean)
}

fn run_config_validate(global: &GlobalOpts, path: Option<PathBuf>) -> ExitCode {
    let cli_path = path.or_else(|| global.config.clone());
    let (config, source) = match ConfigResolver::new(cli_path).load() {
        Ok(loaded) => loaded,
        Err(e) => return report_error(global, e),
    };

    let issues = config.validate();
    let has_errors = issues.iter().any(|i| i.severity == Severity::Error);
    let location = source.path.as_deref().unwrap_or("built-in defaults");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = if global.format.is_machine() {
        let issues: Vec<_> = issues
            .iter()
            .map(|i| {
                serde_json::json!({
                    "severity": i.severity,
                    "code": i.code(),
                    "message": i.error.to_string(),
                })
            })
            .collect();
        let doc = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "path": source.path,
            "valid": !has_errors,
            "issues": issues,
        });
        writeln!(out, "{}", doc)
    } else if issues.is_empty() {
        writeln!(out, "{}: valid", location)
    } else {
        issues
            .iter()
            .try_for_each(|i| writeln!(out, "{}: {}", location, i))
    };
    if let Some(code) = emitted(result) {
        return code;
    }

    if has_errors {
        ExitCode::ConfigError
    } else {
        ExitCode::Clean
    }
}

fn print_version(global: &GlobalOpts) {
    if global.format.is_machine() {
        let info = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "jretrofit_version": env!("CARGO_PKG_VERSION"),
        });
        println!("{}", info);
    } else {
        println!("jretrofit {}", env!("CARGO_PKG_VERSION"));
        println!("schema version: {}", SCHEMA_VERSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_accepts_only_yes() {
        let targets = vec!["42       alice      app.jar".to_string()];
        for (answer, expected) in [("y\n", true), ("YES\n", true), ("n\n", false), ("\n", false), ("", false)] {
            let mut input = io::Cursor::new(answer.as_bytes());
            let mut prompt = Vec::new();
            assert_eq!(confirm(&targets, &mut input, &mut prompt), expected, "{:?}", answer);
            let prompt = String::from_utf8(prompt).unwrap();
            assert!(prompt.contains("42"));
            assert!(prompt.ends_with("[y/N] "));
        }
    }

    #[test]
    fn test_resolve_agents_prefers_cli() {
        let mut config = Config::default();
        config.agents.push(jr_common::config::AgentConfig {
            name: "apm".into(),
            path: "/opt/apm.jar".into(),
            options: None,
            enabled: true,
            priority: 0,
        });
        let mut args = InjectArgs {
            pids: vec![1],
            all: false,
            agent: Some("/opt/other.jar".into()),
            options: Some("k=v".into()),
            dry_run: false,
            yes: false,
            no_force: false,
        };
        let agents = resolve_agents(&args, &config);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].path, "/opt/other.jar");
        assert_eq!(agents[0].options.as_deref(), Some("k=v"));

        args.agent = None;
        args.options = None;
        let agents = resolve_agents(&args, &config);
        assert_eq!(agents[0].path, "/opt/apm.jar");
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["jretrofit", "-f", "json", "inject", "--pid", "7", "--pid", "8", "--dry-run"]);
        assert_eq!(cli.global.format, OutputFormat::Json);
        match cli.command {
            Commands::Inject(args) => {
                assert_eq!(args.pids, vec![7, 8]);
                assert!(args.dry_run);
            }
            _ => panic!("expected inject"),
        }
    }
}
