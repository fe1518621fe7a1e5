//! filesync - one-way incremental directory synchronization
//!
//! Detects what changed on each replica since its last run and propagates the
//! source changes to the destination, recycling every destination file it
//! replaces or removes.

mod display;
mod json_output;
mod progress;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use filesync_config::{Config, ConfigLoader};
use filesync_engine::EngineBuilder;
use filesync_sync::{
    ChangeDetector, ChangeFilter, ProgressReporter, RecycleBin, ReplicaIdentity, ReplicaLayout,
    SyncOptions,
};
use filesync_types::{RemoteCredentials, RunId, RunStatus};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// filesync - one-way incremental directory synchronization
#[derive(Parser)]
#[command(
    name = "filesync",
    version = env!("CARGO_PKG_VERSION"),
    about = "One-way incremental directory synchronization",
    long_about = "filesync keeps a destination directory in step with a source directory.\n\
                  Each run detects changes on both sides since the previous run, applies the\n\
                  source changes to the destination, and keeps replaced files in a recycle area."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of styled text
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "FILESYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propagate source changes to the destination
    Sync {
        /// Source directory
        source: PathBuf,
        /// Destination directory (created if missing)
        destination: PathBuf,
        /// Dry run - show what would be done
        #[arg(long)]
        dry_run: bool,
        /// Exclude patterns, added to the configured ones
        #[arg(long)]
        exclude: Vec<String>,
        /// Read additional exclude patterns from a gitignore-style file
        #[arg(long)]
        exclude_from: Option<PathBuf>,
        /// Number of changes applied concurrently
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Share account used to connect both roots
        #[arg(long, env = "FILESYNC_SHARE_USER")]
        user: Option<String>,
        /// Share password
        #[arg(long, env = "FILESYNC_SHARE_PASSWORD", hide_env_values = true, requires = "user")]
        password: Option<String>,
        /// Share authentication domain
        #[arg(long, env = "FILESYNC_SHARE_DOMAIN", requires = "user")]
        domain: Option<String>,
    },
    /// Show the identity of a replica
    Id {
        /// Replica root
        root: PathBuf,
        /// Do not create an identity if none exists
        #[arg(long)]
        no_create: bool,
    },
    /// Show pending changes of a replica since its last run
    Detect {
        /// Replica root
        root: PathBuf,
        /// Record the current state as the new baseline
        #[arg(long)]
        commit: bool,
        /// Exclude patterns, added to the configured ones
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Manage the recycle area of a replica
    Recycle {
        #[command(subcommand)]
        command: RecycleCommand,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Write the default configuration to this file
        #[arg(long, value_name = "PATH")]
        generate: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RecycleCommand {
    /// List recycle batches, oldest first
    List {
        /// Replica root
        root: PathBuf,
    },
    /// Remove batches older than the retention period
    Purge {
        /// Replica root
        root: PathBuf,
        /// Age in days, defaults to the configured retention
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            display::display_error(&format!("Failed to load configuration: {}", e));
            return Ok(ExitCode::FAILURE);
        }
    };

    let _log_guard = init_logging(&cli, &config)?;
    info!("filesync v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Sync {
            source,
            destination,
            dry_run,
            exclude,
            exclude_from,
            concurrency,
            user,
            password,
            domain,
        } => {
            let credentials = user.map(|user| {
                let credentials = RemoteCredentials::new(user, password.unwrap_or_default());
                match domain {
                    Some(domain) => credentials.with_domain(domain),
                    None => credentials,
                }
            });
            sync_command(
                config,
                SyncArgs {
                    source,
                    destination,
                    dry_run,
                    exclude,
                    exclude_from,
                    concurrency,
                    credentials,
                },
                cli.quiet,
                cli.json,
            )
            .await
        }
        Commands::Id { root, no_create } => id_command(&root, no_create).await,
        Commands::Detect {
            root,
            commit,
            exclude,
        } => detect_command(&config, &root, commit, exclude, cli.json).await,
        Commands::Recycle { command } => recycle_command(&config, command).await,
        Commands::Config { default, generate } => config_command(&config, default, generate),
    }
}

fn init_logging(cli: &Cli, config: &Config) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let (file_layer, guard) = match &config.logging.log_file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path.file_name().context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if config.logging.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(guard)
}

struct SyncArgs {
    source: PathBuf,
    destination: PathBuf,
    dry_run: bool,
    exclude: Vec<String>,
    exclude_from: Option<PathBuf>,
    concurrency: Option<usize>,
    credentials: Option<RemoteCredentials>,
}

async fn sync_command(mut config: Config, args: SyncArgs, quiet: bool, json: bool) -> Result<ExitCode> {
    config.sync.exclude.extend(args.exclude);
    if let Some(path) = &args.exclude_from {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read exclude file '{}'", path.display()))?;
        let ignore = ChangeFilter::parse_gitignore(&content)?;
        config.sync.exclude.extend(ignore.patterns().iter().cloned());
    }
    if let Some(concurrency) = args.concurrency {
        config.sync.apply_concurrency = concurrency
            .try_into()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }

    if !quiet && !json {
        println!(
            "{} Synchronizing {} into {}",
            style("⟲").blue().bold(),
            style(args.source.display()).cyan(),
            style(args.destination.display()).cyan()
        );
        if args.dry_run {
            display::display_info("Dry run mode - no changes will be made");
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let mut reporter = ProgressReporter::new(RunId::new_v4());
    let tracker = (!quiet && !json)
        .then(|| reporter.take_event_receiver())
        .flatten()
        .map(progress::spawn_tracker);

    let engine = EngineBuilder::new()
        .with_config(config)
        .with_dry_run(args.dry_run)
        .with_cancellation(cancel)
        .with_progress(reporter)
        .build()?;

    let report = engine
        .run(&args.source, &args.destination, args.credentials)
        .await;
    drop(engine);

    if let Some(tracker) = tracker {
        let _ = tracker.await;
    }

    if json {
        let output = json_output::RunReportJson::new(&args.source, &args.destination, &report);
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !quiet {
        display::display_report(&report);
    }

    Ok(match report.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Error => ExitCode::FAILURE,
        RunStatus::Cancelled => ExitCode::from(130),
    })
}

async fn id_command(root: &Path, no_create: bool) -> Result<ExitCode> {
    let id = if no_create {
        ReplicaIdentity::read(root).await?
    } else {
        Some(ReplicaIdentity::get_or_create(root).await?)
    };

    match id {
        Some(id) => {
            println!("{}", id);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            display::display_warning(&format!("'{}' has no replica identity", root.display()));
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn detect_command(
    config: &Config,
    root: &Path,
    commit: bool,
    exclude: Vec<String>,
    json: bool,
) -> Result<ExitCode> {
    let filter = ChangeFilter::new(config.sync.exclude.iter().chain(&exclude))?;
    let options = SyncOptions::from_config(config).with_dry_run(!commit);

    let replica_id = ReplicaIdentity::get_or_create(root).await?;
    let changes = ChangeDetector::new(options.detect_config())
        .detect_changes(replica_id, root, &filter)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else {
        display::display_change_set(&changes, commit);
    }
    Ok(ExitCode::SUCCESS)
}

async fn recycle_command(config: &Config, command: RecycleCommand) -> Result<ExitCode> {
    match command {
        RecycleCommand::List { root } => {
            let batches = RecycleBin::list_batches(&ReplicaLayout::new(&root)).await?;
            display::display_batches(&batches);
        }
        RecycleCommand::Purge {
            root,
            older_than_days,
        } => {
            let days = older_than_days.unwrap_or(config.recycle.retention_days);
            let max_age = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
            let removed = RecycleBin::purge_older_than(&ReplicaLayout::new(&root), max_age).await?;
            display::display_success(&format!(
                "Purged {} recycle batches older than {} days",
                removed, days
            ));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn config_command(config: &Config, default: bool, generate: Option<PathBuf>) -> Result<ExitCode> {
    if let Some(path) = generate {
        ConfigLoader::generate_default_config(&path)?;
        display::display_success(&format!("Wrote default configuration to '{}'", path.display()));
        return Ok(ExitCode::SUCCESS);
    }

    if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        println!("{}", serde_yaml::to_string(&Config::default())?);
    } else {
        println!("{} Current configuration:", style("⚙").blue().bold());
        match ConfigLoader::config_exists() {
            Some(path) => println!("# loaded from {}", path.display()),
            None => println!("# no configuration file found, using defaults"),
        }
        println!("{}", serde_yaml::to_string(config)?);
    }
    Ok(ExitCode::SUCCESS)
}
