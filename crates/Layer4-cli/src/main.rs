//! Sentinel CLI - Main entry point

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sentinel - tool execution guard for agent runtimes
#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: global + project sentinel.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Enable debug logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the guard whether a tool call would be allowed
    Check {
        /// Tool name
        tool: String,

        /// Caller access level (owner, admin, user, none)
        #[arg(short, long, default_value = "user")]
        level: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
    /// Show how a shell command is classified
    Classify {
        /// Shell command line
        command: String,

        /// Caller access level used for the verdict
        #[arg(short, long, default_value = "user")]
        level: String,
    },
    /// List recent subagent runs
    Runs {
        /// Look back this many days
        #[arg(long, default_value = "7")]
        days: u32,

        /// Run database (default: ~/.local/share/sentinel/runs.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Mark runs left `running` by a dead process as failed
    Recover {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
    /// Show recent audit entries
    Audit {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Audit database (default: ~/.local/share/sentinel/audit.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { args.log_level.as_str() };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = commands::load_config(args.config.as_deref())?;

    match args.command {
        Command::Check { tool, level, args } => {
            let level = level.parse().context("invalid --level")?;
            let allowed = commands::check(config, &tool, level, &args)?;
            Ok(if allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Classify { command, level } => {
            let level = level.parse().context("invalid --level")?;
            print!("{}", commands::classify(config, &command, level)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Runs { days, db } => {
            let store = commands::open_run_store(db)?;
            print!("{}", commands::list_runs(&store, days)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Recover { db } => {
            let store = commands::open_run_store(db)?;
            let count = commands::recover(&store)?;
            println!("Recovered {} orphaned run(s)", count);
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Audit { limit, db } => {
            print!("{}", commands::audit(db, limit)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
