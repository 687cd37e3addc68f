use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod backend;
mod commands;
mod config;
mod error;
mod exec;
mod files;
mod path;
mod protocol;
mod service;
mod terminal;
mod workspace;

#[derive(Parser)]
#[command(name = "nook")]
#[command(
    author,
    version,
    about = "Per-user isolated workspaces with confined files and terminals"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// State and config directory (defaults to the platform data dir)
    #[arg(long, global = true, env = "NOOK_HOME")]
    home: Option<PathBuf>,

    /// Workspace owner to act for
    #[arg(short, long, global = true, env = "NOOK_OWNER", default_value = "local")]
    owner: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the owner's workspace (no-op if it exists)
    Provision,

    /// Show the owner's workspace record
    Status {
        /// List every workspace instead
        #[arg(short, long)]
        all: bool,
    },

    /// Tear down the owner's workspace
    Remove,

    /// File operations inside the workspace
    Fs {
        #[command(subcommand)]
        action: commands::fs::FsAction,
    },

    /// Run a workspace file with its interpreter
    Run {
        /// Logical file path, or a command line with --command
        target: String,

        /// Treat the target as a command line
        #[arg(short, long)]
        command: bool,

        /// Working directory (defaults to the file's directory)
        #[arg(long)]
        cwd: Option<String>,
    },

    /// Serve JSON-lines requests on stdin/stdout
    Serve,
}

/// Log to stderr, and to a daily file when configured. The returned guard
/// must live until exit so buffered file lines are flushed.
fn init_logging(verbose: bool, home: &Path) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("nook=debug")
    } else {
        EnvFilter::new("nook=info")
    };

    let directory = config::Config::load(home)
        .ok()
        .and_then(|config| config.logging.directory);

    let (file_layer, guard) = match directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "nook.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = config::resolve_home(cli.home)?;
    let _guard = init_logging(cli.verbose, &home);
    let owner = cli.owner.as_str();

    match cli.command {
        Commands::Provision => {
            commands::provision::run(&home, owner).await?;
        }
        Commands::Status { all } => {
            commands::status::run(&home, owner, all).await?;
        }
        Commands::Remove => {
            commands::remove::run(&home, owner).await?;
        }
        Commands::Fs { action } => {
            commands::fs::run(&home, owner, action).await?;
        }
        Commands::Run {
            target,
            command,
            cwd,
        } => {
            commands::run::run(&home, owner, &target, command, cwd.as_deref()).await?;
        }
        Commands::Serve => {
            commands::serve::run(&home, owner).await?;
        }
    }

    Ok(())
}
