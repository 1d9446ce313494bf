use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod listfile;
mod ui;

#[derive(Parser)]
#[command(name = "chanport")]
#[command(about = "Migrate channel history between workspaces")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for persisted migration state
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download channels, messages and attachments from the source workspace
    Download {
        /// Channel to download (repeatable). Defaults to every channel.
        #[arg(long = "channel", value_name = "NAME")]
        channels: Vec<String>,

        /// File listing channel names, one per line
        #[arg(long, value_name = "FILE")]
        channels_file: Option<PathBuf>,

        /// Discard existing checkpoints and re-download from scratch
        #[arg(long)]
        force: bool,

        /// Temporarily unarchive archived channels to download them
        #[arg(long)]
        unlock_archived: bool,
    },

    /// Replay downloaded history into the destination workspace
    Upload {
        /// Channel to upload (repeatable). Defaults to every downloaded channel.
        #[arg(long = "channel", value_name = "NAME")]
        channels: Vec<String>,

        /// File listing channel names, one per line
        #[arg(long, value_name = "FILE")]
        channels_file: Option<PathBuf>,

        /// Show what would be posted without posting anything
        #[arg(long)]
        dry_run: bool,

        /// Cap on messages replayed per channel
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },

    /// Download then upload in one run
    Migrate {
        #[arg(long = "channel", value_name = "NAME")]
        channels: Vec<String>,

        #[arg(long, value_name = "FILE")]
        channels_file: Option<PathBuf>,

        #[arg(long)]
        unlock_archived: bool,

        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },

    /// Find and repair channels with missing attachment downloads
    Reconcile {
        /// Repair without prompting
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Show persisted migration progress
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show source and destination workspace identities
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chanport=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Download {
            channels,
            channels_file,
            force,
            unlock_archived,
        } => {
            let selection = commands::resolve_selection(channels, channels_file.as_deref())?;
            commands::download::run(
                cli.config.as_deref(),
                cli.data_dir,
                selection,
                force,
                unlock_archived,
            )
            .await
        }
        Commands::Upload {
            channels,
            channels_file,
            dry_run,
            limit,
        } => {
            let selection = commands::resolve_selection(channels, channels_file.as_deref())?;
            commands::upload::run(cli.config.as_deref(), cli.data_dir, selection, dry_run, limit)
                .await
        }
        Commands::Migrate {
            channels,
            channels_file,
            unlock_archived,
            limit,
        } => {
            let selection = commands::resolve_selection(channels, channels_file.as_deref())?;
            commands::migrate::run(
                cli.config.as_deref(),
                cli.data_dir,
                selection,
                unlock_archived,
                limit,
            )
            .await
        }
        Commands::Reconcile { yes } => {
            commands::reconcile::run(cli.config.as_deref(), cli.data_dir, yes).await
        }
        Commands::Status { json } => commands::status::run(cli.data_dir.as_deref(), json),
        Commands::Info => commands::info::run(cli.config.as_deref(), cli.data_dir).await,
    }
}
