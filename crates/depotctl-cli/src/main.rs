use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use depotctl_core::operation::OperationKind;
use depotctl_execution::ConsoleLogEvent;
use depotctl_infrastructure::DepotPaths;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;

mod commands;
mod logging;
mod prompt;

use commands::AppContext;
use commands::operation::RunArgs;
use commands::profile::{AddArgs, EditArgs};

#[derive(Parser)]
#[command(name = "depotctl")]
#[command(version, about = "depotctl - drive SteamCMD uploads and downloads from saved profiles", long_about = None)]
struct Cli {
    /// Use this directory instead of the platform config directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Mirror the tool's console output while an operation runs
    #[arg(long, global = true)]
    show_console: bool,

    /// Play a scripted session instead of starting the tool
    #[arg(long, global = true)]
    simulate: bool,

    /// Log at info level on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage saved profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Upload a build using an upload profile
    Upload(RunArgs),
    /// Download a depot using a download profile
    Download(RunArgs),
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Show recent operation results
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List all profiles
    List,
    /// Show one profile
    Show { name: String },
    /// Create a profile
    Add(AddArgs),
    /// Change fields of a profile
    Edit(EditArgs),
    /// Delete a profile
    Remove { name: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the stored settings
    Show,
    /// Set one key
    Set { key: String, value: String },
    /// Reset one key to its default
    Unset { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let paths = DepotPaths::new(cli.config_dir)?;

    let (console_tx, console_rx) = mpsc::unbounded_channel();
    let _log_guard = logging::init(&paths.logs_dir(), cli.verbose, console_tx);
    let mirror = tokio::spawn(mirror_console(console_rx, cli.show_console));

    let ctx = AppContext::open(paths).await?;
    tracing::debug!("[Main] Using {}", ctx.paths.base_dir().display());

    let succeeded = match cli.command {
        Commands::Profile { action } => {
            match action {
                ProfileAction::List => commands::profile::list(&ctx).await?,
                ProfileAction::Show { name } => commands::profile::show(&ctx, &name).await?,
                ProfileAction::Add(args) => commands::profile::add(&ctx, args).await?,
                ProfileAction::Edit(args) => commands::profile::edit(&ctx, args).await?,
                ProfileAction::Remove { name } => commands::profile::remove(&ctx, &name).await?,
            }
            true
        }
        Commands::Upload(args) => {
            commands::operation::run(&ctx, OperationKind::Upload, args, cli.simulate).await?
        }
        Commands::Download(args) => {
            commands::operation::run(&ctx, OperationKind::Download, args, cli.simulate).await?
        }
        Commands::Settings { action } => {
            match action.unwrap_or(SettingsAction::Show) {
                SettingsAction::Show => commands::settings::show(&ctx)?,
                SettingsAction::Set { key, value } => commands::settings::set(&ctx, &key, &value)?,
                SettingsAction::Unset { key } => commands::settings::unset(&ctx, &key)?,
            }
            true
        }
        Commands::History { limit } => {
            commands::history::show(&ctx, limit).await?;
            true
        }
    };

    mirror.abort();
    Ok(succeeded)
}

/// Prints console lines as they arrive, or just drains them.
async fn mirror_console(mut rx: mpsc::UnboundedReceiver<ConsoleLogEvent>, show: bool) {
    while let Some(event) = rx.recv().await {
        if show && event.is_console() {
            println!("{} {}", "│".dimmed(), event.message.dimmed());
        }
    }
}
