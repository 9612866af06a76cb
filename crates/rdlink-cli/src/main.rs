mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use rdlink_api::traits::FileSelection;
use rdlink_core::config::AppConfig;
use rdlink_runtime::commands::Command;
use rdlink_runtime::{Runtime, RuntimeError, StoreChange};

const RELOAD_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "rdlink", version, about = "Turn magnet links into direct downloads")]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Register a magnet link.
    Add { magnet: String },
    /// Show tracked torrents.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Poll a torrent again.
    Retry {
        id: String,
        /// Only retry if the torrent failed or timed out.
        #[arg(long)]
        failed_only: bool,
    },
    /// Retry every failed or timed out torrent.
    RetryFailed,
    /// Drop finished torrents from the list.
    Clear,
    /// Drop one torrent from the list.
    Remove { id: String },
    /// Choose files to download (`all` or file ids) and resume polling.
    Select {
        id: String,
        #[arg(default_value = "all", num_args = 1..)]
        files: Vec<String>,
    },
    /// Service-side details of a torrent.
    Info { id: String },
    /// Service-side progress of a torrent.
    Progress { id: String },
    /// Validate and save an API token.
    Token { token: String },
    /// Show preferences.
    Prefs,
    /// Change one preference.
    Set { key: String, value: String },
    /// Ask for notification permission.
    Notifications,
    /// Poll until interrupted.
    Watch,
    /// Run a single reconciliation tick.
    Tick,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, RuntimeError> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .map_err(|e| RuntimeError::Config(e.to_string()))?;

    let daemon = matches!(cli.command, Cmd::Watch);
    let _log_guard = logging::init(&config.logging, daemon);

    let runtime = Runtime::open(config)?;

    let command = match cli.command {
        Cmd::Add { magnet } => Command::AddMagnet {
            magnet_link: magnet,
        },
        Cmd::List { json: false } => {
            println!("{}", output::render_jobs(&runtime.store().jobs()));
            return Ok(ExitCode::SUCCESS);
        }
        Cmd::List { json: true } => Command::ListTorrents,
        Cmd::Retry { id, failed_only } => {
            if failed_only {
                Command::RetryFailed { torrent_id: id }
            } else {
                Command::RetryTorrent { torrent_id: id }
            }
        }
        Cmd::RetryFailed => Command::RetryAllFailed,
        Cmd::Clear => Command::ClearCompleted,
        Cmd::Remove { id } => Command::RemoveTorrent { torrent_id: id },
        Cmd::Select { id, files } => {
            let file_ids: FileSelection = files
                .join(",")
                .parse()
                .map_err(RuntimeError::Config)?;
            let resp = runtime.select_files(id, file_ids).await;
            return Ok(output::print_response(&resp));
        }
        Cmd::Info { id } => Command::GetTorrentInfo { torrent_id: id },
        Cmd::Progress { id } => Command::GetTorrentProgress { torrent_id: id },
        Cmd::Notifications => Command::NotificationPermissionRequest,
        Cmd::Token { token } => {
            return if runtime.set_token(&token).await? {
                println!("Token accepted and saved.");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("Token rejected by the service.");
                Ok(ExitCode::FAILURE)
            };
        }
        Cmd::Prefs => {
            println!("{}", output::render_preferences(&runtime.store().preferences()));
            return Ok(ExitCode::SUCCESS);
        }
        Cmd::Set { key, value } => {
            let prefs = runtime.set_preference(&key, &value).await?;
            println!("{}", output::render_preferences(&prefs));
            return Ok(ExitCode::SUCCESS);
        }
        Cmd::Tick => {
            let report = runtime.tick().await?;
            let text = serde_json::to_string_pretty(&report)
                .map_err(|e| RuntimeError::Config(e.to_string()))?;
            println!("{text}");
            return Ok(ExitCode::SUCCESS);
        }
        Cmd::Watch => {
            watch(&runtime).await?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let resp = runtime.handle(command).await;
    Ok(output::print_response(&resp))
}

/// Run the poll alarm and print list changes until Ctrl-C.
async fn watch(runtime: &Runtime) -> Result<(), RuntimeError> {
    let mut changes = runtime.subscribe();
    if !runtime.store().preferences().has_credential() {
        warn!("No API token configured; set one with `rdlink token <token>`");
    }
    runtime.poller().ensure_armed();
    println!("{}", output::render_jobs(&runtime.store().jobs()));

    // Commands from other processes only reach this one through the database.
    let mut reload = tokio::time::interval(RELOAD_INTERVAL);
    loop {
        tokio::select! {
            _ = reload.tick() => {
                if let Err(e) = runtime.store().reload().await {
                    warn!(error = %e, "Store reload failed");
                }
            }
            change = changes.recv() => match change {
                Ok(StoreChange::Jobs(jobs)) => {
                    println!("\n{}", output::render_jobs(&jobs));
                }
                Ok(StoreChange::Preferences(_)) => {
                    runtime.poller().rearm();
                }
                Ok(StoreChange::NotificationDedup(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        }
    }

    runtime.poller().disarm();
    Ok(())
}
