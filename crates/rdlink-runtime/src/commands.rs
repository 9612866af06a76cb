//! Request/response surface for user actions.
//!
//! Commands mutate the store directly so callers see the result at once,
//! without waiting for the next reconciliation tick.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rdlink_api::traits::{DebridService, FileSelection, RemoteStatus, TorrentInfo};
use rdlink_core::error::RdlinkError;
use rdlink_core::magnet;
use rdlink_core::models::{insert_front, Job, JobStatus};

use crate::notify::NotificationGate;
use crate::store::JobStore;

/// A user action, tagged on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    AddMagnet { magnet_link: String },
    /// Retry one job in any state but `ready`.
    RetryTorrent { torrent_id: String },
    /// Retry one job only if it is `error` or `timeout`.
    RetryFailed { torrent_id: String },
    RetryAllFailed,
    ClearCompleted,
    SelectFiles {
        torrent_id: String,
        file_ids: FileSelection,
    },
    GetTorrentInfo { torrent_id: String },
    GetTorrentProgress { torrent_id: String },
    NotificationPermissionRequest,
    RemoveTorrent { torrent_id: String },
    ListTorrents,
    ValidateToken { token: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddMagnet { .. } => "ADD_MAGNET",
            Self::RetryTorrent { .. } => "RETRY_TORRENT",
            Self::RetryFailed { .. } => "RETRY_FAILED",
            Self::RetryAllFailed => "RETRY_ALL_FAILED",
            Self::ClearCompleted => "CLEAR_COMPLETED",
            Self::SelectFiles { .. } => "SELECT_FILES",
            Self::GetTorrentInfo { .. } => "GET_TORRENT_INFO",
            Self::GetTorrentProgress { .. } => "GET_TORRENT_PROGRESS",
            Self::NotificationPermissionRequest => "NOTIFICATION_PERMISSION_REQUEST",
            Self::RemoveTorrent { .. } => "REMOVE_TORRENT",
            Self::ListTorrents => "LIST_TORRENTS",
            Self::ValidateToken { .. } => "VALIDATE_TOKEN",
        }
    }
}

/// Payload of a successful command, flattened into the response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Added { torrent: Job },
    Retried { retried: usize },
    Cleared { cleared: usize },
    Removed { removed: bool },
    Info { info: TorrentInfo },
    Progress {
        progress: f64,
        status: RemoteStatus,
        filename: String,
    },
    Permission { granted: bool },
    Torrents { torrents: Vec<Job> },
    TokenValid { valid: bool },
    Ack {},
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("no API token configured")]
    NotConfigured,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("torrent already added: {}", .0.filename)]
    Duplicate(Box<Job>),
    #[error("{0}")]
    Service(String),
    #[error("storage error: {0}")]
    Store(String),
}

impl From<RdlinkError> for CommandError {
    fn from(e: RdlinkError) -> Self {
        Self::Store(e.to_string())
    }
}

/// `{"success": true, ...payload}` or `{"success": false, "error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<Job>,
}

impl CommandResponse {
    pub fn ok(reply: Reply) -> Self {
        Self {
            success: true,
            reply: Some(reply),
            error: None,
            existing: None,
        }
    }

    pub fn failure(err: CommandError) -> Self {
        let error = Some(err.to_string());
        let existing = match err {
            CommandError::Duplicate(job) => Some(*job),
            _ => None,
        };
        Self {
            success: false,
            reply: None,
            error,
            existing,
        }
    }
}

pub struct CommandHandler<S> {
    service: Arc<S>,
    store: JobStore,
    gate: Arc<NotificationGate>,
}

impl<S: DebridService> CommandHandler<S> {
    pub fn new(service: Arc<S>, store: JobStore, gate: Arc<NotificationGate>) -> Self {
        Self {
            service,
            store,
            gate,
        }
    }

    /// Run a command. Failures are reported in the response, never raised.
    pub async fn handle(&self, command: Command) -> CommandResponse {
        let name = command.name();
        debug!(command = name, "Handling command");
        match self.dispatch(command).await {
            Ok(reply) => CommandResponse::ok(reply),
            Err(e) => {
                warn!(command = name, error = %e, "Command failed");
                CommandResponse::failure(e)
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<Reply, CommandError> {
        match command {
            Command::AddMagnet { magnet_link } => self.add_magnet(magnet_link).await,
            Command::RetryTorrent { torrent_id } => self.retry_one(torrent_id, false).await,
            Command::RetryFailed { torrent_id } => self.retry_one(torrent_id, true).await,
            Command::RetryAllFailed => self.retry_all_failed().await,
            Command::ClearCompleted => self.clear_completed().await,
            Command::SelectFiles {
                torrent_id,
                file_ids,
            } => self.select_files(&torrent_id, &file_ids).await,
            Command::GetTorrentInfo { torrent_id } => {
                let info = self.fetch_info(&torrent_id).await?;
                Ok(Reply::Info { info })
            }
            Command::GetTorrentProgress { torrent_id } => {
                let info = self.fetch_info(&torrent_id).await?;
                Ok(Reply::Progress {
                    progress: info.progress,
                    status: info.status,
                    filename: info.filename,
                })
            }
            Command::NotificationPermissionRequest => self.request_permission().await,
            Command::RemoveTorrent { torrent_id } => self.remove(torrent_id).await,
            Command::ListTorrents => Ok(Reply::Torrents {
                torrents: self.store.jobs(),
            }),
            Command::ValidateToken { token } => {
                let token = token.trim();
                if token.is_empty() {
                    return Err(CommandError::InvalidInput("empty token".into()));
                }
                let valid = self
                    .service
                    .validate_credential(token)
                    .await
                    .map_err(service_error)?;
                Ok(Reply::TokenValid { valid })
            }
        }
    }

    async fn token(&self) -> Result<String, CommandError> {
        let prefs = self.store.load_preferences().await?;
        prefs
            .credential()
            .map(str::to_owned)
            .ok_or(CommandError::NotConfigured)
    }

    async fn add_magnet(&self, magnet_link: String) -> Result<Reply, CommandError> {
        let magnet_link = magnet_link.trim().to_string();
        let hash = magnet::extract_info_hash(&magnet_link).ok_or_else(|| {
            CommandError::InvalidInput("magnet link has no 40-character info hash".into())
        })?;
        let token = self.token().await?;

        let jobs = self.store.load_jobs().await?;
        if let Some(existing) = jobs.into_iter().find(|j| j.matches_hash(&hash)) {
            return Err(CommandError::Duplicate(Box::new(existing)));
        }

        let added = self
            .service
            .add_magnet(&token, &magnet_link)
            .await
            .map_err(service_error)?;

        let cap = self.store.preferences().max_torrents;
        let remote_id = added.id.clone();
        let job = Job::new(added.id, magnet_link, Some(hash.clone()), Utc::now());
        let inserted = self
            .store
            .update_jobs(move |jobs| {
                // Another add for the same magnet may have landed meanwhile.
                if let Some(existing) = jobs.iter().find(|j| j.matches_hash(&hash)) {
                    return (false, Err(existing.clone()));
                }
                let dropped = insert_front(jobs, job.clone(), cap);
                (true, Ok((job, dropped)))
            })
            .await?;
        let (job, dropped) = inserted.map_err(|existing| {
            warn!(
                job_id = %remote_id,
                existing_id = %existing.id,
                "Duplicate landed during add; service torrent left untracked"
            );
            CommandError::Duplicate(Box::new(existing))
        })?;

        info!(job_id = %job.id, dropped = dropped.len(), "Magnet added");
        if !dropped.is_empty() {
            self.gate
                .clear(dropped.into_iter().map(|j| j.id).collect())
                .await?;
        }
        Ok(Reply::Added { torrent: job })
    }

    async fn retry_one(&self, torrent_id: String, only_failed: bool) -> Result<Reply, CommandError> {
        let now = Utc::now();
        let id = torrent_id.clone();
        let retried = self
            .store
            .update_jobs(move |jobs| {
                let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
                    return (false, 0);
                };
                let eligible = if only_failed {
                    job.status.is_failed()
                } else {
                    job.status != JobStatus::Ready
                };
                if !eligible {
                    return (false, 0);
                }
                job.mark_retry(now);
                (true, 1)
            })
            .await?;
        if retried > 0 {
            info!(job_id = %torrent_id, "Job queued for retry");
        }
        Ok(Reply::Retried { retried })
    }

    async fn retry_all_failed(&self) -> Result<Reply, CommandError> {
        let now = Utc::now();
        let retried = self
            .store
            .update_jobs(move |jobs| {
                let mut retried = 0;
                for job in jobs.iter_mut().filter(|j| j.status.is_failed()) {
                    job.mark_retry(now);
                    retried += 1;
                }
                (retried > 0, retried)
            })
            .await?;
        info!(retried, "Retried failed jobs");
        Ok(Reply::Retried { retried })
    }

    async fn clear_completed(&self) -> Result<Reply, CommandError> {
        let removed = self
            .store
            .update_jobs(|jobs| {
                let (ready, keep): (Vec<Job>, Vec<Job>) = std::mem::take(jobs)
                    .into_iter()
                    .partition(|j| j.status == JobStatus::Ready);
                *jobs = keep;
                let ids: Vec<String> = ready.into_iter().map(|j| j.id).collect();
                (!ids.is_empty(), ids)
            })
            .await?;

        let cleared = removed.len();
        info!(cleared, "Cleared completed jobs");
        // The list write has already committed.
        if let Err(e) = self.gate.clear(removed).await {
            warn!(error = %e, "Failed to clear notification records");
        }
        Ok(Reply::Cleared { cleared })
    }

    async fn remove(&self, torrent_id: String) -> Result<Reply, CommandError> {
        let id = torrent_id.clone();
        let removed = self
            .store
            .update_jobs(move |jobs| {
                let before = jobs.len();
                jobs.retain(|j| j.id != id);
                let removed = jobs.len() != before;
                (removed, removed)
            })
            .await?;
        if removed {
            info!(job_id = %torrent_id, "Job removed");
            if let Err(e) = self.gate.clear(vec![torrent_id]).await {
                warn!(error = %e, "Failed to clear notification records");
            }
        }
        Ok(Reply::Removed { removed })
    }

    async fn select_files(
        &self,
        torrent_id: &str,
        selection: &FileSelection,
    ) -> Result<Reply, CommandError> {
        let token = self.token().await?;
        self.service
            .select_files(&token, torrent_id, selection)
            .await
            .map_err(service_error)?;
        info!(job_id = torrent_id, files = %selection.to_param(), "Files selected");
        Ok(Reply::Ack {})
    }

    async fn fetch_info(&self, torrent_id: &str) -> Result<TorrentInfo, CommandError> {
        let token = self.token().await?;
        self.service
            .get_info(&token, torrent_id)
            .await
            .map_err(service_error)
    }

    async fn request_permission(&self) -> Result<Reply, CommandError> {
        let granted = self.gate.permission_granted();
        if granted {
            let mut prefs = self.store.load_preferences().await?;
            if !prefs.notifications_enabled {
                prefs.notifications_enabled = true;
                self.store.save_preferences(prefs).await?;
            }
        }
        Ok(Reply::Permission { granted })
    }
}

fn service_error(e: impl std::error::Error) -> CommandError {
    CommandError::Service(e.to_string())
}
