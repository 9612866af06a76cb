//! Periodic reconciliation of local jobs against the debrid service.
//!
//! Each tick polls every `processing` job, maps the service's view onto a
//! local status change, and writes all changes back in one store update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use rdlink_api::traits::{DebridService, FileSelection, RemoteStatus, TorrentInfo};
use rdlink_core::models::{Job, JobStatus, Preferences};

use crate::notify::{Finished, NotificationGate};
use crate::store::JobStore;
use crate::RuntimeError;

/// Field changes for one job, computed against the tick's snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub info_hash: Option<String>,
    pub filename: Option<String>,
    pub status: Option<JobStatus>,
    /// `Some(None)` clears the URL.
    pub download_url: Option<Option<String>>,
    /// Links reported with a `downloaded` status, for the notification.
    pub link_count: usize,
}

impl JobPatch {
    fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.info_hash.is_none()
            && self.filename.is_none()
            && self.status.is_none()
            && self.download_url.is_none()
    }

    /// Apply to `job`. Returns `true` if any field changed.
    pub fn apply(&self, job: &mut Job) -> bool {
        let mut changed = false;
        if let Some(hash) = &self.info_hash {
            if job.info_hash.is_none() {
                job.info_hash = Some(hash.clone());
                changed = true;
            }
        }
        if let Some(name) = &self.filename {
            changed |= job.set_filename(name);
        }
        if let Some(status) = self.status {
            if job.status != status {
                job.status = status;
                changed = true;
            }
        }
        if let Some(url) = &self.download_url {
            if job.download_url != *url {
                job.download_url = url.clone();
                changed = true;
            }
        }
        changed
    }
}

/// What happened to one job during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Past the retry window; no service call was made.
    TimedOut,
    /// The service query failed; the job stays `processing`.
    QueryFailed,
    /// The service answered; the patch may be empty.
    Polled(JobPatch),
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// No credential configured; nothing was done.
    pub skipped: bool,
    pub polled: usize,
    pub changed: usize,
    pub timed_out: usize,
    pub failed_queries: usize,
    pub finished: Vec<Finished>,
}

pub struct Reconciler<S> {
    service: Arc<S>,
    store: JobStore,
    gate: Arc<NotificationGate>,
    tick_lock: Mutex<()>,
}

impl<S: DebridService> Reconciler<S> {
    pub fn new(service: Arc<S>, store: JobStore, gate: Arc<NotificationGate>) -> Self {
        Self {
            service,
            store,
            gate,
            tick_lock: Mutex::new(()),
        }
    }

    pub async fn tick(&self) -> Result<TickReport, RuntimeError> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`.
    ///
    /// Ticks never overlap: a tick waits for the previous write-back.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, RuntimeError> {
        let _guard = self.tick_lock.lock().await;

        let prefs = self.store.load_preferences().await?;
        let Some(token) = prefs.credential().map(str::to_owned) else {
            debug!("No API token configured, skipping tick");
            return Ok(TickReport {
                skipped: true,
                ..Default::default()
            });
        };

        let jobs = self.store.load_jobs().await?;
        let active: Vec<&Job> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Processing)
            .collect();
        if active.is_empty() {
            debug!("No active jobs");
            return Ok(TickReport::default());
        }

        let mut pending = Vec::with_capacity(active.len());
        for &job in &active {
            pending.push(self.poll_job(&token, job, &prefs, now));
        }
        let outcomes = join_all(pending).await;

        let mut report = TickReport {
            polled: active.len(),
            ..Default::default()
        };
        let mut patches = Vec::new();
        for (job, outcome) in active.iter().zip(outcomes) {
            match outcome {
                JobOutcome::TimedOut => {
                    report.timed_out += 1;
                    patches.push((job.id.clone(), JobPatch::status(JobStatus::Timeout)));
                }
                JobOutcome::QueryFailed => report.failed_queries += 1,
                JobOutcome::Polled(patch) if patch.is_empty() => {}
                JobOutcome::Polled(patch) => patches.push((job.id.clone(), patch)),
            }
        }

        if patches.is_empty() {
            debug!(polled = report.polled, "Tick complete, nothing changed");
            return Ok(report);
        }

        let (changed, finished) = self
            .store
            .update_jobs(move |jobs| write_back(jobs, &patches))
            .await?;
        report.changed = changed;
        report.finished = finished;

        info!(
            polled = report.polled,
            changed = report.changed,
            timed_out = report.timed_out,
            failed_queries = report.failed_queries,
            "Tick complete"
        );

        if !report.finished.is_empty() {
            if let Err(e) = self.gate.notify_batch(&report.finished).await {
                error!(error = %e, "Failed to record notifications");
            }
        }

        Ok(report)
    }

    /// Poll one job. Never fails: service errors become `QueryFailed`.
    async fn poll_job(
        &self,
        token: &str,
        job: &Job,
        prefs: &Preferences,
        now: DateTime<Utc>,
    ) -> JobOutcome {
        if job.is_timed_out(now, prefs.max_retry_duration_secs) {
            info!(job_id = %job.id, elapsed_ms = job.elapsed_ms(now), "Job timed out");
            return JobOutcome::TimedOut;
        }

        match self.service.get_info(token, &job.id).await {
            Ok(info) => JobOutcome::Polled(self.apply_policy(token, job, &info, prefs).await),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Status query failed, will retry next tick");
                JobOutcome::QueryFailed
            }
        }
    }

    /// Map the service's view of a job onto local changes.
    async fn apply_policy(
        &self,
        token: &str,
        job: &Job,
        info: &TorrentInfo,
        prefs: &Preferences,
    ) -> JobPatch {
        let mut patch = JobPatch::default();
        if job.info_hash.is_none() {
            patch.info_hash = info.hash.clone();
        }

        match info.status {
            RemoteStatus::WaitingFilesSelection => {
                if prefs.always_save_all_files {
                    match self
                        .service
                        .select_files(token, &job.id, &FileSelection::All)
                        .await
                    {
                        Ok(()) => info!(job_id = %job.id, "Selected all files"),
                        Err(e) => {
                            warn!(job_id = %job.id, error = %e, "Automatic file selection failed")
                        }
                    }
                } else {
                    patch.status = Some(JobStatus::SelectingFiles);
                }
            }
            RemoteStatus::Downloaded => {
                patch.status = Some(JobStatus::Ready);
                patch.filename = info.name().map(str::to_owned);
                patch.link_count = info.links.len();
                patch.download_url = Some(self.resolve_first_link(token, job, info).await);
            }
            status if status.is_failure() => {
                debug!(job_id = %job.id, %status, "Service reports failure");
                patch.status = Some(JobStatus::Error);
            }
            _ => {
                if job.has_placeholder_name() {
                    patch.filename = info.name().map(str::to_owned);
                }
            }
        }

        patch
    }

    async fn resolve_first_link(&self, token: &str, job: &Job, info: &TorrentInfo) -> Option<String> {
        let Some(link) = info.links.first() else {
            warn!(job_id = %job.id, "Downloaded without links");
            return None;
        };
        match self.service.resolve_link(token, link).await {
            Ok(resolved) => Some(resolved.download),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Link resolution failed");
                None
            }
        }
    }
}

/// Apply per-job patches to the current persisted list.
///
/// Jobs removed or moved out of `processing` since the snapshot are left
/// alone. Returns the number of changed jobs and the terminal transitions.
fn write_back(jobs: &mut [Job], patches: &[(String, JobPatch)]) -> (bool, (usize, Vec<Finished>)) {
    let mut changed = 0;
    let mut finished = Vec::new();

    for (id, patch) in patches {
        let Some(job) = jobs.iter_mut().find(|j| &j.id == id) else {
            debug!(job_id = %id, "Job removed during tick");
            continue;
        };
        if job.status != JobStatus::Processing {
            debug!(job_id = %id, status = %job.status, "Job changed during tick");
            continue;
        }
        if !patch.apply(job) {
            continue;
        }
        changed += 1;
        info!(job_id = %job.id, status = %job.status, "Job updated");
        if job.status.is_terminal() {
            finished.push(Finished {
                job_id: job.id.clone(),
                name: job.filename.clone(),
                status: job.status,
                link_count: patch.link_count,
            });
        }
    }

    (changed > 0, (changed, finished))
}
