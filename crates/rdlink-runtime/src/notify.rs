//! "Job finished" notifications, emitted at most once per job.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use rdlink_core::error::RdlinkError;
use rdlink_core::models::JobStatus;

use crate::store::JobStore;

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// The platform notification API.
pub trait Notifier: Send + Sync {
    fn show(&self, notification: &Notification);

    /// Whether the platform lets us show notifications at all.
    fn permission_granted(&self) -> bool {
        true
    }
}

/// Emits notifications as log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show(&self, notification: &Notification) {
        tracing::info!(
            title = %notification.title,
            body = %notification.body,
            "Notification"
        );
    }
}

/// A job that reached a terminal state during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finished {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub link_count: usize,
}

pub struct NotificationGate {
    store: JobStore,
    notifier: Arc<dyn Notifier>,
}

impl NotificationGate {
    pub fn new(store: JobStore, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub fn permission_granted(&self) -> bool {
        self.notifier.permission_granted()
    }

    /// Notify about one job, unless it was notified before.
    ///
    /// Returns `true` if a notification was emitted.
    pub async fn notify(
        &self,
        job_id: &str,
        name: &str,
        status: JobStatus,
        link_count: usize,
    ) -> Result<bool, RdlinkError> {
        let Some(notification) = single_message(name, status, link_count) else {
            return Ok(false);
        };
        if !self.enabled() {
            return Ok(false);
        }

        let id = job_id.to_string();
        let now = Utc::now();
        let fresh = self
            .store
            .update_dedup(move |dedup| {
                if dedup.contains(&id) {
                    return (false, false);
                }
                dedup.record(id, now);
                (true, true)
            })
            .await?;

        if fresh {
            self.notifier.show(&notification);
        } else {
            tracing::debug!(job_id, "Already notified");
        }
        Ok(fresh)
    }

    /// Notify about a tick's worth of finished jobs.
    ///
    /// A single fresh job gets its own notification; several are combined
    /// into one. Returns how many jobs were covered.
    pub async fn notify_batch(&self, finished: &[Finished]) -> Result<usize, RdlinkError> {
        let candidates: Vec<Finished> = finished
            .iter()
            .filter(|f| f.status.is_terminal())
            .cloned()
            .collect();
        if candidates.is_empty() || !self.enabled() {
            return Ok(0);
        }

        let now = Utc::now();
        let fresh = self
            .store
            .update_dedup(move |dedup| {
                let mut fresh = Vec::new();
                for f in candidates {
                    if !dedup.contains(&f.job_id) {
                        dedup.record(f.job_id.clone(), now);
                        fresh.push(f);
                    }
                }
                (!fresh.is_empty(), fresh)
            })
            .await?;

        let notification = match fresh.as_slice() {
            [] => return Ok(0),
            [only] => single_message(&only.name, only.status, only.link_count),
            many => Some(batch_message(many)),
        };
        if let Some(notification) = notification {
            self.notifier.show(&notification);
        }
        Ok(fresh.len())
    }

    /// Forget the given jobs so a reused id can notify again.
    pub async fn clear(&self, job_ids: Vec<String>) -> Result<(), RdlinkError> {
        if job_ids.is_empty() {
            return Ok(());
        }
        self.store
            .update_dedup(move |dedup| {
                let removed = dedup.forget(job_ids.iter().map(String::as_str));
                (removed, ())
            })
            .await
    }

    fn enabled(&self) -> bool {
        self.store.preferences().notifications_enabled
    }
}

/// Message for one finished job; `None` for non-terminal states.
pub fn single_message(name: &str, status: JobStatus, link_count: usize) -> Option<Notification> {
    match status {
        JobStatus::Ready => {
            let body = match link_count {
                0 => format!("{name} is ready"),
                1 => format!("{name} is ready with 1 link"),
                n => format!("{name} is ready with {n} links"),
            };
            Some(Notification {
                title: "Download ready".into(),
                body,
            })
        }
        JobStatus::Error => Some(Notification {
            title: "Download failed".into(),
            body: format!("{name} failed"),
        }),
        JobStatus::Timeout => Some(Notification {
            title: "Download failed".into(),
            body: format!("{name} timed out"),
        }),
        JobStatus::Processing | JobStatus::SelectingFiles => None,
    }
}

/// Combined message for several jobs finishing in one tick.
pub fn batch_message(finished: &[Finished]) -> Notification {
    let ready = finished
        .iter()
        .filter(|f| f.status == JobStatus::Ready)
        .count();
    let failed = finished.iter().filter(|f| f.status.is_failed()).count();

    let mut parts = Vec::new();
    if ready > 0 {
        parts.push(format!("{ready} ready"));
    }
    if failed > 0 {
        parts.push(format!("{failed} failed"));
    }

    Notification {
        title: format!("{} downloads finished", finished.len()),
        body: parts.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;
    use rdlink_core::models::Preferences;

    fn gate() -> (NotificationGate, Arc<RecordingNotifier>, JobStore) {
        let store = JobStore::open_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = NotificationGate::new(store.clone(), notifier.clone());
        (gate, notifier, store)
    }

    fn finished(id: &str, status: JobStatus) -> Finished {
        Finished {
            job_id: id.into(),
            name: format!("{id}.mkv"),
            status,
            link_count: 1,
        }
    }

    #[test]
    fn test_ready_message_pluralizes() {
        let one = single_message("a.mkv", JobStatus::Ready, 1).unwrap();
        assert_eq!(one.body, "a.mkv is ready with 1 link");
        let many = single_message("a.mkv", JobStatus::Ready, 3).unwrap();
        assert_eq!(many.body, "a.mkv is ready with 3 links");
        let none = single_message("a.mkv", JobStatus::Ready, 0).unwrap();
        assert_eq!(none.body, "a.mkv is ready");
    }

    #[test]
    fn test_failed_and_ignored_messages() {
        assert_eq!(
            single_message("a", JobStatus::Timeout, 0).unwrap().title,
            "Download failed"
        );
        assert!(single_message("a", JobStatus::Error, 0).unwrap().body.ends_with("failed"));
        assert!(single_message("a", JobStatus::Processing, 0).is_none());
        assert!(single_message("a", JobStatus::SelectingFiles, 0).is_none());
    }

    #[test]
    fn test_batch_message() {
        let n = batch_message(&[
            finished("A", JobStatus::Ready),
            finished("B", JobStatus::Ready),
            finished("C", JobStatus::Timeout),
        ]);
        assert_eq!(n.title, "3 downloads finished");
        assert_eq!(n.body, "2 ready, 1 failed");
    }

    #[tokio::test]
    async fn test_notify_twice_emits_once() {
        let (gate, notifier, store) = gate();

        assert!(gate.notify("A", "a.mkv", JobStatus::Ready, 1).await.unwrap());
        assert!(!gate.notify("A", "a.mkv", JobStatus::Ready, 1).await.unwrap());

        assert_eq!(notifier.shown().len(), 1);
        assert!(store.dedup().contains("A"));
        assert!(store.dedup().last_notification.is_some());
    }

    #[tokio::test]
    async fn test_non_terminal_status_is_ignored() {
        let (gate, notifier, store) = gate();
        assert!(!gate
            .notify("A", "a.mkv", JobStatus::Processing, 0)
            .await
            .unwrap());
        assert!(notifier.shown().is_empty());
        assert!(!store.dedup().contains("A"));
    }

    #[tokio::test]
    async fn test_clear_allows_renotify() {
        let (gate, notifier, store) = gate();
        gate.notify("A", "a.mkv", JobStatus::Error, 0).await.unwrap();
        gate.clear(vec!["A".into()]).await.unwrap();
        assert!(!store.dedup().contains("A"));

        assert!(gate.notify("A", "a.mkv", JobStatus::Error, 0).await.unwrap());
        assert_eq!(notifier.shown().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_combines_and_dedups() {
        let (gate, notifier, _store) = gate();
        gate.notify("A", "A.mkv", JobStatus::Ready, 1).await.unwrap();

        let covered = gate
            .notify_batch(&[
                finished("A", JobStatus::Ready),
                finished("B", JobStatus::Ready),
                finished("C", JobStatus::Error),
                finished("D", JobStatus::Processing),
            ])
            .await
            .unwrap();

        assert_eq!(covered, 2);
        let shown = notifier.shown();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[1].title, "2 downloads finished");
        assert_eq!(shown[1].body, "1 ready, 1 failed");
    }

    #[tokio::test]
    async fn test_batch_of_one_uses_single_message() {
        let (gate, notifier, _store) = gate();
        gate.notify_batch(&[finished("B", JobStatus::Ready)])
            .await
            .unwrap();
        assert_eq!(notifier.shown()[0].body, "B.mkv is ready with 1 link");
    }

    #[tokio::test]
    async fn test_disabled_notifications_record_nothing() {
        let (gate, notifier, store) = gate();
        store
            .save_preferences(Preferences {
                notifications_enabled: false,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!gate.notify("A", "a", JobStatus::Ready, 0).await.unwrap());
        assert!(notifier.shown().is_empty());
        assert!(!store.dedup().contains("A"));
    }
}
