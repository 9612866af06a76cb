//! Async handle over the record storage.
//!
//! A dedicated thread owns the SQLite connection and applies commands in
//! arrival order, so every read-modify-write of a record is serialized. The
//! handle keeps a read-through cache for synchronous reads and broadcasts
//! every persisted change to subscribers.

use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{broadcast, mpsc, oneshot};

use rdlink_core::error::RdlinkError;
use rdlink_core::models::{Job, NotificationDedup, Preferences};
use rdlink_core::storage::Storage;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

type JobsFn = Box<dyn FnOnce(&mut Vec<Job>) -> bool + Send>;
type DedupFn = Box<dyn FnOnce(&mut NotificationDedup) -> bool + Send>;

/// A persisted record that changed, with its new value.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Jobs(Vec<Job>),
    Preferences(Preferences),
    NotificationDedup(NotificationDedup),
}

/// Cached copy of every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub jobs: Vec<Job>,
    pub preferences: Preferences,
    pub dedup: NotificationDedup,
}

#[derive(Clone)]
pub struct JobStore {
    tx: mpsc::UnboundedSender<StoreCommand>,
    cache: Arc<RwLock<StoreSnapshot>>,
    changes: broadcast::Sender<StoreChange>,
}

enum StoreCommand {
    LoadJobs {
        reply: oneshot::Sender<Result<Vec<Job>, RdlinkError>>,
    },
    SaveJobs {
        jobs: Vec<Job>,
        reply: oneshot::Sender<Result<(), RdlinkError>>,
    },
    UpdateJobs {
        apply: JobsFn,
        reply: oneshot::Sender<Result<bool, RdlinkError>>,
    },
    LoadPreferences {
        reply: oneshot::Sender<Result<Preferences, RdlinkError>>,
    },
    SavePreferences {
        preferences: Box<Preferences>,
        reply: oneshot::Sender<Result<(), RdlinkError>>,
    },
    UpdateDedup {
        apply: DedupFn,
        reply: oneshot::Sender<Result<bool, RdlinkError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<usize, RdlinkError>>,
    },
}

impl JobStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, RdlinkError> {
        Self::spawn(Storage::open(path)?)
    }

    /// An in-memory store (for tests).
    pub fn open_memory() -> Result<Self, RdlinkError> {
        Self::spawn(Storage::open_memory()?)
    }

    fn spawn(storage: Storage) -> Result<Self, RdlinkError> {
        let snapshot = StoreSnapshot {
            jobs: storage.load_jobs()?,
            preferences: storage.load_preferences()?,
            dedup: storage.load_dedup()?,
        };
        let cache = Arc::new(RwLock::new(snapshot));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = StoreActor {
            storage,
            cache: Arc::clone(&cache),
            changes: changes.clone(),
        };
        std::thread::Builder::new()
            .name("store-actor".into())
            .spawn(move || actor.run(rx))?;

        Ok(Self { tx, cache, changes })
    }

    // ── Subscription ────────────────────────────────────────────

    /// Receive every persisted change. Drop the receiver to unsubscribe.
    ///
    /// A subscriber that falls behind gets `RecvError::Lagged` and then
    /// continues from the oldest retained change.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    // ── Cached reads ────────────────────────────────────────────

    pub fn snapshot(&self) -> StoreSnapshot {
        self.read_cache().clone()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.read_cache().jobs.clone()
    }

    pub fn preferences(&self) -> Preferences {
        self.read_cache().preferences.clone()
    }

    pub fn dedup(&self) -> NotificationDedup {
        self.read_cache().dedup.clone()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, StoreSnapshot> {
        self.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    // ── Storage reads and writes ────────────────────────────────

    /// Read the job list from storage (bypassing the cache).
    pub async fn load_jobs(&self) -> Result<Vec<Job>, RdlinkError> {
        self.request(|reply| StoreCommand::LoadJobs { reply })
            .await
    }

    /// Replace the whole job list. Last writer wins.
    pub async fn save_jobs(&self, jobs: Vec<Job>) -> Result<(), RdlinkError> {
        self.request(|reply| StoreCommand::SaveJobs { jobs, reply })
            .await
    }

    /// Read-modify-write the job list on the store thread.
    ///
    /// `apply` sees the current persisted list and returns whether it changed
    /// it, plus a value handed back to the caller. The list is written (and
    /// broadcast) only when it changed.
    pub async fn update_jobs<F, R>(&self, apply: F) -> Result<R, RdlinkError>
    where
        F: FnOnce(&mut Vec<Job>) -> (bool, R) + Send + 'static,
        R: Send + 'static,
    {
        let (out_tx, out_rx) = oneshot::channel();
        let apply: JobsFn = Box::new(move |jobs| {
            let (changed, out) = apply(jobs);
            let _ = out_tx.send(out);
            changed
        });
        self.request(|reply| StoreCommand::UpdateJobs { apply, reply })
            .await?;
        out_rx.await.map_err(|_| RdlinkError::StoreClosed)
    }

    pub async fn load_preferences(&self) -> Result<Preferences, RdlinkError> {
        self.request(|reply| StoreCommand::LoadPreferences { reply })
            .await
    }

    /// Replace the whole preferences record.
    pub async fn save_preferences(&self, preferences: Preferences) -> Result<(), RdlinkError> {
        self.request(|reply| StoreCommand::SavePreferences {
            preferences: Box::new(preferences),
            reply,
        })
        .await
    }

    /// Read-modify-write the notification dedup record.
    pub async fn update_dedup<F, R>(&self, apply: F) -> Result<R, RdlinkError>
    where
        F: FnOnce(&mut NotificationDedup) -> (bool, R) + Send + 'static,
        R: Send + 'static,
    {
        let (out_tx, out_rx) = oneshot::channel();
        let apply: DedupFn = Box::new(move |dedup| {
            let (changed, out) = apply(dedup);
            let _ = out_tx.send(out);
            changed
        });
        self.request(|reply| StoreCommand::UpdateDedup { apply, reply })
            .await?;
        out_rx.await.map_err(|_| RdlinkError::StoreClosed)
    }

    /// Re-read every record and publish the ones that differ from the cache,
    /// e.g. after another process wrote the database.
    ///
    /// Returns how many records changed.
    pub async fn reload(&self) -> Result<usize, RdlinkError> {
        self.request(|reply| StoreCommand::Reload { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RdlinkError>>) -> StoreCommand,
    ) -> Result<T, RdlinkError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| RdlinkError::StoreClosed)?;
        rx.await.unwrap_or(Err(RdlinkError::StoreClosed))
    }
}

struct StoreActor {
    storage: Storage,
    cache: Arc<RwLock<StoreSnapshot>>,
    changes: broadcast::Sender<StoreChange>,
}

impl StoreActor {
    fn run(self, mut rx: mpsc::UnboundedReceiver<StoreCommand>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                StoreCommand::LoadJobs { reply } => {
                    let _ = reply.send(self.storage.load_jobs());
                }
                StoreCommand::SaveJobs { jobs, reply } => {
                    let result = self.storage.save_jobs(&jobs);
                    if result.is_ok() {
                        self.publish_jobs(jobs);
                    }
                    let _ = reply.send(result);
                }
                StoreCommand::UpdateJobs { apply, reply } => {
                    let result = self.storage.update_jobs(apply).map(|(jobs, changed)| {
                        if changed {
                            self.publish_jobs(jobs);
                        }
                        changed
                    });
                    let _ = reply.send(result);
                }
                StoreCommand::LoadPreferences { reply } => {
                    let _ = reply.send(self.storage.load_preferences());
                }
                StoreCommand::SavePreferences { preferences, reply } => {
                    let result = self.storage.save_preferences(&preferences);
                    if result.is_ok() {
                        self.publish_preferences(*preferences);
                    }
                    let _ = reply.send(result);
                }
                StoreCommand::UpdateDedup { apply, reply } => {
                    let _ = reply.send(self.update_dedup(apply));
                }
                StoreCommand::Reload { reply } => {
                    let _ = reply.send(self.reload());
                }
            }
        }
        tracing::debug!("Store actor stopped");
    }

    fn update_dedup(&self, apply: DedupFn) -> Result<bool, RdlinkError> {
        let mut dedup = self.storage.load_dedup()?;
        let changed = apply(&mut dedup);
        if changed {
            self.storage.save_dedup(&dedup)?;
            self.write_cache().dedup = dedup.clone();
            let _ = self.changes.send(StoreChange::NotificationDedup(dedup));
        }
        Ok(changed)
    }

    fn reload(&self) -> Result<usize, RdlinkError> {
        let jobs = self.storage.load_jobs()?;
        let preferences = self.storage.load_preferences()?;
        let dedup = self.storage.load_dedup()?;

        let current = self.cache.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut changed = 0;
        if current.jobs != jobs {
            self.publish_jobs(jobs);
            changed += 1;
        }
        if current.preferences != preferences {
            self.publish_preferences(preferences);
            changed += 1;
        }
        if current.dedup != dedup {
            self.write_cache().dedup = dedup.clone();
            let _ = self.changes.send(StoreChange::NotificationDedup(dedup));
            changed += 1;
        }
        Ok(changed)
    }

    fn publish_jobs(&self, jobs: Vec<Job>) {
        self.write_cache().jobs = jobs.clone();
        // No receivers is fine.
        let _ = self.changes.send(StoreChange::Jobs(jobs));
    }

    fn publish_preferences(&self, preferences: Preferences) {
        self.write_cache().preferences = preferences.clone();
        let _ = self.changes.send(StoreChange::Preferences(preferences));
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, StoreSnapshot> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }
}
