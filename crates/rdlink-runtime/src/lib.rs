pub mod commands;
pub mod notify;
pub mod poller;
pub mod reconcile;
mod store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use rdlink_api::realdebrid::RealDebridClient;
use rdlink_api::traits::{DebridService, FileSelection};
use rdlink_core::config::AppConfig;
use rdlink_core::error::RdlinkError;
use rdlink_core::models::Preferences;

use commands::{Command, CommandHandler, CommandResponse};
use notify::{NotificationGate, Notifier, TracingNotifier};
use poller::Poller;
use reconcile::{Reconciler, TickReport};

pub use store::{JobStore, StoreChange, StoreSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] RdlinkError),
    #[error("api error: {0}")]
    Api(String),
}

/// Everything a front end needs: the store, the command surface, and the
/// polling loop, wired to one service and one notifier.
pub struct Runtime<S = RealDebridClient> {
    config: AppConfig,
    store: JobStore,
    service: Arc<S>,
    commands: CommandHandler<S>,
    reconciler: Arc<Reconciler<S>>,
    poller: Poller<S>,
}

impl Runtime<RealDebridClient> {
    /// Open the configured database and talk to the configured service.
    pub fn open(config: AppConfig) -> Result<Self, RuntimeError> {
        let db_path = config.ensure_db_path()?;
        let store = JobStore::open(&db_path)?;
        let service = RealDebridClient::new(config.service.base_url.clone())
            .with_timeout(config.request_timeout());
        info!(db = %db_path.display(), api = service.base_url(), "Runtime opened");
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(service),
            Arc::new(TracingNotifier),
        ))
    }
}

impl<S: DebridService + 'static> Runtime<S> {
    pub fn with_parts(
        config: AppConfig,
        store: JobStore,
        service: Arc<S>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let gate = Arc::new(NotificationGate::new(store.clone(), notifier));
        let commands = CommandHandler::new(service.clone(), store.clone(), gate.clone());
        let reconciler = Arc::new(Reconciler::new(service.clone(), store.clone(), gate));
        let poller = Poller::new(reconciler.clone(), store.clone());
        Self {
            config,
            store,
            service,
            commands,
            reconciler,
            poller,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn poller(&self) -> &Poller<S> {
        &self.poller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    pub async fn handle(&self, command: Command) -> CommandResponse {
        self.commands.handle(command).await
    }

    /// Send a file selection and put the job back in the polling set.
    ///
    /// SELECT_FILES alone leaves the job in `selecting_files`, which the
    /// loop never polls; a follow-up RETRY_TORRENT hands it back.
    pub async fn select_files(
        &self,
        torrent_id: String,
        file_ids: FileSelection,
    ) -> CommandResponse {
        let resp = self
            .handle(Command::SelectFiles {
                torrent_id: torrent_id.clone(),
                file_ids,
            })
            .await;
        if resp.success {
            let resumed = self.handle(Command::RetryTorrent { torrent_id }).await;
            if !resumed.success {
                return resumed;
            }
        }
        resp
    }

    /// Run one reconciliation tick now.
    pub async fn tick(&self) -> Result<TickReport, RuntimeError> {
        self.reconciler.tick().await
    }

    /// Replace the preferences record and follow a poll interval change.
    pub async fn save_preferences(&self, preferences: Preferences) -> Result<(), RuntimeError> {
        self.store.save_preferences(preferences).await?;
        self.poller.rearm();
        Ok(())
    }

    /// Change one preference by name and save the whole record.
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<Preferences, RuntimeError> {
        let mut prefs = self.store.load_preferences().await?;
        prefs.set_field(key, value).map_err(RuntimeError::Config)?;
        self.save_preferences(prefs.clone()).await?;
        Ok(prefs)
    }

    /// Validate `token` with the service and store it if accepted.
    ///
    /// Returns whether the token was accepted.
    pub async fn set_token(&self, token: &str) -> Result<bool, RuntimeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RuntimeError::Config("empty API token".into()));
        }
        let valid = self
            .service
            .validate_credential(token)
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        if valid {
            let mut prefs = self.store.load_preferences().await?;
            prefs.api_token = Some(token.to_string());
            self.save_preferences(prefs).await?;
            info!("API token saved");
        }
        Ok(valid)
    }
}
