//! The recurring poll alarm driving reconciliation ticks.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use rdlink_api::traits::DebridService;

use crate::reconcile::Reconciler;
use crate::store::JobStore;

pub const ALARM_NAME: &str = "rdlink-poll";

struct Alarm {
    period: Duration,
    handle: JoinHandle<()>,
}

pub struct Poller<S> {
    reconciler: Arc<Reconciler<S>>,
    store: JobStore,
    alarm: Mutex<Option<Alarm>>,
}

impl<S: DebridService + 'static> Poller<S> {
    pub fn new(reconciler: Arc<Reconciler<S>>, store: JobStore) -> Self {
        Self {
            reconciler,
            store,
            alarm: Mutex::new(None),
        }
    }

    /// Period from the current preferences.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.store.preferences().poll_interval_secs.max(1))
    }

    /// Arm the alarm if it is missing. A newly armed alarm ticks at once.
    ///
    /// Returns `true` if the alarm had to be armed.
    pub fn ensure_armed(&self) -> bool {
        let mut alarm = self.lock();
        if alarm.as_ref().is_some_and(|a| !a.handle.is_finished()) {
            return false;
        }
        let period = self.period();
        *alarm = Some(self.spawn(period));
        info!(alarm = ALARM_NAME, period_secs = period.as_secs(), "Poll alarm armed");
        true
    }

    /// Restart the alarm if the configured period changed.
    pub fn rearm(&self) -> bool {
        let period = self.period();
        let mut alarm = self.lock();
        let current = alarm.as_ref().map(|a| (a.period, a.handle.is_finished()));
        match current {
            Some((armed, false)) if armed == period => false,
            Some(_) => {
                if let Some(old) = alarm.take() {
                    old.handle.abort();
                }
                *alarm = Some(self.spawn(period));
                info!(alarm = ALARM_NAME, period_secs = period.as_secs(), "Poll alarm re-armed");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    pub fn disarm(&self) {
        if let Some(alarm) = self.lock().take() {
            alarm.handle.abort();
            info!(alarm = ALARM_NAME, "Poll alarm cleared");
        }
    }

    fn spawn(&self, period: Duration) -> Alarm {
        let reconciler = Arc::clone(&self.reconciler);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = reconciler.tick().await {
                    error!(error = %e, "Reconciliation tick failed");
                }
            }
        });
        Alarm { period, handle }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Alarm>> {
        self.alarm.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S> Drop for Poller<S> {
    fn drop(&mut self) {
        let alarm = self.alarm.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(alarm) = alarm.take() {
            alarm.handle.abort();
        }
    }
}
