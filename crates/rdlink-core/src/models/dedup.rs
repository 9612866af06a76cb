use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Jobs the user has already been told about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationDedup {
    pub notified: BTreeSet<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_notification: Option<DateTime<Utc>>,
}

impl NotificationDedup {
    pub fn contains(&self, job_id: &str) -> bool {
        self.notified.contains(job_id)
    }

    /// Record a notification for `job_id` at `now`.
    pub fn record(&mut self, job_id: impl Into<String>, now: DateTime<Utc>) {
        self.notified.insert(job_id.into());
        self.last_notification = Some(now);
    }

    /// Forget the given ids. Returns `true` if any were present.
    pub fn forget<'a>(&mut self, job_ids: impl IntoIterator<Item = &'a str>) -> bool {
        let mut removed = false;
        for id in job_ids {
            removed |= self.notified.remove(id);
        }
        removed
    }
}
