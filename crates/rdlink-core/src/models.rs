mod dedup;
mod job;
mod preferences;

pub use dedup::NotificationDedup;
pub use job::{insert_front, Job, JobStatus, PLACEHOLDER_FILENAME};
pub use preferences::{Preferences, Theme};
