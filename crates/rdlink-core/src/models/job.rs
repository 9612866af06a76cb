use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label a job carries until the service reports a real name.
pub const PLACEHOLDER_FILENAME: &str = "Processing...";

/// Local lifecycle of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    SelectingFiles,
    Ready,
    Error,
    Timeout,
}

impl JobStatus {
    pub const ALL: &[JobStatus] = &[
        Self::Processing,
        Self::SelectingFiles,
        Self::Ready,
        Self::Error,
        Self::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::SelectingFiles => "selecting_files",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// No further automatic polling happens in these states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Timeout)
    }

    /// States that a batch retry picks up.
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked magnet-to-download conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Identifier assigned by the debrid service.
    pub id: String,
    pub magnet_link: String,
    /// Lowercase 40-char hex hash. Older records may lack it until the
    /// service reports one.
    #[serde(default)]
    pub info_hash: Option<String>,
    pub filename: String,
    pub status: JobStatus,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_retry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Job {
    /// A freshly registered job, waiting on the service.
    pub fn new(
        id: impl Into<String>,
        magnet_link: impl Into<String>,
        info_hash: Option<String>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            magnet_link: magnet_link.into(),
            info_hash,
            filename: PLACEHOLDER_FILENAME.to_string(),
            status: JobStatus::Processing,
            download_url: None,
            added_at,
            last_retry: None,
            retry_count: 0,
        }
    }

    pub fn has_placeholder_name(&self) -> bool {
        self.filename == PLACEHOLDER_FILENAME
    }

    /// Adopt a real name. The placeholder is never written back.
    ///
    /// Returns `true` if the stored name changed.
    pub fn set_filename(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || name == PLACEHOLDER_FILENAME || name == self.filename {
            return false;
        }
        self.filename = name.to_string();
        true
    }

    /// Put the job back in the polling set.
    pub fn mark_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.last_retry = Some(now);
        self.retry_count += 1;
    }

    /// Milliseconds since the job was created.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.added_at).num_milliseconds()
    }

    /// Whether more than `max_secs` have passed since creation.
    pub fn is_timed_out(&self, now: DateTime<Utc>, max_secs: u64) -> bool {
        self.elapsed_ms(now) > (max_secs as i64).saturating_mul(1000)
    }

    pub fn matches_hash(&self, hash: &str) -> bool {
        self.info_hash
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(hash))
    }
}

/// Insert at the front of a most-recent-first list and drop the oldest
/// entries beyond `cap`.
///
/// Returns the jobs that were dropped.
pub fn insert_front(jobs: &mut Vec<Job>, job: Job, cap: usize) -> Vec<Job> {
    jobs.insert(0, job);
    let cap = cap.max(1);
    if jobs.len() > cap {
        jobs.split_off(cap)
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn job(id: &str) -> Job {
        Job::new(
            id,
            format!("magnet:?xt=urn:btih:{}", "a".repeat(40)),
            Some("a".repeat(40)),
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        )
    }

    #[test]
    fn test_new_job_defaults() {
        let j = job("ABC");
        assert_eq!(j.status, JobStatus::Processing);
        assert!(j.has_placeholder_name());
        assert_eq!(j.retry_count, 0);
        assert!(j.download_url.is_none());
        assert!(j.last_retry.is_none());
    }

    #[test]
    fn test_serializes_camel_case_with_epoch_millis() {
        let j = job("ABC");
        let value = serde_json::to_value(&j).unwrap();
        assert_eq!(value["magnetLink"], j.magnet_link.as_str());
        assert_eq!(value["addedAt"], 1_700_000_000_000i64);
        assert_eq!(value["status"], "processing");
        assert!(value["downloadUrl"].is_null());
        assert_eq!(value["retryCount"], 0);
    }

    #[test]
    fn test_deserializes_record_without_optional_fields() {
        let json = r#"{
            "id": "X1",
            "magnetLink": "magnet:?xt=urn:btih:abc",
            "filename": "Processing...",
            "status": "selecting_files",
            "addedAt": 1700000000000
        }"#;
        let j: Job = serde_json::from_str(json).unwrap();
        assert_eq!(j.status, JobStatus::SelectingFiles);
        assert!(j.info_hash.is_none());
        assert!(j.last_retry.is_none());
        assert_eq!(j.retry_count, 0);
    }

    #[test]
    fn test_filename_never_reverts_to_placeholder() {
        let mut j = job("ABC");
        assert!(j.set_filename("Movie.2024.mkv"));
        assert!(!j.set_filename(PLACEHOLDER_FILENAME));
        assert!(!j.set_filename("   "));
        assert_eq!(j.filename, "Movie.2024.mkv");
    }

    #[test]
    fn test_mark_retry() {
        let mut j = job("ABC");
        j.status = JobStatus::Timeout;
        let now = j.added_at + Duration::seconds(600);
        j.mark_retry(now);
        assert_eq!(j.status, JobStatus::Processing);
        assert_eq!(j.retry_count, 1);
        assert_eq!(j.last_retry, Some(now));
        // A retry does not move the creation timestamp.
        assert_eq!(j.elapsed_ms(now), 600_000);
    }

    #[test]
    fn test_timeout_counts_fractional_seconds() {
        let j = job("ABC");
        assert!(!j.is_timed_out(j.added_at + Duration::seconds(300), 300));
        assert!(j.is_timed_out(j.added_at + Duration::milliseconds(300_500), 300));
        assert!(j.is_timed_out(j.added_at + Duration::milliseconds(400_000), 300));
    }

    #[test]
    fn test_status_classes() {
        for status in JobStatus::ALL {
            assert_eq!(
                status.is_terminal(),
                !matches!(status, JobStatus::Processing | JobStatus::SelectingFiles)
            );
        }
        assert!(JobStatus::Timeout.is_failed());
        assert!(!JobStatus::Ready.is_failed());
    }

    #[test]
    fn test_insert_front_respects_cap() {
        let mut jobs = vec![job("2"), job("1")];
        let dropped = insert_front(&mut jobs, job("3"), 2);
        assert_eq!(jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(), ["3", "2"]);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, "1");
    }

    #[test]
    fn test_matches_hash_case_insensitive() {
        let j = job("ABC");
        assert!(j.matches_hash(&"A".repeat(40)));
        assert!(!j.matches_hash(&"b".repeat(40)));
    }
}
