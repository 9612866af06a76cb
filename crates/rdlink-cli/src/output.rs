//! Terminal rendering of store snapshots and command responses.

use std::process::ExitCode;

use rdlink_core::magnet;
use rdlink_core::models::{Job, Preferences};
use rdlink_runtime::commands::CommandResponse;

/// Print a response as pretty JSON; failures go to stderr.
pub fn print_response(resp: &CommandResponse) -> ExitCode {
    let text = serde_json::to_string_pretty(resp)
        .unwrap_or_else(|e| format!(r#"{{"success":false,"error":"{e}"}}"#));
    if resp.success {
        println!("{text}");
        ExitCode::SUCCESS
    } else {
        eprintln!("{text}");
        ExitCode::FAILURE
    }
}

/// Label for a job row. Jobs still waiting on the service fall back to
/// the magnet's display name.
pub fn job_label(job: &Job) -> String {
    if job.has_placeholder_name() {
        if let Some(name) = magnet::display_name(&job.magnet_link) {
            return format!("{name} ({})", job.filename);
        }
    }
    job.filename.clone()
}

/// One line per job, most recent first.
pub fn render_jobs(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No torrents.".to_string();
    }
    let mut out = String::new();
    for job in jobs {
        out.push_str(&format!(
            "{:<16} {:<15} {}",
            job.id,
            job.status.as_str(),
            job_label(job)
        ));
        if let Some(url) = &job.download_url {
            out.push_str(&format!("\n{:<32} {url}", ""));
        }
        out.push('\n');
    }
    out.pop();
    out
}

/// Preferences as JSON with the token masked.
pub fn render_preferences(prefs: &Preferences) -> String {
    let mut shown = prefs.clone();
    shown.api_token = prefs.credential().map(mask);
    serde_json::to_string_pretty(&shown).unwrap_or_default()
}

fn mask(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdlink_core::models::JobStatus;

    fn job(id: &str, link: &str) -> Job {
        Job::new(id, link, None, chrono::Utc::now())
    }

    #[test]
    fn test_placeholder_uses_display_name() {
        let j = job("A", "magnet:?xt=urn:btih:x&dn=Big+Buck+Bunny");
        assert_eq!(job_label(&j), "Big Buck Bunny (Processing...)");

        let mut named = j.clone();
        named.filename = "bbb.mkv".into();
        assert_eq!(job_label(&named), "bbb.mkv");
    }

    #[test]
    fn test_render_jobs() {
        assert_eq!(render_jobs(&[]), "No torrents.");

        let mut ready = job("READY1", "magnet:?xt=urn:btih:x");
        ready.status = JobStatus::Ready;
        ready.filename = "y.mkv".into();
        ready.download_url = Some("https://x/y.mkv".into());
        let out = render_jobs(&[ready]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("READY1"));
        assert!(lines[0].contains("ready"));
        assert!(lines[1].trim_start().starts_with("https://x/y.mkv"));
    }

    #[test]
    fn test_token_is_masked() {
        let prefs = Preferences {
            api_token: Some("ABCDEFGH1234".into()),
            ..Default::default()
        };
        let out = render_preferences(&prefs);
        assert!(out.contains("****1234"));
        assert!(!out.contains("ABCDEFGH"));
    }
}
