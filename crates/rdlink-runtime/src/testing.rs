//! Scripted collaborators shared by the runtime tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use rdlink_api::traits::{
    AddedMagnet, DebridService, FileSelection, RemoteStatus, TorrentInfo, UnrestrictedLink,
};
use rdlink_core::models::Job;

use crate::notify::{Notification, Notifier};

/// A processing job whose hash is `hash_char` repeated 40 times.
pub fn job(id: &str, hash_char: char) -> Job {
    let hash = hash_char.to_string().repeat(40);
    Job::new(
        id,
        format!("magnet:?xt=urn:btih:{hash}"),
        Some(hash),
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
    )
}

/// A minimal service record for `id`.
pub fn info(id: &str, status: RemoteStatus) -> TorrentInfo {
    TorrentInfo {
        id: id.to_string(),
        filename: format!("{id}.mkv"),
        hash: None,
        status,
        progress: 0.0,
        bytes: 0,
        files: Vec::new(),
        links: Vec::new(),
        speed: None,
        seeders: None,
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddMagnet(String),
    GetInfo(String),
    SelectFiles(String, FileSelection),
    ResolveLink(String),
    Validate(String),
}

#[derive(Default)]
struct MockState {
    infos: HashMap<String, Result<TorrentInfo, String>>,
    resolved: HashMap<String, String>,
    added: VecDeque<Result<AddedMagnet, String>>,
    next_id: u32,
    select_error: Option<String>,
    valid_tokens: HashSet<String>,
    calls: Vec<Call>,
}

/// In-memory [`DebridService`] answering from scripted responses.
#[derive(Default)]
pub struct MockService {
    state: Mutex<MockState>,
}

impl MockService {
    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_info(&self, id: &str, info: TorrentInfo) {
        self.state().infos.insert(id.to_string(), Ok(info));
    }

    pub fn fail_info(&self, id: &str, message: &str) {
        self.state()
            .infos
            .insert(id.to_string(), Err(message.to_string()));
    }

    pub fn set_resolved(&self, link: &str, download: &str) {
        self.state()
            .resolved
            .insert(link.to_string(), download.to_string());
    }

    /// Queue the result of the next `add_magnet` call. Without one, ids
    /// are handed out as `RD1`, `RD2`, ...
    pub fn push_add(&self, result: Result<&str, &str>) {
        let result = result
            .map(|id| AddedMagnet {
                id: id.to_string(),
                uri: format!("https://rd.test/torrents/info/{id}"),
            })
            .map_err(str::to_string);
        self.state().added.push_back(result);
    }

    pub fn fail_select(&self, message: &str) {
        self.state().select_error = Some(message.to_string());
    }

    pub fn accept_token(&self, token: &str) {
        self.state().valid_tokens.insert(token.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }
}

impl DebridService for MockService {
    type Error = MockError;

    async fn add_magnet(&self, _token: &str, magnet: &str) -> Result<AddedMagnet, MockError> {
        let mut state = self.state();
        state.calls.push(Call::AddMagnet(magnet.to_string()));
        if let Some(result) = state.added.pop_front() {
            return result.map_err(MockError);
        }
        state.next_id += 1;
        let id = format!("RD{}", state.next_id);
        Ok(AddedMagnet {
            uri: format!("https://rd.test/torrents/info/{id}"),
            id,
        })
    }

    async fn get_info(&self, _token: &str, torrent_id: &str) -> Result<TorrentInfo, MockError> {
        let mut state = self.state();
        state.calls.push(Call::GetInfo(torrent_id.to_string()));
        match state.infos.get(torrent_id) {
            Some(Ok(info)) => Ok(info.clone()),
            Some(Err(message)) => Err(MockError(message.clone())),
            None => Err(MockError(format!("unknown torrent {torrent_id}"))),
        }
    }

    async fn select_files(
        &self,
        _token: &str,
        torrent_id: &str,
        selection: &FileSelection,
    ) -> Result<(), MockError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::SelectFiles(torrent_id.to_string(), selection.clone()));
        match &state.select_error {
            Some(message) => Err(MockError(message.clone())),
            None => Ok(()),
        }
    }

    async fn resolve_link(&self, _token: &str, link: &str) -> Result<UnrestrictedLink, MockError> {
        let mut state = self.state();
        state.calls.push(Call::ResolveLink(link.to_string()));
        let download = state
            .resolved
            .get(link)
            .cloned()
            .ok_or_else(|| MockError("hoster_unavailable".into()))?;
        Ok(UnrestrictedLink {
            id: "L1".into(),
            filename: String::new(),
            mime_type: None,
            filesize: 0,
            link: link.to_string(),
            host: "rd.test".into(),
            download,
        })
    }

    async fn validate_credential(&self, token: &str) -> Result<bool, MockError> {
        let mut state = self.state();
        state.calls.push(Call::Validate(token.to_string()));
        Ok(state.valid_tokens.contains(token))
    }
}

/// Keeps every notification it is asked to show.
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
    granted: bool,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            shown: Mutex::new(Vec::new()),
            granted: true,
        }
    }
}

impl RecordingNotifier {
    pub fn denied() -> Self {
        Self {
            granted: false,
            ..Default::default()
        }
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: &Notification) {
        self.shown.lock().unwrap().push(notification.clone());
    }

    fn permission_granted(&self) -> bool {
        self.granted
    }
}
