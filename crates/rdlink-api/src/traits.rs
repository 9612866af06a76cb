//! Trait definitions for debrid conversion services.
//!
//! The reconciliation loop and command handler only depend on
//! [`DebridService`], so tests can substitute a scripted service.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// A magnet-to-HTTP conversion service.
///
/// Every call takes the API token explicitly so a credential change takes
/// effect on the next call.
pub trait DebridService: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register a magnet link. Returns the service-assigned id.
    fn add_magnet(
        &self,
        token: &str,
        magnet: &str,
    ) -> impl Future<Output = Result<AddedMagnet, Self::Error>> + Send;

    /// Current state of a registered torrent.
    fn get_info(
        &self,
        token: &str,
        torrent_id: &str,
    ) -> impl Future<Output = Result<TorrentInfo, Self::Error>> + Send;

    /// Choose which files of a torrent to download.
    fn select_files(
        &self,
        token: &str,
        torrent_id: &str,
        selection: &FileSelection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Turn a restricted hoster link into a direct download URL.
    fn resolve_link(
        &self,
        token: &str,
        link: &str,
    ) -> impl Future<Output = Result<UnrestrictedLink, Self::Error>> + Send;

    /// Check whether a token is accepted by the service.
    fn validate_credential(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

/// Response to registering a magnet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedMagnet {
    pub id: String,
    pub uri: String,
}

/// Remote torrent status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    MagnetError,
    MagnetConversion,
    WaitingFilesSelection,
    Queued,
    Downloading,
    Downloaded,
    Error,
    Virus,
    Compressing,
    Uploading,
    Dead,
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MagnetError => "magnet_error",
            Self::MagnetConversion => "magnet_conversion",
            Self::WaitingFilesSelection => "waiting_files_selection",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Error => "error",
            Self::Virus => "virus",
            Self::Compressing => "compressing",
            Self::Uploading => "uploading",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }

    /// Service-side failures that will never recover on their own.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::Error | Self::Dead | Self::MagnetError | Self::Virus
        )
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single file inside a remote torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub id: u64,
    pub path: String,
    pub bytes: u64,
    pub selected: bool,
}

/// Service view of one torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub id: String,
    pub filename: String,
    pub hash: Option<String>,
    pub status: RemoteStatus,
    /// Percent complete, 0 to 100.
    pub progress: f64,
    pub bytes: u64,
    pub files: Vec<TorrentFile>,
    /// Restricted hoster links, one per selected file group.
    pub links: Vec<String>,
    pub speed: Option<u64>,
    pub seeders: Option<u32>,
}

impl TorrentInfo {
    /// The reported name, unless the service has not named it yet.
    pub fn name(&self) -> Option<&str> {
        let name = self.filename.trim();
        (!name.is_empty()).then_some(name)
    }
}

/// A resolved direct download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnrestrictedLink {
    pub id: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub filesize: u64,
    pub link: String,
    pub host: String,
    pub download: String,
}

/// Which files of a torrent to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelection", into = "String")]
pub enum FileSelection {
    All,
    Ids(Vec<u64>),
}

impl FileSelection {
    /// Form value expected by the service: `all` or `1,2,3`.
    pub fn to_param(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Ids(ids) => ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl std::str::FromStr for FileSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let ids = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| format!("invalid file id '{part}'"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err("no files selected".into());
        }
        Ok(Self::Ids(ids))
    }
}

impl From<FileSelection> for String {
    fn from(selection: FileSelection) -> Self {
        selection.to_param()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelection {
    Text(String),
    List(Vec<u64>),
}

impl TryFrom<RawSelection> for FileSelection {
    type Error = String;

    fn try_from(raw: RawSelection) -> Result<Self, Self::Error> {
        match raw {
            RawSelection::Text(s) => s.parse(),
            RawSelection::List(ids) if ids.is_empty() => Err("no files selected".into()),
            RawSelection::List(ids) => Ok(Self::Ids(ids)),
        }
    }
}
