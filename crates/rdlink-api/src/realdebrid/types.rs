use serde::{Deserialize, Deserializer};

use crate::traits::{AddedMagnet, RemoteStatus, TorrentFile, TorrentInfo, UnrestrictedLink};

// ── Response types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RdAddMagnetResponse {
    pub id: String,
    #[serde(default)]
    pub uri: String,
}

impl RdAddMagnetResponse {
    pub fn into_added(self) -> AddedMagnet {
        AddedMagnet {
            id: self.id,
            uri: self.uri,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RdTorrentFile {
    pub id: u64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub selected: bool,
}

#[derive(Debug, Deserialize)]
pub struct RdTorrentInfo {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub files: Option<Vec<RdTorrentFile>>,
    #[serde(default)]
    pub links: Option<Vec<String>>,
    #[serde(default)]
    pub speed: Option<u64>,
    #[serde(default)]
    pub seeders: Option<u32>,
}

impl RdTorrentInfo {
    pub fn into_torrent_info(self) -> TorrentInfo {
        let filename = if self.filename.trim().is_empty() {
            self.original_filename.unwrap_or_default()
        } else {
            self.filename
        };

        TorrentInfo {
            id: self.id,
            filename,
            hash: self
                .hash
                .map(|h| h.to_ascii_lowercase())
                .filter(|h| !h.is_empty()),
            status: self.status,
            progress: self.progress.clamp(0.0, 100.0),
            bytes: self.bytes,
            files: self
                .files
                .unwrap_or_default()
                .into_iter()
                .map(|f| TorrentFile {
                    id: f.id,
                    path: f.path,
                    bytes: f.bytes,
                    selected: f.selected,
                })
                .collect(),
            links: self
                .links
                .unwrap_or_default()
                .into_iter()
                .filter(|l| !l.trim().is_empty())
                .collect(),
            speed: self.speed,
            seeders: self.seeders,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdUnrestrictResponse {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub host: String,
    pub download: String,
}

impl RdUnrestrictResponse {
    pub fn into_unrestricted(self) -> UnrestrictedLink {
        UnrestrictedLink {
            id: self.id,
            filename: self.filename,
            mime_type: self.mime_type,
            filesize: self.filesize,
            link: self.link,
            host: self.host,
            download: self.download,
        }
    }
}

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct RdErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_code: Option<i64>,
}

/// The API reports `selected` as 0/1; accept booleans too.
fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_torrent_info() {
        let json = r#"{
            "id": "NQKXJ3ZPLBE6Y",
            "filename": "Big.Buck.Bunny.2008.1080p",
            "original_filename": "Big.Buck.Bunny.2008.1080p",
            "hash": "DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C",
            "bytes": 276445467,
            "original_bytes": 276445467,
            "host": "real-debrid.com",
            "split": 2000,
            "progress": 100,
            "status": "downloaded",
            "added": "2024-03-01T10:00:00.000Z",
            "files": [
                { "id": 1, "path": "/Big Buck Bunny.mp4", "bytes": 276134947, "selected": 1 },
                { "id": 2, "path": "/poster.jpg", "bytes": 310520, "selected": 0 }
            ],
            "links": ["https://real-debrid.com/d/ABCDEF"],
            "ended": "2024-03-01T10:01:00.000Z"
        }"#;

        let raw: RdTorrentInfo = serde_json::from_str(json).unwrap();
        let info = raw.into_torrent_info();
        assert_eq!(info.id, "NQKXJ3ZPLBE6Y");
        assert_eq!(info.status, RemoteStatus::Downloaded);
        assert_eq!(
            info.hash.as_deref(),
            Some("dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c")
        );
        assert_eq!(info.files.len(), 2);
        assert!(info.files[0].selected);
        assert!(!info.files[1].selected);
        assert_eq!(info.links, ["https://real-debrid.com/d/ABCDEF"]);
        assert!((info.progress - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_deserialize_converting_magnet() {
        let json = r#"{
            "id": "X",
            "filename": "",
            "hash": "",
            "bytes": 0,
            "progress": 0,
            "status": "magnet_conversion",
            "links": []
        }"#;
        let info = serde_json::from_str::<RdTorrentInfo>(json)
            .unwrap()
            .into_torrent_info();
        assert_eq!(info.status, RemoteStatus::MagnetConversion);
        assert!(info.name().is_none());
        assert!(info.hash.is_none());
        assert!(info.files.is_empty());
        assert!(info.links.is_empty());
    }

    #[test]
    fn test_deserialize_unrestrict() {
        let json = r#"{
            "id": "UNR1",
            "filename": "y.mkv",
            "mimeType": "video/x-matroska",
            "filesize": 1024,
            "link": "https://real-debrid.com/d/ABCDEF",
            "host": "real-debrid.com",
            "chunks": 32,
            "crc": 1,
            "download": "https://x/y.mkv",
            "streamable": 1
        }"#;
        let link = serde_json::from_str::<RdUnrestrictResponse>(json)
            .unwrap()
            .into_unrestricted();
        assert_eq!(link.download, "https://x/y.mkv");
        assert_eq!(link.mime_type.as_deref(), Some("video/x-matroska"));
    }

    #[test]
    fn test_deserialize_error_body() {
        let body: RdErrorBody =
            serde_json::from_str(r#"{"error":"bad_token","error_code":8}"#).unwrap();
        assert_eq!(body.error, "bad_token");
        assert_eq!(body.error_code, Some(8));
    }
}
