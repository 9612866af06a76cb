use std::time::Duration;

use reqwest::{Client, RequestBuilder};

use super::error::DebridError;
use super::types::{RdAddMagnetResponse, RdErrorBody, RdTorrentInfo, RdUnrestrictResponse};
use crate::traits::{AddedMagnet, DebridService, FileSelection, TorrentInfo, UnrestrictedLink};

pub const DEFAULT_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Real-Debrid REST API v1.0 client.
#[derive(Debug, Clone)]
pub struct RealDebridClient {
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl Default for RealDebridClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl RealDebridClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            http: Client::new(),
        }
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        req.bearer_auth(token).timeout(self.timeout)
    }

    /// Check the HTTP response for errors and decode the API error body on failure.
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, DebridError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<RdErrorBody>(&body) {
            Ok(err) => (err.error_code, err.error),
            Err(_) if body.trim().is_empty() => (None, format!("HTTP {status}")),
            Err(_) => (None, body),
        };
        tracing::warn!(status, ?code, %message, "Real-Debrid API error");
        Err(DebridError::Api {
            status,
            code,
            message,
        })
    }
}

impl DebridService for RealDebridClient {
    type Error = DebridError;

    async fn add_magnet(&self, token: &str, magnet: &str) -> Result<AddedMagnet, DebridError> {
        let resp = self
            .authorized(self.http.post(self.url("/torrents/addMagnet")), token)
            .form(&[("magnet", magnet)])
            .send()
            .await?;

        let resp = Self::check_response(resp).await?;
        let added: RdAddMagnetResponse = resp
            .json()
            .await
            .map_err(|e| DebridError::Parse(e.to_string()))?;

        tracing::debug!(id = %added.id, "Magnet registered");
        Ok(added.into_added())
    }

    async fn get_info(&self, token: &str, torrent_id: &str) -> Result<TorrentInfo, DebridError> {
        let resp = self
            .authorized(
                self.http.get(self.url(&format!("/torrents/info/{torrent_id}"))),
                token,
            )
            .send()
            .await?;

        let resp = Self::check_response(resp).await?;
        let info: RdTorrentInfo = resp
            .json()
            .await
            .map_err(|e| DebridError::Parse(e.to_string()))?;

        Ok(info.into_torrent_info())
    }

    async fn select_files(
        &self,
        token: &str,
        torrent_id: &str,
        selection: &FileSelection,
    ) -> Result<(), DebridError> {
        let files = selection.to_param();
        let resp = self
            .authorized(
                self.http
                    .post(self.url(&format!("/torrents/selectFiles/{torrent_id}"))),
                token,
            )
            .form(&[("files", files.as_str())])
            .send()
            .await?;

        // 204 No Content on success; 202 when the selection was already made.
        Self::check_response(resp).await?;
        Ok(())
    }

    async fn resolve_link(&self, token: &str, link: &str) -> Result<UnrestrictedLink, DebridError> {
        let resp = self
            .authorized(self.http.post(self.url("/unrestrict/link")), token)
            .form(&[("link", link)])
            .send()
            .await?;

        let resp = Self::check_response(resp).await?;
        let unrestricted: RdUnrestrictResponse = resp
            .json()
            .await
            .map_err(|e| DebridError::Parse(e.to_string()))?;

        Ok(unrestricted.into_unrestricted())
    }

    async fn validate_credential(&self, token: &str) -> Result<bool, DebridError> {
        let resp = self
            .authorized(self.http.get(self.url("/user")), token)
            .send()
            .await?;

        // Rejected tokens are an answer, not an error.
        if matches!(resp.status().as_u16(), 401 | 403) {
            return Ok(false);
        }
        Self::check_response(resp).await?;
        Ok(true)
    }
}
