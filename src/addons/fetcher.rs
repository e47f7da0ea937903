//! Archive retrieval from the distribution server.
//!
//! The distribution server answers a download request either with raw
//! zip bytes, with a JSON envelope carrying a redirect URL, or with a
//! JSON envelope carrying a rejection message. [`RemoteFetcher`]
//! interprets all three; tests substitute their own [`ArchiveSource`]
//! to avoid the network entirely.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::AddonError;
use crate::config::HostConfig;

/// Timeout applied to both connect and read on download requests.
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Source of addon archives. `fetch` returns the path of a local zip
/// file ready for extraction.
pub trait ArchiveSource: Send + Sync {
    /// Obtains the archive for `name`, passing `extend` through as
    /// extra request parameters (version pins and the like).
    fn fetch(&self, name: &str, extend: &BTreeMap<String, String>)
        -> Result<PathBuf, AddonError>;
}

/// JSON envelope the distribution server wraps non-archive responses in.
#[derive(Debug, Deserialize)]
pub struct RemotePayload {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// What to do with a download response body.
#[derive(Debug, PartialEq, Eq)]
pub enum FetchedBody {
    /// Body is the archive itself.
    Archive,
    /// Server pointed at another URL holding the archive.
    Redirect(String),
}

/// Interprets a download response body.
///
/// Bodies starting with `{` are envelopes: an envelope whose `data.url`
/// is set redirects, anything else is a rejection. All other bodies are
/// taken to be the archive bytes.
pub fn interpret_body(body: &[u8]) -> Result<FetchedBody, AddonError> {
    if body.first() != Some(&b'{') {
        return Ok(FetchedBody::Archive);
    }

    let payload: RemotePayload = serde_json::from_slice(body)
        .map_err(|e| AddonError::Unknown(format!("unreadable server response: {}", e)))?;

    if let Some(url) = payload.data.get("url").and_then(|u| u.as_str()) {
        return Ok(FetchedBody::Redirect(url.to_string()));
    }

    Err(AddonError::RemoteRejected {
        code: payload.code,
        msg: payload.msg,
        data: payload.data,
    })
}

/// Downloads addon archives from the configured distribution server.
pub struct RemoteFetcher {
    client: reqwest::blocking::Client,
    config: Arc<HostConfig>,
}

impl RemoteFetcher {
    #[must_use]
    pub fn new(config: Arc<HostConfig>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent("addonhost")
            .connect_timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        Self { client, config }
    }

    fn download_url(&self) -> String {
        format!("{}/addon/download", self.config.server_url.trim_end_matches('/'))
    }

    /// Requests raw bytes from `url` with the query parameters applied.
    fn request_bytes(
        &self,
        url: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, AddonError> {
        debug!("requesting {}", url);
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .map_err(|e| AddonError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AddonError::NetworkError(format!(
                "{} returned {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| AddonError::NetworkError(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl ArchiveSource for RemoteFetcher {
    fn fetch(
        &self,
        name: &str,
        extend: &BTreeMap<String, String>,
    ) -> Result<PathBuf, AddonError> {
        let mut params = extend.clone();
        params.insert("name".to_string(), name.to_string());

        info!("downloading addon '{}' from {}", name, self.config.server_url);
        let mut body = self.request_bytes(&self.download_url(), &params)?;

        if let FetchedBody::Redirect(url) = interpret_body(&body)? {
            debug!("server redirected '{}' to {}", name, url);
            body = self.request_bytes(&url, &BTreeMap::new())?;
            match interpret_body(&body) {
                Ok(FetchedBody::Archive) => {}
                Ok(FetchedBody::Redirect(_)) => {
                    warn!("redirect for '{}' did not yield an archive", name);
                    return Err(AddonError::Unknown(format!(
                        "download of '{name}' redirected twice"
                    )));
                }
                Err(e) => {
                    warn!("redirect for '{}' did not yield an archive", name);
                    return Err(e);
                }
            }
        }

        let dest = self
            .config
            .backup_dir()
            .map_err(|e| AddonError::WriteError(e.to_string()))?
            .join(format!("{}.zip", name));
        fs::write(&dest, &body)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", dest.display(), e)))?;
        info!("saved {} bytes to {}", body.len(), dest.display());
        Ok(dest)
    }
}

/// Serves archives already present on disk. Used for local uploads and
/// throughout the test suite.
pub struct LocalArchiveSource {
    archives: BTreeMap<String, PathBuf>,
}

impl LocalArchiveSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            archives: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, path: PathBuf) {
        self.archives.insert(name.to_string(), path);
    }
}

impl Default for LocalArchiveSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveSource for LocalArchiveSource {
    fn fetch(
        &self,
        name: &str,
        _extend: &BTreeMap<String, String>,
    ) -> Result<PathBuf, AddonError> {
        self.archives
            .get(name)
            .cloned()
            .ok_or_else(|| AddonError::NotFound(name.to_string()))
    }
}
