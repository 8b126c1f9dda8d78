//! Download Engine Abstraction
//!
//! The engine only decides *what* to download. Fetching, decrypting, tagging
//! and writing files is owned by the host's download engine behind
//! [`DownloadEngine`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::ItemKind;
use crate::session::CatalogSession;

/// Requested audio quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bitrate {
    Flac,
    Mp3_320,
    Mp3_128,
}

impl Default for Bitrate {
    fn default() -> Self {
        Bitrate::Mp3_320
    }
}

/// A single item handed to the download engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub kind: ItemKind,
    pub id: String,
    /// Public catalog link for the item (e.g. `https://host/album/42`)
    pub link: String,
}

impl DownloadRequest {
    pub fn new(kind: ItemKind, id: impl Into<String>, link_base: &str) -> Self {
        let id = id.into();
        let link = format!("{}/{}/{}", link_base.trim_end_matches('/'), kind, id);
        Self { kind, id, link }
    }
}

/// Opaque acknowledgement returned by the download engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Identifiers of the queue entries created by the engine
    pub queue_ids: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Not logged in to the catalog")]
    NotAuthenticated,

    #[error("Bitrate {0:?} is not available for this stream")]
    UnsupportedBitrate(Bitrate),

    #[error("Submission rejected: {0}")]
    Rejected(String),
}

/// Download engine trait
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Queue the given items for download
    async fn submit(
        &self,
        session: &CatalogSession,
        items: &[DownloadRequest],
        bitrate: Bitrate,
    ) -> std::result::Result<SubmitReceipt, DownloadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_request_link() {
        let request = DownloadRequest::new(ItemKind::Album, "302127", "https://www.deezer.com/");
        assert_eq!(request.link, "https://www.deezer.com/album/302127");
        assert_eq!(request.id, "302127");
    }

    #[test]
    fn test_default_bitrate() {
        assert_eq!(Bitrate::default(), Bitrate::Mp3_320);
    }

    #[test]
    fn test_download_error_messages() {
        assert_eq!(
            DownloadError::Rejected("quota".to_string()).to_string(),
            "Submission rejected: quota"
        );
        assert_eq!(
            DownloadError::NotAuthenticated.to_string(),
            "Not logged in to the catalog"
        );
    }
}
