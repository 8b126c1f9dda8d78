//! Remote Catalog Abstraction
//!
//! Favorites are listed page by page. Raw records carry nullable fields exactly
//! as the catalog returns them; normalization is the engine's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};
use crate::session::CatalogSession;

/// Category of a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Track,
    Album,
    Playlist,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Track => "track",
            ItemKind::Album => "album",
            ItemKind::Playlist => "playlist",
        }
    }

    /// Whether items of this kind carry an artist
    pub fn has_artist(&self) -> bool {
        !matches!(self, ItemKind::Playlist)
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "track" => Ok(ItemKind::Track),
            "album" => Ok(ItemKind::Album),
            "playlist" => Ok(ItemKind::Playlist),
            other => Err(BridgeError::OperationFailed(format!(
                "Unknown item kind: {}",
                other
            ))),
        }
    }
}

/// A page request: `limit` records starting at offset `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub start: usize,
    pub limit: usize,
}

/// A favorite record as returned by the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFavorite {
    pub id: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// Remote catalog client trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::catalog::{CatalogClient, ItemKind, PageRequest};
///
/// let page = catalog
///     .list_favorites(&session, ItemKind::Track, PageRequest { start: 0, limit: 1000 })
///     .await?;
/// ```
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// List one page of the session user's favorites of the given kind.
    ///
    /// A page shorter than `page.limit` marks the end of the listing.
    async fn list_favorites(
        &self,
        session: &CatalogSession,
        kind: ItemKind,
        page: PageRequest,
    ) -> Result<Vec<RawFavorite>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_kind_round_trip_through_str() {
        for kind in [ItemKind::Track, ItemKind::Album, ItemKind::Playlist] {
            assert_eq!(kind.as_str().parse::<ItemKind>().unwrap(), kind);
        }
        assert!("albums".parse::<ItemKind>().is_err());
        assert!("Track".parse::<ItemKind>().is_err());
    }

    #[test]
    fn test_only_playlists_lack_artist() {
        assert_eq!(ItemKind::Playlist.to_string(), "playlist");
        assert!(!ItemKind::Playlist.has_artist());
        assert!(ItemKind::Album.has_artist());
        assert!(ItemKind::Track.has_artist());
    }
}
