//! # Favorites Poller
//!
//! Fetches a user's current favorites for every category enabled in the
//! sync scope.
//!
//! Categories are fetched concurrently. Each one pages through the catalog
//! until a short (or empty) page, drops records without an id, fills missing
//! titles and artists with a placeholder and keeps the first record per id.
//! A failure in any category fails the whole poll.

use crate::models::{FavoriteItem, FavoriteSet, SyncScope, UNKNOWN_PLACEHOLDER};
use crate::{Result, SyncError};
use bridge_traits::{CatalogClient, CatalogSession, ItemKind, PageRequest, RawFavorite};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct FavoritesPoller {
    catalog: Arc<dyn CatalogClient>,
    page_size: usize,
}

impl FavoritesPoller {
    pub fn new(catalog: Arc<dyn CatalogClient>, page_size: usize) -> Self {
        Self {
            catalog,
            page_size: page_size.max(1),
        }
    }

    /// Poll every category enabled in `scope`; disabled categories come back empty
    #[instrument(skip(self, session, scope), fields(user_id = %session.user_id))]
    pub async fn poll(&self, session: &CatalogSession, scope: &SyncScope) -> Result<FavoriteSet> {
        let (tracks, albums, playlists) = futures::try_join!(
            self.fetch_if_enabled(session, scope, ItemKind::Track),
            self.fetch_if_enabled(session, scope, ItemKind::Album),
            self.fetch_if_enabled(session, scope, ItemKind::Playlist),
        )?;

        debug!(
            tracks = tracks.len(),
            albums = albums.len(),
            playlists = playlists.len(),
            "Polled favorites"
        );

        Ok(FavoriteSet {
            tracks,
            albums,
            playlists,
        })
    }

    async fn fetch_if_enabled(
        &self,
        session: &CatalogSession,
        scope: &SyncScope,
        kind: ItemKind,
    ) -> Result<Vec<FavoriteItem>> {
        if !scope.includes(kind) {
            return Ok(Vec::new());
        }
        self.fetch_all(session, kind).await
    }

    async fn fetch_all(&self, session: &CatalogSession, kind: ItemKind) -> Result<Vec<FavoriteItem>> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut start = 0;

        loop {
            let page = self
                .catalog
                .list_favorites(
                    session,
                    kind,
                    PageRequest {
                        start,
                        limit: self.page_size,
                    },
                )
                .await
                .map_err(|e| {
                    SyncError::Catalog(format!("Failed to list favorite {}s: {}", kind, e))
                })?;

            let page_len = page.len();
            for raw in page {
                if let Some(item) = normalize(kind, raw) {
                    if seen.insert(item.id.clone()) {
                        items.push(item);
                    }
                }
            }

            if page_len < self.page_size {
                break;
            }
            start += page_len;
        }

        Ok(items)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// `None` for records without a usable id
fn normalize(kind: ItemKind, raw: RawFavorite) -> Option<FavoriteItem> {
    let id = non_empty(raw.id)?;
    let title = non_empty(raw.title).unwrap_or_else(|| UNKNOWN_PLACEHOLDER.to_string());
    let artist = kind
        .has_artist()
        .then(|| non_empty(raw.artist).unwrap_or_else(|| UNKNOWN_PLACEHOLDER.to_string()));

    Some(FavoriteItem {
        id,
        kind,
        title,
        artist,
    })
}
