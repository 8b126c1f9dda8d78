//! # Drift Detection
//!
//! Flags tracked albums whose catalog id changed upstream.
//!
//! A tracked album is considered broken when its id is no longer among the
//! current favorite albums but a favorite with the same title and artist
//! (case-insensitive exact match) exists under a different id. Albums that
//! simply disappeared are never flagged: a removal and a server-side hiccup
//! look the same from here.

use crate::models::{BrokenAlbum, BrokenAlbumStatus, FavoriteItem, TrackedItem};
use bridge_traits::{Clock, ItemKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct DriftDetector {
    clock: Arc<dyn Clock>,
}

fn match_key(title: &str, artist: Option<&str>) -> String {
    format!(
        "{}|{}",
        title.to_lowercase(),
        artist.unwrap_or_default().to_lowercase()
    )
}

impl DriftDetector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Broken albums in the order of `tracked`. Non-album entries are ignored.
    ///
    /// Deduplication against previously recorded broken albums is the caller's job.
    pub fn detect_changes<'a>(
        &self,
        tracked: impl IntoIterator<Item = &'a TrackedItem>,
        current_albums: &[FavoriteItem],
    ) -> Vec<BrokenAlbum> {
        let current_ids: HashSet<&str> = current_albums.iter().map(|a| a.id.as_str()).collect();

        let mut by_title_artist: HashMap<String, &FavoriteItem> = HashMap::new();
        for favorite in current_albums {
            by_title_artist.insert(
                match_key(&favorite.title, favorite.artist.as_deref()),
                favorite,
            );
        }

        let now = self.clock.now();

        tracked
            .into_iter()
            .filter(|item| item.kind == ItemKind::Album)
            .filter(|item| !current_ids.contains(item.id.as_str()))
            .filter_map(|item| {
                let candidate =
                    by_title_artist.get(&match_key(&item.title, item.artist.as_deref()))?;
                (candidate.id != item.id).then(|| BrokenAlbum {
                    original_id: item.id.clone(),
                    detected_id: Some(candidate.id.clone()),
                    title: item.title.clone(),
                    detected_at: now,
                    status: BrokenAlbumStatus::Unresolved,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;
    use chrono::Utc;

    fn album(id: &str, title: &str, artist: &str) -> FavoriteItem {
        FavoriteItem {
            id: id.to_string(),
            kind: ItemKind::Album,
            title: title.to_string(),
            artist: Some(artist.to_string()),
        }
    }

    fn tracked(id: &str, title: &str, artist: &str) -> TrackedItem {
        TrackedItem::downloading(&album(id, title, artist), Utc::now())
    }

    fn detector() -> (DriftDetector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (DriftDetector::new(clock.clone()), clock)
    }

    #[test]
    fn test_returns_empty_when_all_albums_still_exist() {
        let (detector, _) = detector();
        let result = detector.detect_changes(
            &[tracked("100", "Album A", "Artist A")],
            &[album("100", "Album A", "Artist A")],
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_detects_album_with_changed_id() {
        let (detector, clock) = detector();
        let result = detector.detect_changes(
            &[tracked("100", "Album A", "Artist A")],
            &[album("200", "Album A", "Artist A")],
        );

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].original_id, "100");
        assert_eq!(result[0].detected_id.as_deref(), Some("200"));
        assert_eq!(result[0].title, "Album A");
        assert_eq!(result[0].status, BrokenAlbumStatus::Unresolved);
        assert_eq!(result[0].detected_at, clock.now());
    }

    #[test]
    fn test_matches_case_insensitively() {
        let (detector, _) = detector();
        let result = detector.detect_changes(
            &[tracked("100", "album a", "ARTIST A")],
            &[album("200", "Album A", "Artist A")],
        );
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_does_not_flag_removed_albums() {
        let (detector, _) = detector();
        let result = detector.detect_changes(
            &[tracked("100", "Album A", "Artist A")],
            &[album("300", "Album B", "Artist B")],
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_skips_non_album_items() {
        let (detector, _) = detector();
        let mut track = tracked("100", "Album A", "Artist A");
        track.kind = ItemKind::Track;

        let result = detector.detect_changes(&[track], &[album("200", "Album A", "Artist A")]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_multiple_broken_albums_keep_input_order() {
        let (detector, _) = detector();
        let result = detector.detect_changes(
            &[
                tracked("2", "Second", "X"),
                tracked("1", "First", "Y"),
                tracked("3", "Kept", "Z"),
            ],
            &[
                album("10", "First", "Y"),
                album("20", "Second", "X"),
                album("3", "Kept", "Z"),
            ],
        );

        let ids: Vec<&str> = result.iter().map(|b| b.original_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn test_same_id_present_is_never_flagged() {
        let (detector, _) = detector();
        let result = detector.detect_changes(
            &[tracked("100", "Album A", "Artist A")],
            &[
                album("100", "Album A", "Artist A"),
                album("200", "Album A", "Artist A"),
            ],
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_missing_artist_matches_empty_artist() {
        let (detector, _) = detector();
        let mut orphan = tracked("100", "Live", "");
        orphan.artist = None;

        let result = detector.detect_changes(&[orphan], &[album("200", "Live", "")]);
        assert_eq!(result.len(), 1);
    }
}
