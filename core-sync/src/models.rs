//! # Sync Records
//!
//! Durable per-user records and the ephemeral values passed between engine
//! stages within one cycle.
//!
//! ## Run State Machine
//!
//! ```text
//!            start                 tick (lock free)
//! Idle ──────────────> Scheduled ─────────────────> Running
//!  ↑                    ↑    ↑                        │
//!  │ stop / shutdown    │    └──── success (idle) ────┤
//!  └────────────────────┘    └──── failure (error) ───┘
//! ```
//!
//! Every persisted record uses camelCase field names and RFC 3339 timestamps.

use bridge_traits::{ItemKind, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Result, SyncError};

/// Smallest accepted sync interval (5 minutes)
pub const MIN_SYNC_INTERVAL_MS: u64 = 300_000;

/// Largest accepted batch size
pub const MAX_BATCH_SIZE: u32 = 100;

/// Largest accepted `limit` when reading the event log
pub const MAX_EVENTS_LIMIT: u32 = 1000;

/// `limit` used when the caller gives none
pub const DEFAULT_EVENTS_LIMIT: u32 = 50;

/// Title used when the catalog returns none
pub const UNKNOWN_PLACEHOLDER: &str = "Unknown";

// ============================================================================
// Settings
// ============================================================================

/// Which item categories are synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    pub tracks: bool,
    pub albums: bool,
    pub playlists: bool,
}

impl SyncScope {
    pub fn includes(&self, kind: ItemKind) -> bool {
        match kind {
            ItemKind::Track => self.tracks,
            ItemKind::Album => self.albums,
            ItemKind::Playlist => self.playlists,
        }
    }
}

impl Default for SyncScope {
    fn default() -> Self {
        Self {
            tracks: true,
            albums: true,
            playlists: false,
        }
    }
}

/// Retry policy for failed items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// A failed item is retried while its retry count is below this value
    pub max_attempts: u32,
    /// Milliseconds. Persisted for clients; retries are gated by `max_attempts` only.
    pub base_delay: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: 60_000,
        }
    }
}

/// Per-user sync settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Milliseconds between two scheduled cycles
    pub interval: u64,
    /// Maximum number of submissions per cycle
    pub batch_size: u32,
    pub scope: SyncScope,
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: 900_000,
            batch_size: 10,
            scope: SyncScope::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    /// Check the interval floor and the batch size range
    pub fn validate(&self) -> Result<()> {
        if self.interval < MIN_SYNC_INTERVAL_MS {
            return Err(SyncError::validation(
                "interval",
                format!(
                    "Interval must be at least {} ms (5 minutes)",
                    MIN_SYNC_INTERVAL_MS
                ),
            ));
        }

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::validation(
                "batchSize",
                format!("Batch size must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }

        Ok(())
    }
}

/// Partial settings update. Absent fields keep their current value.
///
/// `scope` and `retry` are replaced as a whole when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<SyncScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl SettingsPatch {
    pub fn apply_to(&self, settings: &SyncSettings) -> SyncSettings {
        SyncSettings {
            interval: self.interval.unwrap_or(settings.interval),
            batch_size: self.batch_size.unwrap_or(settings.batch_size),
            scope: self.scope.unwrap_or(settings.scope),
            retry: self.retry.unwrap_or(settings.retry),
        }
    }
}

// ============================================================================
// User State
// ============================================================================

/// Persisted run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub total_synced: u64,
    pub total_failed: u64,
    /// Milliseconds taken by the last cycle
    pub last_run_duration: u64,
}

/// One per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSyncState {
    pub user_id: UserId,
    pub enabled: bool,
    pub status: RunStatus,
    pub current_run_started_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub settings: SyncSettings,
    pub statistics: SyncStatistics,
}

impl UserSyncState {
    /// State of a user that never enabled sync
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            enabled: false,
            status: RunStatus::Idle,
            current_run_started_at: None,
            last_sync_at: None,
            last_successful_sync_at: None,
            settings: SyncSettings::default(),
            statistics: SyncStatistics::default(),
        }
    }

    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Running;
        self.current_run_started_at = Some(now);
    }

    pub fn finish_run(&mut self, outcome: &EnqueueOutcome, now: DateTime<Utc>) {
        let duration = self.run_duration_ms(now);
        self.status = RunStatus::Idle;
        self.current_run_started_at = None;
        self.last_sync_at = Some(now);
        self.last_successful_sync_at = Some(now);
        self.statistics.total_synced += outcome.enqueued as u64;
        self.statistics.total_failed += outcome.failed as u64;
        self.statistics.last_run_duration = duration;
    }

    pub fn fail_run(&mut self, now: DateTime<Utc>) {
        let duration = self.run_duration_ms(now);
        self.status = RunStatus::Error;
        self.current_run_started_at = None;
        self.last_sync_at = Some(now);
        self.statistics.last_run_duration = duration;
    }

    /// Back to a clean, disabled, not-running state
    pub fn disable(&mut self) {
        self.enabled = false;
        self.status = RunStatus::Idle;
        self.current_run_started_at = None;
    }

    fn run_duration_ms(&self, now: DateTime<Utc>) -> u64 {
        self.current_run_started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

// ============================================================================
// Tracked Items
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    New,
    Downloading,
    Success,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local sync record for one favorite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub status: ItemStatus,
    pub added_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl TrackedItem {
    /// First record of a favorite that was just submitted
    pub fn downloading(favorite: &FavoriteItem, now: DateTime<Utc>) -> Self {
        Self {
            id: favorite.id.clone(),
            kind: favorite.kind,
            title: favorite.title.clone(),
            artist: favorite.artist.clone(),
            status: ItemStatus::Downloading,
            added_at: now,
            synced_at: None,
            retry_count: 0,
            last_error: None,
            last_attempt_at: Some(now),
        }
    }

    /// First record of a favorite whose submission failed
    pub fn failed(favorite: &FavoriteItem, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: ItemStatus::Failed,
            retry_count: 1,
            last_error: Some(error.into()),
            ..Self::downloading(favorite, now)
        }
    }

    pub fn mark_downloading(&mut self, now: DateTime<Utc>) {
        self.status = ItemStatus::Downloading;
        self.last_attempt_at = Some(now);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = ItemStatus::Failed;
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.last_attempt_at = Some(now);
    }

    /// Called once the download engine reports the file on disk
    pub fn mark_success(&mut self, now: DateTime<Utc>) {
        self.status = ItemStatus::Success;
        self.synced_at = Some(now);
        self.last_error = None;
    }

    /// Make the item eligible for the next cycle as if it were new
    pub fn reset_for_redownload(&mut self) {
        self.status = ItemStatus::New;
        self.retry_count = 0;
        self.last_error = None;
        self.synced_at = None;
    }

    pub fn is_retryable(&self, max_attempts: u32) -> bool {
        self.status == ItemStatus::Failed && self.retry_count < max_attempts
    }

    /// Retryable, or reset by a redownload request
    pub fn awaits_download(&self, max_attempts: u32) -> bool {
        self.status == ItemStatus::New || self.is_retryable(max_attempts)
    }

    /// The favorite this record was created from
    pub fn to_favorite(&self) -> FavoriteItem {
        FavoriteItem {
            id: self.id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            artist: self.artist.clone(),
        }
    }
}

/// Count of tracked items per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSummary {
    pub new: usize,
    pub downloading: usize,
    pub success: usize,
    pub failed: usize,
}

/// The three tracked-item collections of one user, keyed by remote id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackedItems {
    pub tracks: BTreeMap<String, TrackedItem>,
    pub albums: BTreeMap<String, TrackedItem>,
    pub playlists: BTreeMap<String, TrackedItem>,
}

impl TrackedItems {
    pub fn collection(&self, kind: ItemKind) -> &BTreeMap<String, TrackedItem> {
        match kind {
            ItemKind::Track => &self.tracks,
            ItemKind::Album => &self.albums,
            ItemKind::Playlist => &self.playlists,
        }
    }

    pub fn collection_mut(&mut self, kind: ItemKind) -> &mut BTreeMap<String, TrackedItem> {
        match kind {
            ItemKind::Track => &mut self.tracks,
            ItemKind::Album => &mut self.albums,
            ItemKind::Playlist => &mut self.playlists,
        }
    }

    pub fn get(&self, kind: ItemKind, id: &str) -> Option<&TrackedItem> {
        self.collection(kind).get(id)
    }

    pub fn get_mut(&mut self, kind: ItemKind, id: &str) -> Option<&mut TrackedItem> {
        self.collection_mut(kind).get_mut(id)
    }

    pub fn contains(&self, kind: ItemKind, id: &str) -> bool {
        self.collection(kind).contains_key(id)
    }

    pub fn insert(&mut self, item: TrackedItem) {
        self.collection_mut(item.kind).insert(item.id.clone(), item);
    }

    /// Every tracked item, tracks first, then albums, then playlists
    pub fn iter(&self) -> impl Iterator<Item = &TrackedItem> {
        self.tracks
            .values()
            .chain(self.albums.values())
            .chain(self.playlists.values())
    }

    pub fn len(&self) -> usize {
        self.tracks.len() + self.albums.len() + self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> TrackedSummary {
        self.iter()
            .fold(TrackedSummary::default(), |mut summary, item| {
                match item.status {
                    ItemStatus::New => summary.new += 1,
                    ItemStatus::Downloading => summary.downloading += 1,
                    ItemStatus::Success => summary.success += 1,
                    ItemStatus::Failed => summary.failed += 1,
                }
                summary
            })
    }
}

// ============================================================================
// Cycle Values
// ============================================================================

/// A favorite as polled from the catalog, after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

/// All favorites of one user for the enabled scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoriteSet {
    pub tracks: Vec<FavoriteItem>,
    pub albums: Vec<FavoriteItem>,
    pub playlists: Vec<FavoriteItem>,
}

impl FavoriteSet {
    pub fn iter(&self) -> impl Iterator<Item = &FavoriteItem> {
        self.tracks
            .iter()
            .chain(self.albums.iter())
            .chain(self.playlists.iter())
    }

    pub fn len(&self) -> usize {
        self.tracks.len() + self.albums.len() + self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one orchestrator call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub enqueued: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ============================================================================
// Broken Albums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokenAlbumStatus {
    Unresolved,
    Resolved,
}

/// A tracked album whose catalog id changed while title and artist did not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokenAlbum {
    pub original_id: String,
    pub detected_id: Option<String>,
    pub title: String,
    pub detected_at: DateTime<Utc>,
    pub status: BrokenAlbumStatus,
}

// ============================================================================
// Status Report
// ============================================================================

/// Snapshot returned by the status operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub enabled: bool,
    /// Whether a cycle holds the user's lock right now
    pub running: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub statistics: SyncStatistics,
    pub settings: SyncSettings,
}

impl SyncStatusReport {
    pub fn new(state: &UserSyncState, running: bool) -> Self {
        Self {
            enabled: state.enabled,
            running,
            last_sync_at: state.last_sync_at,
            last_successful_sync_at: state.last_successful_sync_at,
            status: state.status,
            statistics: state.statistics,
            settings: state.settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn favorite(kind: ItemKind, id: &str) -> FavoriteItem {
        FavoriteItem {
            id: id.to_string(),
            kind,
            title: format!("Title {}", id),
            artist: kind.has_artist().then(|| "Artist".to_string()),
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = SyncSettings::default();
        assert_eq!(settings.interval, 900_000);
        assert_eq!(settings.batch_size, 10);
        assert!(settings.scope.tracks && settings.scope.albums && !settings.scope.playlists);
        assert_eq!(settings.retry.max_attempts, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_interval_floor() {
        for interval in [0, 1, 60_000, MIN_SYNC_INTERVAL_MS - 1] {
            let settings = SyncSettings {
                interval,
                ..SyncSettings::default()
            };
            match settings.validate() {
                Err(SyncError::Validation { field, .. }) => assert_eq!(field, "interval"),
                other => panic!("expected validation error, got {:?}", other),
            }
        }

        let settings = SyncSettings {
            interval: MIN_SYNC_INTERVAL_MS,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_batch_size_range() {
        for batch_size in [0, MAX_BATCH_SIZE + 1] {
            let settings = SyncSettings {
                batch_size,
                ..SyncSettings::default()
            };
            assert!(matches!(
                settings.validate(),
                Err(SyncError::Validation { .. })
            ));
        }
        for batch_size in [1, MAX_BATCH_SIZE] {
            let settings = SyncSettings {
                batch_size,
                ..SyncSettings::default()
            };
            assert!(settings.validate().is_ok());
        }
    }

    #[test]
    fn test_patch_merges_shallowly() {
        let patch = SettingsPatch {
            batch_size: Some(25),
            scope: Some(SyncScope {
                tracks: false,
                albums: true,
                playlists: true,
            }),
            ..SettingsPatch::default()
        };

        let merged = patch.apply_to(&SyncSettings::default());
        assert_eq!(merged.batch_size, 25);
        assert_eq!(merged.interval, 900_000);
        assert!(!merged.scope.tracks && merged.scope.playlists);
        assert_eq!(merged.retry, RetryPolicy::default());
    }

    #[test]
    fn test_patch_deserializes_from_partial_json() {
        let patch: SettingsPatch = serde_json::from_str(r#"{"interval":600000}"#).unwrap();
        assert_eq!(patch.interval, Some(600_000));
        assert!(patch.batch_size.is_none());
    }

    #[test]
    fn test_run_lifecycle_bookkeeping() {
        let start = Utc::now();
        let mut state = UserSyncState::new(UserId::new("1"));

        state.begin_run(start);
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.current_run_started_at, Some(start));

        let end = start + Duration::milliseconds(1200);
        let outcome = EnqueueOutcome {
            enqueued: 3,
            skipped: 4,
            failed: 1,
        };
        state.finish_run(&outcome, end);

        assert_eq!(state.status, RunStatus::Idle);
        assert!(state.current_run_started_at.is_none());
        assert_eq!(state.last_sync_at, Some(end));
        assert_eq!(state.last_successful_sync_at, Some(end));
        assert_eq!(state.statistics.total_synced, 3);
        assert_eq!(state.statistics.total_failed, 1);
        assert_eq!(state.statistics.last_run_duration, 1200);
    }

    #[test]
    fn test_failed_run_keeps_last_success() {
        let start = Utc::now();
        let mut state = UserSyncState::new(UserId::new("1"));
        state.begin_run(start);
        state.fail_run(start + Duration::milliseconds(10));

        assert_eq!(state.status, RunStatus::Error);
        assert!(state.current_run_started_at.is_none());
        assert!(state.last_sync_at.is_some());
        assert!(state.last_successful_sync_at.is_none());
        assert_eq!(state.statistics.last_run_duration, 10);
    }

    #[test]
    fn test_redownload_reset() {
        let now = Utc::now();
        let mut item = TrackedItem::failed(&favorite(ItemKind::Album, "7"), "boom", now);
        item.retry_count = 3;
        item.synced_at = Some(now);

        item.reset_for_redownload();

        assert_eq!(item.status, ItemStatus::New);
        assert_eq!(item.retry_count, 0);
        assert!(item.last_error.is_none());
        assert!(item.synced_at.is_none());
        assert!(item.awaits_download(5));
        assert!(!item.is_retryable(5));
    }

    #[test]
    fn test_retry_count_only_grows_on_failure() {
        let now = Utc::now();
        let mut item = TrackedItem::downloading(&favorite(ItemKind::Track, "1"), now);
        assert_eq!(item.retry_count, 0);

        item.mark_downloading(now);
        assert_eq!(item.retry_count, 0);

        item.mark_failed("timeout", now);
        item.mark_failed("timeout", now);
        assert_eq!(item.retry_count, 2);
        assert!(item.is_retryable(5));
        assert!(!item.is_retryable(2));

        item.mark_success(now);
        assert_eq!(item.status, ItemStatus::Success);
        assert!(item.last_error.is_none());
        assert_eq!(item.synced_at, Some(now));
        assert!(!item.is_retryable(5));
    }

    #[test]
    fn test_new_failed_entry_starts_at_one() {
        let item = TrackedItem::failed(&favorite(ItemKind::Track, "1"), "quota", Utc::now());
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("quota"));
    }

    #[test]
    fn test_tracked_items_summary() {
        let now = Utc::now();
        let mut items = TrackedItems::default();
        items.insert(TrackedItem::downloading(&favorite(ItemKind::Track, "1"), now));
        items.insert(TrackedItem::failed(&favorite(ItemKind::Album, "2"), "x", now));
        let mut done = TrackedItem::downloading(&favorite(ItemKind::Playlist, "3"), now);
        done.mark_success(now);
        items.insert(done);

        let summary = items.summary();
        assert_eq!(summary.downloading, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.new, 0);
        assert_eq!(items.len(), 3);
        assert!(items.contains(ItemKind::Album, "2"));
        assert!(!items.contains(ItemKind::Track, "2"));
    }

    #[test]
    fn test_tracked_item_json_shape() {
        let item = TrackedItem::downloading(&favorite(ItemKind::Playlist, "9"), Utc::now());
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["type"], "playlist");
        assert_eq!(json["status"], "downloading");
        assert_eq!(json["retryCount"], 0);
        assert!(json.get("artist").is_none());
        assert!(json["syncedAt"].is_null());
    }

    #[test]
    fn test_user_state_json_shape() {
        let state = UserSyncState::new(UserId::new("55"));
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["userId"], "55");
        assert_eq!(json["status"], "idle");
        assert_eq!(json["settings"]["batchSize"], 10);
        assert_eq!(json["settings"]["retry"]["maxAttempts"], 5);
        assert!(json["currentRunStartedAt"].is_null());
    }
}
