//! # Favorites Sync Engine
//!
//! Keeps a user's downloads in step with their catalog favorites.
//!
//! ## Overview
//!
//! On a per-user schedule the engine:
//! - Polls the current favorite tracks, albums and playlists
//! - Diffs them against the items it already tracks
//! - Submits new and retryable items to the download engine in bounded batches
//! - Flags tracked albums whose catalog id changed upstream
//! - Records an audit event for everything it does
//!
//! ## Components
//!
//! - **Models** (`models`): Settings, run state, tracked items and broken albums
//! - **Repository** (`repository`): Per-user persistence over a key/value `StateStore`
//! - **Favorites Poller** (`poller`): Paged, concurrent favorites fetch with normalization
//! - **Download Orchestrator** (`orchestrator`): Batch submission and failure bookkeeping
//! - **Drift Detector** (`drift`): Title/artist matching of albums whose id changed
//! - **Sync Scheduler** (`scheduler`): Timers, per-user locks and the cycle itself

pub mod drift;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod repository;
pub mod scheduler;

pub use drift::DriftDetector;
pub use error::{Result, SyncError};
pub use models::{
    BrokenAlbum, BrokenAlbumStatus, EnqueueOutcome, FavoriteItem, FavoriteSet, ItemStatus,
    RetryPolicy, RunStatus, SettingsPatch, SyncScope, SyncSettings, SyncStatistics,
    SyncStatusReport, TrackedItem, TrackedItems, TrackedSummary, UserSyncState,
};
pub use orchestrator::DownloadOrchestrator;
pub use poller::FavoritesPoller;
pub use repository::{KvSyncStateRepository, SyncStateRepository};
pub use scheduler::{CycleOutcome, SyncScheduler};
