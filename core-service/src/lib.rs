//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided collaborators (session lookup, catalog
//! client, download engine, state store) into the sync engine and exposes
//! the operations a transport layer needs, with request validation applied
//! before any state is touched. Desktop hosts typically enable the
//! `desktop-shims` feature, which lets [`EngineConfig`] fall back to a
//! file-backed state store; `sqlite` adds [`open_sqlite_store`].
//!
//! ```ignore
//! use core_service::{EngineConfig, SyncService};
//!
//! let config = EngineConfig::builder()
//!     .session_provider(sessions)
//!     .catalog_client(catalog)
//!     .download_engine(downloader)
//!     .state_dir("/var/lib/favsync")
//!     .build()?;
//!
//! let service = SyncService::bootstrap(config)?;
//! service.resume().await?;
//! let status = service.start(&"42".into()).await?;
//! ```

pub mod error;

pub use error::{CoreError, ErrorKind, Result};

pub use bridge_traits::{ItemKind, UserId};
pub use core_runtime::config::{EngineConfig, EngineConfigBuilder};
pub use core_runtime::events::{EventBus, EventStream, SyncEvent, UserEvent};
pub use core_sync::models::MAX_EVENTS_LIMIT;
pub use core_sync::{SettingsPatch, SyncStatusReport, TrackedItem, TrackedSummary};

use core_sync::models::DEFAULT_EVENTS_LIMIT;
use core_sync::{SyncScheduler, SyncStateRepository};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tracing::{info, instrument};

#[cfg(feature = "sqlite")]
use bridge_traits::StateStore;

/// Status snapshot plus per-status counts over every tracked collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub sync: SyncStatusReport,
    pub tracked_items: TrackedSummary,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct SyncService {
    scheduler: Arc<SyncScheduler>,
    event_bus: EventBus,
}

impl SyncService {
    /// Wire the engine. No timer is armed until [`resume`](Self::resume) or
    /// [`start`](Self::start).
    pub fn bootstrap(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_bus_capacity);
        let scheduler = SyncScheduler::from_config(&config, event_bus.clone());

        info!(
            page_size = config.favorites_page_size,
            event_log_capacity = config.event_log_capacity,
            "Sync service bootstrapped"
        );

        Ok(Self {
            scheduler: Arc::new(scheduler),
            event_bus,
        })
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn start(&self, user_id: &UserId) -> Result<ServiceStatus> {
        self.scheduler.start(user_id).await?;
        self.status(user_id).await
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn stop(&self, user_id: &UserId) -> Result<ServiceStatus> {
        self.scheduler.stop(user_id).await?;
        self.status(user_id).await
    }

    /// Merge `patch` into the user's settings; nothing is persisted if the result is invalid
    #[instrument(skip(self, patch), fields(user_id = %user_id))]
    pub async fn configure(
        &self,
        user_id: &UserId,
        patch: SettingsPatch,
    ) -> Result<ServiceStatus> {
        self.scheduler.update_config(user_id, &patch).await?;
        self.status(user_id).await
    }

    pub async fn status(&self, user_id: &UserId) -> Result<ServiceStatus> {
        let sync = self.scheduler.status(user_id).await?;
        let tracked_items = self
            .scheduler
            .repository()
            .load_tracked_items(user_id)
            .await
            .map_err(CoreError::from)?
            .summary();

        Ok(ServiceStatus {
            sync,
            tracked_items,
        })
    }

    /// Newest-first audit events; `limit` defaults to 50 and must be within 1..=1000
    pub async fn events(&self, user_id: &UserId, limit: Option<u32>) -> Result<Vec<SyncEvent>> {
        let limit = limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
        if !(1..=MAX_EVENTS_LIMIT).contains(&limit) {
            return Err(CoreError::invalid(
                "limit",
                format!("must be between 1 and {}", MAX_EVENTS_LIMIT),
            ));
        }

        Ok(self.scheduler.events(user_id, limit as usize).await?)
    }

    /// Mark a tracked item for download on the next cycle
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn redownload(
        &self,
        user_id: &UserId,
        item_id: &str,
        item_type: &str,
    ) -> Result<TrackedItem> {
        if item_id.trim().is_empty() {
            return Err(CoreError::invalid("itemId", "must not be empty"));
        }
        let kind = ItemKind::from_str(item_type)
            .map_err(|_| CoreError::invalid("itemType", "must be one of track, album, playlist"))?;

        Ok(self.scheduler.redownload_item(user_id, item_id, kind).await?)
    }

    /// Live feed of every audit event appended by the engine, for all users
    pub fn subscribe(&self) -> Receiver<UserEvent> {
        self.event_bus.subscribe()
    }

    /// Live feed restricted to one user
    pub fn subscribe_user(&self, user_id: UserId) -> EventStream {
        EventStream::new(self.event_bus.subscribe()).for_user(user_id)
    }

    /// Call after a user logs in; resumes their schedule if it was enabled
    pub async fn on_login(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.scheduler.initialize_for_user(user_id).await?)
    }

    /// Resume every previously enabled user that has a session. Returns how many resumed.
    pub async fn resume(&self) -> Result<usize> {
        Ok(self.scheduler.resume_all().await?)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

/// Open (or create) an SQLite-backed state store at `path`
#[cfg(feature = "sqlite")]
pub async fn open_sqlite_store(
    path: impl Into<std::path::PathBuf>,
) -> Result<Arc<dyn StateStore>> {
    let store = bridge_desktop::SqliteStateStore::new(path.into()).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::SqliteStateStore;
    use bridge_traits::{
        Bitrate, CatalogClient, CatalogSession, DownloadEngine, DownloadError, DownloadRequest,
        PageRequest, RawFavorite, SessionProvider, SubmitReceipt,
    };
    use core_runtime::events::SyncEventKind;
    use core_sync::{ItemStatus, RunStatus};
    use mockall::mock;

    mock! {
        Sessions {}

        #[async_trait]
        impl SessionProvider for Sessions {
            async fn session_for(&self, user_id: &UserId) -> Option<CatalogSession>;
        }
    }

    mock! {
        Catalog {}

        #[async_trait]
        impl CatalogClient for Catalog {
            async fn list_favorites(
                &self,
                session: &CatalogSession,
                kind: ItemKind,
                page: PageRequest,
            ) -> bridge_traits::error::Result<Vec<RawFavorite>>;
        }
    }

    mock! {
        Downloader {}

        #[async_trait]
        impl DownloadEngine for Downloader {
            async fn submit(
                &self,
                session: &CatalogSession,
                items: &[DownloadRequest],
                bitrate: Bitrate,
            ) -> std::result::Result<SubmitReceipt, DownloadError>;
        }
    }

    fn logged_in() -> MockSessions {
        let mut sessions = MockSessions::new();
        sessions
            .expect_session_for()
            .returning(|user| Some(CatalogSession::new("sid", user.clone())));
        sessions
    }

    fn two_tracks() -> MockCatalog {
        let mut catalog = MockCatalog::new();
        catalog.expect_list_favorites().returning(|_, kind, _| {
            if kind != ItemKind::Track {
                return Ok(Vec::new());
            }
            Ok(["1", "2"]
                .iter()
                .map(|id| RawFavorite {
                    id: Some(id.to_string()),
                    title: Some(format!("Song {}", id)),
                    artist: Some("Band".to_string()),
                })
                .collect())
        });
        catalog
    }

    fn accepting() -> MockDownloader {
        let mut downloader = MockDownloader::new();
        downloader
            .expect_submit()
            .returning(|_, _, _| Ok(SubmitReceipt::default()));
        downloader
    }

    async fn service_with(
        sessions: MockSessions,
        catalog: MockCatalog,
        downloader: MockDownloader,
    ) -> SyncService {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let config = EngineConfig::builder()
            .session_provider(Arc::new(sessions))
            .catalog_client(Arc::new(catalog))
            .download_engine(Arc::new(downloader))
            .state_store(Arc::new(store))
            .build()
            .unwrap();
        SyncService::bootstrap(config).unwrap()
    }

    async fn service() -> SyncService {
        service_with(logged_in(), two_tracks(), accepting()).await
    }

    fn user() -> UserId {
        UserId::new("42")
    }

    #[tokio::test]
    async fn test_status_of_unknown_user_is_default() {
        let service = service().await;
        let status = service.status(&user()).await.unwrap();

        assert!(!status.sync.enabled);
        assert!(!status.sync.running);
        assert_eq!(status.sync.status, RunStatus::Idle);
        assert_eq!(status.sync.settings.interval, 900_000);
        assert_eq!(status.tracked_items, TrackedSummary::default());
    }

    #[tokio::test]
    async fn test_status_counts_tracked_items() {
        let service = service().await;
        service.scheduler().run_cycle(&user()).await.unwrap();

        let status = service.status(&user()).await.unwrap();
        assert_eq!(status.tracked_items.downloading, 2);
        assert_eq!(status.sync.statistics.total_synced, 2);
    }

    #[tokio::test]
    async fn test_status_serializes_flat() {
        let service = service().await;
        let status = service.status(&user()).await.unwrap();
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["enabled"], false);
        assert_eq!(json["status"], "idle");
        assert_eq!(json["settings"]["batchSize"], 10);
        assert_eq!(json["trackedItems"]["failed"], 0);
    }

    #[tokio::test]
    async fn test_start_and_stop_return_status() {
        let service = service().await;

        let started = service.start(&user()).await.unwrap();
        assert!(started.sync.enabled);
        assert!(service.scheduler().is_scheduled(&user()).await);

        let stopped = service.stop(&user()).await.unwrap();
        assert!(!stopped.sync.enabled);
        assert!(!service.scheduler().is_scheduled(&user()).await);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_without_session_is_authentication_error() {
        let mut sessions = MockSessions::new();
        sessions.expect_session_for().returning(|_| None);
        let service = service_with(sessions, MockCatalog::new(), MockDownloader::new()).await;

        let err = service.start(&user()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_configure_validates_before_persisting() {
        let service = service().await;

        for patch in [
            SettingsPatch {
                interval: Some(60_000),
                ..SettingsPatch::default()
            },
            SettingsPatch {
                batch_size: Some(0),
                ..SettingsPatch::default()
            },
            SettingsPatch {
                batch_size: Some(101),
                ..SettingsPatch::default()
            },
        ] {
            let err = service.configure(&user(), patch).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        let status = service.status(&user()).await.unwrap();
        assert_eq!(status.sync.settings.interval, 900_000);
        assert_eq!(status.sync.settings.batch_size, 10);

        let updated = service
            .configure(
                &user(),
                SettingsPatch {
                    batch_size: Some(100),
                    ..SettingsPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.sync.settings.batch_size, 100);
    }

    #[tokio::test]
    async fn test_events_limit_bounds() {
        let service = service().await;

        for limit in [0, 1001] {
            let err = service.events(&user(), Some(limit)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(service.events(&user(), Some(1000)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_default_to_fifty_newest() {
        let service = service().await;
        for _ in 0..60 {
            service.scheduler().run_cycle(&user()).await.unwrap();
        }

        let events = service.events(&user(), None).await.unwrap();
        assert_eq!(events.len(), 50);
        assert!(events
            .windows(2)
            .all(|pair| pair[0].timestamp >= pair[1].timestamp));

        let one = service.events(&user(), Some(1)).await.unwrap();
        assert_eq!(one[0].kind, SyncEventKind::SyncCompleted);
    }

    #[tokio::test]
    async fn test_redownload_validates_input() {
        let service = service().await;

        let err = service.redownload(&user(), "", "track").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service.redownload(&user(), "1", "podcast").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("itemType"));

        let err = service.redownload(&user(), "1", "track").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_redownload_resets_tracked_item() {
        let service = service().await;
        service.scheduler().run_cycle(&user()).await.unwrap();

        let item = service.redownload(&user(), "2", "track").await.unwrap();
        assert_eq!(item.status, ItemStatus::New);

        let status = service.status(&user()).await.unwrap();
        assert_eq!(status.tracked_items.new, 1);
        assert_eq!(status.tracked_items.downloading, 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_appended_events() {
        let service = service().await;
        let mut all = service.subscribe();
        let mut mine = service.subscribe_user(user());

        service.redownload(&user(), "1", "album").await.unwrap_err();
        service.scheduler().run_cycle(&user()).await.unwrap();

        let event = all.recv().await.unwrap();
        assert_eq!(event.user_id, user());
        let event = mine.recv().await.unwrap();
        assert_eq!(event.event.kind, SyncEventKind::SyncCompleted);
    }

    #[tokio::test]
    async fn test_on_login_and_resume_only_restart_enabled_users() {
        let service = service().await;
        assert!(!service.on_login(&user()).await.unwrap());
        assert_eq!(service.resume().await.unwrap(), 0);

        service.start(&user()).await.unwrap();
        service.scheduler().shutdown().await;

        // Shutdown persisted the user as disabled
        assert_eq!(service.resume().await.unwrap(), 0);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_open_sqlite_store_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("sync.db");

        let store = open_sqlite_store(&path).await.unwrap();
        store.put("sync-state/1", "{}").await.unwrap();

        assert!(path.exists());
        assert_eq!(store.list_keys("sync-state/").await.unwrap(), vec!["sync-state/1"]);
    }
}
