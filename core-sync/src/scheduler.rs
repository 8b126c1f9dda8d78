//! # Sync Scheduler
//!
//! Owns the per-user enable/disable state, the recurring timers and the
//! per-user execution locks, and sequences every cycle.
//!
//! ## Overview
//!
//! One cycle for one user runs strictly in order:
//!
//! ```text
//! persist running → poll favorites → diff against tracked → enqueue batch
//!                 → detect drift → record broken albums → persist idle/error
//! ```
//!
//! Each user has at most one timer task, which runs its cycles inline and
//! skips ticks missed while a cycle was in flight. A cycle that finds the
//! user's lock taken (a manual trigger, or the immediate cycle of a restart)
//! is dropped with a warning rather than queued. Stopping a user cancels the
//! timer but lets an in-flight cycle run to completion; shutdown waits for it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::SyncScheduler;
//!
//! let scheduler = SyncScheduler::from_config(&config, event_bus);
//! scheduler.resume_all().await?;
//! scheduler.start(&user_id).await?;
//! let status = scheduler.status(&user_id).await?;
//! ```

use crate::drift::DriftDetector;
use crate::models::{
    BrokenAlbum, EnqueueOutcome, FavoriteItem, RunStatus, SettingsPatch, SyncSettings,
    SyncStatusReport, TrackedItem, UserSyncState,
};
use crate::orchestrator::DownloadOrchestrator;
use crate::poller::FavoritesPoller;
use crate::repository::{KvSyncStateRepository, SyncStateRepository};
use crate::{Result, SyncError};
use bridge_traits::{Clock, ItemKind, SessionProvider, UserId};
use chrono::{DateTime, Utc};
use core_runtime::config::EngineConfig;
use core_runtime::events::{
    EventBus, EventDetails, EventSeverity, NewSyncEvent, SyncEvent, SyncEventKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What a call to [`SyncScheduler::run_cycle`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle held the user's lock
    Skipped,
    Completed {
        enqueue: EnqueueOutcome,
        /// Broken albums recorded for the first time
        new_broken_albums: usize,
    },
}

/// Recurring timer of one user
struct ScheduledTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTimer {
    /// Stop ticking. An in-flight cycle finishes first; await the handle to wait for it.
    fn cancel(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.handle
    }
}

type CycleLock = Arc<Mutex<()>>;

pub struct SyncScheduler {
    repository: Arc<dyn SyncStateRepository>,
    sessions: Arc<dyn SessionProvider>,
    poller: Arc<FavoritesPoller>,
    orchestrator: Arc<DownloadOrchestrator>,
    detector: Arc<DriftDetector>,
    clock: Arc<dyn Clock>,

    /// Armed timers by user
    timers: Arc<Mutex<HashMap<UserId, ScheduledTimer>>>,

    /// Cycle locks by user; held for the whole cycle
    locks: Arc<std::sync::Mutex<HashMap<UserId, CycleLock>>>,
}

impl SyncScheduler {
    pub fn new(
        repository: Arc<dyn SyncStateRepository>,
        sessions: Arc<dyn SessionProvider>,
        poller: FavoritesPoller,
        orchestrator: DownloadOrchestrator,
        detector: DriftDetector,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            sessions,
            poller: Arc::new(poller),
            orchestrator: Arc::new(orchestrator),
            detector: Arc::new(detector),
            clock,
            timers: Arc::new(Mutex::new(HashMap::new())),
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Wire every engine stage from the collaborators in `config`
    ///
    /// Every audit event is mirrored on `event_bus`.
    pub fn from_config(config: &EngineConfig, event_bus: EventBus) -> Self {
        let repository: Arc<dyn SyncStateRepository> = Arc::new(
            KvSyncStateRepository::new(
                Arc::clone(&config.state_store),
                Arc::clone(&config.clock),
                config.event_log_capacity,
            )
            .with_event_bus(event_bus),
        );

        let poller = FavoritesPoller::new(
            Arc::clone(&config.catalog_client),
            config.favorites_page_size,
        );
        let orchestrator = DownloadOrchestrator::new(
            Arc::clone(&config.download_engine),
            Arc::clone(&config.session_provider),
            Arc::clone(&repository),
            Arc::clone(&config.clock),
            config.download_bitrate,
            config.link_base.clone(),
        );
        let detector = DriftDetector::new(Arc::clone(&config.clock));

        Self::new(
            repository,
            Arc::clone(&config.session_provider),
            poller,
            orchestrator,
            detector,
            Arc::clone(&config.clock),
        )
    }

    pub fn repository(&self) -> &Arc<dyn SyncStateRepository> {
        &self.repository
    }

    /// Clone for background task (avoids Arc<Arc<...>>)
    fn clone_for_task(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            sessions: Arc::clone(&self.sessions),
            poller: Arc::clone(&self.poller),
            orchestrator: Arc::clone(&self.orchestrator),
            detector: Arc::clone(&self.detector),
            clock: Arc::clone(&self.clock),
            timers: Arc::clone(&self.timers),
            locks: Arc::clone(&self.locks),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Enable sync for `user_id`: run one cycle now, then every `interval`
    ///
    /// A timer armed by a previous `start` is cancelled first. Failures of the
    /// scheduled cycles are logged and never reach the caller.
    ///
    /// # Errors
    ///
    /// `Validation` if the stored settings are out of range and
    /// `NotAuthenticated` if the user has no logged-in session. Nothing is
    /// persisted in either case.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn start(&self, user_id: &UserId) -> Result<()> {
        let mut state = self.repository.load_user_state(user_id).await?;
        state.settings.validate()?;

        if self.sessions.authenticated_session(user_id).await.is_none() {
            return Err(SyncError::NotAuthenticated {
                user_id: user_id.clone(),
            });
        }

        state.enabled = true;
        self.repository.save_user_state(&state).await?;

        self.arm_timer(user_id, state.settings.interval).await;

        self.repository
            .append_event(user_id, NewSyncEvent::sync_started())
            .await?;

        info!(
            "Started sync for user {} every {} ms",
            user_id, state.settings.interval
        );
        Ok(())
    }

    /// Disable sync for `user_id`
    ///
    /// Returns once a cycle already running on the user's timer has finished.
    /// Stopping a stopped user only records the event again.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn stop(&self, user_id: &UserId) -> Result<()> {
        let timer = self.timers.lock().await.remove(user_id);
        if let Some(timer) = timer {
            if let Err(e) = timer.cancel().await {
                warn!("Timer task for user {} ended abnormally: {}", user_id, e);
            }
        }

        let mut state = self.repository.load_user_state(user_id).await?;
        state.enabled = false;
        state.status = RunStatus::Idle;
        self.repository.save_user_state(&state).await?;

        self.repository
            .append_event(user_id, NewSyncEvent::sync_stopped())
            .await?;

        info!("Stopped sync for user {}", user_id);
        Ok(())
    }

    /// Merge `patch` into the stored settings
    ///
    /// If the user is scheduled and still logged in, the timer is restarted
    /// against the new settings, which runs one immediate cycle.
    #[instrument(skip(self, patch), fields(user_id = %user_id))]
    pub async fn update_config(
        &self,
        user_id: &UserId,
        patch: &SettingsPatch,
    ) -> Result<SyncSettings> {
        let mut state = self.repository.load_user_state(user_id).await?;
        let merged = patch.apply_to(&state.settings);
        merged.validate()?;

        state.settings = merged;
        self.repository.save_user_state(&state).await?;

        if self.is_scheduled(user_id).await
            && self.sessions.authenticated_session(user_id).await.is_some()
        {
            debug!("Restarting schedule with new settings");
            self.stop(user_id).await?;
            self.start(user_id).await?;
        }

        Ok(merged)
    }

    /// Snapshot without side effects
    pub async fn status(&self, user_id: &UserId) -> Result<SyncStatusReport> {
        let state = self.repository.load_user_state(user_id).await?;
        Ok(SyncStatusReport::new(&state, self.is_running(user_id)))
    }

    /// Reset a tracked item so the next cycle downloads it again
    ///
    /// # Errors
    ///
    /// `ItemNotFound` if the item is not tracked under `kind`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn redownload_item(
        &self,
        user_id: &UserId,
        item_id: &str,
        kind: ItemKind,
    ) -> Result<TrackedItem> {
        let mut tracked = self.repository.load_tracked_items(user_id).await?;
        let item = tracked
            .get_mut(kind, item_id)
            .ok_or_else(|| SyncError::ItemNotFound {
                item_id: item_id.to_string(),
                kind,
            })?;

        item.reset_for_redownload();
        let item = item.clone();
        self.repository.save_tracked_items(user_id, &tracked).await?;

        self.repository
            .append_event(
                user_id,
                NewSyncEvent::new(
                    SyncEventKind::ItemDownloaded,
                    EventSeverity::Info,
                    format!("Item {} marked for redownload", item.title),
                )
                .with_details(EventDetails::item(item.id.clone(), kind.as_str())),
            )
            .await?;

        Ok(item)
    }

    /// Newest-first audit events
    pub async fn events(&self, user_id: &UserId, limit: usize) -> Result<Vec<SyncEvent>> {
        self.repository.get_events(user_id, Some(limit)).await
    }

    /// On login: resume the user's schedule if it was enabled
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn initialize_for_user(&self, user_id: &UserId) -> Result<bool> {
        let state = self.repository.load_user_state(user_id).await?;
        if !state.enabled {
            return Ok(false);
        }
        self.start(user_id).await?;
        Ok(true)
    }

    /// At process startup: resume every enabled user that has a session
    ///
    /// Returns the number of users resumed. A user that fails to resume is
    /// logged and skipped.
    #[instrument(skip(self))]
    pub async fn resume_all(&self) -> Result<usize> {
        let user_ids = self.repository.list_user_ids().await?;
        let mut resumed = 0;

        for user_id in user_ids {
            if self.sessions.authenticated_session(&user_id).await.is_none() {
                debug!("No session for user {}, not resuming", user_id);
                continue;
            }

            match self.initialize_for_user(&user_id).await {
                Ok(true) => resumed += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to resume sync for user {}: {}", user_id, e),
            }
        }

        info!("Resumed sync for {} users", resumed);
        Ok(resumed)
    }

    /// Cancel every timer and persist every scheduled user as disabled and idle
    ///
    /// In-flight timer cycles are awaited, never aborted. Cycle locks stay in
    /// place so a manual cycle still running keeps excluding later ones.
    /// Persistence failures are logged; shutdown always completes.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let timers: Vec<(UserId, ScheduledTimer)> =
            self.timers.lock().await.drain().collect();

        for (user_id, timer) in timers {
            if let Err(e) = timer.cancel().await {
                warn!("Timer task for user {} ended abnormally: {}", user_id, e);
            }

            if let Err(e) = self.persist_disabled(&user_id).await {
                error!("Failed to persist shutdown state for user {}: {}", user_id, e);
            }
        }

        info!("Sync scheduler shut down");
    }

    async fn persist_disabled(&self, user_id: &UserId) -> Result<()> {
        let mut state = self.repository.load_user_state(user_id).await?;
        state.disable();
        self.repository.save_user_state(&state).await
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Whether a timer is armed for `user_id`
    pub async fn is_scheduled(&self, user_id: &UserId) -> bool {
        self.timers.lock().await.contains_key(user_id)
    }

    /// Whether a cycle currently holds the user's lock
    pub fn is_running(&self, user_id: &UserId) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    pub async fn scheduled_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.timers.lock().await.keys().cloned().collect();
        users.sort();
        users
    }

    // ========================================================================
    // Timers
    // ========================================================================

    async fn arm_timer(&self, user_id: &UserId, interval_ms: u64) {
        let mut timers = self.timers.lock().await;

        if let Some(previous) = timers.remove(user_id) {
            debug!("Replacing existing timer for user {}", user_id);
            let _ = previous.cancel();
        }

        let cancel = CancellationToken::new();
        let scheduler = self.clone_for_task();
        let task_user = user_id.clone();
        let task_cancel = cancel.clone();
        let period = Duration::from_millis(interval_ms);

        let handle = tokio::spawn(async move {
            scheduler.run_recurring(task_user, period, task_cancel).await;
        });

        timers.insert(user_id.clone(), ScheduledTimer { cancel, handle });
    }

    /// The first tick completes immediately, giving the cycle run by `start`
    async fn run_recurring(self, user_id: UserId, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Timer cancelled for user {}", user_id);
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(&user_id).await {
                        error!("Sync cycle failed for user {}: {}", user_id, e);
                    }
                }
            }
        }
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    fn lock_for(&self, user_id: &UserId) -> CycleLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(user_id.clone()).or_default())
    }

    /// Run one cycle now unless one is already in flight for the user
    ///
    /// # Errors
    ///
    /// Any failure of the cycle, after it was recorded as `status=error` and a
    /// `sync_failed` event.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn run_cycle(&self, user_id: &UserId) -> Result<CycleOutcome> {
        let lock = self.lock_for(user_id);
        let Ok(_guard) = lock.try_lock_owned() else {
            warn!("Sync already running for user {}, skipping", user_id);
            return Ok(CycleOutcome::Skipped);
        };

        let started_at = self.clock.now();
        let mut state = self.repository.load_user_state(user_id).await?;
        state.begin_run(started_at);
        self.repository.save_user_state(&state).await?;

        let outcome = match self.execute_cycle(user_id, &state.settings).await {
            Ok((enqueue, new_broken_albums)) => {
                self.complete_cycle(user_id, &state, started_at, enqueue, new_broken_albums)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            self.record_failure(user_id, &state, started_at, e).await;
        }
        outcome
    }

    async fn complete_cycle(
        &self,
        user_id: &UserId,
        snapshot: &UserSyncState,
        started_at: DateTime<Utc>,
        enqueue: EnqueueOutcome,
        new_broken_albums: usize,
    ) -> Result<CycleOutcome> {
        let mut latest = self.latest_state(user_id, snapshot).await;
        latest.current_run_started_at = Some(started_at);
        latest.finish_run(&enqueue, self.clock.now());
        self.repository.save_user_state(&latest).await?;

        self.repository
            .append_event(user_id, NewSyncEvent::sync_completed())
            .await?;

        info!(
            "Sync cycle for user {} finished in {} ms",
            user_id, latest.statistics.last_run_duration
        );
        Ok(CycleOutcome::Completed {
            enqueue,
            new_broken_albums,
        })
    }

    /// Persist `status=error` and a `sync_failed` event; failures here are only logged
    async fn record_failure(
        &self,
        user_id: &UserId,
        snapshot: &UserSyncState,
        started_at: DateTime<Utc>,
        cause: &SyncError,
    ) {
        let mut latest = self.latest_state(user_id, snapshot).await;
        latest.current_run_started_at = Some(started_at);
        latest.fail_run(self.clock.now());

        if let Err(save_err) = self.repository.save_user_state(&latest).await {
            error!("Failed to persist failed cycle state: {}", save_err);
        }
        if let Err(event_err) = self
            .repository
            .append_event(user_id, NewSyncEvent::sync_failed(cause.to_string()))
            .await
        {
            error!("Failed to record sync failure: {}", event_err);
        }
    }

    /// Re-read state so that a concurrent stop or reconfigure is not overwritten
    async fn latest_state(&self, user_id: &UserId, fallback: &UserSyncState) -> UserSyncState {
        match self.repository.load_user_state(user_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not reload state, using cycle snapshot: {}", e);
                fallback.clone()
            }
        }
    }

    async fn execute_cycle(
        &self,
        user_id: &UserId,
        settings: &SyncSettings,
    ) -> Result<(EnqueueOutcome, usize)> {
        let session = self
            .sessions
            .authenticated_session(user_id)
            .await
            .ok_or_else(|| SyncError::NotAuthenticated {
                user_id: user_id.clone(),
            })?;

        let favorites = self.poller.poll(&session, &settings.scope).await?;
        let tracked = self.repository.load_tracked_items(user_id).await?;

        let mut candidates: Vec<FavoriteItem> = favorites
            .iter()
            .filter(|favorite| !tracked.contains(favorite.kind, &favorite.id))
            .cloned()
            .collect();
        let new_count = candidates.len();
        candidates.extend(
            tracked
                .iter()
                .filter(|item| item.awaits_download(settings.retry.max_attempts))
                .map(TrackedItem::to_favorite),
        );

        debug!(
            favorites = favorites.len(),
            new = new_count,
            retries = candidates.len() - new_count,
            "Computed download candidates"
        );

        let enqueue = if candidates.is_empty() {
            EnqueueOutcome::default()
        } else {
            self.orchestrator
                .enqueue_items(user_id, &candidates, settings.batch_size as usize)
                .await?
        };

        // Drift is judged against the collections as they were before this cycle's submissions
        let detected = self
            .detector
            .detect_changes(tracked.albums.values(), &favorites.albums);
        let new_broken_albums = self.record_broken_albums(user_id, detected).await?;

        Ok((enqueue, new_broken_albums))
    }

    /// Persist broken albums not recorded before; one event per new entry
    async fn record_broken_albums(
        &self,
        user_id: &UserId,
        detected: Vec<BrokenAlbum>,
    ) -> Result<usize> {
        if detected.is_empty() {
            return Ok(0);
        }

        let mut known = self.repository.load_broken_albums(user_id).await?;
        let mut added = 0;

        for broken in detected {
            if known.iter().any(|b| b.original_id == broken.original_id) {
                continue;
            }

            self.repository
                .append_event(
                    user_id,
                    NewSyncEvent::new(
                        SyncEventKind::BrokenAlbumDetected,
                        EventSeverity::Warning,
                        format!("Album \"{}\" ID changed", broken.title),
                    )
                    .with_details(EventDetails::item(
                        broken.original_id.clone(),
                        ItemKind::Album.as_str(),
                    )),
                )
                .await?;

            warn!(
                original_id = %broken.original_id,
                detected_id = ?broken.detected_id,
                "Album id changed upstream"
            );
            known.push(broken);
            added += 1;
        }

        self.repository.save_broken_albums(user_id, &known).await?;
        Ok(added)
    }
}
