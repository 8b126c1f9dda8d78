//! # Download Orchestrator
//!
//! Decides which favorites are handed to the download engine and keeps the
//! tracked-item bookkeeping in step with the submissions.
//!
//! ## Overview
//!
//! For one call:
//! 1. Require an authenticated session (nothing is touched otherwise)
//! 2. Drop candidates already tracked as `success`, counting them as skipped
//! 3. Keep at most `batch_size` of the rest; the remainder waits for the next cycle
//! 4. Submit each item on its own so one rejection does not stop the batch
//! 5. Persist the tracked items once, then record an `item_failed` event per failure

use crate::models::{EnqueueOutcome, FavoriteItem, ItemStatus, TrackedItem};
use crate::repository::SyncStateRepository;
use crate::{Result, SyncError};
use bridge_traits::{Bitrate, Clock, DownloadEngine, DownloadRequest, SessionProvider, UserId};
use core_runtime::events::{EventDetails, EventSeverity, NewSyncEvent, SyncEventKind};
use core_runtime::logging::redact_if_sensitive;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct DownloadOrchestrator {
    download_engine: Arc<dyn DownloadEngine>,
    sessions: Arc<dyn SessionProvider>,
    repository: Arc<dyn SyncStateRepository>,
    clock: Arc<dyn Clock>,
    bitrate: Bitrate,
    link_base: String,
}

impl DownloadOrchestrator {
    pub fn new(
        download_engine: Arc<dyn DownloadEngine>,
        sessions: Arc<dyn SessionProvider>,
        repository: Arc<dyn SyncStateRepository>,
        clock: Arc<dyn Clock>,
        bitrate: Bitrate,
        link_base: impl Into<String>,
    ) -> Self {
        Self {
            download_engine,
            sessions,
            repository,
            clock,
            bitrate,
            link_base: link_base.into(),
        }
    }

    /// Submit up to `batch_size` of `items` that are not already downloaded
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when the user has no logged-in session; storage
    /// errors from loading or saving tracked items. Submission failures are
    /// recorded per item and counted in `failed`, never returned.
    #[instrument(skip(self, items), fields(user_id = %user_id, candidates = items.len()))]
    pub async fn enqueue_items(
        &self,
        user_id: &UserId,
        items: &[FavoriteItem],
        batch_size: usize,
    ) -> Result<EnqueueOutcome> {
        let session = self
            .sessions
            .authenticated_session(user_id)
            .await
            .ok_or_else(|| SyncError::NotAuthenticated {
                user_id: user_id.clone(),
            })?;

        let mut tracked = self.repository.load_tracked_items(user_id).await?;
        let mut outcome = EnqueueOutcome::default();

        let mut pending: Vec<&FavoriteItem> = items
            .iter()
            .filter(|item| {
                let done = tracked
                    .get(item.kind, &item.id)
                    .is_some_and(|t| t.status == ItemStatus::Success);
                if done {
                    outcome.skipped += 1;
                }
                !done
            })
            .collect();
        pending.truncate(batch_size);

        debug!(
            session = %redact_if_sensitive("session_id", &session.session_id),
            batch = pending.len(),
            skipped = outcome.skipped,
            "Submitting batch"
        );

        let mut failures = Vec::new();

        for item in pending {
            let request = DownloadRequest::new(item.kind, item.id.clone(), &self.link_base);
            let result = self
                .download_engine
                .submit(&session, std::slice::from_ref(&request), self.bitrate)
                .await;
            let now = self.clock.now();

            match result {
                Ok(_) => {
                    match tracked.get_mut(item.kind, &item.id) {
                        Some(existing) => existing.mark_downloading(now),
                        None => tracked.insert(TrackedItem::downloading(item, now)),
                    }
                    outcome.enqueued += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(item_id = %item.id, kind = %item.kind, error = %message, "Submission failed");
                    match tracked.get_mut(item.kind, &item.id) {
                        Some(existing) => existing.mark_failed(message.clone(), now),
                        None => tracked.insert(TrackedItem::failed(item, message.clone(), now)),
                    }
                    failures.push((item, message));
                    outcome.failed += 1;
                }
            }
        }

        self.repository.save_tracked_items(user_id, &tracked).await?;

        for (item, message) in failures {
            let event = NewSyncEvent::new(
                SyncEventKind::ItemFailed,
                EventSeverity::Warning,
                format!("Failed to enqueue {} \"{}\"", item.kind, item.title),
            )
            .with_details(EventDetails::item(item.id.clone(), item.kind.as_str()).with_error(message));

            if let Err(e) = self.repository.append_event(user_id, event).await {
                warn!(item_id = %item.id, "Failed to record item failure: {}", e);
            }
        }

        info!(
            enqueued = outcome.enqueued,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Enqueue finished"
        );

        Ok(outcome)
    }
}
