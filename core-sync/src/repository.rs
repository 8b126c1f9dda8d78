//! # Sync State Repository
//!
//! Typed persistence for the engine's per-user records on top of a
//! key-value [`StateStore`].
//!
//! ## Overview
//!
//! Each user owns four documents:
//!
//! | Key                         | Document                            |
//! |-----------------------------|-------------------------------------|
//! | `sync-state/{user}`         | [`UserSyncState`]                   |
//! | `sync-tracked/{user}`       | [`TrackedItems`]                    |
//! | `sync-events/{user}`        | `{ "events": [SyncEvent, ...] }`    |
//! | `sync-broken-albums/{user}` | `{ "brokenAlbums": [BrokenAlbum] }` |
//!
//! Missing documents read as their empty/default value. The event log is a
//! bounded ring, newest first.

use crate::models::{BrokenAlbum, TrackedItems, UserSyncState};
use crate::Result;
use async_trait::async_trait;
use bridge_traits::{Clock, StateStore, UserId};
use core_runtime::events::{EventBus, NewSyncEvent, SyncEvent, UserEvent};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const STATE_PREFIX: &str = "sync-state/";
const TRACKED_PREFIX: &str = "sync-tracked/";
const EVENTS_PREFIX: &str = "sync-events/";
const BROKEN_ALBUMS_PREFIX: &str = "sync-broken-albums/";

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for per-user sync records
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Load the user's state, or the default state if none was saved
    async fn load_user_state(&self, user_id: &UserId) -> Result<UserSyncState>;

    async fn save_user_state(&self, state: &UserSyncState) -> Result<()>;

    /// Load the user's tracked items, or empty collections if none were saved
    async fn load_tracked_items(&self, user_id: &UserId) -> Result<TrackedItems>;

    async fn save_tracked_items(&self, user_id: &UserId, items: &TrackedItems) -> Result<()>;

    /// Stamp `event` with an id and timestamp and prepend it to the user's log
    ///
    /// The log is truncated to the configured capacity, dropping the oldest
    /// entries.
    async fn append_event(&self, user_id: &UserId, event: NewSyncEvent) -> Result<SyncEvent>;

    /// Newest-first events, at most `limit` of them when given
    async fn get_events(&self, user_id: &UserId, limit: Option<usize>) -> Result<Vec<SyncEvent>>;

    async fn load_broken_albums(&self, user_id: &UserId) -> Result<Vec<BrokenAlbum>>;

    async fn save_broken_albums(&self, user_id: &UserId, albums: &[BrokenAlbum]) -> Result<()>;

    /// Every user with a persisted state record
    async fn list_user_ids(&self) -> Result<Vec<UserId>>;
}

// ============================================================================
// Key-Value Implementation
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct EventLog {
    #[serde(default)]
    events: Vec<SyncEvent>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokenAlbumList {
    #[serde(default)]
    broken_albums: Vec<BrokenAlbum>,
}

/// [`SyncStateRepository`] over any [`StateStore`]
///
/// When an [`EventBus`] is attached, every appended event is also broadcast
/// as a [`UserEvent`].
pub struct KvSyncStateRepository {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    event_capacity: usize,
    event_bus: Option<EventBus>,
    /// Serializes read-modify-write of event logs
    append_lock: Mutex<()>,
}

impl KvSyncStateRepository {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, event_capacity: usize) -> Self {
        Self {
            store,
            clock,
            event_capacity,
            event_bus: None,
            append_lock: Mutex::new(()),
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn key(prefix: &str, user_id: &UserId) -> String {
        format!("{}{}", prefix, user_id)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string_pretty(value)?;
        self.store.put(key, &raw).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStateRepository for KvSyncStateRepository {
    async fn load_user_state(&self, user_id: &UserId) -> Result<UserSyncState> {
        let state = self
            .read::<UserSyncState>(&Self::key(STATE_PREFIX, user_id))
            .await?;
        Ok(state.unwrap_or_else(|| UserSyncState::new(user_id.clone())))
    }

    async fn save_user_state(&self, state: &UserSyncState) -> Result<()> {
        self.write(&Self::key(STATE_PREFIX, &state.user_id), state)
            .await
    }

    async fn load_tracked_items(&self, user_id: &UserId) -> Result<TrackedItems> {
        let items = self
            .read::<TrackedItems>(&Self::key(TRACKED_PREFIX, user_id))
            .await?;
        Ok(items.unwrap_or_default())
    }

    async fn save_tracked_items(&self, user_id: &UserId, items: &TrackedItems) -> Result<()> {
        self.write(&Self::key(TRACKED_PREFIX, user_id), items).await
    }

    async fn append_event(&self, user_id: &UserId, event: NewSyncEvent) -> Result<SyncEvent> {
        let event = event.stamp(self.clock.now());
        let key = Self::key(EVENTS_PREFIX, user_id);

        {
            let _guard = self.append_lock.lock().await;
            let mut log = self.read::<EventLog>(&key).await?.unwrap_or_default();
            log.events.insert(0, event.clone());
            log.events.truncate(self.event_capacity);
            self.write(&key, &log).await?;
        }

        debug!(user_id = %user_id, kind = %event.kind, "Appended sync event");

        if let Some(bus) = &self.event_bus {
            // No subscribers is fine
            bus.emit(UserEvent::new(user_id.clone(), event.clone())).ok();
        }

        Ok(event)
    }

    async fn get_events(&self, user_id: &UserId, limit: Option<usize>) -> Result<Vec<SyncEvent>> {
        let mut events = self
            .read::<EventLog>(&Self::key(EVENTS_PREFIX, user_id))
            .await?
            .unwrap_or_default()
            .events;
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn load_broken_albums(&self, user_id: &UserId) -> Result<Vec<BrokenAlbum>> {
        let list = self
            .read::<BrokenAlbumList>(&Self::key(BROKEN_ALBUMS_PREFIX, user_id))
            .await?;
        Ok(list.unwrap_or_default().broken_albums)
    }

    async fn save_broken_albums(&self, user_id: &UserId, albums: &[BrokenAlbum]) -> Result<()> {
        let list = BrokenAlbumList {
            broken_albums: albums.to_vec(),
        };
        self.write(&Self::key(BROKEN_ALBUMS_PREFIX, user_id), &list)
            .await
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>> {
        let keys = self.store.list_keys(STATE_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(STATE_PREFIX))
            .filter(|id| !id.is_empty())
            .map(UserId::from)
            .collect())
    }
}
