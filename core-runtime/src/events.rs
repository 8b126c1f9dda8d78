//! # Event Bus System
//!
//! Audit event types for the sync engine and a live broadcast bus built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Every noteworthy thing the engine does is recorded as a [`SyncEvent`] in the
//! user's durable, bounded event log. The same event is then published on the
//! [`EventBus`] wrapped in a [`UserEvent`], so that a transport layer (e.g. a
//! websocket) can push it to connected clients without polling the log.
//!
//! ```text
//! ┌──────────────┐  append   ┌───────────────┐
//! │ SyncScheduler├──────────>│ event log     │ (durable, newest first, bounded)
//! │ Orchestrator │           └───────────────┘
//! │              │  emit     ┌───────────────┐  subscribe  ┌────────────┐
//! │              ├──────────>│   EventBus    ├────────────>│ Subscriber │
//! └──────────────┘           └───────────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::UserId;
//! use core_runtime::events::{EventBus, NewSyncEvent, UserEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! let event = NewSyncEvent::sync_started().stamp(chrono::Utc::now());
//! bus.emit(UserEvent::new(UserId::new("42"), event)).ok();
//!
//! let received = subscriber.recv().await.unwrap();
//! assert_eq!(received.user_id.as_str(), "42");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! The durable log is the source of truth; a lagging subscriber can always
//! re-read it.

use bridge_traits::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Audit Event Types
// ============================================================================

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    SyncStarted,
    SyncCompleted,
    SyncFailed,
    ItemDownloaded,
    ItemFailed,
    BrokenAlbumDetected,
}

impl SyncEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventKind::SyncStarted => "sync_started",
            SyncEventKind::SyncCompleted => "sync_completed",
            SyncEventKind::SyncFailed => "sync_failed",
            SyncEventKind::ItemDownloaded => "item_downloaded",
            SyncEventKind::ItemFailed => "item_failed",
            SyncEventKind::BrokenAlbumDetected => "broken_album_detected",
        }
    }
}

impl fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity levels for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Optional structured context attached to an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventDetails {
    pub fn item(item_id: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            item_type: Some(item_type.into()),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// An event that has not been recorded yet (no id or timestamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncEvent {
    pub kind: SyncEventKind,
    pub severity: EventSeverity,
    pub message: String,
    pub details: Option<EventDetails>,
}

impl NewSyncEvent {
    pub fn new(kind: SyncEventKind, severity: EventSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: EventDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn sync_started() -> Self {
        Self::new(SyncEventKind::SyncStarted, EventSeverity::Info, "Sync started")
    }

    pub fn sync_stopped() -> Self {
        Self::new(
            SyncEventKind::SyncCompleted,
            EventSeverity::Info,
            "Sync stopped by user",
        )
    }

    pub fn sync_completed() -> Self {
        Self::new(
            SyncEventKind::SyncCompleted,
            EventSeverity::Info,
            "Sync completed successfully",
        )
    }

    pub fn sync_failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            SyncEventKind::SyncFailed,
            EventSeverity::Error,
            format!("Sync failed: {}", error),
        )
        .with_details(EventDetails {
            error: Some(error),
            ..EventDetails::default()
        })
    }

    /// Assign an id and timestamp, producing the durable record
    pub fn stamp(self, timestamp: DateTime<Utc>) -> SyncEvent {
        SyncEvent {
            id: Uuid::new_v4().to_string(),
            timestamp,
            kind: self.kind,
            severity: self.severity,
            message: self.message,
            details: self.details,
        }
    }
}

/// Immutable audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: SyncEventKind,
    pub severity: EventSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<EventDetails>,
}

/// A recorded event together with the user whose log it was appended to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub user_id: UserId,
    pub event: SyncEvent,
}

impl UserEvent {
    pub fn new(user_id: UserId, event: SyncEvent) -> Self {
        Self { user_id, event }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting recorded events.
///
/// Cloning the bus is cheap; all clones publish to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UserEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// When a subscriber falls behind by more than `capacity` events it
    /// receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: UserEvent) -> Result<usize, SendError<UserEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<UserEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&UserEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use bridge_traits::UserId;
/// use core_runtime::events::{EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let alice = UserId::new("alice");
/// let stream = EventStream::new(bus.subscribe()).for_user(alice);
/// ```
pub struct EventStream {
    receiver: Receiver<UserEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<UserEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&UserEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only events recorded for `user_id`.
    pub fn for_user(self, user_id: UserId) -> Self {
        self.filter(move |event| event.user_id == user_id)
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<UserEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<UserEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user_event(user: &str, event: NewSyncEvent) -> UserEvent {
        UserEvent::new(UserId::new(user), event.stamp(Utc::now()))
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        // Should error when no subscribers
        assert!(bus
            .emit(user_event("1", NewSyncEvent::sync_started()))
            .is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = user_event("1", NewSyncEvent::sync_completed());
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_for_user() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_user(UserId::new("alice"));

        bus.emit(user_event("bob", NewSyncEvent::sync_started())).ok();
        let wanted = user_event("alice", NewSyncEvent::sync_failed("boom"));
        bus.emit(wanted.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), wanted);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for _ in 0..5 {
            bus.emit(user_event("1", NewSyncEvent::sync_started())).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_sync_failed_carries_error_details() {
        let event = NewSyncEvent::sync_failed("Not logged in");
        assert_eq!(event.kind, SyncEventKind::SyncFailed);
        assert_eq!(event.severity, EventSeverity::Error);
        assert_eq!(event.message, "Sync failed: Not logged in");
        assert_eq!(
            event.details.and_then(|d| d.error),
            Some("Not logged in".to_string())
        );
    }

    #[test]
    fn test_stamped_events_get_unique_ids() {
        let now = Utc::now();
        let a = NewSyncEvent::sync_started().stamp(now);
        let b = NewSyncEvent::sync_started().stamp(now);
        assert_ne!(a.id, b.id);
        assert_eq!(a.timestamp, now);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = NewSyncEvent::new(
            SyncEventKind::BrokenAlbumDetected,
            EventSeverity::Warning,
            "Album \"A\" ID changed",
        )
        .with_details(EventDetails::item("100", "album"))
        .stamp(Utc::now());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "broken_album_detected");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["details"]["itemId"], "100");
        assert_eq!(json["details"]["itemType"], "album");
        assert!(json["details"].get("error").is_none());

        let back: SyncEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
