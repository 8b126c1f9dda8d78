//! # Host Bridge Traits
//!
//! Collaborator contracts that the sync engine consumes but does not implement.
//!
//! ## Overview
//!
//! This crate defines the boundary between the synchronization engine and the
//! rest of the host application. Each trait represents a capability the engine
//! requires but whose implementation lives elsewhere (a storage backend, the
//! remote catalog client, the download pipeline, the login layer).
//!
//! ## Traits
//!
//! ### Storage
//! - [`StateStore`](storage::StateStore) - Durable key-value records, enumerable by prefix
//!
//! ### Remote catalog
//! - [`CatalogClient`](catalog::CatalogClient) - Paginated favorite listings with raw, nullable records
//! - [`SessionProvider`](session::SessionProvider) - Active catalog session lookup by user id
//!
//! ### Download pipeline
//! - [`DownloadEngine`](download::DownloadEngine) - Queue submission with typed failures
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Storage and catalog traits use [`BridgeError`](error::BridgeError). The
//! download engine reports [`DownloadError`](download::DownloadError) so that
//! callers can tell "not authenticated" and "unsupported bitrate" apart from
//! other rejections.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks. Implementations must ensure thread safety.

pub mod catalog;
pub mod download;
pub mod error;
pub mod session;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use catalog::{CatalogClient, ItemKind, PageRequest, RawFavorite};
pub use download::{Bitrate, DownloadEngine, DownloadError, DownloadRequest, SubmitReceipt};
pub use session::{CatalogSession, SessionProvider, UserId};
pub use storage::StateStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
