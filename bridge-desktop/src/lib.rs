//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready [`StateStore`](bridge_traits::StateStore)
//! backends:
//! - `JsonFileStateStore` writing one JSON document per record with `tokio::fs`
//! - `SqliteStateStore` keeping every record in an embedded SQLite table
//!
//! ## Feature Flags
//!
//! - `sqlite`: Enable the SQLite-backed store (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::JsonFileStateStore;
//! use bridge_traits::StateStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = JsonFileStateStore::new("/var/lib/favsync");
//!     store.put("sync-state/42", "{}").await.unwrap();
//! }
//! ```

mod file_store;

#[cfg(feature = "sqlite")]
mod sqlite_store;

pub use file_store::JsonFileStateStore;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStateStore;
