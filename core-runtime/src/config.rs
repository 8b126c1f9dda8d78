//! # Engine Configuration Module
//!
//! Provides configuration management for the favorites sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `EngineConfig` instance that holds every collaborator the engine consumes
//! plus the process-wide tunables. It enforces fail-fast validation so a
//! missing capability is reported at startup rather than on the first cycle.
//!
//! ## Required Dependencies
//!
//! - `SessionProvider` - Active catalog session lookup
//! - `CatalogClient` - Paginated favorite listings
//! - `DownloadEngine` - Download queue submission
//! - `StateStore` - Durable per-user records
//!
//! When the `desktop-shims` feature is enabled, a file-backed `StateStore`
//! rooted at `state_dir` is injected automatically if none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::builder()
//!     .session_provider(Arc::new(MySessions))
//!     .catalog_client(Arc::new(MyCatalog))
//!     .download_engine(Arc::new(MyDownloader))
//!     .state_dir("/var/lib/favsync")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    Bitrate, CatalogClient, Clock, DownloadEngine, SessionProvider, StateStore, SystemClock,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Page size used when listing favorites
pub const DEFAULT_FAVORITES_PAGE_SIZE: usize = 1000;

/// Maximum number of audit events retained per user
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// Upper bound for [`EngineConfig::event_log_capacity`]
pub const MAX_EVENT_LOG_CAPACITY: usize = 1000;

/// Base URL for public catalog links handed to the download engine
pub const DEFAULT_LINK_BASE: &str = "https://www.deezer.com";

/// Buffer size of the live event bus
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 100;

/// Engine configuration.
///
/// Use [`EngineConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct EngineConfig {
    /// Active session lookup (required)
    pub session_provider: Arc<dyn SessionProvider>,

    /// Remote catalog client (required)
    pub catalog_client: Arc<dyn CatalogClient>,

    /// Download queue (required)
    pub download_engine: Arc<dyn DownloadEngine>,

    /// Durable record storage (required, desktop default: JSON files)
    pub state_store: Arc<dyn StateStore>,

    /// Time source for persisted timestamps
    pub clock: Arc<dyn Clock>,

    /// Directory backing the default state store, if one was configured
    pub state_dir: Option<PathBuf>,

    /// Records requested per favorites page
    pub favorites_page_size: usize,

    /// Audit events kept per user (newest first)
    pub event_log_capacity: usize,

    /// Bitrate requested for every submission
    pub download_bitrate: Bitrate,

    /// Base of the catalog links submitted for download
    pub link_base: String,

    /// Live event bus buffer size
    pub event_bus_capacity: usize,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("session_provider", &"SessionProvider { ... }")
            .field("catalog_client", &"CatalogClient { ... }")
            .field("download_engine", &"DownloadEngine { ... }")
            .field("state_store", &"StateStore { ... }")
            .field("state_dir", &self.state_dir)
            .field("favorites_page_size", &self.favorites_page_size)
            .field("event_log_capacity", &self.event_log_capacity)
            .field("download_bitrate", &self.download_bitrate)
            .field("link_base", &self.link_base)
            .field("event_bus_capacity", &self.event_bus_capacity)
            .finish()
    }
}

impl EngineConfig {
    /// Creates a new builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the tunables and returns an error if any is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.favorites_page_size == 0 {
            return Err(Error::Config(
                "Favorites page size must be greater than 0".to_string(),
            ));
        }

        if self.event_log_capacity == 0 || self.event_log_capacity > MAX_EVENT_LOG_CAPACITY {
            return Err(Error::Config(format!(
                "Event log capacity must be between 1 and {}",
                MAX_EVENT_LOG_CAPACITY
            )));
        }

        if self.link_base.trim().is_empty() {
            return Err(Error::Config("Link base cannot be empty".to_string()));
        }

        if self.event_bus_capacity == 0 {
            return Err(Error::Config(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn session_provider_missing_error() -> Error {
    Error::capability_missing(
        "SessionProvider",
        "SessionProvider implementation is required to look up catalog sessions. \
         Inject the host's login layer with .session_provider().",
    )
}

fn catalog_client_missing_error() -> Error {
    Error::capability_missing(
        "CatalogClient",
        "CatalogClient implementation is required to list favorites. \
         Inject the remote catalog client with .catalog_client().",
    )
}

fn download_engine_missing_error() -> Error {
    Error::capability_missing(
        "DownloadEngine",
        "DownloadEngine implementation is required to queue downloads. \
         Inject the host's download queue with .download_engine().",
    )
}

#[cfg(feature = "desktop-shims")]
fn provide_default_state_store(state_dir: Option<&PathBuf>) -> Result<Arc<dyn StateStore>> {
    use bridge_desktop::JsonFileStateStore;

    let state_dir = state_dir.ok_or_else(|| {
        Error::Config(
            "State directory is required for the default StateStore. \
             Use .state_dir() or inject a StateStore with .state_store()."
                .to_string(),
        )
    })?;

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStateStore::new(state_dir.clone()));
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_state_store(_state_dir: Option<&PathBuf>) -> Result<Arc<dyn StateStore>> {
    Err(Error::capability_missing(
        "StateStore",
        "StateStore implementation is required for durable sync records. \
         Desktop: enable the 'desktop-shims' feature to use the default JsonFileStateStore. \
         Otherwise inject a StateStore with .state_store().",
    ))
}

/// Builder for constructing [`EngineConfig`] instances.
#[derive(Default)]
pub struct EngineConfigBuilder {
    session_provider: Option<Arc<dyn SessionProvider>>,
    catalog_client: Option<Arc<dyn CatalogClient>>,
    download_engine: Option<Arc<dyn DownloadEngine>>,
    state_store: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    state_dir: Option<PathBuf>,
    favorites_page_size: Option<usize>,
    event_log_capacity: Option<usize>,
    download_bitrate: Option<Bitrate>,
    link_base: Option<String>,
    event_bus_capacity: Option<usize>,
}

impl EngineConfigBuilder {
    /// Sets the session provider (required).
    pub fn session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.session_provider = Some(provider);
        self
    }

    /// Sets the catalog client (required).
    pub fn catalog_client(mut self, client: Arc<dyn CatalogClient>) -> Self {
        self.catalog_client = Some(client);
        self
    }

    /// Sets the download engine (required).
    pub fn download_engine(mut self, engine: Arc<dyn DownloadEngine>) -> Self {
        self.download_engine = Some(engine);
        self
    }

    /// Sets the state store.
    ///
    /// If not provided, the desktop default (one JSON file per record under
    /// [`state_dir`](Self::state_dir)) is used when the `desktop-shims`
    /// feature is enabled.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Sets the time source. Default: [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the directory backing the default state store.
    pub fn state_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.state_dir = Some(path.into());
        self
    }

    /// Default: 1000
    pub fn favorites_page_size(mut self, size: usize) -> Self {
        self.favorites_page_size = Some(size);
        self
    }

    /// Default: 1000, maximum 1000
    pub fn event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = Some(capacity);
        self
    }

    /// Default: MP3 320
    pub fn download_bitrate(mut self, bitrate: Bitrate) -> Self {
        self.download_bitrate = Some(bitrate);
        self
    }

    /// Default: `https://www.deezer.com`
    pub fn link_base(mut self, base: impl Into<String>) -> Self {
        self.link_base = Some(base.into());
        self
    }

    /// Default: 100
    pub fn event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = Some(capacity);
        self
    }

    /// Builds the final `EngineConfig`.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityMissing` for a missing required collaborator and
    /// `Config` when a tunable is out of range.
    pub fn build(self) -> Result<EngineConfig> {
        let session_provider = self
            .session_provider
            .ok_or_else(session_provider_missing_error)?;
        let catalog_client = self
            .catalog_client
            .ok_or_else(catalog_client_missing_error)?;
        let download_engine = self
            .download_engine
            .ok_or_else(download_engine_missing_error)?;

        let state_store = match self.state_store {
            Some(store) => store,
            None => provide_default_state_store(self.state_dir.as_ref())?,
        };

        let config = EngineConfig {
            session_provider,
            catalog_client,
            download_engine,
            state_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            state_dir: self.state_dir,
            favorites_page_size: self
                .favorites_page_size
                .unwrap_or(DEFAULT_FAVORITES_PAGE_SIZE),
            event_log_capacity: self
                .event_log_capacity
                .unwrap_or(DEFAULT_EVENT_LOG_CAPACITY),
            download_bitrate: self.download_bitrate.unwrap_or_default(),
            link_base: self
                .link_base
                .unwrap_or_else(|| DEFAULT_LINK_BASE.to_string()),
            event_bus_capacity: self
                .event_bus_capacity
                .unwrap_or(DEFAULT_EVENT_BUS_CAPACITY),
        };

        config.validate()?;

        Ok(config)
    }
}
