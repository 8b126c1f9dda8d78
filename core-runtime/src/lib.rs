//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the favorites sync engine:
//! - Logging and tracing infrastructure
//! - Engine configuration and capability injection
//! - Audit event types and the live event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the engine crates depend on.
//! It establishes the logging conventions, the fail-fast configuration builder
//! and the event broadcasting mechanism used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
