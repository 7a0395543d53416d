//! NeonCut Common Utilities
//!
//! Shared infrastructure for all NeonCut crates:
//! - Error types and result aliases
//! - Playback clock and tick pacing
//! - Identity-keyed asset cache
//! - Tracing/logging initialization
//! - Configuration loading
//! - External media tool helpers

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;

pub use cache::*;
pub use clock::*;
pub use config::*;
pub use error::*;
