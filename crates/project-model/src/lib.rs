//! NeonCut Project Model
//!
//! Defines the data the engine renders from:
//! - **Media:** Visual items (images, video clips) with zoom, filter, and fade settings
//! - **Audio:** Narration and music tracks
//! - **Timeline:** The ordered visual sequence on a shared time axis plus both audio lists
//! - **Watermark:** Logo overlay settings, sized in percentages of the output frame
//! - **Project:** The full snapshot, boundary validation, and narration auto-sync
//!
//! The engine only ever reads a snapshot; edits replace whole fields.

pub mod audio;
pub mod media;
pub mod project;
pub mod timeline;
pub mod watermark;

pub use audio::*;
pub use media::*;
pub use project::*;
pub use timeline::*;
pub use watermark::*;
