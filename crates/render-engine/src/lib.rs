//! NeonCut Render Engine
//!
//! Composites timeline snapshots into frames, mixes their audio, and drives
//! both into either a live preview or an encoder.
//!
//! # Pipeline Architecture
//!
//! ```text
//!                    ┌── FrameRenderer (compose → rasterize) ──┐
//! PlaybackClock ─────┤                                         ├── SessionOutput
//!   (30 Hz tick)     └── AudioMixer (schedule → mix window) ───┘      │
//!                                                          ┌──────────┴──────────┐
//!                                                    Preview                  Capture
//!                                              (watch + mpsc)          (ffmpeg / memory)
//!                                                                              │
//!                                                                              ▼
//!                                                                        ExportArtifact
//! ```

pub mod compositor;
pub mod encoder;
pub mod export;
pub mod filter;
pub mod media;
pub mod preview;
pub mod raster;
pub mod session;
pub mod sink;

pub use compositor::*;
pub use encoder::FfmpegCaptureSink;
pub use export::*;
pub use media::*;
pub use preview::*;
pub use session::*;
pub use sink::*;
