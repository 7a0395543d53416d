//! NeonCut Audio Mixing
//!
//! Resolves which narration and music buffers sound at a clock position
//! and renders them into fixed windows of interleaved output:
//! - **Buffers:** Decoded sample data and mixed output chunks
//! - **Decoding:** ffmpeg-backed and in-memory decoders, WAV in-process
//! - **Mixer:** Edge-triggered scheduling plus per-tick window mixing

pub mod buffer;
pub mod decode;
pub mod mixer;

pub use buffer::*;
pub use decode::*;
pub use mixer::*;
