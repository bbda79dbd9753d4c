//! Stream verification
//!
//! - Probe: download sampling with an ffmpeg fallback

pub mod probe;

pub use probe::{HttpProbe, StreamProber};
