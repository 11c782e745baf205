//! # Audio Handling
//!
//! The two pure pieces of the relay pipeline:
//!
//! - **buffer**: slices upstream byte chunks into fixed-size PCM frames
//! - **affect**: turns ranked emotion scores into valence and arousal
//!
//! ## Audio Format:
//! - **Sample Rate**: 16 kHz by default (configurable)
//! - **Bit Depth**: 16-bit linear PCM, little-endian
//! - **Channels**: Mono
//! - **Frame**: 40 ms, 1280 bytes at the defaults

pub mod affect;
pub mod buffer;

pub use affect::Affect;
pub use buffer::FrameBuffer;
