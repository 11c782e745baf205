//! # Frame Buffer
//!
//! Upstream clients send PCM in whatever chunk sizes their transport produces.
//! The prosody stream wants fixed-size frames, so each session keeps a
//! `FrameBuffer` that accumulates bytes and slices exact frames off the front.
//!
//! ## Guarantees:
//! - Frames are always exactly `frame_size` bytes; a short tail stays buffered
//! - Bytes come out in the order they went in, none dropped or duplicated
//! - After `drain_frames` fewer than `frame_size` bytes remain
//!
//! The buffer is owned by a single session's outbound task, so it needs no
//! locking and does no I/O.

#[derive(Debug)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    frame_size: usize,
}

impl FrameBuffer {
    /// Create a buffer that slices `frame_size`-byte frames.
    ///
    /// A zero frame size is clamped to one byte so draining always terminates;
    /// configuration validation rejects it long before it gets here.
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            pending: Vec::with_capacity(frame_size * 2),
            frame_size,
        }
    }

    /// Append a raw chunk to the tail of the buffer.
    pub fn append(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Remove every complete frame from the front of the buffer.
    ///
    /// ## Example:
    /// With 1280-byte frames, 3200 buffered bytes yield two frames and leave
    /// 640 bytes waiting for the next `append`.
    pub fn drain_frames(&mut self) -> Vec<Vec<u8>> {
        let whole = self.pending.len() / self.frame_size * self.frame_size;
        if whole == 0 {
            return Vec::new();
        }

        let remainder = self.pending.split_off(whole);
        let ready = std::mem::replace(&mut self.pending, remainder);

        ready
            .chunks_exact(self.frame_size)
            .map(<[u8]>::to_vec)
            .collect()
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_append_drains_whole_frames() {
        let mut buffer = FrameBuffer::new(1280);
        buffer.append(&vec![7u8; 3200]);

        let frames = buffer.drain_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 1280));
        assert_eq!(buffer.buffered(), 640);
    }

    #[test]
    fn test_short_input_is_held_back() {
        let mut buffer = FrameBuffer::new(1280);
        buffer.append(&[1u8; 1000]);

        assert!(buffer.drain_frames().is_empty());
        assert_eq!(buffer.buffered(), 1000);

        buffer.append(&[2u8; 280]);
        let frames = buffer.drain_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..1000], &[1u8; 1000][..]);
        assert_eq!(&frames[0][1000..], &[2u8; 280][..]);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_many_appends_preserve_every_byte_in_order() {
        let input: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut buffer = FrameBuffer::new(320);
        let mut output = Vec::new();

        // Uneven chunk sizes, draining after every append
        let mut offset = 0;
        for size in [1usize, 7, 319, 320, 321, 999, 2, 4000].iter().cycle() {
            if offset >= input.len() {
                break;
            }
            let end = (offset + size).min(input.len());
            buffer.append(&input[offset..end]);
            offset = end;

            for frame in buffer.drain_frames() {
                assert_eq!(frame.len(), 320);
                output.extend_from_slice(&frame);
            }
            assert!(buffer.buffered() < 320);
        }

        let remainder = input.len() % 320;
        assert_eq!(buffer.buffered(), remainder);
        assert_eq!(output, input[..input.len() - remainder]);
    }

    #[test]
    fn test_default_audio_format_gives_1280_byte_frames() {
        // 16 kHz, 16-bit mono, 40 ms
        let audio = crate::config::AppConfig::default().audio;
        let buffer = FrameBuffer::new(audio.frame_size_bytes());
        assert_eq!(buffer.frame_size(), 1280);
    }
}
