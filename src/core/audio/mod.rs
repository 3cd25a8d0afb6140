//! Audio pipeline: outbound microphone capture and encoding, inbound
//! decode and gapless playback scheduling.
//!
//! The two directions run on independent clocks (16 kHz capture, 24 kHz
//! playback) that are never conflated; each side reads "now" only from its
//! own clock.

pub mod capture;
pub mod encode;
pub mod playback;

pub use capture::{CaptureTap, MicCapture};
pub use encode::{
    CAPTURE_FRAME_SAMPLES, CAPTURE_MIME_TYPE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE,
    decode_chunk, duration_secs, encode_frame,
};
pub use playback::{OUTPUT_GAIN, PlaybackScheduler, ScheduledChunk, SpeakerOutput, cue_tone};
