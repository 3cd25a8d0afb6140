//! PCM frame encoding and decoding.
//!
//! Outbound microphone frames are mono f32 samples at 16 kHz, converted to
//! 16-bit signed little-endian PCM and base64-encoded for the wire. Inbound
//! synthesized audio arrives base64-encoded in the same PCM layout at
//! 24 kHz and is decoded back to f32 for playback.

use base64::prelude::*;

use crate::errors::{AgentError, AgentResult};

/// Capture sample rate for outbound microphone audio.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Playback sample rate for inbound synthesized audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound capture frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// MIME type attached to outbound media chunks.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Convert one frame of f32 samples to base64-encoded PCM16-LE.
pub fn encode_frame(samples: &[f32]) -> String {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        pcm.extend_from_slice(&value.to_le_bytes());
    }
    BASE64_STANDARD.encode(pcm)
}

/// Decode one base64 PCM16-LE chunk back into f32 samples.
///
/// # Errors
///
/// Returns [`AgentError::Protocol`] for invalid base64 or an odd byte count.
pub fn decode_chunk(data: &str) -> AgentResult<Vec<f32>> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|e| AgentError::Protocol(format!("invalid base64 audio chunk: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(AgentError::Protocol(format!(
            "PCM16 chunk has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Duration in seconds of a buffer of mono samples at the given rate.
pub fn duration_secs(sample_count: usize, sample_rate: u32) -> f64 {
    sample_count as f64 / sample_rate as f64
}
