//! Inbound audio scheduling and speaker output.
//!
//! Synthesized audio chunks arrive at irregular network intervals; the
//! scheduler assigns each one a start time of `max(playback clock now, end
//! of the previously scheduled chunk)` so playback is back-to-back with no
//! overlap and no avoidable gap. That rule is mandatory: violating it is
//! audible.
//!
//! The speaker thread owns the cpal output stream (`cpal::Stream` is not
//! `Send`) and mixes scheduled chunks by absolute sample position. The
//! playback clock is a sample counter advanced by the output callback, so
//! it can never be confused with the 16 kHz capture clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::core::audio::encode::{self, PLAYBACK_SAMPLE_RATE};
use crate::errors::{AgentError, AgentResult};

/// Fixed output gain applied uniformly to synthesized speech.
pub const OUTPUT_GAIN: f32 = 1.5;

/// Session-open cue: frequency, length and amplitude of the sine pulse.
const CUE_FREQUENCY_HZ: f32 = 880.0;
const CUE_DURATION_SECS: f32 = 0.1;
const CUE_AMPLITUDE: f32 = 0.1;

/// One chunk with an assigned start time on the playback clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledChunk {
    /// Start time in seconds on the playback clock.
    pub start_secs: f64,
    /// Gain-adjusted samples at the playback rate.
    pub samples: Vec<f32>,
}

impl ScheduledChunk {
    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        encode::duration_secs(self.samples.len(), PLAYBACK_SAMPLE_RATE)
    }

    /// End time in seconds on the playback clock.
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs()
    }
}

/// Assigns start times to inbound chunks.
///
/// Pure bookkeeping over one monotonic clock reading per chunk; the caller
/// supplies `now` from the playback clock, never from the capture side.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start_secs: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a decoded chunk: start at `max(now, previous end)`, apply
    /// the fixed output gain, advance the next-start watermark.
    pub fn schedule(&mut self, now_secs: f64, samples: &[f32]) -> ScheduledChunk {
        let start_secs = self.next_start_secs.max(now_secs);
        let chunk = ScheduledChunk {
            start_secs,
            samples: samples.iter().map(|s| s * OUTPUT_GAIN).collect(),
        };
        self.next_start_secs = chunk.end_secs();
        chunk
    }

    /// End time of the last scheduled chunk (the earliest start for the
    /// next one).
    pub fn next_start_secs(&self) -> f64 {
        self.next_start_secs
    }

    /// Drop the watermark. Used when generation is interrupted: the queue
    /// is flushed and the next chunk starts at its arrival time.
    pub fn reset(&mut self) {
        self.next_start_secs = 0.0;
    }
}

/// Single sine pulse played once at session open, outside the
/// chunk-scheduling path.
pub fn cue_tone() -> Vec<f32> {
    let sample_count = (CUE_DURATION_SECS * PLAYBACK_SAMPLE_RATE as f32) as usize;
    (0..sample_count)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            CUE_AMPLITUDE * (2.0 * std::f32::consts::PI * CUE_FREQUENCY_HZ * t).sin()
        })
        .collect()
}

/// A chunk positioned on the absolute sample timeline of the mixer.
struct PendingChunk {
    start_sample: u64,
    samples: Vec<f32>,
}

/// State shared between the controller and the speaker thread's callback.
#[derive(Default)]
struct MixState {
    pending: Vec<PendingChunk>,
}

/// Speaker output at the 24 kHz playback rate.
///
/// A dedicated thread owns the cpal output stream; the audio callback mixes
/// pending chunks by absolute sample position and advances the playback
/// clock. Stopping is idempotent.
pub struct SpeakerOutput {
    mix: Arc<Mutex<MixState>>,
    clock_samples: Arc<AtomicU64>,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerOutput {
    /// Open the default output device and start the mixer thread.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DeviceAccess`] if no output device is available
    /// or the stream cannot be built.
    pub fn start() -> AgentResult<Self> {
        let mix: Arc<Mutex<MixState>> = Arc::new(Mutex::new(MixState::default()));
        let clock_samples = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<AgentResult<()>>();

        let mix_for_thread = mix.clone();
        let clock_for_thread = clock_samples.clone();

        let thread = std::thread::Builder::new()
            .name("medibook-speaker".to_string())
            .spawn(move || {
                let stream = match build_output_stream(&mix_for_thread, &clock_for_thread) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    tracing::error!("failed to start output stream: {e}");
                }
                // Hold the stream alive until the controller signals
                // shutdown or drops its sender.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("speaker thread exiting");
            })
            .map_err(|e| AgentError::DeviceAccess(format!("failed to spawn speaker thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AgentError::DeviceAccess(
                    "speaker thread died during startup".to_string(),
                ));
            }
        }

        Ok(Self {
            mix,
            clock_samples,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Current playback clock reading in seconds.
    pub fn now_secs(&self) -> f64 {
        self.clock_samples.load(Ordering::Relaxed) as f64 / PLAYBACK_SAMPLE_RATE as f64
    }

    /// Queue a scheduled chunk for mixing.
    pub fn submit(&self, chunk: ScheduledChunk) {
        let start_sample = (chunk.start_secs * PLAYBACK_SAMPLE_RATE as f64) as u64;
        self.mix.lock().pending.push(PendingChunk {
            start_sample,
            samples: chunk.samples,
        });
    }

    /// Discard every queued chunk that has not finished playing.
    pub fn clear_pending(&self) {
        self.mix.lock().pending.clear();
    }

    /// Play the session-open cue immediately.
    pub fn play_cue(&self) {
        let start_sample = self.clock_samples.load(Ordering::Relaxed);
        self.mix.lock().pending.push(PendingChunk {
            start_sample,
            samples: cue_tone(),
        });
    }

    /// Stop the speaker thread and release the output device. Safe to call
    /// more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("speaker thread panicked during shutdown");
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
impl SpeakerOutput {
    /// Speaker with no device or thread behind it; the clock stays at zero
    /// and submitted chunks only accumulate in the mix state.
    pub(crate) fn inert() -> Self {
        Self {
            mix: Arc::new(Mutex::new(MixState::default())),
            clock_samples: Arc::new(AtomicU64::new(0)),
            shutdown: None,
            thread: None,
        }
    }
}

fn build_output_stream(
    mix: &Arc<Mutex<MixState>>,
    clock: &Arc<AtomicU64>,
) -> AgentResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AgentError::DeviceAccess("no default output device".to_string()))?;

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(PLAYBACK_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let mix = mix.clone();
    let clock = clock.clone();

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let base = clock.load(Ordering::Relaxed);
                let mut state = mix.lock();
                mix_into(&mut state.pending, base, data);
                clock.store(base + data.len() as u64, Ordering::Relaxed);
            },
            move |err| {
                tracing::error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| AgentError::DeviceAccess(format!("failed to build output stream: {e}")))
}

/// Mix every pending chunk overlapping `[base, base + out.len())` into the
/// output buffer, then drop chunks that have fully played.
fn mix_into(pending: &mut Vec<PendingChunk>, base: u64, out: &mut [f32]) {
    out.fill(0.0);
    let window_end = base + out.len() as u64;
    for chunk in pending.iter() {
        let chunk_end = chunk.start_sample + chunk.samples.len() as u64;
        if chunk_end <= base || chunk.start_sample >= window_end {
            continue;
        }
        let from = chunk.start_sample.max(base);
        let to = chunk_end.min(window_end);
        for pos in from..to {
            let out_idx = (pos - base) as usize;
            let chunk_idx = (pos - chunk.start_sample) as usize;
            out[out_idx] += chunk.samples[chunk_idx];
        }
    }
    pending.retain(|c| c.start_sample + c.samples.len() as u64 > window_end);
}
