//! Microphone capture.
//!
//! A dedicated thread owns the cpal input stream (streams are not `Send`).
//! The device runs at its native rate; samples are folded to mono and
//! downsampled to the 16 kHz capture rate, grouped into fixed-size frames
//! and forwarded over a bounded channel.
//!
//! Suspend/resume is a tap on the forwarding path: detaching stops frames
//! from flowing without closing the device or the connection, and both
//! operations are idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use crate::core::audio::encode::{CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE};
use crate::errors::{AgentError, AgentResult};

/// Channel capacity for captured frames. Deep enough to ride out the
/// connection opening; the audio thread drops frames instead of blocking if
/// the consumer stalls completely.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Cloneable handle for toggling the forwarding tap without owning the
/// capture device.
#[derive(Clone)]
pub struct CaptureTap {
    attached: Arc<AtomicBool>,
}

impl CaptureTap {
    /// Re-attach the tap: frames flow again. No-op if already attached.
    pub fn attach(&self) {
        self.attached.store(true, Ordering::Relaxed);
    }

    /// Detach the tap: the device keeps running, frames stop flowing.
    /// No-op if already detached.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::Relaxed);
    }

    /// Whether frames are currently flowing.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Relaxed)
    }
}

/// Microphone capture at the 16 kHz capture rate.
pub struct MicCapture {
    tap_attached: Arc<AtomicBool>,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicCapture {
    /// Open the default input device and start capturing.
    ///
    /// Returns the capture handle and the receiving end of the frame
    /// channel. Each item is one frame of [`CAPTURE_FRAME_SAMPLES`] mono
    /// f32 samples at 16 kHz.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DeviceAccess`] if no input device is available
    /// or the stream cannot be built.
    pub fn start() -> AgentResult<(Self, mpsc::Receiver<Vec<f32>>)> {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let tap_attached = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<AgentResult<()>>();

        let tap_for_thread = tap_attached.clone();
        let thread = std::thread::Builder::new()
            .name("medibook-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(frames_tx, tap_for_thread) {
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
                    tracing::error!("failed to start input stream: {e}");
                }
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("capture thread exiting");
            })
            .map_err(|e| AgentError::DeviceAccess(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AgentError::DeviceAccess(
                    "capture thread died during startup".to_string(),
                ));
            }
        }

        Ok((
            Self {
                tap_attached,
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            },
            frames_rx,
        ))
    }

    /// Handle for toggling the forwarding tap. Clones stay valid after the
    /// capture itself has been moved or stopped.
    pub fn tap(&self) -> CaptureTap {
        CaptureTap {
            attached: self.tap_attached.clone(),
        }
    }

    /// Stop the capture thread and release the device. Safe to call more
    /// than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("capture thread panicked during shutdown");
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
impl MicCapture {
    /// Capture handle with no device or thread behind it; only the tap is
    /// functional and `stop` is a no-op.
    pub(crate) fn inert() -> Self {
        Self {
            tap_attached: Arc::new(AtomicBool::new(true)),
            shutdown: None,
            thread: None,
        }
    }
}

fn build_input_stream(
    frames_tx: mpsc::Sender<Vec<f32>>,
    tap_attached: Arc<AtomicBool>,
) -> AgentResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AgentError::DeviceAccess("no default input device".to_string()))?;

    // Use the device's default config for compatibility and downsample in
    // software, as most devices will not open at 16kHz directly.
    let default_config = device
        .default_input_config()
        .map_err(|e| AgentError::DeviceAccess(format!("no default input config: {e}")))?;
    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();

    let config = cpal::StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    tracing::info!(
        "capture: native {}Hz/{}ch -> {}Hz mono",
        native_rate.0,
        native_channels,
        CAPTURE_SAMPLE_RATE
    );

    let mut frame_buffer: Vec<f32> = Vec::with_capacity(CAPTURE_FRAME_SAMPLES * 2);

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                if !tap_attached.load(Ordering::Relaxed) {
                    frame_buffer.clear();
                    return;
                }

                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let samples = if native_rate.0 != CAPTURE_SAMPLE_RATE {
                    downsample(&mono, native_rate.0, CAPTURE_SAMPLE_RATE)
                } else {
                    mono
                };

                frame_buffer.extend_from_slice(&samples);
                while frame_buffer.len() >= CAPTURE_FRAME_SAMPLES {
                    let frame: Vec<f32> = frame_buffer.drain(..CAPTURE_FRAME_SAMPLES).collect();
                    // try_send keeps the audio thread from ever blocking.
                    if frames_tx.try_send(frame).is_err() {
                        tracing::debug!("frame channel full, dropping capture frame");
                    }
                }
            },
            move |err| {
                tracing::error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| AgentError::DeviceAccess(format!("failed to build input stream: {e}")))
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation downsampler. Sufficient for speech: the energy that
/// matters sits below 8kHz.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_toggles_are_idempotent_and_shared() {
        let capture = MicCapture::inert();
        let tap = capture.tap();
        assert!(tap.is_attached());

        tap.detach();
        tap.detach();
        assert!(!tap.is_attached());

        // Clones share the same switch.
        let other = tap.clone();
        other.attach();
        assert!(tap.is_attached());
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_downsample_halves_length() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let out = downsample(&samples, 48_000, 16_000);
        assert_eq!(out.len(), 160);
        // Monotone input stays monotone through linear interpolation.
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_downsample_identity_rates() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downsample(&samples, 16_000, 16_000), samples);
    }
}
