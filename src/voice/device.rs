//! Shared audio peripheral abstraction
//!
//! The assistant's audio hardware is one peripheral that can be wired for
//! exactly one role at a time: microphone input or speaker output. The
//! [`AudioDevice`] trait models that peripheral; [`CpalDevice`] is the
//! concrete implementation backed by the host's default audio devices.
//!
//! In the capture role the peripheral delivers raw blocks of 16-bit
//! little-endian words whose low 12 bits carry an unsigned sample, the way
//! a bare ADC microphone does. The capture worker owns the conversion of
//! those raw words into signed 16-bit PCM.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::config::SAMPLE_RATE;
use crate::{Error, Result};

/// Rate the speaker path runs at (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Upper bound on buffered capture bytes (ten seconds of raw words)
const CAPTURE_BUFFER_CAP: usize = (SAMPLE_RATE as usize) * 2 * 10;

/// Upper bound on queued playback samples (one second)
const PLAYBACK_QUEUE_CAP: usize = PLAYBACK_SAMPLE_RATE as usize;

/// The shared audio peripheral, configurable for one role at a time
pub trait AudioDevice: Send {
    /// Install the microphone configuration, tearing down any other role
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be opened.
    fn configure_capture(&mut self) -> Result<()>;

    /// Install the speaker configuration, tearing down any other role
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened.
    fn configure_playback(&mut self) -> Result<()>;

    /// Tear down whatever configuration is active
    fn teardown(&mut self);

    /// Read up to `buf.len()` bytes of raw sample words, waiting at most
    /// `timeout`; returns 0 when nothing arrived in time
    ///
    /// # Errors
    ///
    /// Returns error if the capture role is not configured.
    fn read_block(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Queue decoded samples for output, blocking while the queue is full
    ///
    /// # Errors
    ///
    /// Returns error if the playback role is not configured.
    fn write_samples(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()>;

    /// Block until all queued output has been played
    ///
    /// # Errors
    ///
    /// Returns error if the playback role is not configured.
    fn drain(&mut self) -> Result<()>;
}

/// Peripheral backed by the host's default cpal input and output devices
///
/// cpal streams are not `Send`, so each role runs on a dedicated thread
/// that owns the stream and exchanges audio through a shared buffer. The
/// handle itself stays `Send` and can move between tasks with its lease.
pub struct CpalDevice {
    input: Option<RoleThread<Mutex<VecDeque<u8>>>>,
    output: Option<RoleThread<Mutex<VecDeque<f32>>>>,
}

/// A role's stream thread plus its shared buffer
struct RoleThread<B> {
    stop: Arc<AtomicBool>,
    buffer: Arc<B>,
    thread: Option<JoinHandle<()>>,
}

impl<B> RoleThread<B> {
    fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl CpalDevice {
    /// Create an unconfigured peripheral handle
    #[must_use]
    pub fn new() -> Self {
        Self {
            input: None,
            output: None,
        }
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl AudioDevice for CpalDevice {
    fn configure_capture(&mut self) -> Result<()> {
        self.teardown();

        let stop = Arc::new(AtomicBool::new(false));
        let buffer = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let thread_stop = Arc::clone(&stop);
        let thread_buffer = Arc::clone(&buffer);
        let thread = std::thread::spawn(move || {
            run_input_stream(&thread_stop, &thread_buffer, &ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(sample_rate = SAMPLE_RATE, "microphone configured");
                self.input = Some(RoleThread {
                    stop,
                    buffer,
                    thread: Some(thread),
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(Error::Audio(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Audio("capture thread exited during setup".to_string()))
            }
        }
    }

    fn configure_playback(&mut self) -> Result<()> {
        self.teardown();

        let stop = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let thread_stop = Arc::clone(&stop);
        let thread_queue = Arc::clone(&queue);
        let thread = std::thread::spawn(move || {
            run_output_stream(&thread_stop, &thread_queue, &ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(sample_rate = PLAYBACK_SAMPLE_RATE, "speaker configured");
                self.output = Some(RoleThread {
                    stop,
                    buffer: queue,
                    thread: Some(thread),
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(Error::Audio(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Audio("playback thread exited during setup".to_string()))
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(input) = self.input.take() {
            input.shutdown();
            tracing::debug!("microphone torn down");
        }
        if let Some(output) = self.output.take() {
            output.shutdown();
            tracing::debug!("speaker torn down");
        }
    }

    fn read_block(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| Error::Audio("microphone not configured".to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut pending = input.buffer.lock().unwrap_or_else(|e| e.into_inner());
                if !pending.is_empty() {
                    // Whole 16-bit words only
                    let want = (buf.len().min(pending.len())) & !1;
                    for slot in &mut buf[..want] {
                        *slot = pending.pop_front().unwrap_or(0);
                    }
                    return Ok(want);
                }
            }

            if Instant::now() >= deadline {
                return Ok(0);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn write_samples(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| Error::Audio("speaker not configured".to_string()))?;

        let mono = downmix(samples, channels);
        let resampled = resample(&mono, sample_rate, PLAYBACK_SAMPLE_RATE);

        for sample in resampled {
            loop {
                {
                    let mut queue = output.buffer.lock().unwrap_or_else(|e| e.into_inner());
                    if queue.len() < PLAYBACK_QUEUE_CAP {
                        queue.push_back(sample);
                        break;
                    }
                }
                // Queue full: let the output callback catch up
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| Error::Audio("speaker not configured".to_string()))?;

        loop {
            let remaining = output
                .buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len();
            if remaining == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        // Let the tail of the last callback buffer play out
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }
}

/// Input stream thread: owns the cpal stream, feeds the raw-word buffer
fn run_input_stream(
    stop: &AtomicBool,
    buffer: &Arc<Mutex<VecDeque<u8>>>,
    ready: &mpsc::Sender<std::result::Result<(), String>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err("no input device available".to_string()));
        return;
    };

    let supported = device
        .supported_input_configs()
        .map_err(|e| e.to_string())
        .and_then(|mut configs| {
            configs
                .find(|c| {
                    c.channels() == 1
                        && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
                })
                .ok_or_else(|| "no suitable input config found".to_string())
        });

    let config = match supported {
        Ok(c) => c.with_sample_rate(SampleRate(SAMPLE_RATE)).config(),
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let callback_buffer = Arc::clone(buffer);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mut pending = callback_buffer.lock().unwrap_or_else(|e| e.into_inner());
            for &sample in data {
                let [lo, hi] = raw_word(sample).to_le_bytes();
                pending.push_back(lo);
                pending.push_back(hi);
            }
            // Bound memory if nobody is reading
            while pending.len() > CAPTURE_BUFFER_CAP {
                pending.pop_front();
            }
        },
        |err| {
            tracing::error!(error = %err, "audio capture error");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(e.to_string()));
        return;
    }
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(10));
    }
    drop(stream);
}

/// Output stream thread: owns the cpal stream, consumes the sample queue
fn run_output_stream(
    stop: &AtomicBool,
    queue: &Arc<Mutex<VecDeque<f32>>>,
    ready: &mpsc::Sender<std::result::Result<(), String>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err("no output device available".to_string()));
        return;
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| e.to_string())
        .and_then(|mut configs| {
            configs
                .find(|c| {
                    (c.channels() == 1 || c.channels() == 2)
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
                .ok_or_else(|| "no suitable output config found".to_string())
        });

    let config = match supported {
        Ok(c) => c.with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE)).config(),
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let channels = usize::from(config.channels);

    let callback_queue = Arc::clone(queue);
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut pending = callback_queue.lock().unwrap_or_else(|e| e.into_inner());
            for frame in data.chunks_mut(channels) {
                let sample = pending.pop_front().unwrap_or(0.0);
                for out in frame.iter_mut() {
                    *out = sample;
                }
            }
        },
        |err| {
            tracing::error!(error = %err, "audio playback error");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(e.to_string()));
        return;
    }
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(10));
    }
    drop(stream);
}

/// Quantize a float sample to the raw unsigned 12-bit word the capture
/// path expects (offset binary, silence at mid-scale)
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn raw_word(sample: f32) -> u16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let word = ((clamped * 0.5 + 0.5) * 4095.0) as u16;
    word & 0x0fff
}

/// Average stereo frames down to mono; mono passes through
fn downmix(samples: &[i16], channels: u16) -> Vec<f32> {
    if channels == 2 {
        samples
            .chunks(2)
            .map(|chunk| {
                let left = f32::from(chunk[0]) / 32768.0;
                let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                (left + right) / 2.0
            })
            .collect()
    } else {
        samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
    }
}

/// Linear-interpolation resampling between arbitrary rates
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = f64::from(samples[source_idx]);
                let right = f64::from(samples[source_idx + 1]);
                (left + (right - left) * fraction) as f32
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_word_covers_full_swing() {
        assert_eq!(raw_word(-1.0), 0);
        assert_eq!(raw_word(1.0), 4095);
        // Silence sits at mid-scale
        let mid = raw_word(0.0);
        assert!((2040..=2055).contains(&mid), "mid-scale was {mid}");
    }

    #[test]
    fn raw_word_clamps_out_of_range_input() {
        assert_eq!(raw_word(-3.0), 0);
        assert_eq!(raw_word(3.0), 4095);
    }

    #[test]
    fn downmix_averages_stereo_pairs() {
        let mono = downmix(&[16384, -16384, 8192, 8192], 2);
        assert_eq!(mono.len(), 2);
        assert!(mono[0].abs() < 1e-6);
        assert!((mono[1] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn resample_halves_and_doubles_counts() {
        let samples = vec![0.0f32; 2400];
        assert_eq!(resample(&samples, 48_000, 24_000).len(), 1200);
        assert_eq!(resample(&samples, 12_000, 24_000).len(), 4800);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample(&samples, 24_000, 24_000), samples);
    }

    #[test]
    fn unconfigured_roles_report_errors() {
        let mut device = CpalDevice::new();
        let mut buf = [0u8; 16];
        assert!(device.read_block(&mut buf, Duration::from_millis(1)).is_err());
        assert!(device.write_samples(&[0], 24_000, 1).is_err());
        assert!(device.drain().is_err());
    }
}
