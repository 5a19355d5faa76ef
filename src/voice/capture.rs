//! Microphone capture into a WAV segment
//!
//! The capture worker is a blocking loop: read a raw block from the leased
//! peripheral, scale each 12-bit word into 16-bit PCM, append to the
//! segment on disk. It stops when the configured duration elapses, the
//! byte budget for that duration is reached, or the stop flag is raised.
//! The segment's header carries placeholder sizes while recording and is
//! patched with the true data size on finalize.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::config::{CaptureConfig, SAMPLE_RATE};
use crate::voice::arbiter::CaptureLease;
use crate::{Error, Result};

/// A finalized recording, handed to transcription by path
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Location of the WAV file
    pub path: PathBuf,
    /// PCM payload size declared by the header
    pub data_bytes: u64,
}

/// Scale one raw microphone word into the 16-bit PCM range
///
/// The peripheral delivers 16-bit words whose low 12 bits carry an
/// unsigned sample. Scaling is unsigned: multiply by 256, divide by 2048,
/// which keeps the top bits of the 12-bit value and is monotonic in input
/// magnitude.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn scale_sample(raw: u16) -> i16 {
    let value = u32::from(raw & 0x0fff);
    (value * 256 / 2048) as i16
}

/// Scale a raw block of little-endian words into PCM samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn scale_block(raw: &[u8]) -> Vec<i16> {
    raw.chunks_exact(2)
        .map(|pair| scale_sample(u16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Blocking worker that drives one recording
pub struct CaptureWorker {
    config: CaptureConfig,
    path: PathBuf,
}

impl CaptureWorker {
    /// Create a worker that records to `path`
    #[must_use]
    pub fn new(config: CaptureConfig, path: PathBuf) -> Self {
        Self { config, path }
    }

    /// Record until the duration elapses or `stop` is raised
    ///
    /// Runs on a blocking task; the lease is handed back alongside the
    /// outcome so the caller can return it to the arbiter either way.
    pub fn run(
        &self,
        mut lease: CaptureLease,
        stop: &Arc<AtomicBool>,
    ) -> (CaptureLease, Result<AudioSegment>) {
        let result = self.record(&mut lease, stop);
        (lease, result)
    }

    fn record(&self, lease: &mut CaptureLease, stop: &Arc<AtomicBool>) -> Result<AudioSegment> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| Error::Capture(format!("cannot open segment for writing: {e}")))?;

        // Working buffer is allocated fallibly: an allocation failure
        // aborts this capture, not the process
        let mut block = Vec::new();
        block
            .try_reserve_exact(self.config.block_bytes)
            .map_err(|e| Error::Capture(format!("buffer allocation failed: {e}")))?;
        block.resize(self.config.block_bytes, 0u8);

        let max_bytes = byte_budget(&self.config);
        let started = Instant::now();
        let mut data_bytes: u64 = 0;

        while !stop.load(Ordering::SeqCst)
            && data_bytes < max_bytes
            && started.elapsed() < self.config.max_duration
        {
            let n = lease.read_block(&mut block, self.config.read_timeout)?;

            for sample in scale_block(&block[..n]) {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Capture(format!("segment write failed: {e}")))?;
            }
            data_bytes += n as u64;

            // Keep lower-priority work runnable between reads
            std::thread::yield_now();
        }

        writer
            .finalize()
            .map_err(|e| Error::Capture(format!("segment finalize failed: {e}")))?;

        tracing::info!(
            path = %self.path.display(),
            data_bytes,
            elapsed_ms = started.elapsed().as_millis(),
            "recording finished"
        );

        Ok(AudioSegment {
            path: self.path.clone(),
            data_bytes,
        })
    }

    /// Path the worker records to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// PCM bytes a full-length recording occupies
fn byte_budget(config: &CaptureConfig) -> u64 {
    u64::from(SAMPLE_RATE) * 2 * config.max_duration.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::arbiter::AudioArbiter;
    use crate::voice::device::AudioDevice;
    use std::time::Duration;

    /// Peripheral that serves a fixed number of identical raw blocks
    struct ScriptedMic {
        blocks_left: usize,
        word: u16,
    }

    impl AudioDevice for ScriptedMic {
        fn configure_capture(&mut self) -> Result<()> {
            Ok(())
        }
        fn configure_playback(&mut self) -> Result<()> {
            Ok(())
        }
        fn teardown(&mut self) {}

        fn read_block(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            if self.blocks_left == 0 {
                std::thread::sleep(Duration::from_millis(1));
                return Ok(0);
            }
            self.blocks_left -= 1;
            for pair in buf.chunks_exact_mut(2) {
                pair.copy_from_slice(&self.word.to_le_bytes());
            }
            Ok(buf.len())
        }

        fn write_samples(&mut self, _: &[i16], _: u32, _: u16) -> Result<()> {
            Ok(())
        }
        fn drain(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn short_config() -> CaptureConfig {
        CaptureConfig {
            max_duration: Duration::from_millis(50),
            block_bytes: 64,
            read_timeout: Duration::from_millis(5),
        }
    }

    fn record_with(mic: ScriptedMic, config: CaptureConfig) -> (tempfile::TempDir, AudioSegment) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.wav");
        let mut arbiter = AudioArbiter::new(Box::new(mic));
        let lease = arbiter.acquire_capture().unwrap();

        let worker = CaptureWorker::new(config, path);
        let stop = Arc::new(AtomicBool::new(false));
        let (lease, result) = worker.run(lease, &stop);
        arbiter.release_capture(lease);

        (dir, result.unwrap())
    }

    #[test]
    fn scale_is_monotonic_and_bounded() {
        let mut previous = -1i32;
        for raw in 0u16..=0x0fff {
            let scaled = i32::from(scale_sample(raw));
            assert!((0..=511).contains(&scaled), "out of range for {raw}: {scaled}");
            assert!(scaled >= previous, "not monotonic at {raw}");
            previous = scaled;
        }
    }

    #[test]
    fn scale_ignores_upper_nibble() {
        assert_eq!(scale_sample(0xf123), scale_sample(0x0123));
        assert_eq!(scale_sample(0xffff), scale_sample(0x0fff));
    }

    #[test]
    fn scale_block_consumes_little_endian_words() {
        let raw = [0xff, 0x0f, 0x00, 0x00];
        assert_eq!(scale_block(&raw), vec![scale_sample(0x0fff), 0]);
    }

    #[test]
    fn scale_block_drops_trailing_odd_byte() {
        assert_eq!(scale_block(&[0x01, 0x00, 0x42]).len(), 1);
    }

    #[test]
    fn header_declares_exactly_the_bytes_written() {
        let (_dir, segment) =
            record_with(ScriptedMic { blocks_left: 5, word: 0x0800 }, short_config());

        // 5 blocks of 64 raw bytes, each word becoming one 16-bit sample
        assert_eq!(segment.data_bytes, 5 * 64);

        let reader = hound::WavReader::open(&segment.path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(u64::from(reader.len()) * 2, segment.data_bytes);
    }

    #[test]
    fn samples_round_trip_through_the_scaler() {
        let (_dir, segment) =
            record_with(ScriptedMic { blocks_left: 1, word: 0x0abc }, short_config());

        let mut reader = hound::WavReader::open(&segment.path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(std::result::Result::unwrap).collect();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|&s| s == scale_sample(0x0abc)));
    }

    #[test]
    fn stop_flag_ends_the_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.wav");
        let mut arbiter = AudioArbiter::new(Box::new(ScriptedMic {
            blocks_left: usize::MAX,
            word: 0,
        }));
        let lease = arbiter.acquire_capture().unwrap();

        let mut config = short_config();
        config.max_duration = Duration::from_secs(10);
        let worker = CaptureWorker::new(config, path);

        let stop = Arc::new(AtomicBool::new(true));
        let (lease, result) = worker.run(lease, &stop);
        arbiter.release_capture(lease);

        assert_eq!(result.unwrap().data_bytes, 0);
    }

    #[test]
    fn duration_limit_ends_the_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.wav");
        let mut arbiter = AudioArbiter::new(Box::new(ScriptedMic {
            blocks_left: usize::MAX,
            word: 0,
        }));
        let lease = arbiter.acquire_capture().unwrap();

        let worker = CaptureWorker::new(short_config(), path);
        let stop = Arc::new(AtomicBool::new(false));
        let started = Instant::now();
        let (lease, result) = worker.run(lease, &stop);
        arbiter.release_capture(lease);

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn unwritable_segment_path_is_a_local_error() {
        let mut arbiter = AudioArbiter::new(Box::new(ScriptedMic { blocks_left: 1, word: 0 }));
        let lease = arbiter.acquire_capture().unwrap();

        let worker = CaptureWorker::new(
            short_config(),
            PathBuf::from("/nonexistent-dir/segment.wav"),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let (lease, result) = worker.run(lease, &stop);
        arbiter.release_capture(lease);

        assert!(matches!(result, Err(Error::Capture(_))));
    }
}
