//! Playback of synthesized speech through the shared peripheral
//!
//! The playback worker decodes the stored asset frame by frame and pushes
//! each frame into the leased speaker role, blocking on the peripheral's
//! own backpressure. The loop ends cleanly at end-of-stream; a source that
//! fails to open or decode aborts the stage.

use std::fs::File;
use std::path::Path;

use crate::voice::arbiter::PlaybackLease;
use crate::{Error, Result};

/// One decoded block of audio
pub struct DecodedFrame {
    /// Interleaved PCM samples
    pub samples: Vec<i16>,
    /// Frame sample rate
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

/// A decodable audio source (the compressed playback side of the
/// capture-sink / playback-source pair)
pub trait SpeechSource: Send {
    /// Decode the next frame; `None` at end of stream
    ///
    /// # Errors
    ///
    /// Returns error if the stream is corrupt.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;
}

/// MP3 file source backed by a streaming decoder
pub struct Mp3Source {
    decoder: minimp3::Decoder<File>,
}

impl Mp3Source {
    /// Open an asset for decoding
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Playback(format!("cannot open asset {}: {e}", path.display())))?;
        Ok(Self {
            decoder: minimp3::Decoder::new(file),
        })
    }
}

impl SpeechSource for Mp3Source {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        match self.decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let sample_rate = frame.sample_rate.max(0) as u32;
                #[allow(clippy::cast_possible_truncation)]
                let channels = frame.channels.min(usize::from(u16::MAX)) as u16;
                Ok(Some(DecodedFrame {
                    samples: frame.data,
                    sample_rate,
                    channels,
                }))
            }
            Err(minimp3::Error::Eof) => Ok(None),
            Err(e) => Err(Error::Playback(format!("decode failed: {e}"))),
        }
    }
}

/// Stage seam: plays a stored asset through a leased speaker
pub trait Player: Send + Sync {
    /// Decode `asset` and stream it until end of stream
    ///
    /// Runs on a blocking task.
    ///
    /// # Errors
    ///
    /// Returns error if the asset cannot be opened, decoded, or written to
    /// the peripheral.
    fn play(&self, asset: &Path, lease: &mut PlaybackLease) -> Result<()>;
}

/// Player for the MP3 assets the synthesis fetcher stores
pub struct SpeechPlayer;

impl Player for SpeechPlayer {
    fn play(&self, asset: &Path, lease: &mut PlaybackLease) -> Result<()> {
        let mut source = Mp3Source::open(asset)?;
        play_stream(&mut source, lease)
    }
}

/// Drive any decodable source into the leased speaker
///
/// # Errors
///
/// Returns error on decode or peripheral failure.
pub fn play_stream(source: &mut dyn SpeechSource, lease: &mut PlaybackLease) -> Result<()> {
    let mut frames = 0u64;
    while let Some(frame) = source.next_frame()? {
        lease.write_samples(&frame.samples, frame.sample_rate, frame.channels)?;
        frames += 1;
    }
    lease.drain()?;
    tracing::info!(frames, "playback complete");
    Ok(())
}
