//! Voice processing module
//!
//! Owns the shared audio peripheral and everything that touches it:
//! arbitration between the microphone and speaker roles, capture into a
//! WAV segment, playback of synthesized speech, and the remote STT/TTS
//! clients.

pub mod arbiter;
pub mod capture;
pub mod device;
pub mod playback;
pub mod stt;
pub mod tts;

pub use arbiter::{AudioArbiter, AudioRole, CaptureLease, PlaybackLease};
pub use capture::{AudioSegment, CaptureWorker, scale_block, scale_sample};
pub use device::{AudioDevice, CpalDevice};
pub use playback::{Mp3Source, Player, SpeechPlayer, SpeechSource, play_stream};
pub use stt::{Transcriber, TranscriptionClient};
pub use tts::{SpeechSynthesizer, SynthesisAsset, SynthesisFetcher, percent_encode};
