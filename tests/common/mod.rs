//! Shared test fixtures: a fake peripheral and scripted stage mocks
//!
//! Everything here exercises the real arbiter, capture worker, and
//! controller; only the hardware and the remote services are simulated.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use lark_assistant::config::CaptureConfig;
use lark_assistant::llm::QueryEngine;
use lark_assistant::voice::arbiter::{AudioArbiter, PlaybackLease};
use lark_assistant::voice::capture::AudioSegment;
use lark_assistant::voice::device::AudioDevice;
use lark_assistant::voice::playback::Player;
use lark_assistant::voice::stt::Transcriber;
use lark_assistant::voice::tts::{SpeechSynthesizer, SynthesisAsset};
use lark_assistant::{Error, PipelineStages, Result};

/// Peripheral stand-in: serves a few raw microphone blocks, then silence,
/// and records whatever the playback role writes
pub struct FakeDevice {
    blocks_left: usize,
    pub written: Arc<Mutex<Vec<i16>>>,
}

impl FakeDevice {
    pub fn new(blocks: usize) -> Self {
        Self {
            blocks_left: blocks,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl AudioDevice for FakeDevice {
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
            pair.copy_from_slice(&0x0400u16.to_le_bytes());
        }
        Ok(buf.len())
    }

    fn write_samples(&mut self, samples: &[i16], _rate: u32, _channels: u16) -> Result<()> {
        self.written.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What the simulated transcription service does
#[derive(Clone)]
pub enum SttBehavior {
    /// 200 with this JSON body
    Body(String),
    /// Transport failure (folded into an empty transcript, like the client)
    HttpError,
}

pub struct MockTranscriber {
    behavior: SttBehavior,
    pub calls: Arc<Mutex<usize>>,
}

impl MockTranscriber {
    pub fn new(behavior: SttBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _segment: &AudioSegment) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        match &self.behavior {
            SttBehavior::Body(body) => {
                let value: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
                Ok(value["results"]["channels"][0]["alternatives"][0]["transcript"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string())
            }
            SttBehavior::HttpError => Ok(String::new()),
        }
    }
}

pub struct MockQueryEngine {
    reply: Option<String>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockQueryEngine {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl QueryEngine for MockQueryEngine {
    async fn ask(&self, transcript: &str) -> Result<String> {
        self.calls.lock().unwrap().push(transcript.to_string());
        self.reply
            .clone()
            .ok_or_else(|| Error::Query("no response after 3 attempts".to_string()))
    }
}

pub struct MockSynthesizer {
    output_path: PathBuf,
    fails: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn storing(output_path: PathBuf) -> Self {
        Self {
            output_path,
            fails: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(output_path: PathBuf) -> Self {
        Self {
            output_path,
            fails: true,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn fetch(&self, text: &str) -> Result<SynthesisAsset> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.fails {
            return Err(Error::Tts("synthesis request failed: 502".to_string()));
        }
        tokio::fs::write(&self.output_path, b"fake-audio").await?;
        Ok(SynthesisAsset {
            path: self.output_path.clone(),
            bytes: 10,
        })
    }
}

pub struct MockPlayer {
    fails: bool,
    pub plays: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockPlayer {
    pub fn succeeding() -> Self {
        Self {
            fails: false,
            plays: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fails: true,
            plays: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Player for MockPlayer {
    fn play(&self, asset: &Path, lease: &mut PlaybackLease) -> Result<()> {
        self.plays.lock().unwrap().push(asset.to_path_buf());
        if self.fails {
            return Err(Error::Playback("decode failed: corrupt stream".to_string()));
        }
        lease.write_samples(&[1, 2, 3], 24_000, 1)?;
        lease.drain()
    }
}

/// Shared handles into the mocks for assertions after the run
pub struct StageHandles {
    pub transcribe_calls: Arc<Mutex<usize>>,
    pub query_calls: Arc<Mutex<Vec<String>>>,
    pub synth_calls: Arc<Mutex<Vec<String>>>,
    pub plays: Arc<Mutex<Vec<PathBuf>>>,
    pub synthesis_path: PathBuf,
}

/// Builder for one scripted pipeline
pub struct Fixture {
    pub stt: SttBehavior,
    pub query_reply: Option<String>,
    pub synth_fails: bool,
    pub player_fails: bool,
    pub capture_duration: Duration,
}

impl Fixture {
    pub fn happy(transcript_body: &str, reply: &str) -> Self {
        Self {
            stt: SttBehavior::Body(transcript_body.to_string()),
            query_reply: Some(reply.to_string()),
            synth_fails: false,
            player_fails: false,
            capture_duration: Duration::from_millis(50),
        }
    }

    pub fn build(self, dir: &tempfile::TempDir) -> (PipelineStages, StageHandles) {
        let synthesis_path = dir.path().join("response.mp3");

        let transcriber = MockTranscriber::new(self.stt);
        let query = match self.query_reply {
            Some(reply) => MockQueryEngine::replying(&reply),
            None => MockQueryEngine::failing(),
        };
        let synthesizer = if self.synth_fails {
            MockSynthesizer::failing(synthesis_path.clone())
        } else {
            MockSynthesizer::storing(synthesis_path.clone())
        };
        let player = if self.player_fails {
            MockPlayer::failing()
        } else {
            MockPlayer::succeeding()
        };

        let handles = StageHandles {
            transcribe_calls: Arc::clone(&transcriber.calls),
            query_calls: Arc::clone(&query.calls),
            synth_calls: Arc::clone(&synthesizer.calls),
            plays: Arc::clone(&player.plays),
            synthesis_path,
        };

        let stages = PipelineStages {
            arbiter: AudioArbiter::new(Box::new(FakeDevice::new(4))),
            capture: CaptureConfig {
                max_duration: self.capture_duration,
                block_bytes: 64,
                read_timeout: Duration::from_millis(5),
            },
            recording_path: dir.path().join("recording.wav"),
            transcriber: Box::new(transcriber),
            query: Box::new(query),
            synthesizer: Box::new(synthesizer),
            player: Arc::new(player),
        };

        (stages, handles)
    }
}

/// Poll until `done` holds or the deadline passes
pub async fn wait_until(what: &str, done: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}
