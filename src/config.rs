//! Configuration for the assistant daemon
//!
//! Defaults cover everything except API keys. A TOML file at
//! `~/.config/omni/lark/config.toml` (or a path given on the command line)
//! acts as a partial overlay, and API keys may also come from the
//! `LARK_DEEPGRAM_API_KEY` / `LARK_OPENAI_API_KEY` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Sample rate used for capture and the WAV segment (16 kHz speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the recording, synthesis asset, and transcript
    pub data_dir: PathBuf,

    /// Capture settings
    pub capture: CaptureConfig,

    /// Transcription service settings
    pub stt: SttConfig,

    /// Language model settings
    pub llm: LlmConfig,

    /// Speech synthesis settings
    pub tts: TtsConfig,

    /// GPIO value file for the push-to-talk pin (active-low), if wired
    pub trigger_pin: Option<PathBuf>,
}

/// Microphone capture settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Hard stop for a single recording
    pub max_duration: Duration,

    /// Size of one raw read from the peripheral, in bytes
    pub block_bytes: usize,

    /// Timeout for a single peripheral read
    pub read_timeout: Duration,
}

/// Transcription service settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Endpoint URL, including any query parameters
    pub url: String,

    /// API key sent as `Authorization: Token <key>`
    pub api_key: String,

    /// Whole-request timeout
    pub timeout: Duration,

    /// Segments larger than this are uploaded with a chunked body
    pub chunk_threshold: u64,
}

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat completions endpoint URL
    pub url: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// System instruction prepended to every query
    pub system_prompt: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Reply length limit
    pub max_tokens: u32,

    /// Total attempts before the stage is treated as failed
    pub max_attempts: u32,

    /// Delay between failed attempts
    pub retry_delay: Duration,
}

/// Speech synthesis settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis endpoint base URL (no query string)
    pub url: String,

    /// Language code passed to the service
    pub language: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("dev", "omni", "lark")
            .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf());

        Self {
            data_dir,
            capture: CaptureConfig {
                max_duration: Duration::from_secs(10),
                block_bytes: 8 * 1024,
                read_timeout: Duration::from_millis(500),
            },
            stt: SttConfig {
                url: "https://api.deepgram.com/v1/listen?punctuate=true&model=general&tier=enhanced"
                    .to_string(),
                api_key: String::new(),
                timeout: Duration::from_secs(30),
                chunk_threshold: 1024 * 1024,
            },
            llm: LlmConfig {
                url: "https://api.openai.com/v1/chat/completions".to_string(),
                api_key: String::new(),
                model: "gpt-3.5-turbo".to_string(),
                system_prompt: "You are a helpful assistant. Provide concise responses \
                                suitable for display on a small screen and for \
                                text-to-speech reading."
                    .to_string(),
                temperature: 0.7,
                max_tokens: 150,
                max_attempts: 3,
                retry_delay: Duration::from_secs(2),
            },
            tts: TtsConfig {
                url: "https://translate.google.com/translate_tts".to_string(),
                language: "en".to_string(),
            },
            trigger_pin: None,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML overlay, then env keys
    ///
    /// An explicit `path` must exist and parse; the standard config path is
    /// optional and falls back to defaults with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given config file cannot be read or
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", p.display()))
                })?;
                toml::from_str(&content)?
            }
            None => load_standard_file(),
        };

        let mut config = Self::default();
        config.apply(file);
        config.apply_env();
        Ok(config)
    }

    /// Path of the WAV segment written by the capture worker
    #[must_use]
    pub fn recording_path(&self) -> PathBuf {
        self.data_dir.join("recording.wav")
    }

    /// Path of the streamed synthesis asset
    #[must_use]
    pub fn synthesis_path(&self) -> PathBuf {
        self.data_dir.join("response.mp3")
    }

    /// Path of the persisted transcript
    #[must_use]
    pub fn transcript_path(&self) -> PathBuf {
        self.data_dir.join("transcript.txt")
    }

    fn apply(&mut self, file: ConfigFile) {
        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        if let Some(pin) = file.trigger_pin {
            self.trigger_pin = Some(pin);
        }
        if let Some(secs) = file.capture.max_secs {
            self.capture.max_duration = Duration::from_secs(secs);
        }
        if let Some(bytes) = file.capture.block_bytes {
            self.capture.block_bytes = bytes;
        }
        if let Some(url) = file.stt.url {
            self.stt.url = url;
        }
        if let Some(key) = file.stt.api_key {
            self.stt.api_key = key;
        }
        if let Some(secs) = file.stt.timeout_secs {
            self.stt.timeout = Duration::from_secs(secs);
        }
        if let Some(url) = file.llm.url {
            self.llm.url = url;
        }
        if let Some(key) = file.llm.api_key {
            self.llm.api_key = key;
        }
        if let Some(model) = file.llm.model {
            self.llm.model = model;
        }
        if let Some(prompt) = file.llm.system_prompt {
            self.llm.system_prompt = prompt;
        }
        if let Some(t) = file.llm.temperature {
            self.llm.temperature = t;
        }
        if let Some(n) = file.llm.max_tokens {
            self.llm.max_tokens = n;
        }
        if let Some(n) = file.llm.max_attempts {
            self.llm.max_attempts = n;
        }
        if let Some(secs) = file.llm.retry_delay_secs {
            self.llm.retry_delay = Duration::from_secs(secs);
        }
        if let Some(url) = file.tts.url {
            self.tts.url = url;
        }
        if let Some(lang) = file.tts.language {
            self.tts.language = lang;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("LARK_DEEPGRAM_API_KEY") {
            self.stt.api_key = key;
        }
        if let Ok(key) = std::env::var("LARK_OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
    }
}

/// Top-level TOML file schema; every field is an optional overlay
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    data_dir: Option<PathBuf>,

    #[serde(default)]
    trigger_pin: Option<PathBuf>,

    #[serde(default)]
    capture: CaptureFileConfig,

    #[serde(default)]
    stt: SttFileConfig,

    #[serde(default)]
    llm: LlmFileConfig,

    #[serde(default)]
    tts: TtsFileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct CaptureFileConfig {
    max_secs: Option<u64>,
    block_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SttFileConfig {
    url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmFileConfig {
    url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TtsFileConfig {
    url: Option<String>,
    language: Option<String>,
}

/// Load the TOML overlay from the standard path, tolerating absence
fn load_standard_file() -> ConfigFile {
    let Some(dirs) = directories::ProjectDirs::from("dev", "omni", "lark") else {
        return ConfigFile::default();
    };
    let path = dirs.config_dir().join("config.toml");

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(file) => {
                tracing::info!(path = %path.display(), "loaded config file");
                file
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
            ConfigFile::default()
        }
    }
}
