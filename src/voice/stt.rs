//! Speech-to-text over a Deepgram-style HTTP API

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::io::ReaderStream;

use crate::config::SttConfig;
use crate::voice::capture::AudioSegment;
use crate::{Error, Result};

/// Stage seam: turns a finalized segment into a transcript
///
/// An empty transcript means "no speech detected"; transport and parse
/// failures at the service are folded into that same empty result.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a finalized segment
    ///
    /// # Errors
    ///
    /// Returns error only for local failures (the segment cannot be read).
    async fn transcribe(&self, segment: &AudioSegment) -> Result<String>;
}

/// Transcript JSON shape returned by the service
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    results: TranscriptionResults,
}

#[derive(serde::Deserialize)]
struct TranscriptionResults {
    channels: Vec<TranscriptionChannel>,
}

#[derive(serde::Deserialize)]
struct TranscriptionChannel {
    alternatives: Vec<TranscriptionAlternative>,
}

#[derive(serde::Deserialize)]
struct TranscriptionAlternative {
    transcript: String,
}

/// HTTP transcription client
pub struct TranscriptionClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    chunk_threshold: u64,
    transcript_path: Option<PathBuf>,
}

impl TranscriptionClient {
    /// Create a client for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot
    /// be built.
    pub fn new(config: &SttConfig, transcript_path: Option<PathBuf>) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("transcription API key required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Stt(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            chunk_threshold: config.chunk_threshold,
            transcript_path,
        })
    }

    /// Best-effort persistence of the transcript; failure is only logged
    async fn persist(&self, transcript: &str) {
        let Some(path) = &self.transcript_path else {
            return;
        };
        match tokio::fs::write(path, transcript).await {
            Ok(()) => tracing::debug!(path = %path.display(), "transcript saved"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "transcript save failed"),
        }
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, segment: &AudioSegment) -> Result<String> {
        tracing::debug!(
            path = %segment.path.display(),
            bytes = segment.data_bytes,
            "starting transcription"
        );

        let file = tokio::fs::File::open(&segment.path)
            .await
            .map_err(|e| Error::Stt(format!("cannot open segment: {e}")))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::Stt(format!("cannot stat segment: {e}")))?
            .len();

        let request = self
            .client
            .post(&self.url)
            .header("Content-Type", "audio/wav")
            .header("Authorization", format!("Token {}", self.api_key));

        // Large segments go up as a chunked stream; small ones as a
        // fixed-length body
        let request = if len > self.chunk_threshold {
            tracing::debug!(len, "large segment, streaming chunked body");
            request.body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
        } else {
            let mut bytes = Vec::new();
            let mut file = file;
            tokio::io::AsyncReadExt::read_to_end(&mut file, &mut bytes)
                .await
                .map_err(|e| Error::Stt(format!("cannot read segment: {e}")))?;
            request.body(bytes)
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "transcription request failed");
                return Ok(String::new());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "transcription API error");
            return Ok(String::new());
        }

        let body = response.text().await.unwrap_or_default();
        let transcript = match parse_transcript(&body) {
            Some(t) => t,
            None => {
                tracing::warn!("malformed transcription response");
                return Ok(String::new());
            }
        };

        tracing::info!(transcript = %transcript, "transcription complete");
        if !transcript.is_empty() {
            self.persist(&transcript).await;
        }
        Ok(transcript)
    }
}

/// Pull the transcript out of the service's nested response shape
fn parse_transcript(body: &str) -> Option<String> {
    let parsed: TranscriptionResponse = serde_json::from_str(body).ok()?;
    let transcript = parsed
        .results
        .channels
        .first()
        .and_then(|c| c.alternatives.first())
        .map(|a| a.transcript.clone())
        .unwrap_or_default();
    Some(transcript)
}
