//! Speech synthesis fetched from a remote TTS service
//!
//! The reply text goes into a GET query string and the compressed audio
//! response is streamed straight to disk, so the whole asset never sits in
//! memory. The service endpoint only speaks TLS with certificates the
//! device cannot validate, so verification is explicitly disabled for this
//! client and nothing else.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::config::TtsConfig;
use crate::{Error, Result};

/// A synthesized-speech file ready for playback
#[derive(Debug, Clone)]
pub struct SynthesisAsset {
    /// Location of the streamed audio file
    pub path: PathBuf,
    /// Bytes written
    pub bytes: u64,
}

/// Stage seam: turns reply text into a stored audio asset
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Fetch synthesized speech for `text`
    ///
    /// # Errors
    ///
    /// Returns error on a non-success response or when the destination
    /// cannot be written.
    async fn fetch(&self, text: &str) -> Result<SynthesisAsset>;
}

/// HTTP synthesis fetcher
pub struct SynthesisFetcher {
    client: reqwest::Client,
    url: String,
    language: String,
    output_path: PathBuf,
}

impl SynthesisFetcher {
    /// Create a fetcher that stores assets at `output_path`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &TtsConfig, output_path: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Tts(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            language: config.language.clone(),
            output_path,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for SynthesisFetcher {
    async fn fetch(&self, text: &str) -> Result<SynthesisAsset> {
        let url = format!(
            "{}?ie=UTF-8&q={}&tl={}&client=tw-ob&ttsspeed=1",
            self.url,
            percent_encode(text),
            self.language
        );
        tracing::debug!(url = %url, "fetching synthesis");

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Tts(format!("synthesis request failed: {status}")));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(&self.output_path)
            .await
            .map_err(|e| Error::Tts(format!("cannot open asset for writing: {e}")))?;

        let mut written: u64 = 0;
        let mut last_percent = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::Tts(format!("asset write failed: {e}")))?;
            written += chunk.len() as u64;

            if let Some(total) = total {
                let percent = written * 100 / total.max(1);
                if percent / 10 > last_percent / 10 {
                    tracing::debug!(percent, "synthesis download progress");
                    last_percent = percent;
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| Error::Tts(format!("asset flush failed: {e}")))?;

        tracing::info!(path = %self.output_path.display(), bytes = written, "synthesis stored");
        Ok(SynthesisAsset {
            path: self.output_path.clone(),
            bytes: written,
        })
    }
}

/// Percent-encode text for a query string
///
/// Alphanumerics pass through; every other byte becomes `%XX`. The
/// service expects spaces encoded this way too, so no `+` shorthand.
#[must_use]
pub fn percent_encode(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len() * 3);
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphanumerics_pass_through() {
        assert_eq!(percent_encode("Hello123"), "Hello123");
    }

    #[test]
    fn spaces_and_punctuation_are_escaped() {
        assert_eq!(percent_encode("It is 3 o'clock."), "It%20is%203%20o%27clock%2E");
    }

    #[test]
    fn every_non_alphanumeric_byte_is_escaped() {
        assert_eq!(percent_encode("-_.~"), "%2D%5F%2E%7E");
        assert_eq!(percent_encode("a&b=c"), "a%26b%3Dc");
    }

    #[test]
    fn multibyte_text_is_escaped_bytewise() {
        // "é" is 0xC3 0xA9 in UTF-8
        assert_eq!(percent_encode("é"), "%C3%A9");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(percent_encode(""), "");
    }
}
