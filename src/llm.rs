//! Language model query client
//!
//! One transcript in, one short speakable answer out. Requests follow the
//! chat-completions shape with a fixed system instruction; failed attempts
//! are retried a bounded number of times with a flat delay, and the first
//! success wins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::retry::{RetryPolicy, with_retry};
use crate::{Error, Result};

/// Stage seam: answers a transcribed question
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Ask the model for a reply to `transcript`
    ///
    /// # Errors
    ///
    /// Returns error once every attempt has failed.
    async fn ask(&self, transcript: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// HTTP query client
pub struct QueryClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl QueryClient {
    /// Create a client for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("language model API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                delay: config.retry_delay,
            },
        })
    }

    async fn attempt(&self, transcript: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: transcript,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Query(format!("API error {status}: {body}")));
        }

        let body = response.text().await.unwrap_or_default();
        parse_reply(&body).ok_or_else(|| Error::Query("malformed response".to_string()))
    }
}

#[async_trait]
impl QueryEngine for QueryClient {
    async fn ask(&self, transcript: &str) -> Result<String> {
        tracing::debug!(transcript = %transcript, "querying language model");

        let reply = with_retry(&self.retry, |_attempt| self.attempt(transcript)).await?;

        tracing::info!(reply_len = reply.len(), "query complete");
        Ok(reply)
    }
}

/// Pull the reply text out of the first choice
fn parse_reply(body: &str) -> Option<String> {
    let parsed: ChatResponse = serde_json::from_str(body).ok()?;
    parsed.choices.into_iter().next()?.message.content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"It is 3 o'clock."}}]}"#;
        assert_eq!(parse_reply(body), Some("It is 3 o'clock.".to_string()));
    }

    #[test]
    fn later_choices_are_ignored() {
        let body = r#"{"choices":[
            {"message":{"content":"first"}},
            {"message":{"content":"second"}}
        ]}"#;
        assert_eq!(parse_reply(body), Some("first".to_string()));
    }

    #[test]
    fn empty_choices_are_malformed() {
        assert_eq!(parse_reply(r#"{"choices":[]}"#), None);
    }

    #[test]
    fn missing_content_is_malformed() {
        assert_eq!(parse_reply(r#"{"choices":[{"message":{}}]}"#), None);
        assert_eq!(parse_reply("not json"), None);
    }

    #[test]
    fn request_serializes_with_fixed_sampling() {
        let request = ChatRequest {
            model: "gpt-3.5-turbo",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "be brief",
                },
                ChatMessage {
                    role: "user",
                    content: "what time is it",
                },
            ],
            temperature: 0.7,
            max_tokens: 150,
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "what time is it");
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(json["max_tokens"], 150);
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = LlmConfig {
            api_key: String::new(),
            ..crate::Config::default().llm
        };
        assert!(QueryClient::new(&config).is_err());
    }
}
