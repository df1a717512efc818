//! Speech Adapters
//!
//! Speech-to-text and text-to-speech contracts plus the hosted providers used
//! in production. Both providers are request/response: a finished utterance
//! goes in, a transcript or a PCM16 clip comes out.

use crate::audio::{AudioFrame, PIPELINE_SAMPLE_RATE};
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEEPGRAM_LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";
pub const ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io/v1";

/// Turns a finished utterance into text.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Model identifier reported in metrics.
    fn model(&self) -> &str;

    /// Transcribes `audio`. An empty string means nothing intelligible was heard.
    async fn transcribe(&self, audio: &AudioFrame) -> Result<String>;
}

/// Turns a reply into speech.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn model(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<AudioFrame>;
}

// --- Deepgram ---

#[derive(Deserialize, Debug)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize, Debug)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize, Debug)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize, Debug)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramResponse {
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default()
    }
}

/// Deepgram pre-recorded transcription over raw linear16 audio.
pub struct DeepgramStt {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: String,
}

impl DeepgramStt {
    /// # Arguments
    ///
    /// * `api_key` - Deepgram API key. Must not be empty.
    /// * `model` - Model identifier (e.g., "nova-3").
    /// * `language` - Language tag, or "multi" for multilingual detection.
    pub fn new(api_key: &str, model: &str, language: &str) -> Result<Self> {
        ensure!(!api_key.is_empty(), "Deepgram API key is empty");
        ensure!(!model.is_empty(), "Deepgram model is empty");
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            language: language.to_string(),
        })
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    fn model(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, audio: &AudioFrame) -> Result<String> {
        let sample_rate = audio.sample_rate.to_string();
        let response = self
            .client
            .post(DEEPGRAM_LISTEN_URL)
            .query(&[
                ("model", self.model.as_str()),
                ("language", self.language.as_str()),
                ("encoding", "linear16"),
                ("sample_rate", sample_rate.as_str()),
                ("channels", "1"),
                ("smart_format", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "application/octet-stream")
            .body(audio.to_le_bytes())
            .send()
            .await
            .context("Failed to reach Deepgram")?
            .error_for_status()
            .context("Deepgram rejected the transcription request")?;

        let body: DeepgramResponse = response
            .json()
            .await
            .context("Failed to parse Deepgram response")?;
        Ok(body.into_transcript())
    }
}

// --- ElevenLabs ---

#[derive(Serialize, Debug)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// ElevenLabs text-to-speech returning 16 kHz PCM16.
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model: String,
    base_url: String,
}

impl ElevenLabsTts {
    pub fn new(api_key: &str, voice_id: &str, model: &str) -> Result<Self> {
        ensure!(!api_key.is_empty(), "ElevenLabs API key is empty");
        ensure!(!voice_id.is_empty(), "ElevenLabs voice id is empty");
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            voice_id: voice_id.to_string(),
            model: model.to_string(),
            base_url: ELEVENLABS_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/text-to-speech/{}",
            self.base_url.trim_end_matches('/'),
            self.voice_id
        )
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    fn model(&self) -> &str {
        &self.model
    }

    async fn synthesize(&self, text: &str) -> Result<AudioFrame> {
        let bytes = self
            .client
            .post(self.endpoint())
            .query(&[("output_format", "pcm_16000")])
            .header("xi-api-key", &self.api_key)
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await
            .context("Failed to reach ElevenLabs")?
            .error_for_status()
            .context("ElevenLabs rejected the synthesis request")?
            .bytes()
            .await
            .context("Failed to read ElevenLabs audio")?;

        Ok(AudioFrame::from_le_bytes(&bytes, PIPELINE_SAMPLE_RATE))
    }
}
