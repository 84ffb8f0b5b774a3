//! Text-to-speech (TTS) processing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ApiKeys, TtsConfig, TtsProvider};
use crate::{Error, Result};

use super::audio::decode_mp3;

/// Sample rate reported for empty output and MP3 streams without frames
pub const DEFAULT_TTS_SAMPLE_RATE: u32 = 24000;

/// Finished synthesized audio
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    /// Empty buffer at the default rate
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: DEFAULT_TTS_SAMPLE_RATE,
        }
    }

    /// Whether there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_s(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Text-to-speech backend
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into a finished buffer
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the configured backend
///
/// # Errors
///
/// Returns `Error::ModelLoad` if the backend's API key is missing
pub fn from_config(tts: &TtsConfig, keys: &ApiKeys) -> Result<Arc<dyn Synthesizer>> {
    let backend: Arc<dyn Synthesizer> = match tts.provider {
        TtsProvider::OpenAi => {
            let Some(key) = keys.openai.clone().filter(|k| !k.is_empty()) else {
                return Err(Error::ModelLoad("OpenAI API key required for TTS".to_string()));
            };
            Arc::new(OpenAiSynthesizer::new(
                key,
                tts.voice.clone(),
                tts.speed,
                tts.model.clone(),
            ))
        }
        TtsProvider::ElevenLabs => {
            let Some(key) = keys.elevenlabs.clone().filter(|k| !k.is_empty()) else {
                return Err(Error::ModelLoad(
                    "ElevenLabs API key required for TTS".to_string(),
                ));
            };
            Arc::new(ElevenLabsSynthesizer::new(
                key,
                tts.voice.clone(),
                tts.model.clone(),
            ))
        }
    };

    tracing::info!(
        backend = backend.name(),
        model = %tts.model,
        voice = %tts.voice,
        "TTS ready"
    );
    Ok(backend)
}

/// Synthesis with timeout and the empty-text short-circuit
pub struct SpeechSynthesisService {
    backend: Arc<dyn Synthesizer>,
    timeout: Duration,
}

impl SpeechSynthesisService {
    /// Wrap a backend
    #[must_use]
    pub fn new(backend: Arc<dyn Synthesizer>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Load the configured backend
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the backend cannot be created
    pub fn from_config(tts: &TtsConfig, keys: &ApiKeys) -> Result<Self> {
        Ok(Self::new(from_config(tts, keys)?, tts.timeout))
    }

    /// Synthesize text; blank text yields an empty buffer without a backend call
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceUnavailable` if the backend fails or times out
    pub async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Ok(SynthesizedAudio::empty());
        }

        tracing::debug!(backend = self.backend.name(), chars = text.len(), "synthesizing");

        match tokio::time::timeout(self.timeout, self.backend.synthesize(text)).await {
            Ok(Ok(audio)) => Ok(audio),
            Ok(Err(Error::ServiceUnavailable(msg))) => Err(Error::ServiceUnavailable(msg)),
            Ok(Err(e)) => Err(Error::ServiceUnavailable(format!(
                "{} synthesis failed: {e}",
                self.backend.name()
            ))),
            Err(_) => Err(Error::ServiceUnavailable(format!(
                "{} synthesis timed out after {:?}",
                self.backend.name(),
                self.timeout
            ))),
        }
    }
}

/// Decode an MP3 response body off the async runtime
async fn decode_mp3_blocking(mp3: Vec<u8>) -> Result<SynthesizedAudio> {
    let (samples, rate) = tokio::task::spawn_blocking(move || decode_mp3(&mp3))
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("MP3 decode task failed: {e}")))??;

    Ok(SynthesizedAudio {
        samples,
        sample_rate: rate.unwrap_or(DEFAULT_TTS_SAMPLE_RATE),
    })
}

/// `OpenAI` speech backend
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
}

impl OpenAiSynthesizer {
    /// Create an `OpenAI` backend
    #[must_use]
    pub fn new(api_key: String, voice: String, speed: f32, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "OpenAI TTS error {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        decode_mp3_blocking(audio.to_vec()).await
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// `ElevenLabs` speech backend
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model: String,
}

impl ElevenLabsSynthesizer {
    /// Create an `ElevenLabs` backend
    #[must_use]
    pub fn new(api_key: String, voice_id: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            model,
        }
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice_id
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        decode_mp3_blocking(audio.to_vec()).await
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}
