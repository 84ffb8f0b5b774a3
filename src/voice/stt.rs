//! Speech-to-text (STT) processing
//!
//! [`Transcriber`] is the backend capability; the concrete backend is picked
//! once from configuration by [`from_config`]. [`TranscriptionService`] adds
//! the call timeout and the transcript filtering policy on top.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use crate::config::{ApiKeys, SttConfig, SttProvider};
use crate::{Error, Result};

use super::audio::SpeechSegment;

/// Instruction sent with every Gemini transcription request
pub const GEMINI_TRANSCRIBE_PROMPT: &str = "Transcribe this English audio exactly as spoken. \
     Return ONLY the transcription text, nothing else. If the audio contains no \
     intelligible English speech, return an empty string.";

/// Phrases STT models emit for silence, breath or background noise
///
/// Compared after trimming trailing punctuation and lowercasing.
pub const HALLUCINATION_PHRASES: &[&str] = &[
    "",
    "you",
    "thank you",
    "thanks",
    "thank you very much",
    "thank you so much",
    "thanks for watching",
    "thank you for watching",
    "thank you so much for watching",
    "thanks for listening",
    "please subscribe",
    "subscribe to my channel",
    "like and subscribe",
    "the end",
    "bye",
    "bye bye",
    "subtitles by the amara.org community",
];

/// Minimum number of characters in a kept transcript
const MIN_TRANSCRIPT_CHARS: usize = 2;

/// Speech-to-text backend
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one finished segment; empty text means "no speech"
    async fn transcribe(&self, segment: &SpeechSegment) -> Result<String>;

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Whether the backend is driven by an instruction prompt that it may echo back
    fn is_prompt_conditioned(&self) -> bool {
        false
    }
}

/// Build the configured backend
///
/// # Errors
///
/// Returns `Error::ModelLoad` if the backend's API key is missing
pub fn from_config(stt: &SttConfig, keys: &ApiKeys) -> Result<Arc<dyn Transcriber>> {
    let backend: Arc<dyn Transcriber> = match stt.provider {
        SttProvider::Whisper => Arc::new(WhisperTranscriber::new(
            require_key(keys.openai.as_deref(), "OpenAI", "Whisper")?,
            stt.model.clone(),
        )),
        SttProvider::Deepgram => Arc::new(DeepgramTranscriber::new(
            require_key(keys.deepgram.as_deref(), "Deepgram", "Deepgram STT")?,
            stt.model.clone(),
        )),
        SttProvider::Gemini => Arc::new(GeminiTranscriber::new(
            require_key(keys.gemini.as_deref(), "Gemini", "Gemini STT")?,
            stt.model.clone(),
        )),
    };

    tracing::info!(backend = backend.name(), model = %stt.model, "STT ready");
    Ok(backend)
}

fn require_key(key: Option<&str>, vendor: &str, purpose: &str) -> Result<String> {
    match key {
        Some(k) if !k.is_empty() => Ok(k.to_string()),
        _ => Err(Error::ModelLoad(format!("{vendor} API key required for {purpose}"))),
    }
}

/// Apply the transcript filtering policy
///
/// Returns `None` when the text should be treated as "no transcript":
/// too short, a known hallucination phrase, or (for prompt-conditioned
/// backends) an echo of the instruction prompt.
#[must_use]
pub fn filter_transcript(raw: &str, prompt_conditioned: bool) -> Option<String> {
    let text = raw.trim();

    if text.chars().count() < MIN_TRANSCRIPT_CHARS {
        tracing::debug!(transcript = text, "STT: empty or too-short transcript, skipping");
        return None;
    }

    let normalized = normalize(text);
    if HALLUCINATION_PHRASES.contains(&normalized.as_str()) {
        tracing::debug!(transcript = text, "STT: hallucination phrase, skipping");
        return None;
    }

    if prompt_conditioned && normalized.contains("transcribe") && normalized.contains("audio") {
        tracing::info!(transcript = text, "STT: prompt echo detected, skipping");
        return None;
    }

    Some(text.to_string())
}

/// Case-fold and strip trailing punctuation, including non-ASCII marks like `…` and `。`
fn normalize(text: &str) -> String {
    text.trim_end_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Transcription with timeout and filtering
pub struct TranscriptionService {
    backend: Arc<dyn Transcriber>,
    timeout: Duration,
}

impl TranscriptionService {
    /// Wrap a backend
    #[must_use]
    pub fn new(backend: Arc<dyn Transcriber>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Load the configured backend
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the backend cannot be created
    pub fn from_config(stt: &SttConfig, keys: &ApiKeys) -> Result<Self> {
        Ok(Self::new(from_config(stt, keys)?, stt.timeout))
    }

    /// Transcribe a segment and filter the result
    ///
    /// An empty string means no usable speech; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceUnavailable` if the backend fails or times out
    pub async fn transcribe(&self, segment: &SpeechSegment) -> Result<String> {
        if segment.is_empty() {
            return Ok(String::new());
        }

        tracing::info!(
            backend = self.backend.name(),
            duration_s = segment.duration_s(),
            "STT: transcribing"
        );

        let raw = match tokio::time::timeout(self.timeout, self.backend.transcribe(segment)).await
        {
            Ok(Ok(text)) => text,
            Ok(Err(Error::ServiceUnavailable(msg))) => return Err(Error::ServiceUnavailable(msg)),
            Ok(Err(e)) => {
                return Err(Error::ServiceUnavailable(format!(
                    "{} transcription failed: {e}",
                    self.backend.name()
                )));
            }
            Err(_) => {
                return Err(Error::ServiceUnavailable(format!(
                    "{} transcription timed out after {:?}",
                    self.backend.name(),
                    self.timeout
                )));
            }
        };

        Ok(filter_transcript(&raw, self.backend.is_prompt_conditioned()).unwrap_or_default())
    }
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// `OpenAI` Whisper transcription backend
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    /// Create a Whisper backend
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, segment: &SpeechSegment) -> Result<String> {
        let audio = segment.to_wav()?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::ServiceUnavailable(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Deepgram pre-recorded transcription backend
pub struct DeepgramTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl DeepgramTranscriber {
    /// Create a Deepgram backend
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(&self, segment: &SpeechSegment) -> Result<String> {
        let audio = segment.to_wav()?;
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::ServiceUnavailable(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let result: DeepgramResponse = response.json().await?;
        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}

#[derive(serde::Serialize)]
struct GeminiRequest<'a> {
    contents: [GeminiContent<'a>; 1],
}

#[derive(serde::Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 2],
}

#[derive(serde::Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Audio { inline_data: GeminiBlob },
    Text { text: &'a str },
}

#[derive(serde::Serialize)]
struct GeminiBlob {
    mime_type: &'static str,
    data: String,
}

#[derive(serde::Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(serde::Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(serde::Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(serde::Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

impl GeminiResponse {
    /// Text parts of the first candidate, concatenated and trimmed
    fn into_transcript(self) -> String {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        text.trim().to_string()
    }
}

/// Gemini prompt-conditioned transcription backend
pub struct GeminiTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiTranscriber {
    /// Create a Gemini backend
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Transcriber for GeminiTranscriber {
    async fn transcribe(&self, segment: &SpeechSegment) -> Result<String> {
        let audio = segment.to_wav()?;
        tracing::debug!(audio_bytes = audio.len(), "starting Gemini transcription");

        let request = GeminiRequest {
            contents: [GeminiContent {
                parts: [
                    GeminiPart::Audio {
                        inline_data: GeminiBlob {
                            mime_type: "audio/wav",
                            data: base64::engine::general_purpose::STANDARD.encode(&audio),
                        },
                    },
                    GeminiPart::Text {
                        text: GEMINI_TRANSCRIBE_PROMPT,
                    },
                ],
            }],
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini API error");
            return Err(Error::ServiceUnavailable(format!(
                "Gemini API error {status}: {body}"
            )));
        }

        let result: GeminiResponse = response.json().await?;
        let transcript = result.into_transcript();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn is_prompt_conditioned(&self) -> bool {
        true
    }
}
