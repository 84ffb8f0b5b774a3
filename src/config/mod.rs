//! Configuration management for the Hugo voice assistant
//!
//! Resolution order for every field: environment variable, then the TOML file
//! (see [`file`]), then the built-in default.

pub mod file;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

use file::HugoConfigFile;

/// Default capture sample rate (16kHz for speech)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Default VAD chunk length (32ms at 16kHz)
pub const DEFAULT_CHUNK_SAMPLES: usize = 512;

/// Default number of chunks buffered between callback and consumer (~2s)
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default speech confidence threshold
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.5;

/// Default minimum segment duration worth transcribing
pub const DEFAULT_MIN_SPEECH_DURATION_S: f32 = 0.8;

/// Open segments are abandoned once they reach this length
pub const DEFAULT_MAX_SPEECH_DURATION_S: f32 = 30.0;

/// Default STT/TTS call timeout
const DEFAULT_SERVICE_TIMEOUT_S: u64 = 30;

/// Hugo configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Segmentation and capture settings
    pub pipeline: PipelineConfig,

    /// Voice activity detection
    pub vad: VadConfig,

    /// Speech-to-text backend
    pub stt: SttConfig,

    /// Text-to-speech backend
    pub tts: TtsConfig,

    /// Downstream responder
    pub agent: AgentConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Capture and segmentation settings consumed by the voice pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per VAD chunk
    pub chunk_samples: usize,

    /// Chunks buffered between the audio callback and the consumer task
    pub queue_capacity: usize,

    /// Segments shorter than this (seconds) are discarded untranscribed
    pub min_speech_duration_s: f32,

    /// Segments reaching this length (seconds) are abandoned untranscribed
    pub max_speech_duration_s: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            min_speech_duration_s: DEFAULT_MIN_SPEECH_DURATION_S,
            max_speech_duration_s: DEFAULT_MAX_SPEECH_DURATION_S,
        }
    }
}

/// Speech model used for voice activity detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadModelKind {
    /// Smoothed RMS energy, no model download
    #[default]
    Energy,
    /// Silero ONNX model (requires the `silero` feature)
    Silero,
}

/// Voice activity detection settings
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Speech model
    pub model: VadModelKind,

    /// Speech confidence threshold in [0, 1]
    pub threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            model: VadModelKind::Energy,
            threshold: DEFAULT_VAD_THRESHOLD,
        }
    }
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    /// `OpenAI` Whisper transcription API
    #[default]
    Whisper,
    /// Deepgram pre-recorded API
    Deepgram,
    /// Gemini `generateContent` with a transcription prompt
    Gemini,
}

impl SttProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
            Self::Gemini => "gemini-2.5-flash",
        }
    }
}

/// Speech-to-text settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttConfig {
    /// Backend
    pub provider: SttProvider,

    /// Model identifier
    pub model: String,

    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::Whisper,
            model: SttProvider::Whisper.default_model().to_string(),
            timeout: Duration::from_secs(DEFAULT_SERVICE_TIMEOUT_S),
        }
    }
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    /// `OpenAI` speech API
    #[default]
    OpenAi,
    /// `ElevenLabs` text-to-speech API
    ElevenLabs,
}

impl TtsProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "tts-1",
            Self::ElevenLabs => "eleven_monolingual_v1",
        }
    }

    /// Voice used when none is configured
    #[must_use]
    pub const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAi => "alloy",
            Self::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        }
    }
}

/// Text-to-speech settings
#[derive(Debug, Clone, PartialEq)]
pub struct TtsConfig {
    /// Backend
    pub provider: TtsProvider,

    /// Model identifier
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,

    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::OpenAi,
            model: TtsProvider::OpenAi.default_model().to_string(),
            voice: TtsProvider::OpenAi.default_voice().to_string(),
            speed: 1.0,
            timeout: Duration::from_secs(DEFAULT_SERVICE_TIMEOUT_S),
        }
    }
}

/// Responder settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Reply with an LLM; when false transcripts are echoed back
    pub enabled: bool,

    /// Chat model identifier
    pub model: String,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// System prompt
    pub system_prompt: String,

    /// Max completion tokens
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            system_prompt: "You are Hugo, a voice-first personal assistant. \
                            Keep responses short and conversational."
                .to_string(),
            max_tokens: 300,
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, chat)
    pub openai: Option<String>,

    /// Deepgram API key
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key
    pub elevenlabs: Option<String>,

    /// Gemini API key
    pub gemini: Option<String>,
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| k.as_ref().map(|_| "***");
        f.debug_struct("ApiKeys")
            .field("openai", &mask(&self.openai))
            .field("deepgram", &mask(&self.deepgram))
            .field("elevenlabs", &mask(&self.elevenlabs))
            .field("gemini", &mask(&self.gemini))
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or out of range
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or out of range
    pub fn resolve<F>(fc: HugoConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pipeline = PipelineConfig {
            sample_rate: parse_env(&env, "HUGO_SAMPLE_RATE")?
                .or(fc.audio.sample_rate)
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            chunk_samples: fc.audio.chunk_samples.unwrap_or(DEFAULT_CHUNK_SAMPLES),
            queue_capacity: fc.audio.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            min_speech_duration_s: parse_env(&env, "HUGO_MIN_SPEECH_DURATION")?
                .or(fc.pipeline.min_speech_duration_s)
                .unwrap_or(DEFAULT_MIN_SPEECH_DURATION_S),
            max_speech_duration_s: parse_env(&env, "HUGO_MAX_SPEECH_DURATION")?
                .or(fc.pipeline.max_speech_duration_s)
                .unwrap_or(DEFAULT_MAX_SPEECH_DURATION_S),
        };

        let vad = VadConfig {
            model: fc
                .vad
                .model
                .as_deref()
                .map(str::parse::<VadModelKind>)
                .transpose()?
                .unwrap_or_default(),
            threshold: parse_env(&env, "HUGO_VAD_THRESHOLD")?
                .or(fc.vad.threshold)
                .unwrap_or(DEFAULT_VAD_THRESHOLD),
        };

        let stt_provider = env("HUGO_STT_PROVIDER")
            .or(fc.stt.provider)
            .as_deref()
            .map(str::parse::<SttProvider>)
            .transpose()?
            .unwrap_or_default();
        let stt = SttConfig {
            provider: stt_provider,
            model: env("HUGO_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| stt_provider.default_model().to_string()),
            timeout: Duration::from_secs(fc.stt.timeout_s.unwrap_or(DEFAULT_SERVICE_TIMEOUT_S)),
        };

        let tts_provider = env("HUGO_TTS_PROVIDER")
            .or(fc.tts.provider)
            .as_deref()
            .map(str::parse::<TtsProvider>)
            .transpose()?
            .unwrap_or_default();
        let tts = TtsConfig {
            provider: tts_provider,
            model: env("HUGO_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            voice: env("HUGO_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| tts_provider.default_voice().to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            timeout: Duration::from_secs(fc.tts.timeout_s.unwrap_or(DEFAULT_SERVICE_TIMEOUT_S)),
        };

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            enabled: fc.agent.enabled.unwrap_or(defaults.enabled),
            model: env("HUGO_AGENT_MODEL")
                .or(fc.agent.model)
                .unwrap_or(defaults.model),
            base_url: fc.agent.base_url.unwrap_or(defaults.base_url),
            system_prompt: fc.agent.system_prompt.unwrap_or(defaults.system_prompt),
            max_tokens: fc.agent.max_tokens.unwrap_or(defaults.max_tokens),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            gemini: env("GEMINI_API_KEY").or(fc.api_keys.gemini),
        };

        let config = Self {
            pipeline,
            vad,
            stt,
            tts,
            agent,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".to_string()));
        }
        if self.pipeline.chunk_samples == 0 {
            return Err(Error::Config("audio.chunk_samples must be positive".to_string()));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(Error::Config("audio.queue_capacity must be positive".to_string()));
        }
        let min = self.pipeline.min_speech_duration_s;
        if !min.is_finite() || min < 0.0 {
            return Err(Error::Config(format!(
                "pipeline.min_speech_duration_s must be a non-negative number, got {min}"
            )));
        }
        let max = self.pipeline.max_speech_duration_s;
        if max.is_nan() || max <= min {
            return Err(Error::Config(format!(
                "pipeline.max_speech_duration_s must exceed min_speech_duration_s ({min}), got {max}"
            )));
        }
        validate_threshold(self.vad.threshold)?;
        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(Error::Config(format!(
                "tts.speed must be between 0.25 and 4.0, got {}",
                self.tts.speed
            )));
        }
        Ok(())
    }
}

/// Check a VAD threshold lies in [0, 1]
///
/// # Errors
///
/// Returns `Error::Config` otherwise
pub fn validate_threshold(threshold: f32) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "vad.threshold must be between 0 and 1, got {threshold}"
        )))
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {raw:?}")))
        })
        .transpose()
}

impl FromStr for VadModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "energy" => Ok(Self::Energy),
            "silero" => Ok(Self::Silero),
            other => Err(Error::Config(format!("unknown VAD model: {other}"))),
        }
    }
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            "gemini" => Ok(Self::Gemini),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}
