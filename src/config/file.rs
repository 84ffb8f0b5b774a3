//! TOML configuration file loading
//!
//! Supports `~/.config/hugo/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HugoConfigFile {
    /// Audio capture configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Voice activity detection configuration
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Segmentation policy
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// Speech-to-text backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech backend
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Downstream responder
    #[serde(default)]
    pub agent: AgentFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Audio capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Capture sample rate in Hz (e.g. 16000)
    pub sample_rate: Option<u32>,

    /// Samples per VAD chunk (e.g. 512)
    pub chunk_samples: Option<usize>,

    /// Chunks buffered between the audio callback and the pipeline
    pub queue_capacity: Option<usize>,
}

/// Voice activity detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// Speech model ("energy" or "silero")
    pub model: Option<String>,

    /// Speech confidence threshold in [0, 1]
    pub threshold: Option<f32>,
}

/// Segmentation policy
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    /// Segments shorter than this are discarded without transcription
    pub min_speech_duration_s: Option<f32>,

    /// Segments reaching this length are abandoned without transcription
    pub max_speech_duration_s: Option<f32>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Backend ("whisper", "deepgram" or "gemini")
    pub provider: Option<String>,

    /// Model identifier (e.g. "whisper-1")
    pub model: Option<String>,

    /// Per-call timeout in seconds
    pub timeout_s: Option<u64>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Backend ("openai" or "elevenlabs")
    pub provider: Option<String>,

    /// Model identifier (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,

    /// Per-call timeout in seconds
    pub timeout_s: Option<u64>,
}

/// Responder configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    /// Reply to transcripts with an LLM (echo otherwise)
    pub enabled: Option<bool>,

    /// Chat model identifier
    pub model: Option<String>,

    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// System prompt
    pub system_prompt: Option<String>,

    /// Max completion tokens
    pub max_tokens: Option<u32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub gemini: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HugoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HugoConfigFile {
    config_file_path().map_or_else(HugoConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Same fallback behaviour as [`load_config_file`].
pub fn load_config_file_from(path: &Path) -> HugoConfigFile {
    if !path.exists() {
        return HugoConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HugoConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HugoConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/hugo/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("hugo").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_file_from(&dir.path().join("absent.toml"));
        assert!(fc.vad.threshold.is_none());
        assert!(fc.stt.provider.is_none());
    }

    #[test]
    fn test_partial_file_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[vad]
threshold = 0.6

[stt]
provider = "deepgram"
model = "nova-2"
"#,
        )
        .unwrap();

        let fc = load_config_file_from(&path);
        assert_eq!(fc.vad.threshold, Some(0.6));
        assert_eq!(fc.stt.provider.as_deref(), Some("deepgram"));
        assert_eq!(fc.stt.model.as_deref(), Some("nova-2"));
        assert!(fc.tts.voice.is_none());
    }

    #[test]
    fn test_unparsable_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[vad\nthreshold = ").unwrap();

        let fc = load_config_file_from(&path);
        assert!(fc.vad.threshold.is_none());
    }
}
