//! Voice activity detection
//!
//! A [`SpeechModel`] scores each chunk with a speech confidence in [0, 1].
//! [`VoiceActivityDetector`] thresholds that score and reports the
//! speech-start / speech-end edges the pipeline segments on.

use crate::config::{PipelineConfig, VadConfig, VadModelKind, validate_threshold};
use crate::{Error, Result};

use super::audio::AudioChunk;

/// RMS level treated as fully confident speech by [`EnergyModel`]
const ENERGY_FULL_SCALE_RMS: f32 = 0.06;

/// Weight of the previous level in [`EnergyModel`] smoothing
const ENERGY_SMOOTHING: f32 = 0.5;

/// Opaque per-chunk speech scorer with recurrent state
pub trait SpeechModel: Send {
    /// Score one chunk; called strictly in arrival order
    fn confidence(&mut self, chunk: &[f32]) -> f32;

    /// Clear recurrent state
    fn reset(&mut self);

    /// Short model name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Speech model based on smoothed RMS energy
///
/// Needs no model download. The recurrent state is an exponentially smoothed
/// level so a single loud click does not register as a full speech chunk.
#[derive(Debug, Clone)]
pub struct EnergyModel {
    level: f32,
    full_scale_rms: f32,
    smoothing: f32,
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self::new(ENERGY_FULL_SCALE_RMS, ENERGY_SMOOTHING)
    }
}

impl EnergyModel {
    /// Create a model reaching confidence 1.0 at `full_scale_rms`
    #[must_use]
    pub fn new(full_scale_rms: f32, smoothing: f32) -> Self {
        Self {
            level: 0.0,
            full_scale_rms: full_scale_rms.max(f32::EPSILON),
            smoothing: smoothing.clamp(0.0, 0.99),
        }
    }
}

impl SpeechModel for EnergyModel {
    fn confidence(&mut self, chunk: &[f32]) -> f32 {
        let instant = (calculate_rms(chunk) / self.full_scale_rms).min(1.0);
        self.level = self.smoothing.mul_add(self.level, (1.0 - self.smoothing) * instant);
        self.level
    }

    fn reset(&mut self) {
        self.level = 0.0;
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Silero VAD via ONNX runtime
#[cfg(feature = "silero")]
pub struct SileroModel {
    inner: voice_activity_detector::VoiceActivityDetector,
}

#[cfg(feature = "silero")]
impl SileroModel {
    /// Load the bundled Silero model
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the ONNX session cannot be created
    pub fn load(sample_rate: u32, chunk_samples: usize) -> Result<Self> {
        let inner = voice_activity_detector::VoiceActivityDetector::builder()
            .sample_rate(i64::from(sample_rate))
            .chunk_size(chunk_samples)
            .build()
            .map_err(|e| Error::ModelLoad(format!("silero VAD: {e}")))?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "silero")]
impl SpeechModel for SileroModel {
    fn confidence(&mut self, chunk: &[f32]) -> f32 {
        self.inner.predict(chunk.iter().copied())
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn name(&self) -> &'static str {
        "silero"
    }
}

/// Outcome of scoring one chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    /// Confidence reached the threshold
    pub is_speaking: bool,
    /// false→true edge on this chunk
    pub speech_start: bool,
    /// true→false edge on this chunk
    pub speech_end: bool,
    /// Model confidence in [0, 1]
    pub confidence: f32,
}

/// Thresholded speech/silence classifier with edge detection
pub struct VoiceActivityDetector {
    model: Box<dyn SpeechModel>,
    threshold: f32,
    is_speaking: bool,
}

impl VoiceActivityDetector {
    /// Load the configured speech model
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the model is unavailable, or
    /// `Error::Config` for an out-of-range threshold
    pub fn load(vad: &VadConfig, pipeline: &PipelineConfig) -> Result<Self> {
        validate_threshold(vad.threshold)?;

        let model: Box<dyn SpeechModel> = match vad.model {
            VadModelKind::Energy => Box::new(EnergyModel::default()),
            #[cfg(feature = "silero")]
            VadModelKind::Silero => Box::new(SileroModel::load(
                pipeline.sample_rate,
                pipeline.chunk_samples,
            )?),
            #[cfg(not(feature = "silero"))]
            VadModelKind::Silero => {
                let _ = pipeline;
                return Err(Error::ModelLoad(
                    "silero VAD requested but the `silero` feature is not enabled".to_string(),
                ));
            }
        };

        tracing::info!(model = model.name(), threshold = vad.threshold, "VAD loaded");
        Ok(Self::with_model(model, vad.threshold))
    }

    /// Wrap an already loaded model
    #[must_use]
    pub fn with_model(model: Box<dyn SpeechModel>, threshold: f32) -> Self {
        Self {
            model,
            threshold,
            is_speaking: false,
        }
    }

    /// Score a chunk and report edges
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> VadResult {
        self.process_samples(chunk.samples())
    }

    /// Score raw samples and report edges
    pub fn process_samples(&mut self, samples: &[f32]) -> VadResult {
        let raw = self.model.confidence(samples);
        let confidence = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };

        let was_speaking = self.is_speaking;
        self.is_speaking = confidence >= self.threshold;

        let result = VadResult {
            is_speaking: self.is_speaking,
            speech_start: !was_speaking && self.is_speaking,
            speech_end: was_speaking && !self.is_speaking,
            confidence,
        };

        tracing::trace!(
            confidence,
            is_speaking = result.is_speaking,
            "vad chunk"
        );
        result
    }

    /// Clear recurrent state and the speaking flag; the threshold is kept
    pub fn reset(&mut self) {
        self.model.reset();
        self.is_speaking = false;
    }

    /// Whether the last chunk was classified as speech
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Current threshold
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Replace the threshold (configuration reload)
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `threshold` is outside [0, 1]
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        validate_threshold(threshold)?;
        tracing::info!(old = self.threshold, new = threshold, "VAD threshold reloaded");
        self.threshold = threshold;
        Ok(())
    }
}

impl std::fmt::Debug for VoiceActivityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceActivityDetector")
            .field("model", &self.model.name())
            .field("threshold", &self.threshold)
            .field("is_speaking", &self.is_speaking)
            .finish()
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns the first sample of each chunk as its confidence
    struct LevelModel;

    impl SpeechModel for LevelModel {
        fn confidence(&mut self, chunk: &[f32]) -> f32 {
            chunk.first().copied().unwrap_or(0.0)
        }

        fn reset(&mut self) {}
    }

    fn detector(threshold: f32) -> VoiceActivityDetector {
        VoiceActivityDetector::with_model(Box::new(LevelModel), threshold)
    }

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_rms(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_rms(&loud) > 0.4);
    }

    #[test]
    fn test_energy_model_rises_and_resets() {
        let mut model = EnergyModel::default();
        let loud = vec![0.3f32; 512];

        let first = model.confidence(&loud);
        let second = model.confidence(&loud);
        assert!(second > first);
        assert!(second <= 1.0);

        model.reset();
        assert!(model.confidence(&[0.0; 512]) < f32::EPSILON);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut vad = detector(0.5);
        let result = vad.process_samples(&[0.5]);
        assert!(result.is_speaking);
        assert!(result.speech_start);
    }

    #[test]
    fn test_edges_fire_once() {
        let mut vad = detector(0.5);

        assert!(vad.process_samples(&[0.9]).speech_start);
        let held = vad.process_samples(&[0.9]);
        assert!(held.is_speaking && !held.speech_start && !held.speech_end);
        assert!(vad.process_samples(&[0.1]).speech_end);
        let quiet = vad.process_samples(&[0.1]);
        assert!(!quiet.is_speaking && !quiet.speech_end);
    }

    #[test]
    fn test_reset_clears_speaking_but_keeps_threshold() {
        let mut vad = detector(0.7);
        vad.process_samples(&[0.9]);
        assert!(vad.is_speaking());

        vad.reset();
        assert!(!vad.is_speaking());
        assert!((vad.threshold() - 0.7).abs() < f32::EPSILON);
        // Speaking again after reset is a fresh start edge
        assert!(vad.process_samples(&[0.9]).speech_start);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let mut vad = detector(0.5);
        assert!((vad.process_samples(&[3.0]).confidence - 1.0).abs() < f32::EPSILON);
        assert!(vad.process_samples(&[f32::NAN]).confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn test_set_threshold_validates() {
        let mut vad = detector(0.5);
        assert!(vad.set_threshold(1.2).is_err());
        assert!(vad.set_threshold(0.3).is_ok());
        assert!(vad.process_samples(&[0.35]).is_speaking);
    }

    #[cfg(not(feature = "silero"))]
    #[test]
    fn test_silero_without_feature_is_model_load_error() {
        let vad = VadConfig {
            model: VadModelKind::Silero,
            threshold: 0.5,
        };
        let err = VoiceActivityDetector::load(&vad, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
    }
}
