//! Speech segmentation
//!
//! Turns the chunk stream into utterances. The segmenter owns the VAD and the
//! single open segment; a boundary (flush or discard) swaps the segment out
//! and resets the VAD exactly once.

use std::mem;

use crate::Result;
use crate::config::DEFAULT_MAX_SPEECH_DURATION_S;

use super::audio::{AudioChunk, SpeechSegment};
use super::vad::VoiceActivityDetector;

/// What one chunk did to the segmentation state
#[derive(Debug)]
pub enum SegmentOutcome {
    /// Silence, nothing open
    Idle,
    /// Speech started on this chunk, which opened a new segment
    Started {
        /// VAD confidence of the opening chunk
        confidence: f32,
    },
    /// Chunk appended to the open segment
    Buffered,
    /// Speech ended but the segment was too short to transcribe
    Discarded {
        /// Length of the dropped segment
        duration_s: f32,
    },
    /// Speech ran past the maximum length; the segment was dropped
    Overflowed {
        /// Length of the dropped segment
        duration_s: f32,
    },
    /// Speech ended; the finished segment is ready for transcription
    Flushed(SpeechSegment),
}

/// VAD plus the open segment and the minimum-duration policy
#[derive(Debug)]
pub struct Segmenter {
    vad: VoiceActivityDetector,
    open: SpeechSegment,
    open_samples: usize,
    sample_rate: u32,
    min_duration_s: f32,
    max_samples: usize,
}

impl Segmenter {
    /// Create a segmenter for audio at `sample_rate`
    #[must_use]
    pub fn new(vad: VoiceActivityDetector, sample_rate: u32, min_duration_s: f32) -> Self {
        Self {
            vad,
            open: SpeechSegment::new(sample_rate),
            open_samples: 0,
            sample_rate,
            min_duration_s,
            max_samples: duration_to_samples(DEFAULT_MAX_SPEECH_DURATION_S, sample_rate),
        }
    }

    /// Abandon open segments once they reach `max_duration_s`
    #[must_use]
    pub fn with_max_duration(mut self, max_duration_s: f32) -> Self {
        self.max_samples = duration_to_samples(max_duration_s, self.sample_rate);
        self
    }

    /// Feed the next chunk in arrival order
    pub fn push(&mut self, chunk: AudioChunk) -> SegmentOutcome {
        let result = self.vad.process_chunk(&chunk);

        if result.is_speaking {
            self.open_samples += chunk.len();
            self.open.push(chunk);
            if self.open_samples >= self.max_samples {
                let duration_s = self.take_segment().duration_s();
                tracing::warn!(
                    duration_s,
                    "speech ran past the maximum segment length, segment abandoned"
                );
                return SegmentOutcome::Overflowed { duration_s };
            }
            if result.speech_start {
                tracing::debug!(confidence = result.confidence, "speech started");
                return SegmentOutcome::Started {
                    confidence: result.confidence,
                };
            }
            return SegmentOutcome::Buffered;
        }

        if !result.speech_end || self.open.is_empty() {
            return SegmentOutcome::Idle;
        }

        let segment = self.take_segment();
        let duration_s = segment.duration_s();

        if duration_s < self.min_duration_s {
            tracing::debug!(
                duration_s,
                min = self.min_duration_s,
                "segment too short, discarded"
            );
            return SegmentOutcome::Discarded { duration_s };
        }

        tracing::debug!(
            duration_s,
            chunks = segment.chunk_count(),
            "segment flushed"
        );
        SegmentOutcome::Flushed(segment)
    }

    /// Drop the open segment without transcribing it
    ///
    /// Returns the dropped duration, or `None` if nothing was open. The VAD
    /// is reset only when there was something to drop.
    pub fn abandon(&mut self) -> Option<f32> {
        if self.open.is_empty() && !self.vad.is_speaking() {
            return None;
        }

        let segment = self.take_segment();
        Some(segment.duration_s())
    }

    /// Whether a segment is currently accumulating
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.open.is_empty()
    }

    /// The underlying detector
    #[must_use]
    pub const fn vad(&self) -> &VoiceActivityDetector {
        &self.vad
    }

    /// Replace the VAD threshold
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `threshold` is outside [0, 1]
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        self.vad.set_threshold(threshold)
    }

    /// Swap in a fresh segment and reset the VAD; the single boundary path
    fn take_segment(&mut self) -> SpeechSegment {
        let segment = mem::replace(&mut self.open, SpeechSegment::new(self.sample_rate));
        self.open_samples = 0;
        self.vad.reset();
        segment
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn duration_to_samples(duration_s: f32, sample_rate: u32) -> usize {
    (duration_s * sample_rate as f32).round().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::voice::vad::SpeechModel;

    struct LevelModel {
        resets: Arc<AtomicUsize>,
    }

    impl SpeechModel for LevelModel {
        fn confidence(&mut self, chunk: &[f32]) -> f32 {
            chunk.first().copied().unwrap_or(0.0)
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn segmenter(min_duration_s: f32) -> (Segmenter, Arc<AtomicUsize>) {
        let resets = Arc::new(AtomicUsize::new(0));
        let model = LevelModel {
            resets: Arc::clone(&resets),
        };
        let vad = VoiceActivityDetector::with_model(Box::new(model), 0.5);
        (Segmenter::new(vad, 16000, min_duration_s), resets)
    }

    fn feed(seg: &mut Segmenter, levels: &[f32]) -> Vec<SegmentOutcome> {
        levels
            .iter()
            .map(|&l| seg.push(AudioChunk::filled(l, 512)))
            .collect()
    }

    #[test]
    fn test_short_segment_discarded_with_one_reset() {
        let (mut seg, resets) = segmenter(0.8);
        let outcomes = feed(&mut seg, &[0.1, 0.1, 0.1, 0.8, 0.8, 0.8, 0.8, 0.8, 0.1, 0.1]);

        assert!(matches!(outcomes[3], SegmentOutcome::Started { .. }));
        match outcomes[8] {
            SegmentOutcome::Discarded { duration_s } => {
                assert!((duration_s - 0.16).abs() < 1e-6);
            }
            ref other => panic!("expected discard, got {other:?}"),
        }
        assert!(matches!(outcomes[9], SegmentOutcome::Idle));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert!(!seg.is_open());
    }

    #[test]
    fn test_long_segment_flushed() {
        let (mut seg, resets) = segmenter(0.8);
        let mut levels = vec![0.9; 30];
        levels.push(0.0);
        let outcomes = feed(&mut seg, &levels);

        let SegmentOutcome::Flushed(segment) = outcomes.last().unwrap() else {
            panic!("expected flush");
        };
        assert_eq!(segment.chunk_count(), 30);
        assert!((segment.duration_s() - 0.96).abs() < 1e-6);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consecutive_segments_each_reset_once() {
        let (mut seg, resets) = segmenter(0.0);
        feed(&mut seg, &[0.9, 0.9, 0.0, 0.0, 0.9, 0.0]);
        assert_eq!(resets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_abandon_drops_open_segment() {
        let (mut seg, resets) = segmenter(0.8);
        feed(&mut seg, &[0.9, 0.9, 0.9]);
        assert!(seg.is_open());

        let dropped = seg.abandon().unwrap();
        assert!((dropped - 0.096).abs() < 1e-6);
        assert!(!seg.is_open());
        assert!(!seg.vad().is_speaking());
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        // Nothing open: no second reset
        assert!(seg.abandon().is_none());
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_endless_speech_is_capped() {
        let (seg, resets) = segmenter(0.0);
        // 10 chunks of 512 samples at 16 kHz
        let mut seg = seg.with_max_duration(0.32);

        let outcomes = feed(&mut seg, &[0.9; 25]);

        let overflows: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| matches!(o, SegmentOutcome::Overflowed { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(overflows, vec![9, 19]);
        match outcomes[9] {
            SegmentOutcome::Overflowed { duration_s } => assert!((duration_s - 0.32).abs() < 1e-6),
            ref other => panic!("expected overflow, got {other:?}"),
        }
        // The next loud chunk opens a fresh segment
        assert!(matches!(outcomes[10], SegmentOutcome::Started { .. }));
        assert_eq!(resets.load(Ordering::SeqCst), 2);
        assert!(seg.is_open());
    }

    #[test]
    fn test_speech_after_abandon_starts_fresh() {
        let (mut seg, _) = segmenter(0.8);
        feed(&mut seg, &[0.9, 0.9]);
        seg.abandon();

        let outcomes = feed(&mut seg, &[0.9]);
        assert!(matches!(outcomes[0], SegmentOutcome::Started { .. }));
    }
}
