//! Voice processing module
//!
//! Handles capture, voice activity detection, segmentation, transcription,
//! synthesis and playback. [`VoicePipeline`] ties them together.

pub mod audio;
pub mod device;
pub mod pipeline;
pub mod queue;
pub mod segmenter;
pub mod stt;
pub mod tts;
pub mod vad;

pub use audio::{AudioChunk, ChunkFramer, SpeechSegment, decode_mp3, resample, samples_to_wav};
pub use device::{AudioIo, CpalAudio, InputStream, OutputStream};
pub use pipeline::{PipelineState, VoicePipeline, VoicePipelineBuilder};
pub use queue::{ChunkReceiver, ChunkSender, chunk_queue};
pub use segmenter::{SegmentOutcome, Segmenter};
pub use stt::{Transcriber, TranscriptionService, filter_transcript};
pub use tts::{SpeechSynthesisService, SynthesizedAudio, Synthesizer};
pub use vad::{EnergyModel, SpeechModel, VadResult, VoiceActivityDetector, calculate_rms};

#[cfg(feature = "silero")]
pub use vad::SileroModel;
