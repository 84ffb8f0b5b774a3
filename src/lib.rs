//! Hugo - voice-first personal assistant
//!
//! This library provides the real-time voice turn-taking pipeline:
//! - Microphone capture framed into fixed-size chunks
//! - Voice activity detection and utterance segmentation
//! - Speech-to-text with hallucination filtering
//! - Text-to-speech playback that pauses capture while speaking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Audio devices                      │
//! │        Microphone (cpal)   │   Speaker (cpal)        │
//! └────────────────────┬───────────────────▲────────────┘
//!                      │ chunks            │ samples
//! ┌────────────────────▼───────────────────┴────────────┐
//! │                  VoicePipeline                       │
//! │  Queue → VAD → Segmenter → STT  │  speak() → TTS     │
//! └────────────────────┬───────────────────▲────────────┘
//!                      │ transcripts       │ replies
//! ┌────────────────────▼───────────────────┴────────────┐
//! │                    Responder                         │
//! │          Chat model  │  Echo                         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventKind, TranscriptEvent};
pub use voice::{PipelineState, VoicePipeline};
