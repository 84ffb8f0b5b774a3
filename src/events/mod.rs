//! Voice event bus
//!
//! Publishes pipeline lifecycle and transcript events to any number of
//! in-process subscribers over a `tokio::sync::broadcast` channel.
//! Publishing is best-effort: with no subscribers the event is dropped, and a
//! subscriber that falls behind skips the oldest events rather than blocking
//! the publisher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default number of events buffered per subscriber
const DEFAULT_CAPACITY: usize = 256;

/// Source tag used for events emitted by the voice pipeline
pub const VOICE_SOURCE: &str = "voice";

/// A finished, filtered transcript of one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Transcribed text, trimmed
    pub text: String,
    /// Duration of the speech segment the text came from, in seconds
    pub source_segment_duration: f32,
}

/// Why a buffered segment never reached transcription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Shorter than the configured minimum speech duration
    TooShort,
    /// Ran past the configured maximum speech duration
    TooLong,
    /// Abandoned because the assistant started speaking over it
    SpokenOver,
    /// Released when the pipeline stopped
    Stopped,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Input stream opened, pipeline is listening
    PipelineStarted,
    /// Pipeline stopped and released the input stream
    PipelineStopped,
    /// VAD false→true edge
    SpeechStarted {
        /// Confidence of the chunk that opened the segment
        confidence: f32,
    },
    /// VAD true→false edge
    SpeechEnded {
        /// Buffered segment duration in seconds
        duration_s: f32,
    },
    /// A segment was dropped without transcription
    SegmentDiscarded {
        /// Buffered segment duration in seconds
        duration_s: f32,
        /// Why it was dropped
        reason: DiscardReason,
    },
    /// A transcript passed filtering
    TranscriptReady(TranscriptEvent),
    /// Capture paused, synthesis and playback begin
    SpeakStarted {
        /// Text being spoken
        text: String,
    },
    /// Playback finished (or failed) and capture resumed
    SpeakFinished,
}

/// An event published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID (UUID v4)
    pub id: Uuid,
    /// Event payload
    #[serde(flatten)]
    pub kind: EventKind,
    /// Emitting component
    pub source: String,
    /// UTC timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event {
    /// Create a new event with auto-generated `id` and `timestamp`
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source: VOICE_SOURCE.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Return this event with the given source set
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    /// Stable name of the event type (e.g. `"transcript_ready"`)
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self.kind {
            EventKind::PipelineStarted => "pipeline_started",
            EventKind::PipelineStopped => "pipeline_stopped",
            EventKind::SpeechStarted { .. } => "speech_started",
            EventKind::SpeechEnded { .. } => "speech_ended",
            EventKind::SegmentDiscarded { .. } => "segment_discarded",
            EventKind::TranscriptReady(_) => "transcript_ready",
            EventKind::SpeakStarted { .. } => "speak_started",
            EventKind::SpeakFinished => "speak_finished",
        }
    }
}

/// In-process publish/subscribe bus for voice events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event; returns the number of subscribers it reached
    pub fn publish(&self, event: Event) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => {
                tracing::trace!(event = name, subscribers = n, "published event");
                n
            }
            Err(_) => {
                tracing::trace!(event = name, "no subscribers for event");
                0
            }
        }
    }

    /// Shorthand for `publish(Event::new(kind))`
    pub fn emit(&self, kind: EventKind) -> usize {
        self.publish(Event::new(kind))
    }
}

/// Subscription filtered down to transcript events
pub struct TranscriptSubscription {
    rx: broadcast::Receiver<Event>,
}

impl TranscriptSubscription {
    /// Wrap a raw bus receiver
    #[must_use]
    pub const fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Wait for the next transcript
    ///
    /// Returns `None` once the bus is closed. Skipped (lagged) events are
    /// logged and otherwise ignored.
    pub async fn recv(&mut self) -> Option<TranscriptEvent> {
        loop {
            match self.rx.recv().await {
                Ok(Event {
                    kind: EventKind::TranscriptReady(transcript),
                    ..
                }) => return Some(transcript),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "transcript subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
