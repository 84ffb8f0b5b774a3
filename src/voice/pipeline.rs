//! Voice turn-taking pipeline
//!
//! ```text
//! Stopped ──start()──► Starting ──input open──► Listening ◄──┐
//!    ▲                                            │          │
//!    │                                       speak(text)   playback done
//!    │                                            ▼          │
//!    └────────────stop() from any state──── SpeakingPaused ──┘
//! ```
//!
//! The capture callback only frames audio and pushes chunks into a bounded
//! drop-oldest queue. A consumer task runs VAD and segmentation; each flushed
//! segment is transcribed on its own task so a slow backend never stalls
//! segmentation. `speak()` pauses capture, abandons any open segment, plays
//! the reply and resumes capture exactly once, on every exit path.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedMutexGuard, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, PipelineConfig};
use crate::events::{DiscardReason, EventBus, EventKind, TranscriptEvent, TranscriptSubscription};
use crate::{Error, Result};

use super::audio::SpeechSegment;
use super::device::{AudioIo, CpalAudio, InputStream};
use super::queue::{ChunkReceiver, ChunkSender, chunk_queue};
use super::segmenter::{SegmentOutcome, Segmenter};
use super::stt::TranscriptionService;
use super::tts::SpeechSynthesisService;
use super::vad::VoiceActivityDetector;

/// Lifecycle state of a [`VoicePipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// No input stream
    Stopped,
    /// Opening the input stream
    Starting,
    /// Chunks are segmented and transcribed
    Listening,
    /// Capture paused while the assistant speaks
    SpeakingPaused,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::SpeakingPaused => "speaking",
        };
        f.write_str(name)
    }
}

/// Assembles a [`VoicePipeline`] from its collaborators
pub struct VoicePipelineBuilder {
    vad: VoiceActivityDetector,
    stt: TranscriptionService,
    tts: SpeechSynthesisService,
    audio: Arc<dyn AudioIo>,
    config: PipelineConfig,
    events: EventBus,
}

impl VoicePipelineBuilder {
    /// Create a builder with default pipeline settings and a fresh event bus
    #[must_use]
    pub fn new(
        vad: VoiceActivityDetector,
        stt: TranscriptionService,
        tts: SpeechSynthesisService,
        audio: Arc<dyn AudioIo>,
    ) -> Self {
        Self {
            vad,
            stt,
            tts,
            audio,
            config: PipelineConfig::default(),
            events: EventBus::default(),
        }
    }

    /// Set sample rate, chunk size, queue capacity and speech duration bounds
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish on an existing event bus
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Build the pipeline in the `Stopped` state
    #[must_use]
    pub fn build(self) -> VoicePipeline {
        let segmenter = Segmenter::new(
            self.vad,
            self.config.sample_rate,
            self.config.min_speech_duration_s,
        )
        .with_max_duration(self.config.max_speech_duration_s);
        let (state, _) = watch::channel(PipelineState::Stopped);

        VoicePipeline {
            inner: Arc::new(Inner {
                config: self.config,
                segmenter: Mutex::new(segmenter),
                stt: Arc::new(self.stt),
                tts: self.tts,
                audio: self.audio,
                events: self.events,
                state,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                session: tokio::sync::Mutex::new(None),
                speaking: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }
}

/// Resources that exist only while the pipeline runs
struct Session {
    input: Box<dyn InputStream>,
    sender: ChunkSender,
    consumer: JoinHandle<()>,
}

struct Inner {
    config: PipelineConfig,
    segmenter: Mutex<Segmenter>,
    stt: Arc<TranscriptionService>,
    tts: SpeechSynthesisService,
    audio: Arc<dyn AudioIo>,
    events: EventBus,
    state: watch::Sender<PipelineState>,
    running: AtomicBool,
    /// Bumped by every `start()` and `stop()`; transcripts from an older
    /// session are never published
    generation: AtomicU64,
    session: tokio::sync::Mutex<Option<Session>>,
    /// Held from pause until capture has resumed, so turns never interleave
    speaking: Arc<tokio::sync::Mutex<()>>,
}

impl Inner {
    fn segmenter(&self) -> MutexGuard<'_, Segmenter> {
        self.segmenter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: PipelineState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::info!(from = %prev, to = %next, "pipeline state");
        }
    }

    fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Drop the open segment, if any, and publish why
    fn abandon_segment(&self, segmenter: &mut Segmenter, reason: DiscardReason) {
        if let Some(duration_s) = segmenter.abandon() {
            tracing::info!(duration_s, ?reason, "open segment abandoned");
            self.events
                .emit(EventKind::SegmentDiscarded { duration_s, reason });
        }
    }
}

/// Voice pipeline handle; clones share the same pipeline
#[derive(Clone)]
pub struct VoicePipeline {
    inner: Arc<Inner>,
}

impl VoicePipeline {
    /// Start assembling a pipeline
    #[must_use]
    pub fn builder(
        vad: VoiceActivityDetector,
        stt: TranscriptionService,
        tts: SpeechSynthesisService,
        audio: Arc<dyn AudioIo>,
    ) -> VoicePipelineBuilder {
        VoicePipelineBuilder::new(vad, stt, tts, audio)
    }

    /// Load every model from configuration and use the system audio devices
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if a model or backend cannot be loaded
    pub fn from_config(config: &Config) -> Result<Self> {
        let vad = VoiceActivityDetector::load(&config.vad, &config.pipeline)?;
        let stt = TranscriptionService::from_config(&config.stt, &config.api_keys)?;
        let tts = SpeechSynthesisService::from_config(&config.tts, &config.api_keys)?;

        Ok(Self::builder(vad, stt, tts, Arc::new(CpalAudio::new()))
            .config(config.pipeline.clone())
            .build())
    }

    /// Open the input stream and begin listening
    ///
    /// Calling `start()` on a running pipeline logs a warning and does nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the input stream cannot be opened or started;
    /// the pipeline is left `Stopped`
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        if session.is_some() {
            tracing::warn!("pipeline already running, ignoring start");
            return Ok(());
        }

        inner.set_state(PipelineState::Starting);

        let (sender, receiver) = chunk_queue(inner.config.queue_capacity);
        let mut input = match inner.audio.open_input(
            inner.config.sample_rate,
            inner.config.chunk_samples,
            sender.clone(),
        ) {
            Ok(input) => input,
            Err(e) => {
                inner.set_state(PipelineState::Stopped);
                return Err(e);
            }
        };

        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        inner.running.store(true, Ordering::Release);
        let consumer = tokio::spawn(consume(Arc::clone(inner), receiver, generation));

        if let Err(e) = input.start() {
            inner.running.store(false, Ordering::Release);
            input.close();
            sender.close();
            let _ = consumer.await;
            inner.set_state(PipelineState::Stopped);
            return Err(e);
        }

        inner.set_state(PipelineState::Listening);
        *session = Some(Session {
            input,
            sender,
            consumer,
        });

        tracing::info!(
            sample_rate = inner.config.sample_rate,
            chunk_samples = inner.config.chunk_samples,
            "voice pipeline started"
        );
        inner.events.emit(EventKind::PipelineStarted);
        Ok(())
    }

    /// Stop listening and release the input stream
    ///
    /// Any open segment is dropped without transcription. Safe to call
    /// repeatedly and from any state.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let Some(mut session) = inner.session.lock().await.take() else {
            tracing::debug!("pipeline already stopped");
            return;
        };

        inner.running.store(false, Ordering::Release);
        inner.generation.fetch_add(1, Ordering::AcqRel);
        {
            let mut segmenter = inner.segmenter();
            inner.set_state(PipelineState::Stopped);
            inner.abandon_segment(&mut segmenter, DiscardReason::Stopped);
        }

        if let Err(e) = session.input.stop() {
            tracing::warn!(error = %e, "failed to stop input stream");
        }
        session.input.close();
        session.sender.close();

        if let Err(e) = session.consumer.await {
            tracing::error!(error = %e, "chunk consumer ended abnormally");
        }

        tracing::info!("voice pipeline stopped");
        inner.events.emit(EventKind::PipelineStopped);
    }

    /// Speak `text` through the output device
    ///
    /// While running, capture is paused first and any open segment is
    /// abandoned, then capture is resumed exactly once after playback, whether
    /// or not playback succeeded. Blank text plays nothing. On a stopped
    /// pipeline the text is simply played.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceUnavailable` if synthesis fails, or
    /// `Error::Device` if playback fails
    pub async fn speak(&self, text: &str) -> Result<()> {
        let turn = Arc::clone(&self.inner.speaking).lock_owned().await;

        let resume = if self.pause_input().await {
            ResumeGuard::armed(self.clone(), turn)
        } else {
            ResumeGuard::disarmed(turn)
        };

        tracing::debug!(text, "speaking");
        self.inner.events.emit(EventKind::SpeakStarted {
            text: text.to_string(),
        });

        let result = self.play(text).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "speech playback failed");
        }

        resume.resume().await;
        self.inner.events.emit(EventKind::SpeakFinished);
        result
    }

    /// Replace the VAD threshold without restarting
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `threshold` is outside [0, 1]
    pub fn reload_vad_threshold(&self, threshold: f32) -> Result<()> {
        self.inner.segmenter().set_threshold(threshold)
    }

    /// Transcripts that passed filtering, in completion order
    #[must_use]
    pub fn subscribe_transcripts(&self) -> TranscriptSubscription {
        TranscriptSubscription::new(self.inner.events.subscribe())
    }

    /// Every pipeline event
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::Event> {
        self.inner.events.subscribe()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.inner.state()
    }

    /// Watch state transitions
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.state.subscribe()
    }

    /// Whether `start()` has succeeded and `stop()` has not been called since
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Pause capture for speech; returns whether there was capture to pause
    async fn pause_input(&self) -> bool {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        let Some(session) = session.as_mut() else {
            return false;
        };

        {
            let mut segmenter = inner.segmenter();
            inner.set_state(PipelineState::SpeakingPaused);
            inner.abandon_segment(&mut segmenter, DiscardReason::SpokenOver);
        }

        if let Err(e) = session.input.stop() {
            tracing::warn!(error = %e, "failed to pause capture");
        }
        true
    }

    /// Resume capture after speech unless the pipeline stopped meanwhile
    async fn resume_input(&self) {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        let Some(session) = session.as_mut() else {
            return;
        };

        if let Err(e) = session.input.start() {
            tracing::error!(error = %e, "failed to resume capture");
        }
        inner.set_state(PipelineState::Listening);
    }

    async fn play(&self, text: &str) -> Result<()> {
        let audio = self.inner.tts.synthesize(text).await?;
        if audio.is_empty() {
            return Ok(());
        }

        let io = Arc::clone(&self.inner.audio);
        tokio::task::spawn_blocking(move || {
            let mut output = io.open_output(audio.sample_rate)?;
            output.write(&audio.samples)?;
            output.block_until_drained()
        })
        .await
        .map_err(|e| Error::Device(format!("playback task failed: {e}")))?
    }
}

impl fmt::Debug for VoicePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoicePipeline")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Resumes capture when dropped, so a cancelled `speak()` cannot leave the
/// pipeline stuck in `SpeakingPaused`
///
/// Owns the speaking turn until capture has resumed; the next `speak()`
/// cannot pause capture before a deferred resume has run.
struct ResumeGuard {
    pipeline: Option<VoicePipeline>,
    turn: Option<OwnedMutexGuard<()>>,
}

impl ResumeGuard {
    fn armed(pipeline: VoicePipeline, turn: OwnedMutexGuard<()>) -> Self {
        Self {
            pipeline: Some(pipeline),
            turn: Some(turn),
        }
    }

    fn disarmed(turn: OwnedMutexGuard<()>) -> Self {
        Self {
            pipeline: None,
            turn: Some(turn),
        }
    }

    async fn resume(mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.resume_input().await;
        }
        self.turn.take();
    }
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        let turn = self.turn.take();
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pipeline.resume_input().await;
                drop(turn);
            });
        }
    }
}

/// Consume chunks in arrival order until the queue closes
async fn consume(inner: Arc<Inner>, mut receiver: ChunkReceiver, generation: u64) {
    let mut reported_drops = 0;

    while let Some(chunk) = receiver.recv().await {
        let dropped = receiver.dropped();
        if dropped > reported_drops {
            tracing::warn!(
                dropped = dropped - reported_drops,
                total = dropped,
                "audio queue full, oldest chunks dropped"
            );
            reported_drops = dropped;
        }

        let outcome = {
            let mut segmenter = inner.segmenter();
            if inner.state() != PipelineState::Listening {
                drop(segmenter);
                let stale = receiver.clear();
                tracing::trace!(stale, "chunk ignored while not listening");
                continue;
            }
            segmenter.push(chunk)
        };

        match outcome {
            SegmentOutcome::Idle | SegmentOutcome::Buffered => {}
            SegmentOutcome::Started { confidence } => {
                inner.events.emit(EventKind::SpeechStarted { confidence });
            }
            SegmentOutcome::Discarded { duration_s } => {
                inner.events.emit(EventKind::SpeechEnded { duration_s });
                inner.events.emit(EventKind::SegmentDiscarded {
                    duration_s,
                    reason: DiscardReason::TooShort,
                });
            }
            SegmentOutcome::Overflowed { duration_s } => {
                inner.events.emit(EventKind::SpeechEnded { duration_s });
                inner.events.emit(EventKind::SegmentDiscarded {
                    duration_s,
                    reason: DiscardReason::TooLong,
                });
            }
            SegmentOutcome::Flushed(segment) => {
                inner.events.emit(EventKind::SpeechEnded {
                    duration_s: segment.duration_s(),
                });
                tokio::spawn(transcribe(Arc::clone(&inner), segment, generation));
            }
        }
    }

    tracing::debug!("chunk consumer finished");
}

/// Transcribe one flushed segment and publish the result if the session that
/// produced it is still current
async fn transcribe(inner: Arc<Inner>, segment: SpeechSegment, generation: u64) {
    let duration_s = segment.duration_s();

    match inner.stt.transcribe(&segment).await {
        Ok(text) if text.is_empty() => {
            tracing::debug!(duration_s, "no usable transcript");
        }
        Ok(text) => {
            if inner.generation.load(Ordering::Acquire) != generation
                || !inner.running.load(Ordering::Acquire)
            {
                tracing::debug!(text = %text, "transcript dropped, session ended");
                return;
            }
            tracing::info!(text = %text, duration_s, "transcript");
            inner
                .events
                .emit(EventKind::TranscriptReady(TranscriptEvent {
                    text,
                    source_segment_duration: duration_s,
                }));
        }
        Err(e) => {
            tracing::warn!(error = %e, duration_s, "transcription failed, segment dropped");
        }
    }
}
