//! Shared test utilities
//!
//! Hardware- and network-free stand-ins for the pipeline's collaborators.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use hugo_voice::config::PipelineConfig;
use hugo_voice::events::{Event, EventKind};
use hugo_voice::voice::{
    AudioChunk, AudioIo, ChunkSender, InputStream, OutputStream, SpeechModel, SpeechSegment,
    SpeechSynthesisService, SynthesizedAudio, Synthesizer, Transcriber, TranscriptionService,
    VoiceActivityDetector, VoicePipeline,
};
use hugo_voice::{Error, Result};

/// Samples per test chunk (32 ms at 16 kHz)
pub const CHUNK: usize = 512;

/// Chunk whose level doubles as the scripted VAD confidence
#[must_use]
pub fn chunk(level: f32) -> AudioChunk {
    AudioChunk::filled(level, CHUNK)
}

/// Generate sine wave audio samples
#[must_use]
pub fn generate_sine_samples(
    frequency: f32,
    duration_secs: f32,
    amplitude: f32,
    sample_rate: u32,
) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[must_use]
pub fn generate_silence(duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Speech model that reports each chunk's first sample as its confidence
pub struct LevelModel {
    pub resets: Arc<AtomicUsize>,
}

impl SpeechModel for LevelModel {
    fn confidence(&mut self, chunk: &[f32]) -> f32 {
        chunk.first().copied().unwrap_or(0.0)
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "level"
    }
}

/// Detector over [`LevelModel`] plus its reset counter
#[must_use]
pub fn level_vad(threshold: f32) -> (VoiceActivityDetector, Arc<AtomicUsize>) {
    let resets = Arc::new(AtomicUsize::new(0));
    let model = LevelModel {
        resets: Arc::clone(&resets),
    };
    (
        VoiceActivityDetector::with_model(Box::new(model), threshold),
        resets,
    )
}

/// Transcriber that replays scripted results and counts calls
pub struct ScriptedTranscriber {
    script: Mutex<VecDeque<Result<String>>>,
    fallback: String,
    delay: Duration,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
    pub durations: Mutex<Vec<f32>>,
}

impl ScriptedTranscriber {
    /// Always answer `text`
    #[must_use]
    pub fn replying(text: &str) -> Arc<Self> {
        Self::scripted(Vec::new(), text)
    }

    /// Answer from `script` first, then `fallback`
    #[must_use]
    pub fn scripted(script: Vec<Result<String>>, fallback: &str) -> Arc<Self> {
        Self::build(script, fallback, Duration::ZERO)
    }

    /// Always answer `text`, but only after `delay`
    #[must_use]
    pub fn delayed(text: &str, delay: Duration) -> Arc<Self> {
        Self::build(Vec::new(), text, delay)
    }

    fn build(script: Vec<Result<String>>, fallback: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: fallback.to_string(),
            delay,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            durations: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that have returned a result
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, segment: &SpeechSegment) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.durations.lock().unwrap().push(segment.duration_s());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        self.completed.fetch_add(1, Ordering::SeqCst);
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Synthesizer producing a fixed buffer, or failing on demand
pub struct FakeSynthesizer {
    pub calls: AtomicUsize,
    fail: bool,
    delay: Duration,
}

impl FakeSynthesizer {
    #[must_use]
    pub fn working() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
            delay: Duration::ZERO,
        })
    }

    /// Succeeds, but each synthesis takes `delay`
    #[must_use]
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(Error::ServiceUnavailable("synthesizer offline".to_string()));
        }
        Ok(SynthesizedAudio {
            samples: vec![0.1; 2400],
            sample_rate: 24000,
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// In-memory audio devices that log every call in order
#[derive(Default)]
pub struct RecordingAudio {
    log: Arc<Mutex<Vec<String>>>,
    sink: Mutex<Option<ChunkSender>>,
    pub fail_output: bool,
}

impl RecordingAudio {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn with_broken_speaker() -> Arc<Self> {
        Arc::new(Self {
            fail_output: true,
            ..Self::default()
        })
    }

    /// Every device call so far
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// How many times `op` was recorded
    #[must_use]
    pub fn count(&self, op: &str) -> usize {
        self.log().iter().filter(|entry| entry.as_str() == op).count()
    }

    /// Deliver a chunk as if the microphone produced it
    pub fn feed(&self, level: f32) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.push(chunk(level));
        }
    }

    /// Deliver chunks with the given levels in order
    pub fn feed_all(&self, levels: &[f32]) {
        for &level in levels {
            self.feed(level);
        }
    }
}

impl AudioIo for RecordingAudio {
    fn open_input(
        &self,
        _sample_rate: u32,
        _chunk_samples: usize,
        sink: ChunkSender,
    ) -> Result<Box<dyn InputStream>> {
        self.log.lock().unwrap().push("input.open".to_string());
        *self.sink.lock().unwrap() = Some(sink);
        Ok(Box::new(RecordingInput {
            log: Arc::clone(&self.log),
        }))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        self.log.lock().unwrap().push("output.open".to_string());
        Ok(Box::new(RecordingOutput {
            log: Arc::clone(&self.log),
            fail: self.fail_output,
        }))
    }
}

struct RecordingInput {
    log: Arc<Mutex<Vec<String>>>,
}

impl InputStream for RecordingInput {
    fn start(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("input.start".to_string());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("input.stop".to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().push("input.close".to_string());
    }
}

struct RecordingOutput {
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl OutputStream for RecordingOutput {
    fn write(&mut self, _samples: &[f32]) -> Result<()> {
        self.log.lock().unwrap().push("output.write".to_string());
        if self.fail {
            return Err(Error::Device("speaker unplugged".to_string()));
        }
        Ok(())
    }

    fn block_until_drained(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("output.drain".to_string());
        Ok(())
    }
}

/// A pipeline wired to fakes, plus handles to inspect them
pub struct Harness {
    pub pipeline: VoicePipeline,
    pub audio: Arc<RecordingAudio>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub resets: Arc<AtomicUsize>,
    pub events: broadcast::Receiver<Event>,
}

impl Harness {
    #[must_use]
    pub fn new(
        transcriber: Arc<ScriptedTranscriber>,
        synthesizer: Arc<FakeSynthesizer>,
        audio: Arc<RecordingAudio>,
    ) -> Self {
        let (vad, resets) = level_vad(0.5);
        let stt = TranscriptionService::new(transcriber.clone(), Duration::from_secs(5));
        let tts = SpeechSynthesisService::new(synthesizer.clone(), Duration::from_secs(5));
        let config = PipelineConfig {
            sample_rate: 16000,
            chunk_samples: CHUNK,
            queue_capacity: 64,
            min_speech_duration_s: 0.8,
            max_speech_duration_s: 3.0,
        };

        let pipeline = VoicePipeline::builder(vad, stt, tts, audio.clone())
            .config(config)
            .build();
        let events = pipeline.subscribe();

        Self {
            pipeline,
            audio,
            transcriber,
            synthesizer,
            resets,
            events,
        }
    }

    /// Default harness: transcripts say "turn on the lights"
    #[must_use]
    pub fn standard() -> Self {
        Self::new(
            ScriptedTranscriber::replying("turn on the lights"),
            FakeSynthesizer::working(),
            RecordingAudio::new(),
        )
    }

    /// Wait for the first event matching `pred`, skipping others
    pub async fn wait_for<F>(&mut self, mut pred: F) -> EventKind
    where
        F: FnMut(&EventKind) -> bool,
    {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event.kind) => return event.kind,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for event")
    }

    /// Events published so far that nobody has consumed yet
    pub fn drain_events(&mut self) -> Vec<EventKind> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event.kind);
        }
        out
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}
