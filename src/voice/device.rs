//! Audio device access
//!
//! The pipeline only talks to [`AudioIo`], so tests can swap the sound card
//! for an in-memory fake. [`CpalAudio`] is the real implementation.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread and is
//! driven through a command channel. The handles returned here are plain
//! `Send` values the async pipeline can hold.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};

use crate::{Error, Result};

use super::audio::{ChunkFramer, resample};
use super::queue::ChunkSender;

/// Extra wait past the expected playback time before giving up on a drain
const DRAIN_MARGIN: Duration = Duration::from_millis(500);

/// Settle time after the output buffer empties so the device flushes its own buffer
const DRAIN_SETTLE: Duration = Duration::from_millis(100);

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Opens capture and playback streams
pub trait AudioIo: Send + Sync {
    /// Open a capture stream delivering fixed-size mono chunks into `sink`
    ///
    /// The stream is created stopped; call [`InputStream::start`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no suitable input device is available
    fn open_input(
        &self,
        sample_rate: u32,
        chunk_samples: usize,
        sink: ChunkSender,
    ) -> Result<Box<dyn InputStream>>;

    /// Open a playback stream accepting mono samples at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no suitable output device is available
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>>;
}

/// Handle to an open capture stream
pub trait InputStream: Send {
    /// Begin (or resume) delivering chunks
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device refuses to start
    fn start(&mut self) -> Result<()>;

    /// Pause delivery; the stream stays open
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device refuses to pause
    fn stop(&mut self) -> Result<()>;

    /// Release the device; further calls are no-ops
    fn close(&mut self);
}

/// Handle to an open playback stream
pub trait OutputStream: Send {
    /// Queue mono samples for playback
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the samples cannot be queued
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Block until everything written so far has been played
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the stream died before draining
    fn block_until_drained(&mut self) -> Result<()>;
}

/// Audio devices of the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalAudio;

impl CpalAudio {
    /// Use the default host
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Names of the default input and output devices, for diagnostics
    #[must_use]
    pub fn default_device_names() -> (Option<String>, Option<String>) {
        let host = cpal::default_host();
        let input = host.default_input_device().and_then(|d| d.name().ok());
        let output = host.default_output_device().and_then(|d| d.name().ok());
        (input, output)
    }
}

impl AudioIo for CpalAudio {
    fn open_input(
        &self,
        sample_rate: u32,
        chunk_samples: usize,
        sink: ChunkSender,
    ) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(CpalInput::spawn(sample_rate, chunk_samples, sink)?))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        Ok(Box::new(CpalOutput::spawn(sample_rate)?))
    }
}

/// Pick the f32 range that supports `rate`, preferring fewer channels
///
/// Stream callbacks are installed for `f32` samples only.
fn pick_config<I>(ranges: I, rate: u32) -> Option<SupportedStreamConfigRange>
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    ranges
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate))
        .min_by_key(SupportedStreamConfigRange::channels)
}

enum StreamCommand {
    Play(mpsc::Sender<Result<()>>),
    Pause(mpsc::Sender<Result<()>>),
    Close,
}

/// Send a command to a stream thread and wait for its reply
fn round_trip(
    commands: &mpsc::Sender<StreamCommand>,
    make: fn(mpsc::Sender<Result<()>>) -> StreamCommand,
) -> Result<()> {
    let (reply_tx, reply_rx) = mpsc::channel();
    commands
        .send(make(reply_tx))
        .map_err(|_| Error::Device("audio stream thread has exited".to_string()))?;
    reply_rx
        .recv()
        .map_err(|_| Error::Device("audio stream thread has exited".to_string()))?
}

/// Run the command loop for a stream owned by the current thread
fn serve_commands<S: StreamTrait>(stream: &S, commands: &mpsc::Receiver<StreamCommand>) {
    for command in commands {
        match command {
            StreamCommand::Play(reply) => {
                let _ = reply.send(stream.play().map_err(|e| Error::Device(e.to_string())));
            }
            StreamCommand::Pause(reply) => {
                let _ = reply.send(stream.pause().map_err(|e| Error::Device(e.to_string())));
            }
            StreamCommand::Close => break,
        }
    }
}

/// Capture stream owned by a dedicated thread
struct CpalInput {
    commands: mpsc::Sender<StreamCommand>,
    restart: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInput {
    fn spawn(sample_rate: u32, chunk_samples: usize, sink: ChunkSender) -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let restart = Arc::new(AtomicBool::new(false));
        let restart_flag = Arc::clone(&restart);

        let thread = std::thread::Builder::new()
            .name("hugo-capture".to_string())
            .spawn(move || {
                let stream =
                    match build_input_stream(sample_rate, chunk_samples, sink, restart_flag) {
                        Ok(stream) => {
                            // Some hosts start streams on build
                            let _ = stream.pause();
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                serve_commands(&stream, &command_rx);
                drop(stream);
                tracing::debug!("audio capture closed");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Device("audio capture thread exited during setup".to_string()))??;

        Ok(Self {
            commands,
            restart,
            thread: Some(thread),
        })
    }
}

fn build_input_stream(
    sample_rate: u32,
    chunk_samples: usize,
    sink: ChunkSender,
    restart: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Device("no input device available".to_string()))?;

    let ranges = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?;
    let config: StreamConfig = pick_config(ranges, sample_rate)
        .ok_or_else(|| {
            Error::Device(format!(
                "input device has no f32 capture format at {sample_rate} Hz"
            ))
        })?
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        chunk_samples,
        "audio capture initialized"
    );

    let mut framer = ChunkFramer::new(chunk_samples, usize::from(config.channels));
    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if sink.is_closed() {
                    return;
                }
                if restart.swap(false, Ordering::AcqRel) {
                    framer.clear();
                }
                framer.push(data, |chunk| {
                    sink.push(chunk);
                });
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))
}

impl InputStream for CpalInput {
    fn start(&mut self) -> Result<()> {
        self.restart.store(true, Ordering::Release);
        round_trip(&self.commands, StreamCommand::Play)?;
        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        round_trip(&self.commands, StreamCommand::Pause)?;
        tracing::debug!("audio capture stopped");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(StreamCommand::Close);
            if thread.join().is_err() {
                tracing::error!("audio capture thread panicked");
            }
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Playback stream owned by a dedicated thread, fed through a shared buffer
struct CpalOutput {
    commands: mpsc::Sender<StreamCommand>,
    buffer: Arc<Mutex<VecDeque<f32>>>,
    source_rate: u32,
    device_rate: u32,
    started: bool,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    fn spawn(source_rate: u32) -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let buffer = Arc::new(Mutex::new(VecDeque::new()));
        let shared = Arc::clone(&buffer);

        let thread = std::thread::Builder::new()
            .name("hugo-playback".to_string())
            .spawn(move || {
                let (stream, device_rate) = match build_output_stream(source_rate, shared) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(device_rate));
                serve_commands(&stream, &command_rx);
                drop(stream);
                tracing::debug!("audio playback closed");
            })?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| Error::Device("audio playback thread exited during setup".to_string()))??;

        Ok(Self {
            commands,
            buffer,
            source_rate,
            device_rate,
            started: false,
            thread: Some(thread),
        })
    }

    fn queued(&self) -> usize {
        self.buffer
            .lock()
            .map(|buf| buf.len())
            .unwrap_or_default()
    }
}

fn build_output_stream(
    source_rate: u32,
    buffer: Arc<Mutex<VecDeque<f32>>>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("no output device available".to_string()))?;

    let ranges = device
        .supported_output_configs()
        .map_err(|e| Error::Device(e.to_string()))?;
    let config: StreamConfig = match pick_config(ranges, source_rate) {
        Some(range) => range.with_sample_rate(SampleRate(source_rate)).config(),
        // Fall back to the device default and resample on write
        None => {
            let default = device
                .default_output_config()
                .map_err(|e| Error::Device(e.to_string()))?;
            if default.sample_format() != SampleFormat::F32 {
                return Err(Error::Device(format!(
                    "output device has no f32 playback format (default is {})",
                    default.sample_format()
                )));
            }
            default.config()
        }
    };
    let device_rate = config.sample_rate.0;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        source_rate,
        device_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut buf) = buffer.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = buf.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    Ok((stream, device_rate))
}

impl OutputStream for CpalOutput {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let resampled = resample(samples, self.source_rate, self.device_rate)?;
        self.buffer
            .lock()
            .map_err(|_| Error::Device("playback buffer poisoned".to_string()))?
            .extend(resampled);

        if !self.started {
            round_trip(&self.commands, StreamCommand::Play)?;
            self.started = true;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn block_until_drained(&mut self) -> Result<()> {
        let queued = self.queued();
        if queued == 0 {
            return Ok(());
        }

        let expected =
            Duration::from_millis((queued as u64 * 1000) / u64::from(self.device_rate.max(1)));
        let deadline = Instant::now() + expected + DRAIN_MARGIN;

        while self.queued() > 0 {
            if Instant::now() > deadline {
                let left = self.queued();
                if let Ok(mut buf) = self.buffer.lock() {
                    buf.clear();
                }
                return Err(Error::Device(format!(
                    "playback stalled with {left} samples left"
                )));
            }
            std::thread::sleep(DRAIN_POLL);
        }

        std::thread::sleep(DRAIN_SETTLE);
        tracing::debug!(samples = queued, "playback complete");
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(StreamCommand::Close);
            if thread.join().is_err() {
                tracing::error!("audio playback thread panicked");
            }
        }
    }
}
