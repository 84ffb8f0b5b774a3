//! Audio buffers and format conversion
//!
//! `AudioChunk` is the fixed-size unit the capture callback produces and the
//! VAD consumes. `SpeechSegment` is the ordered run of speech chunks between a
//! speech-start and a speech-end edge.

use std::io::Cursor;
use std::sync::Arc;

use crate::{Error, Result};

/// Immutable block of mono samples
///
/// Cloning is cheap (shared buffer), so a chunk can be handed from the
/// callback to the queue and on into a segment without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Arc<[f32]>,
}

impl AudioChunk {
    /// Wrap a block of mono samples
    #[must_use]
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// Chunk of `len` samples all set to `value`
    #[must_use]
    pub fn filled(value: f32, len: usize) -> Self {
        Self::new(vec![value; len])
    }

    /// The samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Ordered speech chunks forming one utterance
#[derive(Debug, Clone, Default)]
pub struct SpeechSegment {
    chunks: Vec<AudioChunk>,
    sample_rate: u32,
}

impl SpeechSegment {
    /// Start an empty segment at the given sample rate
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            chunks: Vec::new(),
            sample_rate,
        }
    }

    /// Build a segment from existing chunks
    #[must_use]
    pub const fn from_chunks(chunks: Vec<AudioChunk>, sample_rate: u32) -> Self {
        Self {
            chunks,
            sample_rate,
        }
    }

    /// Append a chunk
    pub fn push(&mut self, chunk: AudioChunk) {
        self.chunks.push(chunk);
    }

    /// Number of buffered chunks
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total number of samples
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(AudioChunk::len).sum()
    }

    /// Whether no chunk has been buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_s(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count() as f32 / self.sample_rate as f32
    }

    /// Concatenate all chunks into one buffer
    #[must_use]
    pub fn to_samples(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.sample_count());
        for chunk in &self.chunks {
            out.extend_from_slice(chunk.samples());
        }
        out
    }

    /// Encode as 16-bit mono WAV for STT APIs
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.to_samples(), self.sample_rate)
    }
}

/// Re-frames arbitrary callback buffers into fixed-size mono chunks
///
/// Interleaved multi-channel input is averaged down to mono first. Leftover
/// samples are carried over to the next call.
#[derive(Debug)]
pub struct ChunkFramer {
    chunk_samples: usize,
    channels: usize,
    pending: Vec<f32>,
}

impl ChunkFramer {
    /// Create a framer producing chunks of `chunk_samples` mono samples
    #[must_use]
    pub fn new(chunk_samples: usize, channels: usize) -> Self {
        Self {
            chunk_samples: chunk_samples.max(1),
            channels: channels.max(1),
            pending: Vec::with_capacity(chunk_samples.max(1)),
        }
    }

    /// Feed interleaved samples, calling `emit` once per completed chunk
    #[allow(clippy::cast_precision_loss)]
    pub fn push<F>(&mut self, interleaved: &[f32], mut emit: F)
    where
        F: FnMut(AudioChunk),
    {
        for frame in interleaved.chunks(self.channels) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            self.pending.push(mono);

            if self.pending.len() == self.chunk_samples {
                let full = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.chunk_samples),
                );
                emit(AudioChunk::new(full));
            }
        }
    }

    /// Samples waiting for a full chunk
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop a partial chunk so audio from before a pause is not glued to what follows
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Device(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Device(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Device(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
///
/// Empty input decodes to an empty buffer.
///
/// # Errors
///
/// Returns error if the data is not valid MP3
#[allow(clippy::cast_sign_loss)]
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, Option<u32>)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = Some(frame.sample_rate as u32);
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Device(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Resample mono audio using rubato
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Device(format!("resampler init failed: {e}")))?;

    let mut input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    // Pad the tail so the last partial block is not lost
    let remainder = input.len() % chunk_size;
    if remainder != 0 {
        input.resize(input.len() + chunk_size - remainder, 0.0);
    }

    let mut output = Vec::with_capacity(input.len() * to_rate as usize / from_rate as usize);
    for block in input.chunks(chunk_size) {
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Device(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}
