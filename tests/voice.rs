//! Voice component integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;

use proptest::prelude::*;

use hugo_voice::voice::{
    AudioChunk, ChunkFramer, EnergyModel, SegmentOutcome, Segmenter, SpeechSegment,
    VoiceActivityDetector, chunk_queue, filter_transcript, samples_to_wav,
};

mod common;

use common::{CHUNK, chunk, generate_silence, generate_sine_samples, level_vad};

const SAMPLE_RATE: u32 = 16000;

#[test]
fn test_vad_edges_on_scripted_confidences() {
    let (mut vad, _) = level_vad(0.5);
    let levels = [0.1, 0.1, 0.1, 0.8, 0.8, 0.8, 0.8, 0.8, 0.1, 0.1];

    let results: Vec<_> = levels
        .iter()
        .map(|&l| vad.process_chunk(&chunk(l)))
        .collect();

    let starts: Vec<usize> = (0..results.len()).filter(|&i| results[i].speech_start).collect();
    let ends: Vec<usize> = (0..results.len()).filter(|&i| results[i].speech_end).collect();
    // Chunk numbers are 1-based: start on the 4th, end on the 9th
    assert_eq!(starts, vec![3]);
    assert_eq!(ends, vec![8]);
    assert_eq!(results.iter().filter(|r| r.is_speaking).count(), 5);
}

#[test]
fn test_segmenter_buffers_speech_chunks_only() {
    let (vad, resets) = level_vad(0.5);
    let mut segmenter = Segmenter::new(vad, SAMPLE_RATE, 0.0);

    let mut flushed = None;
    for &level in &[0.1, 0.1, 0.1, 0.8, 0.8, 0.8, 0.8, 0.8, 0.1, 0.1] {
        if let SegmentOutcome::Flushed(segment) = segmenter.push(chunk(level)) {
            flushed = Some(segment);
        }
    }

    let segment = flushed.expect("segment should flush on the end edge");
    assert_eq!(segment.chunk_count(), 5);
    assert!((segment.duration_s() - 0.16).abs() < 1e-6);
    assert_eq!(resets.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_energy_model_separates_tone_from_silence() {
    let mut vad = VoiceActivityDetector::with_model(Box::new(EnergyModel::default()), 0.5);

    let silence = generate_silence(0.2, SAMPLE_RATE);
    for block in silence.chunks(CHUNK) {
        assert!(!vad.process_samples(block).is_speaking);
    }

    let tone = generate_sine_samples(440.0, 0.2, 0.3, SAMPLE_RATE);
    let speaking = tone
        .chunks(CHUNK)
        .map(|block| vad.process_samples(block))
        .any(|r| r.is_speaking);
    assert!(speaking);
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5, SAMPLE_RATE);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // WAV should have reasonable size
    assert!(wav_data.len() > 44); // WAV header is 44 bytes
}

#[test]
fn test_segment_wav_readback() {
    let segment = SpeechSegment::from_chunks(
        vec![
            AudioChunk::new(vec![0.0, 0.5, -0.5]),
            AudioChunk::new(vec![1.0, -1.0, 0.25]),
        ],
        SAMPLE_RATE,
    );
    let wav_data = segment.to_wav().unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples, vec![0, 16383, -16383, 32767, -32767, 8191]);
}

#[test]
fn test_framer_feeds_fixed_chunks_from_ragged_callbacks() {
    let mut framer = ChunkFramer::new(CHUNK, 2);
    let mut chunks = Vec::new();

    // 1.5 chunks of stereo per callback
    let callback = vec![0.2f32; CHUNK * 3];
    for _ in 0..4 {
        framer.push(&callback, |c| chunks.push(c));
    }

    assert_eq!(chunks.len(), 6);
    assert!(chunks.iter().all(|c| c.len() == CHUNK));
    assert_eq!(framer.pending(), 0);
}

#[test]
fn test_queue_keeps_newest_when_consumer_stalls() {
    let (tx, mut rx) = chunk_queue(4);

    for i in 0..10u8 {
        tx.push(chunk(f32::from(i)));
    }

    assert_eq!(rx.dropped(), 6);
    let mut kept = Vec::new();
    while let Some(c) = rx.try_recv() {
        kept.push(c.samples()[0]);
    }
    assert_eq!(kept, vec![6.0, 7.0, 8.0, 9.0]);
}

#[test]
fn test_transcript_filtering() {
    assert_eq!(
        filter_transcript("  Turn on the lights. ", false).as_deref(),
        Some("Turn on the lights.")
    );
    assert_eq!(filter_transcript("Thank you.", false), None);
    assert_eq!(filter_transcript("You", false), None);
    assert_eq!(filter_transcript("k", false), None);
    assert_eq!(filter_transcript("", false), None);

    let echo = "Transcribe this audio exactly as spoken";
    assert_eq!(filter_transcript(echo, true), None);
    assert!(filter_transcript(echo, false).is_some());
}

proptest! {
    /// Edges match the thresholded confidence sequence exactly
    #[test]
    fn prop_vad_edges_follow_threshold(
        levels in proptest::collection::vec(0.0f32..=1.0, 1..200),
        threshold in 0.05f32..0.95,
    ) {
        let (mut vad, _) = level_vad(threshold);
        let mut prev = false;

        for level in levels {
            let result = vad.process_samples(&[level]);
            let speaking = level >= threshold;

            prop_assert_eq!(result.is_speaking, speaking);
            prop_assert_eq!(result.speech_start, !prev && speaking);
            prop_assert_eq!(result.speech_end, prev && !speaking);
            prev = speaking;
        }
    }

    /// Every segment shorter than the minimum is discarded, never flushed
    #[test]
    fn prop_short_segments_never_flush(speech_chunks in 1usize..25) {
        let (vad, resets) = level_vad(0.5);
        let mut segmenter = Segmenter::new(vad, SAMPLE_RATE, 0.8);

        let mut levels = vec![0.9; speech_chunks];
        levels.push(0.0);

        let mut flushed = 0;
        let mut discarded = 0;
        for level in levels {
            match segmenter.push(chunk(level)) {
                SegmentOutcome::Flushed(_) => flushed += 1,
                SegmentOutcome::Discarded { .. } => discarded += 1,
                _ => {}
            }
        }

        // 25 chunks of 512 samples at 16 kHz is exactly 0.8 s
        prop_assert_eq!(flushed, 0);
        prop_assert_eq!(discarded, 1);
        prop_assert_eq!(resets.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
