//! Decoding of streamed speech chunks.
//!
//! A chunk arrives as base64 text holding a complete MP3 or WAV file. The
//! [`AudioChunkDecoder`] turns it into a [`DecodedBuffer`]: mono f32 samples
//! at the mixer's output rate. Decoding runs on the blocking pool so the
//! session loop never waits on it; several decodes may be in flight at once
//! and may finish in any order.

use api::{AudioChunk, SpeakerId};
use base64::{Engine as _, engine::general_purpose};
use rubato::{FftFixedIn, Resampler};
use std::{io::Cursor, sync::Arc, time::Duration};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, trace};

/// Input chunk size used when resampling.
const RESAMPLE_CHUNK: usize = 1024;

/// Why a chunk could not be turned into playable audio.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("unsupported audio format: {0}")]
    Unsupported(String),
    #[error("no audio track in payload")]
    NoAudioTrack,
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("payload decoded to no samples")]
    Empty,
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("decode task aborted: {0}")]
    Aborted(String),
}

/// A failed decode, tagged with the speaker whose chunk was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to decode audio for player {speaker}: {kind}")]
pub struct DecodeError {
    pub speaker: SpeakerId,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub fn new(speaker: SpeakerId, kind: DecodeErrorKind) -> Self {
        Self { speaker, kind }
    }
}

/// A playable unit of mono audio. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    speaker: SpeakerId,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl DecodedBuffer {
    pub fn new(speaker: SpeakerId, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            speaker,
            sample_rate,
            samples: samples.into(),
        }
    }

    pub fn speaker(&self) -> SpeakerId {
        self.speaker
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Decodes base64 speech chunks into buffers at a fixed output rate.
#[derive(Debug, Clone, Copy)]
pub struct AudioChunkDecoder {
    output_rate: u32,
}

impl AudioChunkDecoder {
    pub fn new(output_rate: u32) -> Self {
        Self { output_rate }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Decode a chunk on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn decode(&self, chunk: AudioChunk) -> Result<DecodedBuffer, DecodeError> {
        let decoder = *self;
        let speaker = chunk.speaker;
        match tokio::task::spawn_blocking(move || decoder.decode_blocking(&chunk)).await {
            Ok(result) => result,
            Err(e) => Err(DecodeError::new(speaker, DecodeErrorKind::Aborted(e.to_string()))),
        }
    }

    /// Decode a chunk on the current thread.
    pub fn decode_blocking(&self, chunk: &AudioChunk) -> Result<DecodedBuffer, DecodeError> {
        let speaker = chunk.speaker;
        let fail = |kind| DecodeError::new(speaker, kind);

        let bytes = general_purpose::STANDARD
            .decode(chunk.payload.trim())
            .map_err(|e| fail(DecodeErrorKind::InvalidBase64(e.to_string())))?;

        let (samples, source_rate) = decode_mono(bytes).map_err(fail)?;
        if samples.is_empty() {
            return Err(fail(DecodeErrorKind::Empty));
        }

        let samples = if source_rate == self.output_rate {
            samples
        } else {
            resample(&samples, source_rate, self.output_rate).map_err(fail)?
        };

        debug!(
            speaker = speaker.get(),
            source_rate,
            samples = samples.len(),
            "codec: decoded chunk"
        );
        Ok(DecodedBuffer::new(speaker, self.output_rate, samples))
    }
}

/// Decode a complete audio file to mono f32 samples at its native rate.
fn decode_mono(bytes: Vec<u8>) -> Result<(Vec<f32>, u32), DecodeErrorKind> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeErrorKind::Unsupported(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeErrorKind::NoAudioTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeErrorKind::Codec(e.to_string()))?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(DecodeErrorKind::Codec(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                trace!("codec: skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeErrorKind::Codec(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count().max(1);

        let mut interleaved = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        interleaved.copy_interleaved_ref(decoded);
        mono.extend(
            interleaved
                .samples()
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    let sample_rate = sample_rate
        .ok_or_else(|| DecodeErrorKind::Unsupported("unknown sample rate".to_string()))?;
    Ok((mono, sample_rate))
}

/// Resample mono audio, trimming the resampler delay so the output lines up
/// with the input.
fn resample(input: &[f32], from: u32, to: u32) -> Result<Vec<f32>, DecodeErrorKind> {
    let err = |e: &dyn std::fmt::Display| DecodeErrorKind::Resample(e.to_string());

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
        .map_err(|e| err(&e))?;
    let expected = (input.len() as u64 * to as u64 / from as u64) as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0;
    while input.len() - position >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let frames = resampler
            .process(&[&input[position..position + needed]], None)
            .map_err(|e| err(&e))?;
        output.extend_from_slice(&frames[0]);
        position += needed;
    }
    if position < input.len() {
        let frames = resampler
            .process_partial(Some(&[&input[position..]]), None)
            .map_err(|e| err(&e))?;
        output.extend_from_slice(&frames[0]);
    }
    // Flush until the delayed tail is out.
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| err(&e))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    let mut samples: Vec<f32> = output.into_iter().skip(delay).collect();
    samples.truncate(expected);
    Ok(samples)
}
