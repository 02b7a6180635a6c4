// WAV ingestion for offline analysis
// Reads a file into normalized interleaved f32 and replays it as callback-sized frames

use hound::{SampleFormat, WavReader};
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;

use super::frame::AudioFrame;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV file: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid audio data")]
    InvalidData,
}

#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples normalized to f32 in range [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Bit depth of original audio (8, 16, 24, 32)
    pub bit_depth: u16,

    /// Total number of frames (samples / channels)
    pub frame_count: usize,
}

impl AudioData {
    /// Wrap already-decoded interleaved samples
    pub fn from_interleaved(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let frame_count = if channels == 0 {
            0
        } else {
            samples.len() / channels as usize
        };

        AudioData {
            samples,
            sample_rate,
            channels,
            bit_depth: 32,
            frame_count,
        }
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// The whole file as one frame
    pub fn as_frame(&self) -> AudioFrame<'_> {
        AudioFrame::interleaved(&self.samples, self.channels, self.sample_rate)
    }

    /// Replay the file in blocks of `block_frames` sample frames,
    /// the way an audio callback would deliver it
    pub fn blocks(&self, block_frames: usize) -> impl Iterator<Item = AudioFrame<'_>> {
        let chunk = block_frames.max(1) * self.channels.max(1) as usize;
        let channels = self.channels;
        let sample_rate = self.sample_rate;
        self.samples
            .chunks(chunk)
            .map(move |block| AudioFrame::interleaved(block, channels, sample_rate))
    }
}

/// Ingest a WAV file from disk
pub fn ingest_wav_file(path: &Path) -> Result<AudioData, AudioError> {
    let reader = WavReader::open(path)?;
    read_wav(reader)
}

/// Ingest a WAV file from raw bytes
pub fn ingest_wav(data: &[u8]) -> Result<AudioData, AudioError> {
    let reader = WavReader::new(Cursor::new(data))?;
    read_wav(reader)
}

fn read_wav<R: Read>(mut reader: WavReader<R>) -> Result<AudioData, AudioError> {
    let spec = reader.spec();
    let bit_depth = spec.bits_per_sample;

    if spec.channels == 0 {
        return Err(AudioError::InvalidData);
    }

    // Normalize every integer width to [-1.0, 1.0]
    let samples: Vec<f32> = match (spec.sample_format, bit_depth) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|s| s as f32 / 128.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8388608.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2147483648.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        _ => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                spec.sample_format, bit_depth
            )));
        }
    };

    let mut audio = AudioData::from_interleaved(samples, spec.sample_rate, spec.channels);
    audio.bit_depth = bit_depth;

    log::debug!(
        "Ingested WAV: {} Hz, {} channels, {} bit, {:.2}s",
        audio.sample_rate,
        audio.channels,
        audio.bit_depth,
        audio.duration_secs()
    );

    Ok(audio)
}
