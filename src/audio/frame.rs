// Audio frames handed in by the audio I/O layer
// Borrowed, read-only views over one callback buffer

use serde::{Deserialize, Serialize};

/// How multi-channel samples are arranged in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleLayout {
    /// L R L R ... (one sample per channel per frame, adjacent)
    #[default]
    Interleaved,

    /// LLLL... RRRR... (each channel stored contiguously)
    Planar,
}

/// One block of audio as delivered by the host callback.
///
/// The frame only borrows the samples; analysis never mutates or keeps them.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    samples: &'a [f32],
    channels: u16,
    sample_rate: u32,
    layout: SampleLayout,
}

impl<'a> AudioFrame<'a> {
    /// Create a frame over interleaved samples
    pub fn interleaved(samples: &'a [f32], channels: u16, sample_rate: u32) -> Self {
        AudioFrame {
            samples,
            channels,
            sample_rate,
            layout: SampleLayout::Interleaved,
        }
    }

    /// Create a frame over planar samples
    pub fn planar(samples: &'a [f32], channels: u16, sample_rate: u32) -> Self {
        AudioFrame {
            samples,
            channels,
            sample_rate,
            layout: SampleLayout::Planar,
        }
    }

    /// Create a single-channel frame
    pub fn mono(samples: &'a [f32], sample_rate: u32) -> Self {
        Self::interleaved(samples, 1, sample_rate)
    }

    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Downmixed (channel-averaged) sample at frame index `i`
    #[inline]
    pub fn mono_sample(&self, i: usize) -> f32 {
        let channels = self.channels as usize;
        if channels == 1 {
            return self.samples[i];
        }

        let frames = self.frame_count();
        let mut sum = 0.0;
        for ch in 0..channels {
            let idx = match self.layout {
                SampleLayout::Interleaved => i * channels + ch,
                SampleLayout::Planar => ch * frames + i,
            };
            sum += self.samples[idx];
        }
        sum / channels as f32
    }

    /// Downmix into a caller-provided buffer.
    /// Returns the number of samples written (bounded by `out.len()`).
    pub fn mix_to_mono(&self, out: &mut [f32]) -> usize {
        let count = self.frame_count().min(out.len());
        for (i, slot) in out.iter_mut().take(count).enumerate() {
            *slot = self.mono_sample(i);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_downmix() {
        // [L, R, L, R, L, R]
        let stereo = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let frame = AudioFrame::interleaved(&stereo, 2, 44100);

        let mut mono = [0.0; 3];
        assert_eq!(frame.mix_to_mono(&mut mono), 3);
        assert!((mono[0] - 0.15).abs() < 1e-6);
        assert!((mono[1] - 0.35).abs() < 1e-6);
        assert!((mono[2] - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_planar_downmix() {
        // [L L L, R R R]
        let planar = [0.1, 0.3, 0.5, 0.2, 0.4, 0.6];
        let frame = AudioFrame::planar(&planar, 2, 48000);

        assert_eq!(frame.frame_count(), 3);
        assert!((frame.mono_sample(1) - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_zero_channels_is_empty() {
        let frame = AudioFrame::interleaved(&[1.0, 2.0], 0, 44100);
        assert_eq!(frame.frame_count(), 0);

        let mut out = [0.0; 4];
        assert_eq!(frame.mix_to_mono(&mut out), 0);
    }
}
