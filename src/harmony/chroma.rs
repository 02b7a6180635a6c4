// Chroma extraction
// Folds spectral magnitudes into 12 pitch classes, peak-normalized and smoothed

use serde::{Deserialize, Serialize};

use crate::audio::SpectralFrame;
use crate::engine::Stage;

/// Pitch class 0..11, C = 0
pub type PitchClass = u8;

pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Name of a pitch class ("?" outside 0..11)
pub fn pitch_class_name(pc: PitchClass) -> &'static str {
    PITCH_CLASS_NAMES.get(pc as usize).copied().unwrap_or("?")
}

/// Energy per pitch class [C, C#, D, D#, E, F, F#, G, G#, A, A#, B]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChromaVector(pub [f32; 12]);

impl ChromaVector {
    /// Build from raw values; negative and non-finite entries become 0
    pub fn new(mut values: [f32; 12]) -> Self {
        for v in values.iter_mut() {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        ChromaVector(values)
    }

    /// Unit weight on each listed pitch class
    pub fn from_pitch_classes(pitch_classes: &[PitchClass]) -> Self {
        let mut values = [0.0; 12];
        for &pc in pitch_classes {
            values[(pc % 12) as usize] = 1.0;
        }
        ChromaVector(values)
    }

    pub fn values(&self) -> &[f32; 12] {
        &self.0
    }

    pub fn energy(&self) -> f32 {
        self.0.iter().sum()
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Strongest pitch class (lowest on ties); `None` for an all-zero vector
    pub fn dominant_pitch_class(&self) -> Option<PitchClass> {
        let mut best: Option<(usize, f32)> = None;
        for (pc, &v) in self.0.iter().enumerate() {
            if v > best.map(|(_, b)| b).unwrap_or(0.0) {
                best = Some((pc, v));
            }
        }
        best.map(|(pc, _)| pc as PitchClass)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaConfig {
    /// Reference tuning (A4) in Hz
    pub a4_freq: f32,

    /// Lowest bin frequency folded into the chroma
    pub min_freq: f32,

    /// Highest bin frequency folded into the chroma
    pub max_freq: f32,

    /// Weight of the previous smoothed vector [0.0, 1.0)
    pub smoothing: f32,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        ChromaConfig {
            a4_freq: 440.0,
            min_freq: 55.0,
            max_freq: 5000.0,
            smoothing: 0.6,
        }
    }
}

const NO_CLASS: u8 = u8::MAX;

pub struct ChromaExtractor {
    config: ChromaConfig,
    /// Pitch class of every FFT bin, NO_CLASS outside the folded range
    bin_classes: Vec<u8>,
    smoothed: [f32; 12],
    primed: bool,
}

impl ChromaExtractor {
    pub fn new(config: ChromaConfig, window_size: usize, sample_rate: u32) -> Self {
        let bin_count = window_size / 2 + 1;
        let bin_classes = (0..bin_count)
            .map(|bin| {
                let freq = crate::audio::spectrum::bin_frequency(bin, sample_rate, window_size);
                if freq < config.min_freq || freq > config.max_freq || freq <= 0.0 {
                    return NO_CLASS;
                }
                freq_to_pitch_class(freq, config.a4_freq)
            })
            .collect();

        ChromaExtractor {
            config,
            bin_classes,
            smoothed: [0.0; 12],
            primed: false,
        }
    }

    /// Current smoothed chroma
    pub fn current(&self) -> ChromaVector {
        ChromaVector(self.smoothed)
    }

    fn decay(&mut self) {
        let keep = self.config.smoothing.clamp(0.0, 1.0);
        self.smoothed.iter_mut().for_each(|v| *v *= keep);
    }
}

impl<'a> Stage<SpectralFrame<'a>> for ChromaExtractor {
    type Output = ChromaVector;

    fn process(&mut self, frame: &SpectralFrame<'a>) -> Option<ChromaVector> {
        if !frame.is_usable() {
            self.decay();
            return None;
        }

        let mut chroma = [0.0f32; 12];
        for (&class, &mag) in self.bin_classes.iter().zip(frame.magnitudes.iter()) {
            if class != NO_CLASS {
                chroma[class as usize] += mag * mag;
            }
        }

        // Energy -> amplitude, then peak-normalize
        for c in chroma.iter_mut() {
            *c = c.sqrt();
        }
        let max = chroma.iter().fold(0.0f32, |a, &b| a.max(b));
        if max <= 1e-10 {
            self.decay();
            return None;
        }
        for c in chroma.iter_mut() {
            *c /= max;
        }

        if self.primed {
            let keep = self.config.smoothing.clamp(0.0, 1.0);
            for (s, c) in self.smoothed.iter_mut().zip(chroma.iter()) {
                *s = keep * *s + (1.0 - keep) * c;
            }
        } else {
            self.smoothed = chroma;
            self.primed = true;
        }

        Some(ChromaVector(self.smoothed))
    }

    fn reset(&mut self) {
        self.smoothed = [0.0; 12];
        self.primed = false;
    }
}

/// Nearest equal-tempered pitch class of a frequency
fn freq_to_pitch_class(freq: f32, a4_freq: f32) -> u8 {
    let midi_note = 69.0 + 12.0 * (freq / a4_freq).log2();
    (midi_note.round() as i32).rem_euclid(12) as u8
}
