// Onset detection
// Streaming spectral flux with an adaptive mean + k * stddev threshold

use serde::{Deserialize, Serialize};

use crate::audio::{AudioData, SpectralFrame, SpectrumAnalyzer};
use crate::engine::Stage;

/// Onset detection result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    /// Session sample index of the onset
    pub timestamp_samples: u64,

    /// Onset strength [0.0, 1.0]
    /// Fraction of the flux that exceeded the adaptive threshold
    pub strength: f32,
}

/// Configuration for onset detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    /// Threshold multiplier for adaptive peak picking
    /// Threshold = mean(flux) + threshold_factor * std(flux)
    pub threshold_factor: f32,

    /// Minimum time between onsets in milliseconds
    /// Prevents duplicate detections
    pub min_onset_gap_ms: f64,

    /// Number of past flux values the threshold is computed over
    pub history_len: usize,

    /// Lower bound for the adaptive threshold (normalized flux units)
    pub min_threshold: f32,

    /// Per-frame decay of the previous spectrum while the input is silent
    pub silence_decay: f32,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        OnsetConfig {
            threshold_factor: 1.5,
            min_onset_gap_ms: 50.0,
            history_len: 16,
            min_threshold: 1e-5,
            silence_decay: 0.5,
        }
    }
}

/// Streaming onset detector. One call per analysis frame.
pub struct OnsetDetector {
    config: OnsetConfig,
    sample_rate: u32,
    min_gap_samples: u64,

    prev_spectrum: Vec<f32>,
    history: Vec<f32>,
    history_pos: usize,
    history_filled: usize,
    last_onset: Option<u64>,
    last_flux: f32,
}

impl OnsetDetector {
    pub fn new(config: OnsetConfig, bin_count: usize, sample_rate: u32) -> Self {
        let history_len = config.history_len.max(2);
        let min_gap_samples = gap_samples(config.min_onset_gap_ms, sample_rate);

        OnsetDetector {
            config,
            sample_rate,
            min_gap_samples,
            prev_spectrum: vec![0.0; bin_count],
            history: vec![0.0; history_len],
            history_pos: 0,
            history_filled: 0,
            last_onset: None,
            last_flux: 0.0,
        }
    }

    pub fn config(&self) -> &OnsetConfig {
        &self.config
    }

    /// Onset sensitivity `k`
    pub fn set_threshold_factor(&mut self, k: f32) {
        self.config.threshold_factor = k.max(0.0);
    }

    /// Debounce window between reported onsets
    pub fn set_min_onset_gap_ms(&mut self, gap_ms: f64) {
        self.config.min_onset_gap_ms = gap_ms.max(0.0);
        self.min_gap_samples = gap_samples(self.config.min_onset_gap_ms, self.sample_rate);
    }

    /// Flux of the most recent frame (0 for silent frames)
    pub fn last_flux(&self) -> f32 {
        self.last_flux
    }

    /// Adaptive threshold over the current history
    fn threshold(&self) -> f32 {
        let n = self.history_filled;
        if n == 0 {
            return self.config.min_threshold;
        }

        let values = &self.history[..n];
        let mean = values.iter().sum::<f32>() / n as f32;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n as f32;

        (mean + self.config.threshold_factor * variance.sqrt()).max(self.config.min_threshold)
    }

    fn push_history(&mut self, flux: f32) {
        self.history[self.history_pos] = flux;
        self.history_pos = (self.history_pos + 1) % self.history.len();
        self.history_filled = (self.history_filled + 1).min(self.history.len());
    }

    fn debounced(&self, timestamp: u64) -> bool {
        match self.last_onset {
            Some(last) => timestamp.saturating_sub(last) < self.min_gap_samples,
            None => false,
        }
    }
}

impl<'a> Stage<SpectralFrame<'a>> for OnsetDetector {
    type Output = OnsetEvent;

    fn process(&mut self, frame: &SpectralFrame<'a>) -> Option<OnsetEvent> {
        if !frame.is_usable() {
            // Let the spectral memory fade so the next real sound reads as new energy
            let decay = self.config.silence_decay.clamp(0.0, 1.0);
            self.prev_spectrum.iter_mut().for_each(|m| *m *= decay);
            self.push_history(0.0);
            self.last_flux = 0.0;
            return None;
        }

        // Sum of positive differences only: onset energy is additive
        let mut sum = 0.0;
        for (prev, &curr) in self.prev_spectrum.iter_mut().zip(frame.magnitudes.iter()) {
            let diff = curr - *prev;
            if diff > 0.0 {
                sum += diff;
            }
            *prev = curr;
        }
        let bins = frame.magnitudes.len().max(1);
        let flux = sum / bins as f32;

        let threshold = self.threshold();
        self.push_history(flux);
        self.last_flux = flux;

        if flux <= threshold || self.debounced(frame.timestamp) {
            return None;
        }

        self.last_onset = Some(frame.timestamp);

        Some(OnsetEvent {
            timestamp_samples: frame.timestamp,
            strength: ((flux - threshold) / flux).clamp(0.0, 1.0),
        })
    }

    fn reset(&mut self) {
        self.prev_spectrum.iter_mut().for_each(|m| *m = 0.0);
        self.history.iter_mut().for_each(|h| *h = 0.0);
        self.history_pos = 0;
        self.history_filled = 0;
        self.last_onset = None;
        self.last_flux = 0.0;
    }
}

fn gap_samples(gap_ms: f64, sample_rate: u32) -> u64 {
    (gap_ms.max(0.0) * sample_rate as f64 / 1000.0) as u64
}

/// Detect onsets in a whole file
/// Offline convenience that drives the streaming detector over mono audio
pub fn detect_onsets(
    audio: &AudioData,
    config: &OnsetConfig,
    window_size: usize,
    hop_size: usize,
    noise_floor: f32,
) -> Vec<OnsetEvent> {
    let frame = audio.as_frame();
    if frame.frame_count() == 0 || window_size == 0 {
        return Vec::new();
    }

    let mut analyzer = SpectrumAnalyzer::new(window_size, hop_size, audio.sample_rate, noise_floor);
    let mut detector = OnsetDetector::new(config.clone(), analyzer.bin_count(), audio.sample_rate);
    let mut onsets = Vec::new();

    for i in 0..frame.frame_count() {
        if analyzer.push(frame.mono_sample(i)) {
            let spectral = analyzer.analyze();
            if let Some(onset) = detector.process(&spectral) {
                onsets.push(onset);
            }
        }
    }

    onsets
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Click track: short decaying 1 kHz bursts at a fixed tempo, silence between
    pub(crate) fn click_track(bpm: f64, sample_rate: u32, seconds: f64) -> (Vec<f32>, Vec<u64>) {
        let total = (seconds * sample_rate as f64) as usize;
        let period = 60.0 * sample_rate as f64 / bpm;
        let burst = 256;

        let mut samples = vec![0.0f32; total];
        let mut clicks = Vec::new();
        let mut k = 0;
        loop {
            let start = (k as f64 * period).round() as usize;
            if start + burst >= total {
                break;
            }
            clicks.push(start as u64);
            for j in 0..burst {
                let t = j as f32 / sample_rate as f32;
                let env = (-(j as f32) / 48.0).exp();
                samples[start + j] = 0.8 * env * (2.0 * std::f32::consts::PI * 1000.0 * t).sin();
            }
            k += 1;
        }
        (samples, clicks)
    }

    #[test]
    fn test_click_track_onsets_align() {
        let sample_rate = 44100;
        let hop = 512;
        let (samples, clicks) = click_track(120.0, sample_rate, 6.0);
        let audio = AudioData::from_interleaved(samples, sample_rate, 1);

        let onsets = detect_onsets(&audio, &OnsetConfig::default(), 2048, hop, 1e-4);

        assert_eq!(onsets.len(), clicks.len(), "onsets: {:?}", onsets);
        for (onset, &click) in onsets.iter().zip(clicks.iter()) {
            let error = (onset.timestamp_samples as i64 - click as i64).abs();
            assert!(error <= hop as i64, "onset {} vs click {}", onset.timestamp_samples, click);
            assert!(onset.strength > 0.0 && onset.strength <= 1.0);
        }
    }

    #[test]
    fn test_silence_produces_no_onsets() {
        let audio = AudioData::from_interleaved(vec![0.0; 44100 * 2], 44100, 1);
        let onsets = detect_onsets(&audio, &OnsetConfig::default(), 2048, 512, 1e-4);
        assert!(onsets.is_empty());
    }

    #[test]
    fn test_onset_detection_empty() {
        let audio = AudioData::from_interleaved(vec![], 44100, 1);
        assert!(detect_onsets(&audio, &OnsetConfig::default(), 2048, 512, 1e-4).is_empty());
    }

    #[test]
    fn test_debounce_suppresses_double_trigger() {
        let sample_rate = 44100;
        let mut detector = OnsetDetector::new(OnsetConfig::default(), 4, sample_rate);
        let loud = [1.0, 1.0, 1.0, 1.0];
        let quiet = [0.0; 4];

        let frame = |timestamp, magnitudes| SpectralFrame {
            timestamp,
            magnitudes,
            rms: 0.5,
            quality: crate::audio::FrameQuality::Normal,
            sample_rate,
            window_size: 6,
        };

        assert!(detector.process(&frame(0, &quiet)).is_none());
        assert!(detector.process(&frame(512, &loud)).is_some());
        assert!(detector.process(&frame(1024, &quiet)).is_none());
        // 1536 samples after the first onset is inside the 50 ms gap
        assert!(detector.process(&frame(2048, &loud)).is_none());
    }

    #[test]
    fn test_runtime_setters() {
        let mut detector = OnsetDetector::new(OnsetConfig::default(), 8, 48000);
        detector.set_threshold_factor(3.0);
        detector.set_min_onset_gap_ms(100.0);
        assert_eq!(detector.config().threshold_factor, 3.0);
        assert_eq!(detector.min_gap_samples, 4800);
    }
}
