// Tempo Estimation - streaming BPM and beat phase
// Incremental onset-envelope autocorrelation, cross-checked against inter-onset intervals

use serde::{Deserialize, Serialize};

use super::onset::OnsetEvent;
use crate::engine::Stage;

/// Tempo estimation result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    /// Estimated beats per minute (always > 0)
    pub bpm: f64,

    /// Confidence in the estimate [0.0, 1.0]
    /// Sharpness of the autocorrelation peak relative to its neighbours
    pub confidence: f32,

    /// Beat phase: beats fall at `phase_samples + n * beat_period`
    pub phase_samples: u64,
}

impl TempoEstimate {
    /// Build an estimate; a zero, negative or non-finite tempo is "no estimate"
    pub fn new(bpm: f64, confidence: f32, phase_samples: u64) -> Option<Self> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return None;
        }

        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Some(TempoEstimate {
            bpm,
            confidence,
            phase_samples,
        })
    }

    /// Beat length in samples
    pub fn beat_period_samples(&self, sample_rate: u32) -> f64 {
        60.0 * sample_rate as f64 / self.bpm
    }

    /// First beat at or after `timestamp`
    pub fn next_beat_at_or_after(&self, timestamp: u64, sample_rate: u32) -> u64 {
        let period = self.beat_period_samples(sample_rate);
        let rel = timestamp as f64 - self.phase_samples as f64;
        let n = (rel / period).ceil();
        (self.phase_samples as f64 + n * period).round().max(0.0) as u64
    }
}

/// Configuration for tempo estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Minimum BPM to consider
    pub min_bpm: f64,

    /// Maximum BPM to consider
    pub max_bpm: f64,

    /// Per-frame decay of the running autocorrelation
    pub acf_decay: f64,

    /// Minimum number of onsets required for estimation
    pub min_onsets: usize,

    /// Number of recent onsets kept for the interval cross-check
    pub ioi_history: usize,

    /// Max distance of `ioi / period` from an integer to count as support
    pub ioi_tolerance: f64,

    /// Exponential smoothing factor applied to successive estimates
    pub smoothing: f64,

    /// Relative change treated as a tempo jump rather than jitter
    pub jump_threshold: f64,

    /// Consistent estimates needed before a jump is accepted
    pub jump_confirmations: u32,

    /// Lags on each side of the peak used for the sharpness measure
    pub sharpness_radius: usize,
}

impl Default for TempoConfig {
    fn default() -> Self {
        TempoConfig {
            min_bpm: 40.0,
            max_bpm: 240.0,
            acf_decay: 0.995,
            min_onsets: 4,
            ioi_history: 16,
            ioi_tolerance: 0.08,
            smoothing: 0.35,
            jump_threshold: 0.08,
            jump_confirmations: 3,
            sharpness_radius: 4,
        }
    }
}

/// What the estimator sees per analysis frame
#[derive(Debug, Clone, Copy)]
pub struct TempoInput {
    /// Frame timestamp (session samples)
    pub timestamp: u64,

    /// Onset reported on this frame, if any
    pub onset: Option<OnsetEvent>,
}

/// Streaming tempo estimator. One call per analysis frame.
pub struct TempoEstimator {
    config: TempoConfig,
    sample_rate: u32,
    hop_size: usize,
    min_lag: usize,
    max_lag: usize,

    envelope: Vec<f64>,
    env_pos: usize,
    acf: Vec<f64>,

    onsets: Vec<u64>,
    onset_pos: usize,
    onset_count: usize,

    smoothed_bpm: Option<f64>,
    pending_jump: Option<(f64, u32)>,
    last: Option<TempoEstimate>,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig, sample_rate: u32, hop_size: usize) -> Self {
        let hop_size = hop_size.max(1);
        let frame_rate = sample_rate as f64 / hop_size as f64;

        // Guard against degenerate BPM ranges
        let max_bpm = config.max_bpm.max(1.0);
        let min_bpm = config.min_bpm.clamp(0.5, max_bpm);

        let min_lag = ((60.0 * frame_rate / max_bpm).floor() as usize).max(2);
        let max_lag = ((60.0 * frame_rate / min_bpm).ceil() as usize).max(min_lag + 2);
        let ioi_history = config.ioi_history.max(2);

        TempoEstimator {
            config,
            sample_rate,
            hop_size,
            min_lag,
            max_lag,
            envelope: vec![0.0; max_lag + 2],
            env_pos: 0,
            acf: vec![0.0; max_lag + 2],
            onsets: vec![0; ioi_history],
            onset_pos: 0,
            onset_count: 0,
            smoothed_bpm: None,
            pending_jump: None,
            last: None,
        }
    }

    /// Most recent estimate, if any
    pub fn current(&self) -> Option<TempoEstimate> {
        self.last
    }

    /// Lag range (in frames) covered by the autocorrelation
    pub fn lag_range(&self) -> (usize, usize) {
        (self.min_lag, self.max_lag)
    }

    fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_size as f64
    }

    fn lag_to_bpm(&self, lag: f64) -> f64 {
        60.0 * self.frame_rate() / lag
    }

    /// Push the envelope value and update the running autocorrelation
    fn update_acf(&mut self, x: f64) {
        let len = self.envelope.len();
        let decay = self.config.acf_decay.clamp(0.0, 1.0);

        // acf[lag] needs envelope[t - lag]; lag <= max_lag + 1 < len
        for lag in (self.min_lag - 1)..=(self.max_lag + 1) {
            let past = self.envelope[(self.env_pos + len - lag) % len];
            self.acf[lag] = decay * self.acf[lag] + x * past;
        }

        self.envelope[self.env_pos] = x;
        self.env_pos = (self.env_pos + 1) % len;
    }

    fn push_onset(&mut self, timestamp: u64) {
        self.onsets[self.onset_pos] = timestamp;
        self.onset_pos = (self.onset_pos + 1) % self.onsets.len();
        self.onset_count += 1;
    }

    /// Stored onsets, oldest first, without allocating
    fn onset_at(&self, i: usize) -> u64 {
        let stored = self.onset_count.min(self.onsets.len());
        let start = (self.onset_pos + self.onsets.len() - stored) % self.onsets.len();
        self.onsets[(start + i) % self.onsets.len()]
    }

    fn stored_onsets(&self) -> usize {
        self.onset_count.min(self.onsets.len())
    }

    /// Support of the inter-onset intervals for a period (samples).
    /// Returns (normalized support, sum of matched intervals, sum of multiples)
    fn ioi_support(&self, period: f64) -> (f64, f64, f64) {
        let stored = self.stored_onsets();
        if stored < 2 || period <= 0.0 {
            return (0.0, 0.0, 0.0);
        }

        let mut support = 0.0;
        let mut matched_total = 0.0;
        let mut matched_multiples = 0.0;

        for i in 1..stored {
            let ioi = self.onset_at(i).saturating_sub(self.onset_at(i - 1)) as f64;
            let ratio = ioi / period;
            let n = ratio.round();
            if (1.0..=4.0).contains(&n) && (ratio - n).abs() <= self.config.ioi_tolerance {
                support += 1.0 / n;
                matched_total += ioi;
                matched_multiples += n;
            }
        }

        (support / (stored - 1) as f64, matched_total, matched_multiples)
    }

    /// Autocorrelation at a fractional lag (best of the nearest integer lags)
    fn acf_near(&self, lag: f64) -> f64 {
        let center = lag.round() as isize;
        let mut best = 0.0f64;
        for l in (center - 1)..=(center + 1) {
            if l >= self.min_lag as isize && l <= self.max_lag as isize {
                best = best.max(self.acf[l as usize]);
            }
        }
        best
    }

    /// Parabolic interpolation of the peak position around `lag`
    fn refine_lag(&self, lag: usize) -> f64 {
        let y0 = self.acf[lag - 1];
        let y1 = self.acf[lag];
        let y2 = self.acf[lag + 1];
        let denom = y0 - 2.0 * y1 + y2;
        if denom.abs() < f64::EPSILON {
            return lag as f64;
        }
        lag as f64 + (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5)
    }

    /// Peak height relative to surrounding lags, in [0, 1]
    fn sharpness(&self, lag: usize) -> f32 {
        let peak = self.acf[lag];
        if peak <= 0.0 {
            return 0.0;
        }

        let radius = self.config.sharpness_radius.max(2);
        let lo = lag.saturating_sub(radius).max(self.min_lag);
        let hi = (lag + radius).min(self.max_lag);

        let mut sum = 0.0;
        let mut count = 0;
        for l in lo..=hi {
            if l.abs_diff(lag) > 1 {
                sum += self.acf[l];
                count += 1;
            }
        }
        if count == 0 {
            return 1.0;
        }

        (((peak - sum / count as f64) / peak).clamp(0.0, 1.0)) as f32
    }

    /// Dominant autocorrelation peak; ties go to the lag nearest the previous tempo
    fn dominant_lag(&self) -> Option<usize> {
        let previous_lag = self.smoothed_bpm.map(|bpm| 60.0 * self.frame_rate() / bpm);
        let mut best: Option<usize> = None;

        for lag in self.min_lag..=self.max_lag {
            let value = self.acf[lag];
            if value <= 0.0 || value <= self.acf[lag - 1] || value < self.acf[lag + 1] {
                continue;
            }

            best = match best {
                None => Some(lag),
                Some(current) => {
                    let current_value = self.acf[current];
                    let tie = (value - current_value).abs() <= 1e-6 * current_value.max(value);
                    if tie {
                        match previous_lag {
                            Some(prev) if (lag as f64 - prev).abs() < (current as f64 - prev).abs() => {
                                Some(lag)
                            }
                            _ => Some(current),
                        }
                    } else if value > current_value {
                        Some(lag)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        best
    }

    fn estimate(&mut self) -> Option<TempoEstimate> {
        let dominant = self.dominant_lag()?;
        let peak = self.acf[dominant];
        let refined = self.refine_lag(dominant);
        let hop = self.hop_size as f64;

        // Octave resolution: every strong peak plus half/double of the dominant one
        let mut best_lag = refined;
        let mut best_score = 0.0;
        let mut consider = |lag: f64, this: &Self| {
            if lag < this.min_lag as f64 || lag > this.max_lag as f64 {
                return;
            }
            let acf_norm = this.acf_near(lag) / peak;
            let (support, _, _) = this.ioi_support(lag * hop);
            let score = acf_norm * support;
            if score > best_score + 1e-9 {
                best_score = score;
                best_lag = lag;
            }
        };

        consider(refined, self);
        consider(refined / 2.0, self);
        consider(refined * 2.0, self);
        for lag in self.min_lag..=self.max_lag {
            let value = self.acf[lag];
            if lag != dominant
                && value >= 0.5 * peak
                && value > self.acf[lag - 1]
                && value >= self.acf[lag + 1]
            {
                consider(self.refine_lag(lag), self);
            }
        }

        // Refine the period from the intervals that agree with the winner
        let (_, matched_total, matched_multiples) = self.ioi_support(best_lag * hop);
        let period = if matched_multiples > 0.0 {
            matched_total / matched_multiples
        } else {
            best_lag * hop
        };
        if period <= 0.0 {
            return None;
        }

        let raw_bpm = 60.0 * self.sample_rate as f64 / period;
        let bpm = self.smooth(raw_bpm);

        let sharp_lag = (best_lag.round() as usize).clamp(self.min_lag, self.max_lag);
        let confidence = self.sharpness(sharp_lag);

        let smoothed_period = 60.0 * self.sample_rate as f64 / bpm;
        let latest = self.onset_at(self.stored_onsets() - 1);
        let phase = (latest as f64 % smoothed_period).round() as u64;

        TempoEstimate::new(bpm, confidence, phase)
    }

    /// Exponential smoothing with jump confirmation
    fn smooth(&mut self, raw_bpm: f64) -> f64 {
        let current = match self.smoothed_bpm {
            None => {
                self.smoothed_bpm = Some(raw_bpm);
                return raw_bpm;
            }
            Some(current) => current,
        };

        let relative_change = (raw_bpm - current).abs() / current;
        let next = if relative_change > self.config.jump_threshold {
            let confirmations = match self.pending_jump {
                Some((pending, count))
                    if (raw_bpm - pending).abs() / pending <= self.config.jump_threshold / 2.0 =>
                {
                    count + 1
                }
                _ => 1,
            };

            if confirmations >= self.config.jump_confirmations {
                self.pending_jump = None;
                raw_bpm
            } else {
                self.pending_jump = Some((raw_bpm, confirmations));
                current
            }
        } else {
            self.pending_jump = None;
            current + self.config.smoothing.clamp(0.0, 1.0) * (raw_bpm - current)
        };

        self.smoothed_bpm = Some(next);
        next
    }
}

impl Stage<TempoInput> for TempoEstimator {
    type Output = TempoEstimate;

    fn process(&mut self, input: &TempoInput) -> Option<TempoEstimate> {
        let strength = input.onset.map(|o| o.strength.max(0.05) as f64).unwrap_or(0.0);
        self.update_acf(strength);

        let onset = input.onset?;
        self.push_onset(onset.timestamp_samples);

        if self.onset_count < self.config.min_onsets.max(2) {
            return None;
        }

        let estimate = self.estimate();
        if estimate.is_some() {
            self.last = estimate;
        }
        estimate
    }

    fn reset(&mut self) {
        self.envelope.iter_mut().for_each(|v| *v = 0.0);
        self.acf.iter_mut().for_each(|v| *v = 0.0);
        self.env_pos = 0;
        self.onsets.iter_mut().for_each(|t| *t = 0);
        self.onset_pos = 0;
        self.onset_count = 0;
        self.smoothed_bpm = None;
        self.pending_jump = None;
        self.last = None;
    }
}

/// Estimate tempo from a finished list of onsets
///
/// Replays the onsets on the analysis-frame timeline and returns the last estimate.
pub fn estimate_tempo(
    onsets: &[OnsetEvent],
    sample_rate: u32,
    hop_size: usize,
    config: &TempoConfig,
) -> Option<TempoEstimate> {
    let first = onsets.first()?.timestamp_samples;
    let last = onsets.last()?.timestamp_samples;
    let hop = hop_size.max(1) as u64;

    let mut estimator = TempoEstimator::new(config.clone(), sample_rate, hop_size);
    let mut next = 0;
    let mut frame = first / hop;

    while frame * hop <= last {
        let timestamp = frame * hop;
        let mut onset = None;
        while next < onsets.len() && onsets[next].timestamp_samples < timestamp + hop {
            onset = Some(onsets[next]);
            next += 1;
        }
        estimator.process(&TempoInput { timestamp, onset });
        frame += 1;
    }

    estimator.current()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SpectrumAnalyzer;
    use crate::groove::onset::tests::click_track;
    use crate::groove::onset::{OnsetConfig, OnsetDetector};

    fn regular_onsets(interval: u64, count: u64) -> Vec<OnsetEvent> {
        (0..count)
            .map(|i| OnsetEvent {
                timestamp_samples: 1000 + i * interval,
                strength: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_estimate_rejects_non_positive_bpm() {
        assert!(TempoEstimate::new(0.0, 1.0, 0).is_none());
        assert!(TempoEstimate::new(-120.0, 1.0, 0).is_none());
        assert!(TempoEstimate::new(f64::NAN, 1.0, 0).is_none());
        assert_eq!(TempoEstimate::new(120.0, 2.0, 0).unwrap().confidence, 1.0);
    }

    #[test]
    fn test_tempo_estimation_regular_beats() {
        // 120 BPM at 44.1 kHz = 22050 samples per beat
        let onsets = regular_onsets(22050, 16);
        let estimate = estimate_tempo(&onsets, 44100, 512, &TempoConfig::default()).unwrap();

        assert!((estimate.bpm - 120.0).abs() < 1.0, "bpm {}", estimate.bpm);
        assert!(estimate.confidence > 0.0);
    }

    #[test]
    fn test_tempo_estimation_insufficient_onsets() {
        let onsets = regular_onsets(22050, 2);
        assert!(estimate_tempo(&onsets, 44100, 512, &TempoConfig::default()).is_none());
    }

    #[test]
    fn test_empty_onsets() {
        assert!(estimate_tempo(&[], 44100, 512, &TempoConfig::default()).is_none());
    }

    #[test]
    fn test_slow_tempo_not_doubled() {
        // 75 BPM
        let onsets = regular_onsets(35280, 16);
        let estimate = estimate_tempo(&onsets, 44100, 512, &TempoConfig::default()).unwrap();
        assert!((estimate.bpm - 75.0).abs() < 1.0, "bpm {}", estimate.bpm);
    }

    #[test]
    fn test_click_track_converges_to_120() {
        let sample_rate = 44100;
        let window = 2048;
        let hop = 512;
        let (samples, _) = click_track(120.0, sample_rate, 12.0);

        let mut analyzer = SpectrumAnalyzer::new(window, hop, sample_rate, 1e-4);
        let mut detector = OnsetDetector::new(OnsetConfig::default(), analyzer.bin_count(), sample_rate);
        let mut estimator = TempoEstimator::new(TempoConfig::default(), sample_rate, hop);

        let mut estimates = Vec::new();
        for &s in &samples {
            if analyzer.push(s) {
                let frame = analyzer.analyze();
                let onset = detector.process(&frame);
                let timestamp = frame.timestamp;
                if let Some(estimate) = estimator.process(&TempoInput { timestamp, onset }) {
                    estimates.push(estimate);
                }
            }
        }

        assert!(estimates.len() >= 10, "only {} estimates", estimates.len());

        // Converged after a handful of windows and never jumps an octave
        for estimate in &estimates[4..] {
            assert!((estimate.bpm - 120.0).abs() <= 1.0, "bpm {}", estimate.bpm);
        }
        for estimate in &estimates {
            assert!((estimate.bpm - 60.0).abs() > 5.0);
            assert!((estimate.bpm - 240.0).abs() > 5.0);
        }
    }

    #[test]
    fn test_phase_tracks_beats() {
        let onsets = regular_onsets(22050, 12);
        let estimate = estimate_tempo(&onsets, 44100, 512, &TempoConfig::default()).unwrap();

        let period = estimate.beat_period_samples(44100);
        let last = onsets.last().unwrap().timestamp_samples as f64;
        let offset = (last - estimate.phase_samples as f64) % period;
        let distance = offset.min(period - offset);
        assert!(distance < 600.0, "phase off by {}", distance);
    }

    #[test]
    fn test_reset_clears_estimate() {
        let mut estimator = TempoEstimator::new(TempoConfig::default(), 44100, 512);
        for onset in regular_onsets(22016, 6) {
            let timestamp = onset.timestamp_samples;
            estimator.process(&TempoInput { timestamp, onset: Some(onset) });
        }
        estimator.reset();
        assert!(estimator.current().is_none());
    }
}
