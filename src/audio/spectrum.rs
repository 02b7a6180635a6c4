// Spectral front end shared by the groove and harmony stages
// Sliding mono window -> Hann window -> real FFT -> magnitude spectrum

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// How trustworthy an analysis frame is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameQuality {
    /// Usable signal
    Normal,

    /// Window RMS below the noise floor
    Silent,

    /// Window contained NaN/inf samples (zeroed) or the FFT failed
    Invalid,
}

/// One analysis frame: the magnitude spectrum of the current window.
#[derive(Debug, Clone, Copy)]
pub struct SpectralFrame<'a> {
    /// Session sample index of the first sample of the newest hop
    pub timestamp: u64,

    /// Normalized magnitude per FFT bin (`window_size / 2 + 1` bins)
    pub magnitudes: &'a [f32],

    /// RMS of the raw (unwindowed) window
    pub rms: f32,

    pub quality: FrameQuality,

    pub sample_rate: u32,

    pub window_size: usize,
}

impl SpectralFrame<'_> {
    /// True when stages should produce output for this frame
    pub fn is_usable(&self) -> bool {
        self.quality == FrameQuality::Normal
    }

    /// Center frequency of bin `i` in Hz
    pub fn bin_frequency(&self, i: usize) -> f32 {
        bin_frequency(i, self.sample_rate, self.window_size)
    }
}

/// Center frequency of FFT bin `i`
pub fn bin_frequency(i: usize, sample_rate: u32, window_size: usize) -> f32 {
    if window_size == 0 {
        return 0.0;
    }
    i as f32 * sample_rate as f32 / window_size as f32
}

/// Build a Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Streaming STFT with every buffer allocated up front.
///
/// `push` is called once per mono sample from the audio thread; every
/// `hop_size` samples it reports that a new frame is ready and `analyze`
/// computes it in place.
pub struct SpectrumAnalyzer {
    window_size: usize,
    hop_size: usize,
    sample_rate: u32,
    noise_floor: f32,

    fft: Arc<dyn RealToComplex<f32>>,
    hann: Vec<f32>,
    window_norm: f32,

    ring: Vec<f32>,
    write_pos: usize,
    since_hop: usize,
    since_invalid: usize,
    consumed: u64,

    fft_input: Vec<f32>,
    fft_output: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    /// Plan the FFT and allocate all buffers.
    ///
    /// `window_size` must be even and `hop_size` in `1..=window_size`;
    /// the engine config validates both before this is called.
    pub fn new(window_size: usize, hop_size: usize, sample_rate: u32, noise_floor: f32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_size);

        let hann = hann_window(window_size);
        let window_sum: f32 = hann.iter().sum();
        let window_norm = if window_sum > 0.0 { 1.0 / window_sum } else { 0.0 };

        let fft_input = fft.make_input_vec();
        let fft_output = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let magnitudes = vec![0.0; fft_output.len()];

        SpectrumAnalyzer {
            window_size,
            hop_size: hop_size.max(1),
            sample_rate,
            noise_floor,
            fft,
            hann,
            window_norm,
            ring: vec![0.0; window_size],
            write_pos: 0,
            since_hop: 0,
            since_invalid: usize::MAX,
            consumed: 0,
            fft_input,
            fft_output,
            scratch,
            magnitudes,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of spectrum bins per frame
    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }

    /// Samples consumed since the session started (monotonic, survives reset)
    pub fn samples_consumed(&self) -> u64 {
        self.consumed
    }

    /// Adjust the silence gate
    pub fn set_noise_floor(&mut self, noise_floor: f32) {
        self.noise_floor = noise_floor.max(0.0);
    }

    /// Append one mono sample. Returns true when a hop has completed.
    #[inline]
    pub fn push(&mut self, sample: f32) -> bool {
        let sample = if sample.is_finite() {
            self.since_invalid = self.since_invalid.saturating_add(1);
            sample
        } else {
            self.since_invalid = 0;
            0.0
        };

        self.ring[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.window_size;
        self.consumed += 1;
        self.since_hop += 1;

        if self.since_hop >= self.hop_size {
            self.since_hop = 0;
            true
        } else {
            false
        }
    }

    /// Compute the spectrum of the current window
    pub fn analyze(&mut self) -> SpectralFrame<'_> {
        let n = self.window_size;
        let mut sum_squares = 0.0f32;

        // Oldest sample sits at write_pos
        for i in 0..n {
            let sample = self.ring[(self.write_pos + i) % n];
            sum_squares += sample * sample;
            self.fft_input[i] = sample * self.hann[i];
        }
        let rms = (sum_squares / n as f32).sqrt();

        let mut quality = if self.since_invalid < n {
            FrameQuality::Invalid
        } else if rms < self.noise_floor {
            FrameQuality::Silent
        } else {
            FrameQuality::Normal
        };

        let processed = self.fft.process_with_scratch(
            &mut self.fft_input,
            &mut self.fft_output,
            &mut self.scratch,
        );

        match processed {
            Ok(()) => {
                for (mag, c) in self.magnitudes.iter_mut().zip(self.fft_output.iter()) {
                    *mag = c.norm() * self.window_norm;
                }
            }
            Err(_) => {
                self.magnitudes.iter_mut().for_each(|m| *m = 0.0);
                quality = FrameQuality::Invalid;
            }
        }

        SpectralFrame {
            timestamp: self.consumed.saturating_sub(self.hop_size as u64),
            magnitudes: &self.magnitudes,
            rms,
            quality,
            sample_rate: self.sample_rate,
            window_size: self.window_size,
        }
    }

    /// Clear the window without touching the session clock
    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|s| *s = 0.0);
        self.magnitudes.iter_mut().for_each(|m| *m = 0.0);
        self.write_pos = 0;
        self.since_hop = 0;
        self.since_invalid = usize::MAX;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_hann_window() {
        let window = hann_window(100);

        // Window should taper at edges
        assert!(window[0] < 0.1);
        assert!(window[99] < 0.1);
        assert!(window[50] > 0.9); // Peak in middle
    }

    #[test]
    fn test_hop_reporting() {
        let mut analyzer = SpectrumAnalyzer::new(1024, 256, 44100, 1e-4);
        let hops = (0..1024).filter(|_| analyzer.push(0.0)).count();
        assert_eq!(hops, 4);
        assert_eq!(analyzer.samples_consumed(), 1024);
    }

    #[test]
    fn test_sine_peak_bin() {
        let sample_rate = 44100;
        let window_size = 2048;
        let mut analyzer = SpectrumAnalyzer::new(window_size, 512, sample_rate, 1e-4);

        for s in sine(1000.0, sample_rate, window_size) {
            analyzer.push(s);
        }
        let frame = analyzer.analyze();
        assert_eq!(frame.quality, FrameQuality::Normal);

        let (peak_bin, _) = frame
            .magnitudes
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });

        let peak_hz = frame.bin_frequency(peak_bin);
        assert!((peak_hz - 1000.0).abs() < 30.0, "peak at {} Hz", peak_hz);
    }

    #[test]
    fn test_silence_is_flagged() {
        let mut analyzer = SpectrumAnalyzer::new(512, 128, 44100, 1e-4);
        for _ in 0..512 {
            analyzer.push(0.0);
        }
        assert_eq!(analyzer.analyze().quality, FrameQuality::Silent);
    }

    #[test]
    fn test_non_finite_samples_invalidate_window() {
        let mut analyzer = SpectrumAnalyzer::new(512, 128, 44100, 1e-4);
        for i in 0..512 {
            analyzer.push(if i == 100 { f32::NAN } else { 0.5 });
        }
        let frame = analyzer.analyze();
        assert_eq!(frame.quality, FrameQuality::Invalid);
        assert!(frame.magnitudes.iter().all(|m| m.is_finite()));

        // Once the bad sample has left the window the frame is usable again
        for _ in 0..512 {
            analyzer.push(0.5);
        }
        assert_eq!(analyzer.analyze().quality, FrameQuality::Normal);
    }

    #[test]
    fn test_reset_keeps_clock() {
        let mut analyzer = SpectrumAnalyzer::new(256, 64, 44100, 1e-4);
        for _ in 0..300 {
            analyzer.push(0.25);
        }
        analyzer.reset();
        assert_eq!(analyzer.samples_consumed(), 300);
        for _ in 0..256 {
            analyzer.push(0.0);
        }
        assert_eq!(analyzer.analyze().quality, FrameQuality::Silent);
    }
}
