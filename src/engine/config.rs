// Engine configuration
// One TOML file, one section per stage; every field has a default

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::groove::{OnsetConfig, QuantizeSettings, TempoConfig};
use crate::harmony::{ChordConfig, ChromaConfig, ScaleConfig, VoicingConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Input format and spectral front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// FFT window length in samples (even)
    pub window_size: usize,
    /// Samples between analysis frames
    pub hop_size: usize,
    /// RMS below this marks a frame silent
    pub noise_floor: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            sample_rate: 48_000,
            channels: 2,
            window_size: 2048,
            hop_size: 512,
            noise_floor: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Slots in the RT → worker queue
    pub queue_capacity: usize,
    /// Messages the worker dispatches per wakeup
    pub max_drain_per_poll: usize,
    /// Datagrams the server reads per poll
    pub max_packets_per_poll: usize,
    /// Worker sleep between polls
    pub poll_interval_ms: u64,
    /// Publish every onset on `/groove/onset`
    pub emit_onsets: bool,
    /// Publish every quantized onset on `/groove/quantized`
    pub emit_quantized: bool,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        MessagingConfig {
            queue_capacity: 1024,
            max_drain_per_poll: 256,
            max_packets_per_poll: 64,
            poll_interval_ms: 2,
            emit_onsets: true,
            emit_quantized: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub onset: OnsetConfig,
    pub tempo: TempoConfig,
    pub quantize: QuantizeSettings,
    pub chroma: ChromaConfig,
    pub chord: ChordConfig,
    pub scale: ScaleConfig,
    pub voicing: VoicingConfig,
    pub messaging: MessagingConfig,
}

impl EngineConfig {
    /// Read and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Reject values the stages cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.audio;
        check(a.sample_rate > 0, "audio.sample_rate must be positive")?;
        check((1..=32).contains(&a.channels), "audio.channels must be in 1..=32")?;
        check(
            a.window_size >= 64 && a.window_size % 2 == 0,
            "audio.window_size must be even and at least 64",
        )?;
        check(
            (1..=a.window_size).contains(&a.hop_size),
            "audio.hop_size must be in 1..=window_size",
        )?;
        check(
            a.noise_floor.is_finite() && a.noise_floor >= 0.0,
            "audio.noise_floor must be a non-negative number",
        )?;

        let o = &self.onset;
        check(
            o.threshold_factor.is_finite() && o.threshold_factor >= 0.0,
            "onset.threshold_factor must be non-negative",
        )?;
        check(o.min_onset_gap_ms >= 0.0, "onset.min_onset_gap_ms must be non-negative")?;
        check(o.history_len >= 2, "onset.history_len must be at least 2")?;
        check((0.0..=1.0).contains(&o.silence_decay), "onset.silence_decay must be in [0, 1]")?;

        let t = &self.tempo;
        check(
            t.min_bpm > 0.0 && t.max_bpm > t.min_bpm,
            "tempo.min_bpm must be positive and below tempo.max_bpm",
        )?;
        let shortest_lag = 60.0 * a.sample_rate as f64 / (t.max_bpm * a.hop_size as f64);
        check(
            shortest_lag >= 2.0,
            "tempo.max_bpm is too fast for the configured hop_size",
        )?;
        check(t.acf_decay > 0.0 && t.acf_decay < 1.0, "tempo.acf_decay must be in (0, 1)")?;
        check(t.min_onsets >= 2, "tempo.min_onsets must be at least 2")?;
        check(t.ioi_history >= 2, "tempo.ioi_history must be at least 2")?;
        check(
            t.ioi_tolerance > 0.0 && t.ioi_tolerance < 0.5,
            "tempo.ioi_tolerance must be in (0, 0.5)",
        )?;
        check(t.smoothing > 0.0 && t.smoothing <= 1.0, "tempo.smoothing must be in (0, 1]")?;
        check(t.jump_threshold > 0.0, "tempo.jump_threshold must be positive")?;

        let q = &self.quantize;
        check((0.0..=1.0).contains(&q.strength), "quantize.strength must be in [0, 1]")?;
        check((0.0..=1.0).contains(&q.swing), "quantize.swing must be in [0, 1]")?;
        check(q.group_threshold_ms >= 0.0, "quantize.group_threshold_ms must be non-negative")?;

        let c = &self.chroma;
        check(c.a4_freq > 0.0, "chroma.a4_freq must be positive")?;
        check(
            c.min_freq > 0.0 && c.max_freq > c.min_freq,
            "chroma.min_freq must be positive and below chroma.max_freq",
        )?;
        check((0.0..1.0).contains(&c.smoothing), "chroma.smoothing must be in [0, 1)")?;

        let ch = &self.chord;
        check(ch.hysteresis_margin >= 0.0, "chord.hysteresis_margin must be non-negative")?;
        check(ch.min_agree_frames >= 1, "chord.min_agree_frames must be at least 1")?;
        check((0.0..=1.0).contains(&ch.min_score), "chord.min_score must be in [0, 1]")?;

        let s = &self.scale;
        check((0.0..1.0).contains(&s.key_smoothing), "scale.key_smoothing must be in [0, 1)")?;
        check(s.ambiguity_margin >= 0.0, "scale.ambiguity_margin must be non-negative")?;

        let v = &self.voicing;
        check(
            v.max_pitch <= 127 && v.min_pitch as u16 + 12 <= v.max_pitch as u16,
            "voicing pitch range must span at least an octave within 0..=127",
        )?;
        check(
            (v.min_pitch..=v.max_pitch).contains(&v.default_center),
            "voicing.default_center must lie inside the pitch range",
        )?;
        check((1..=6).contains(&v.max_voices), "voicing.max_voices must be in 1..=6")?;

        let m = &self.messaging;
        check(m.queue_capacity >= 1, "messaging.queue_capacity must be at least 1")?;
        check(m.max_drain_per_poll >= 1, "messaging.max_drain_per_poll must be at least 1")?;
        check(m.max_packets_per_poll >= 1, "messaging.max_packets_per_poll must be at least 1")?;

        Ok(())
    }
}

fn check(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groove::GridDivision;
    use crate::harmony::{KeyProfileSet, ScoringPath};
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.window_size, 2048);
        assert_eq!(config.chord.min_agree_frames, 4);
        assert_eq!(config.messaging.queue_capacity, 1024);
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [audio]
            sample_rate = 44100
            hop_size = 256

            [quantize]
            division = "triplet"
            swing = 0.25

            [chord]
            scoring = "scalar"

            [scale]
            profile_set = "modal"
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.hop_size, 256);
        assert_eq!(config.audio.window_size, 2048);
        assert_eq!(config.quantize.division, GridDivision::Triplet);
        assert_eq!(config.quantize.swing, 0.25);
        assert_eq!(config.quantize.strength, 0.8);
        assert_eq!(config.chord.scoring, ScoringPath::Scalar);
        assert_eq!(config.scale.profile_set, KeyProfileSet::Modal);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = EngineConfig::default();
        config.tempo.min_bpm = 60.0;
        config.voicing.max_voices = 4;
        config.messaging.emit_onsets = false;

        let text = config.to_toml_string().unwrap();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();

        assert_eq!(parsed.tempo.min_bpm, 60.0);
        assert_eq!(parsed.voicing.max_voices, 4);
        assert!(!parsed.messaging.emit_onsets);
        assert_eq!(parsed.onset.threshold_factor, config.onset.threshold_factor);
        assert_eq!(parsed.quantize.division, config.quantize.division);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            "[audio]\nwindow_size = 1001",
            "[audio]\nhop_size = 0",
            "[tempo]\nmin_bpm = 200.0\nmax_bpm = 100.0",
            "[quantize]\nstrength = 1.5",
            "[voicing]\nmax_voices = 7",
            "[voicing]\nmin_pitch = 60\nmax_pitch = 72\ndefault_center = 48",
            "[messaging]\nqueue_capacity = 0",
        ];
        for case in cases {
            assert!(
                matches!(EngineConfig::from_toml_str(case), Err(ConfigError::Invalid(_))),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("[audio\nsample_rate = 1"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("[audio]\nsample_rate = \"fast\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadenza.toml");
        std::fs::write(&path, "[onset]\nthreshold_factor = 2.0\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.onset.threshold_factor, 2.0);

        assert!(matches!(
            EngineConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
