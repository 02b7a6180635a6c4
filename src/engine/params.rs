// Runtime parameters - lock-free control values read by the real-time thread
// Each field is its own atomic; a reader may mix old and new fields but never sees a torn value

use atomic_float::AtomicF32;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::groove::GridDivision;
use crate::harmony::KeyProfileSet;

use super::config::EngineConfig;

/// Cache-line aligned atomic f32.
#[derive(Debug)]
#[repr(align(64))]
struct AtomicFloat {
    value: AtomicF32,
}

impl AtomicFloat {
    fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value),
        }
    }

    #[inline]
    fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    fn set(&self, value: f32) {
        self.value.store(value, Ordering::Release);
    }
}

/// Values a stage reads from [`RuntimeParams`], copied out in one go
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSnapshot {
    pub division: GridDivision,
    pub swing: f32,
    pub strength: f32,
    pub onset_threshold_factor: f32,
    pub min_onset_gap_ms: f32,
    pub hysteresis_margin: f32,
    pub profile_set: KeyProfileSet,
    /// Bumped by every setter; lets the reader skip unchanged snapshots
    pub generation: u64,
}

/// Shared parameter block. Wrap in an `Arc` and hand clones to the engine and
/// to whatever controls it.
#[derive(Debug)]
pub struct RuntimeParams {
    division: AtomicU8,
    swing: AtomicFloat,
    strength: AtomicFloat,
    onset_threshold_factor: AtomicFloat,
    min_onset_gap_ms: AtomicFloat,
    hysteresis_margin: AtomicFloat,
    profile_set: AtomicU8,
    generation: AtomicU64,
}

impl RuntimeParams {
    /// Seed from the static configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        RuntimeParams {
            division: AtomicU8::new(config.quantize.division.to_u8()),
            swing: AtomicFloat::new(config.quantize.swing),
            strength: AtomicFloat::new(config.quantize.strength),
            onset_threshold_factor: AtomicFloat::new(config.onset.threshold_factor),
            min_onset_gap_ms: AtomicFloat::new(config.onset.min_onset_gap_ms as f32),
            hysteresis_margin: AtomicFloat::new(config.chord.hysteresis_margin),
            profile_set: AtomicU8::new(config.scale.profile_set.to_u8()),
            generation: AtomicU64::new(0),
        }
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn set_division(&self, division: GridDivision) {
        self.division.store(division.to_u8(), Ordering::Release);
        self.bump();
    }

    /// Clamped to [0, 1]; NaN is ignored
    pub fn set_swing(&self, swing: f32) {
        if let Some(v) = unit(swing) {
            self.swing.set(v);
            self.bump();
        }
    }

    /// Clamped to [0, 1]; NaN is ignored
    pub fn set_strength(&self, strength: f32) {
        if let Some(v) = unit(strength) {
            self.strength.set(v);
            self.bump();
        }
    }

    pub fn set_onset_threshold_factor(&self, k: f32) {
        if k.is_finite() {
            self.onset_threshold_factor.set(k.max(0.0));
            self.bump();
        }
    }

    pub fn set_min_onset_gap_ms(&self, gap_ms: f32) {
        if gap_ms.is_finite() {
            self.min_onset_gap_ms.set(gap_ms.max(0.0));
            self.bump();
        }
    }

    pub fn set_hysteresis_margin(&self, margin: f32) {
        if margin.is_finite() {
            self.hysteresis_margin.set(margin.max(0.0));
            self.bump();
        }
    }

    pub fn set_profile_set(&self, set: KeyProfileSet) {
        self.profile_set.store(set.to_u8(), Ordering::Release);
        self.bump();
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        let generation = self.generation();
        ParamSnapshot {
            division: GridDivision::from_u8(self.division.load(Ordering::Acquire)).unwrap_or_default(),
            swing: self.swing.get(),
            strength: self.strength.get(),
            onset_threshold_factor: self.onset_threshold_factor.get(),
            min_onset_gap_ms: self.min_onset_gap_ms.get(),
            hysteresis_margin: self.hysteresis_margin.get(),
            profile_set: KeyProfileSet::from_u8(self.profile_set.load(Ordering::Acquire))
                .unwrap_or_default(),
            generation,
        }
    }
}

impl Default for RuntimeParams {
    fn default() -> Self {
        RuntimeParams::from_config(&EngineConfig::default())
    }
}

fn unit(value: f32) -> Option<f32> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_seeded_from_config() {
        let mut config = EngineConfig::default();
        config.quantize.division = GridDivision::Eighth;
        config.quantize.swing = 0.3;
        config.scale.profile_set = KeyProfileSet::Modal;

        let snapshot = RuntimeParams::from_config(&config).snapshot();
        assert_eq!(snapshot.division, GridDivision::Eighth);
        assert_relative_eq!(snapshot.swing, 0.3);
        assert_relative_eq!(snapshot.strength, 0.8);
        assert_relative_eq!(snapshot.onset_threshold_factor, 1.5);
        assert_relative_eq!(snapshot.min_onset_gap_ms, 50.0);
        assert_relative_eq!(snapshot.hysteresis_margin, 0.05);
        assert_eq!(snapshot.profile_set, KeyProfileSet::Modal);
        assert_eq!(snapshot.generation, 0);
    }

    #[test]
    fn test_setters_clamp_and_bump() {
        let params = RuntimeParams::default();
        params.set_swing(1.7);
        params.set_strength(-0.2);
        params.set_swing(f32::NAN);
        params.set_hysteresis_margin(-1.0);

        let snapshot = params.snapshot();
        assert_eq!(snapshot.swing, 1.0);
        assert_eq!(snapshot.strength, 0.0);
        assert_eq!(snapshot.hysteresis_margin, 0.0);
        assert_eq!(snapshot.generation, 3);
    }

    #[test]
    fn test_visible_across_threads() {
        let params = Arc::new(RuntimeParams::default());
        let writer = Arc::clone(&params);

        thread::spawn(move || {
            writer.set_division(GridDivision::Triplet);
            writer.set_profile_set(KeyProfileSet::Modal);
        })
        .join()
        .unwrap();

        let snapshot = params.snapshot();
        assert_eq!(snapshot.division, GridDivision::Triplet);
        assert_eq!(snapshot.profile_set, KeyProfileSet::Modal);
        assert_eq!(snapshot.generation, 2);
    }
}
