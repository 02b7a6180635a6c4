// Key / scale detection
// Pearson correlation of a slowly smoothed chroma with Krumhansl-Kessler key profiles

use serde::{Deserialize, Serialize};

use super::chroma::{pitch_class_name, ChromaVector, PitchClass};
use crate::engine::Stage;

/// Krumhansl-Kessler major profile, tonic first
pub const KK_MAJOR: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor profile, tonic first
pub const KK_MINOR: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl KeyMode {
    /// Table order; also the tie-break order
    pub const ALL: [KeyMode; 7] = [
        KeyMode::Major,
        KeyMode::Minor,
        KeyMode::Dorian,
        KeyMode::Phrygian,
        KeyMode::Lydian,
        KeyMode::Mixolydian,
        KeyMode::Locrian,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyMode::Major => "major",
            KeyMode::Minor => "minor",
            KeyMode::Dorian => "dorian",
            KeyMode::Phrygian => "phrygian",
            KeyMode::Lydian => "lydian",
            KeyMode::Mixolydian => "mixolydian",
            KeyMode::Locrian => "locrian",
        }
    }

    /// Profile with tonic first.
    /// Modes swap the characteristic degree of the nearest major/minor profile.
    pub fn profile(&self) -> [f32; 12] {
        match self {
            KeyMode::Major => KK_MAJOR,
            KeyMode::Minor => KK_MINOR,
            KeyMode::Dorian => swapped(KK_MINOR, 8, 9),
            KeyMode::Phrygian => swapped(KK_MINOR, 1, 2),
            KeyMode::Lydian => swapped(KK_MAJOR, 5, 6),
            KeyMode::Mixolydian => swapped(KK_MAJOR, 10, 11),
            KeyMode::Locrian => swapped(swapped(KK_MINOR, 1, 2), 6, 7),
        }
    }
}

fn swapped(mut profile: [f32; 12], a: usize, b: usize) -> [f32; 12] {
    profile.swap(a, b);
    profile
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyProfileSet {
    /// 12 major + 12 minor keys
    #[default]
    MajorMinor,

    /// All seven diatonic modes on every tonic
    Modal,
}

impl KeyProfileSet {
    pub fn profile_count(&self) -> usize {
        match self {
            KeyProfileSet::MajorMinor => 24,
            KeyProfileSet::Modal => 84,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            KeyProfileSet::MajorMinor => 0,
            KeyProfileSet::Modal => 1,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(KeyProfileSet::MajorMinor),
            1 => Some(KeyProfileSet::Modal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleEstimate {
    pub tonic: PitchClass,
    pub mode: KeyMode,
    /// Pearson correlation [-1.0, 1.0]
    pub correlation: f32,
    /// Best minus runner-up correlation, clamped to [0.0, 1.0]
    pub margin_over_second_best: f32,
    pub ambiguous: bool,
}

impl ScaleEstimate {
    pub fn same_key(&self, other: &ScaleEstimate) -> bool {
        self.tonic == other.tonic && self.mode == other.mode
    }

    /// Display name, e.g. "A minor"
    pub fn name(&self) -> String {
        format!("{} {}", pitch_class_name(self.tonic), self.mode.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Weight of the previous smoothed chroma [0.0, 1.0)
    pub key_smoothing: f32,

    /// Margins below this mark the estimate ambiguous
    pub ambiguity_margin: f32,

    pub profile_set: KeyProfileSet,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        ScaleConfig {
            key_smoothing: 0.9,
            ambiguity_margin: 0.02,
            profile_set: KeyProfileSet::MajorMinor,
        }
    }
}

/// Mean-centered, unit-norm rotated profiles, mode-major then tonic order
struct ProfileTable {
    rows: Box<[[f32; 12]]>,
}

impl ProfileTable {
    fn new() -> Self {
        let mut rows = Vec::with_capacity(84);
        for mode in KeyMode::ALL {
            let base = mode.profile();
            for tonic in 0..12 {
                let mut row = [0.0f32; 12];
                for (pc, value) in row.iter_mut().enumerate() {
                    *value = base[(pc + 12 - tonic) % 12];
                }
                // A profile is never flat, so centering always succeeds
                rows.push(center(&row).unwrap_or(row));
            }
        }
        ProfileTable {
            rows: rows.into_boxed_slice(),
        }
    }
}

/// Mean-center and normalize; `None` for a flat vector
fn center(values: &[f32; 12]) -> Option<[f32; 12]> {
    let mean = values.iter().sum::<f32>() / 12.0;
    let mut out = [0.0f32; 12];
    for (o, v) in out.iter_mut().zip(values.iter()) {
        *o = v - mean;
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !(norm.is_finite() && norm > 1e-6) {
        return None;
    }
    out.iter_mut().for_each(|v| *v /= norm);
    Some(out)
}

pub struct ScaleDetector {
    config: ScaleConfig,
    table: ProfileTable,
    smoothed: [f32; 12],
    primed: bool,
}

impl ScaleDetector {
    pub fn new(config: ScaleConfig) -> Self {
        ScaleDetector {
            config,
            table: ProfileTable::new(),
            smoothed: [0.0; 12],
            primed: false,
        }
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    pub fn set_profile_set(&mut self, set: KeyProfileSet) {
        self.config.profile_set = set;
    }

    /// Correlate a chroma against the active profiles without touching smoothing state
    pub fn correlate(&self, chroma: &[f32; 12]) -> Option<ScaleEstimate> {
        let x = center(chroma)?;
        let count = self.config.profile_set.profile_count();

        let mut best: Option<(usize, f32)> = None;
        let mut second = f32::NEG_INFINITY;

        for (i, row) in self.table.rows[..count].iter().enumerate() {
            let r: f32 = row.iter().zip(x.iter()).map(|(p, c)| p * c).sum();
            match best {
                Some((_, b)) if r <= b => second = second.max(r),
                Some((_, b)) => {
                    second = b;
                    best = Some((i, r));
                }
                None => best = Some((i, r)),
            }
        }

        let (index, correlation) = best?;
        let margin = (correlation - second).clamp(0.0, 1.0);

        Some(ScaleEstimate {
            tonic: (index % 12) as PitchClass,
            mode: KeyMode::ALL[index / 12],
            correlation: correlation.clamp(-1.0, 1.0),
            margin_over_second_best: margin,
            ambiguous: margin < self.config.ambiguity_margin,
        })
    }
}

impl Stage<ChromaVector> for ScaleDetector {
    type Output = ScaleEstimate;

    fn process(&mut self, chroma: &ChromaVector) -> Option<ScaleEstimate> {
        if self.primed {
            let keep = self.config.key_smoothing.clamp(0.0, 1.0);
            for (s, c) in self.smoothed.iter_mut().zip(chroma.values().iter()) {
                *s = keep * *s + (1.0 - keep) * c;
            }
        } else {
            self.smoothed = *chroma.values();
            self.primed = true;
        }

        self.correlate(&self.smoothed)
    }

    fn reset(&mut self) {
        self.smoothed = [0.0; 12];
        self.primed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c_major_scale() -> ChromaVector {
        ChromaVector::from_pitch_classes(&[0, 2, 4, 5, 7, 9, 11])
    }

    #[test]
    fn test_c_major_scale_detected() {
        let mut detector = ScaleDetector::new(ScaleConfig::default());
        let estimate = detector.process(&c_major_scale()).unwrap();

        assert_eq!(estimate.tonic, 0);
        assert_eq!(estimate.mode, KeyMode::Major);
        assert!(estimate.margin_over_second_best > 0.0);
        assert!(estimate.margin_over_second_best <= 1.0);
        assert!(!estimate.ambiguous);
        assert_eq!(estimate.name(), "C major");
    }

    #[test]
    fn test_margin_stays_in_unit_range() {
        let detector = ScaleDetector::new(ScaleConfig::default());
        let sparse: [&[PitchClass]; 4] = [&[0], &[0, 6], &[1, 2, 3], &[0, 4, 7, 10]];
        for pcs in sparse {
            let estimate = detector.correlate(ChromaVector::from_pitch_classes(pcs).values()).unwrap();
            assert!(
                (0.0..=1.0).contains(&estimate.margin_over_second_best),
                "{:?}: {}",
                pcs,
                estimate.margin_over_second_best
            );
            assert!((-1.0..=1.0).contains(&estimate.correlation));
        }
    }

    #[test]
    fn test_a_minor_tonic_weighting() {
        let detector = ScaleDetector::new(ScaleConfig::default());
        // A natural minor with tonic and fifth emphasized
        let mut v = [0.0; 12];
        for (pc, w) in [(9, 1.0), (11, 0.4), (0, 0.7), (2, 0.4), (4, 0.9), (5, 0.4), (7, 0.3)] {
            v[pc] = w;
        }
        let estimate = detector.correlate(&v).unwrap();
        assert_eq!(estimate.tonic, 9);
        assert_eq!(estimate.mode, KeyMode::Minor);
    }

    #[test]
    fn test_modal_set_finds_tonic_weighted_major() {
        let mut config = ScaleConfig::default();
        config.profile_set = KeyProfileSet::Modal;
        let detector = ScaleDetector::new(config);

        let mut v = [0.0; 12];
        for (pc, w) in [(0, 1.0), (2, 0.5), (4, 0.8), (5, 0.5), (7, 0.9), (9, 0.5), (11, 0.4)] {
            v[pc] = w;
        }
        let estimate = detector.correlate(&v).unwrap();
        assert_eq!(estimate.tonic, 0);
        assert_eq!(estimate.mode, KeyMode::Major);
    }

    #[test]
    fn test_flat_diatonic_set_is_ambiguous_across_modes() {
        let mut config = ScaleConfig::default();
        config.profile_set = KeyProfileSet::Modal;
        let detector = ScaleDetector::new(config);

        // C major, F lydian and G mixolydian correlate identically with a flat scale
        let estimate = detector.correlate(c_major_scale().values()).unwrap();
        assert!(estimate.ambiguous);
    }

    #[test]
    fn test_flat_chroma_has_no_estimate() {
        let mut detector = ScaleDetector::new(ScaleConfig::default());
        assert!(detector.process(&ChromaVector::default()).is_none());
        assert!(detector.correlate(&[0.5; 12]).is_none());
    }

    #[test]
    fn test_profile_set_switch() {
        let mut detector = ScaleDetector::new(ScaleConfig::default());
        detector.set_profile_set(KeyProfileSet::Modal);
        assert_eq!(detector.config().profile_set, KeyProfileSet::Modal);
        assert_eq!(KeyProfileSet::from_u8(KeyProfileSet::Modal.to_u8()), Some(KeyProfileSet::Modal));
    }

    #[test]
    fn test_mode_profiles_are_permutations() {
        for mode in KeyMode::ALL {
            let mut profile = mode.profile();
            let mut base = if matches!(mode, KeyMode::Major | KeyMode::Lydian | KeyMode::Mixolydian) {
                KK_MAJOR
            } else {
                KK_MINOR
            };
            profile.sort_by(|a, b| a.partial_cmp(b).unwrap());
            base.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(profile, base);
        }
    }
}
