// Chord recognition
// Cosine scoring of the chroma against 12 rotations of every template, with hysteresis

use serde::{Deserialize, Serialize};

use super::chroma::{pitch_class_name, ChromaVector, PitchClass};
use super::templates::{template, ChordTemplate, CHORD_TEMPLATES, TEMPLATE_COUNT};
use crate::engine::Stage;

/// Number of (template, root) candidates
pub const CANDIDATE_COUNT: usize = TEMPLATE_COUNT * 12;

const LANES: usize = 8;
const BLOCKS: usize = CANDIDATE_COUNT / LANES;
const AGREEMENT_WINDOW: usize = 8;

/// Which numeric path scores the candidates.
/// Both accumulate pitch classes in the same order, so scores are bit-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPath {
    /// One dot product per candidate
    Scalar,

    /// Eight candidates per block, laid out for auto-vectorization
    #[default]
    Lanes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChordEstimate {
    pub root: PitchClass,
    pub template_id: u8,
    /// Cosine similarity [0.0, 1.0]
    pub score: f32,
    pub confidence: f32,
}

impl ChordEstimate {
    pub fn template(&self) -> Option<&'static ChordTemplate> {
        template(self.template_id)
    }

    /// Same chord, regardless of score
    pub fn same_chord(&self, other: &ChordEstimate) -> bool {
        self.root == other.root && self.template_id == other.template_id
    }

    /// Display name, e.g. "Am7"
    pub fn name(&self) -> String {
        let label = self.template().map(|t| t.label).unwrap_or("?");
        format!("{}{}", pitch_class_name(self.root), label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordConfig {
    /// Score lead a rival needs over the committed chord to replace it at once
    pub hysteresis_margin: f32,

    /// Consecutive frames a rival must win to replace the committed chord
    pub min_agree_frames: u32,

    /// Raw candidates scoring below this are ignored
    pub min_score: f32,

    pub scoring: ScoringPath,
}

impl Default for ChordConfig {
    fn default() -> Self {
        ChordConfig {
            hysteresis_margin: 0.05,
            min_agree_frames: 4,
            min_score: 0.5,
            scoring: ScoringPath::Lanes,
        }
    }
}

/// Pre-normalized rotated template masks.
/// Candidate index = template_id * 12 + root.
pub struct ChordTable {
    rows: Box<[[f32; 12]]>,
    /// [block][pitch class][lane]
    lanes: Box<[[[f32; LANES]; 12]]>,
}

impl ChordTable {
    pub fn new() -> Self {
        let mut rows = vec![[0.0f32; 12]; CANDIDATE_COUNT];

        for template in CHORD_TEMPLATES.iter() {
            let norm = (template.tone_count() as f32).sqrt();
            for root in 0..12 {
                let row = &mut rows[template.id as usize * 12 + root];
                for &interval in template.intervals {
                    row[(root + interval as usize) % 12] = 1.0 / norm;
                }
            }
        }

        let mut lanes = vec![[[0.0f32; LANES]; 12]; BLOCKS];
        for (candidate, row) in rows.iter().enumerate() {
            for (pc, &weight) in row.iter().enumerate() {
                lanes[candidate / LANES][pc][candidate % LANES] = weight;
            }
        }

        ChordTable {
            rows: rows.into_boxed_slice(),
            lanes: lanes.into_boxed_slice(),
        }
    }

    /// Score every candidate against a unit-norm chroma
    pub fn score_all(&self, unit_chroma: &[f32; 12], path: ScoringPath, out: &mut [f32; CANDIDATE_COUNT]) {
        match path {
            ScoringPath::Scalar => {
                for (score, row) in out.iter_mut().zip(self.rows.iter()) {
                    let mut acc = 0.0f32;
                    for pc in 0..12 {
                        acc += row[pc] * unit_chroma[pc];
                    }
                    *score = acc;
                }
            }
            ScoringPath::Lanes => {
                for (block, weights) in self.lanes.iter().enumerate() {
                    let mut acc = [0.0f32; LANES];
                    for pc in 0..12 {
                        let x = unit_chroma[pc];
                        for lane in 0..LANES {
                            acc[lane] += weights[pc][lane] * x;
                        }
                    }
                    out[block * LANES..(block + 1) * LANES].copy_from_slice(&acc);
                }
            }
        }
    }
}

impl Default for ChordTable {
    fn default() -> Self {
        ChordTable::new()
    }
}

/// Best candidate. Equal scores mean equal pitch-class sets (C6 and Am7, Cm6 and
/// Am7b5, Csus2 and Gsus4, the rotations of dim7 and aug); those go to the
/// candidate whose root carries more chroma energy, then to the lowest index.
fn best_candidate(scores: &[f32; CANDIDATE_COUNT], unit_chroma: &[f32; 12]) -> (usize, f32) {
    let root_energy = |candidate: usize| unit_chroma[candidate % 12];

    let mut best = (0, scores[0]);
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > best.1 || (score == best.1 && root_energy(i) > root_energy(best.0)) {
            best = (i, score);
        }
    }
    best
}

fn candidate_chord(candidate: usize) -> (PitchClass, u8) {
    ((candidate % 12) as PitchClass, (candidate / 12) as u8)
}

pub struct ChordAnalyzer {
    config: ChordConfig,
    table: ChordTable,
    scores: Box<[f32; CANDIDATE_COUNT]>,

    committed: Option<usize>,
    pending: Option<(usize, u32)>,

    /// Raw winners of recent frames, None when below min_score
    recent: [Option<u16>; AGREEMENT_WINDOW],
    recent_pos: usize,
    recent_filled: usize,
}

impl ChordAnalyzer {
    pub fn new(config: ChordConfig) -> Self {
        ChordAnalyzer {
            config,
            table: ChordTable::new(),
            scores: Box::new([0.0; CANDIDATE_COUNT]),
            committed: None,
            pending: None,
            recent: [None; AGREEMENT_WINDOW],
            recent_pos: 0,
            recent_filled: 0,
        }
    }

    pub fn config(&self) -> &ChordConfig {
        &self.config
    }

    pub fn set_hysteresis_margin(&mut self, margin: f32) {
        self.config.hysteresis_margin = if margin.is_finite() { margin.max(0.0) } else { 0.0 };
    }

    pub fn set_scoring_path(&mut self, path: ScoringPath) {
        self.config.scoring = path;
    }

    /// Scores of the last processed frame, indexed by template_id * 12 + root
    pub fn scores(&self) -> &[f32; CANDIDATE_COUNT] {
        &self.scores
    }

    /// Committed chord with its current score, if any
    pub fn committed(&self) -> Option<ChordEstimate> {
        self.committed.map(|c| self.estimate_for(c))
    }

    fn record(&mut self, winner: Option<usize>) {
        self.recent[self.recent_pos] = winner.map(|w| w as u16);
        self.recent_pos = (self.recent_pos + 1) % AGREEMENT_WINDOW;
        self.recent_filled = (self.recent_filled + 1).min(AGREEMENT_WINDOW);
    }

    fn agreement(&self, candidate: usize) -> f32 {
        if self.recent_filled == 0 {
            return 0.0;
        }
        let agreeing = self.recent[..self.recent_filled]
            .iter()
            .filter(|w| **w == Some(candidate as u16))
            .count();
        agreeing as f32 / self.recent_filled as f32
    }

    fn estimate_for(&self, candidate: usize) -> ChordEstimate {
        let (root, template_id) = candidate_chord(candidate);
        let score = self.scores[candidate].clamp(0.0, 1.0);
        ChordEstimate {
            root,
            template_id,
            score,
            confidence: (score * self.agreement(candidate)).clamp(0.0, 1.0),
        }
    }

    fn commit(&mut self, candidate: usize) {
        self.committed = Some(candidate);
        self.pending = None;
    }

    fn apply_hysteresis(&mut self, raw: usize, raw_score: f32) {
        let committed = match self.committed {
            None => return self.commit(raw),
            Some(c) if c == raw => {
                self.pending = None;
                return;
            }
            Some(c) => c,
        };

        if raw_score > self.scores[committed] + self.config.hysteresis_margin {
            return self.commit(raw);
        }

        let count = match self.pending {
            Some((candidate, count)) if candidate == raw => count + 1,
            _ => 1,
        };

        if count >= self.config.min_agree_frames.max(1) {
            self.commit(raw);
        } else {
            self.pending = Some((raw, count));
        }
    }
}

impl Stage<ChromaVector> for ChordAnalyzer {
    type Output = ChordEstimate;

    /// Returns the committed chord after this frame (possibly unchanged)
    fn process(&mut self, chroma: &ChromaVector) -> Option<ChordEstimate> {
        let norm = chroma.norm();
        if !(norm.is_finite() && norm > 1e-9) {
            return self.committed();
        }

        let mut unit = *chroma.values();
        unit.iter_mut().for_each(|v| *v /= norm);
        self.table.score_all(&unit, self.config.scoring, &mut self.scores);

        let (raw, raw_score) = best_candidate(&self.scores, &unit);
        if raw_score < self.config.min_score {
            self.record(None);
            self.pending = None;
        } else {
            self.record(Some(raw));
            self.apply_hysteresis(raw, raw_score);
        }

        self.committed()
    }

    fn reset(&mut self) {
        self.scores.iter_mut().for_each(|s| *s = 0.0);
        self.committed = None;
        self.pending = None;
        self.recent = [None; AGREEMENT_WINDOW];
        self.recent_pos = 0;
        self.recent_filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmony::templates::{MAJOR_SEVENTH, MAJOR_TRIAD, MINOR_SEVENTH, MINOR_TRIAD};
    use approx::assert_relative_eq;

    fn c_major() -> ChromaVector {
        ChromaVector::from_pitch_classes(&[0, 4, 7])
    }

    // C E G with a moderate B: Cmaj7 wins by less than the default margin
    fn c_major_seventh_ish() -> ChromaVector {
        let mut v = [0.0; 12];
        v[0] = 1.0;
        v[4] = 1.0;
        v[7] = 1.0;
        v[11] = 0.6;
        ChromaVector::new(v)
    }

    #[test]
    fn test_c_major_template_scores_maximum() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        let estimate = analyzer.process(&c_major()).unwrap();

        assert_eq!(estimate.root, 0);
        assert_eq!(estimate.template_id, MAJOR_TRIAD);
        assert_relative_eq!(estimate.score, 1.0, epsilon = 1e-5);
        let max = analyzer.scores().iter().fold(f32::MIN, |a, &b| a.max(b));
        assert_eq!(analyzer.scores()[MAJOR_TRIAD as usize * 12], max);
        assert_eq!(estimate.name(), "C");
    }

    #[test]
    fn test_rotation_finds_root() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        // A C E G
        let estimate = analyzer.process(&ChromaVector::from_pitch_classes(&[9, 0, 4, 7])).unwrap();
        assert_eq!(estimate.root, 9);
        assert_eq!(estimate.template_id, MINOR_SEVENTH);
        assert_eq!(estimate.name(), "Am7");
    }

    #[test]
    fn test_scalar_and_lane_paths_identical() {
        let table = ChordTable::new();
        let mut scalar = [0.0f32; CANDIDATE_COUNT];
        let mut lanes = [0.0f32; CANDIDATE_COUNT];

        let mut state = 0x2545_f491u32;
        for _ in 0..200 {
            let mut chroma = [0.0f32; 12];
            for v in chroma.iter_mut() {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                *v = (state % 1000) as f32 / 1000.0;
            }
            let norm = chroma.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
            chroma.iter_mut().for_each(|v| *v /= norm);

            table.score_all(&chroma, ScoringPath::Scalar, &mut scalar);
            table.score_all(&chroma, ScoringPath::Lanes, &mut lanes);

            for i in 0..CANDIDATE_COUNT {
                assert_eq!(scalar[i].to_bits(), lanes[i].to_bits(), "candidate {}", i);
            }
            assert_eq!(best_candidate(&scalar, &chroma), best_candidate(&lanes, &chroma));
        }
    }

    #[test]
    fn test_ties_go_to_lowest_candidate() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        // Diminished seventh is symmetric: every minor-third rotation ties
        let estimate = analyzer.process(&ChromaVector::from_pitch_classes(&[0, 3, 6, 9])).unwrap();
        assert_eq!(estimate.root, 0);
    }

    #[test]
    fn test_shared_pitch_sets_follow_the_loudest_root() {
        // C E G A: C6 and Am7 score identically
        let mut c_heavy = [0.0; 12];
        c_heavy[0] = 1.0;
        for pc in [4, 7, 9] {
            c_heavy[pc] = 0.6;
        }
        let mut a_heavy = [0.0; 12];
        a_heavy[9] = 1.0;
        for pc in [0, 4, 7] {
            a_heavy[pc] = 0.6;
        }

        for path in [ScoringPath::Scalar, ScoringPath::Lanes] {
            let config = ChordConfig {
                scoring: path,
                ..ChordConfig::default()
            };

            let mut analyzer = ChordAnalyzer::new(config.clone());
            let estimate = analyzer.process(&ChromaVector::new(c_heavy)).unwrap();
            assert_eq!(estimate.name(), "C6");
            assert_eq!(analyzer.scores()[16 * 12], analyzer.scores()[MINOR_SEVENTH as usize * 12 + 9]);

            let mut analyzer = ChordAnalyzer::new(config);
            let estimate = analyzer.process(&ChromaVector::new(a_heavy)).unwrap();
            assert_eq!(estimate.name(), "Am7");
        }
    }

    #[test]
    fn test_sus4_reachable_with_root_emphasis() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        // G C D with G loudest: Gsus4 rather than Csus2
        let mut v = [0.0; 12];
        v[7] = 1.0;
        v[0] = 0.7;
        v[2] = 0.7;
        let estimate = analyzer.process(&ChromaVector::new(v)).unwrap();
        assert_eq!(estimate.name(), "Gsus4");
    }

    #[test]
    fn test_hysteresis_holds_against_marginal_rival() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        analyzer.process(&c_major());

        // Rival wins by less than the margin: held for min_agree_frames - 1 frames
        for _ in 0..3 {
            let estimate = analyzer.process(&c_major_seventh_ish()).unwrap();
            assert_eq!(estimate.template_id, MAJOR_TRIAD);
        }

        // Fourth agreeing frame switches
        let estimate = analyzer.process(&c_major_seventh_ish()).unwrap();
        assert_eq!(estimate.template_id, MAJOR_SEVENTH);
        assert_eq!(estimate.root, 0);
    }

    #[test]
    fn test_clear_winner_switches_immediately() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        analyzer.process(&c_major());

        // F# minor shares nothing with C major
        let estimate = analyzer.process(&ChromaVector::from_pitch_classes(&[6, 9, 1])).unwrap();
        assert_eq!(estimate.root, 6);
        assert_eq!(estimate.template_id, MINOR_TRIAD);
    }

    #[test]
    fn test_confidence_grows_with_agreement() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        let first = analyzer.process(&c_major()).unwrap();
        for _ in 0..7 {
            analyzer.process(&c_major());
        }
        let later = analyzer.committed().unwrap();
        assert!(later.confidence >= first.confidence);
        assert_relative_eq!(later.confidence, later.score, epsilon = 1e-6);
    }

    #[test]
    fn test_silence_keeps_committed_chord() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        assert!(analyzer.process(&ChromaVector::default()).is_none());

        analyzer.process(&c_major());
        let held = analyzer.process(&ChromaVector::default()).unwrap();
        assert_eq!(held.template_id, MAJOR_TRIAD);
    }

    #[test]
    fn test_reset_clears_commitment() {
        let mut analyzer = ChordAnalyzer::new(ChordConfig::default());
        analyzer.process(&c_major());
        analyzer.reset();
        assert!(analyzer.committed().is_none());
    }
}
