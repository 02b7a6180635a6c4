// Musical Grid - Time signature, grid divisions, and swing on the sample clock
// Provides structure for quantization and musical timing

use serde::{Deserialize, Serialize};

use super::tempo::TempoEstimate;

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSignature {
    /// 4/4 time - most common (4 beats per bar)
    #[default]
    FourFour,

    /// 3/4 time - waltz feel (3 beats per bar)
    ThreeFour,

    /// 6/8 time - compound duple, counted in eighths
    SixEight,
}

impl TimeSignature {
    /// Get number of beats per bar
    pub fn beats_per_bar(&self) -> u32 {
        match self {
            TimeSignature::FourFour => 4,
            TimeSignature::ThreeFour => 3,
            TimeSignature::SixEight => 6,
        }
    }

    /// Get the note value that gets one beat (4 = quarter note)
    pub fn beat_unit(&self) -> u32 {
        match self {
            TimeSignature::SixEight => 8,
            _ => 4,
        }
    }
}

/// Grid division - defines the resolution of the musical grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridDivision {
    /// Quarter notes (1 per beat)
    Quarter,

    /// Eighth notes (2 per beat)
    Eighth,

    /// Sixteenth notes (4 per beat)
    #[default]
    Sixteenth,

    /// Triplet feel (3 per beat)
    Triplet,

    /// Thirty-second notes (8 per beat)
    ThirtySecond,
}

impl GridDivision {
    /// Get number of subdivisions per beat
    pub fn subdivisions_per_beat(&self) -> u32 {
        match self {
            GridDivision::Quarter => 1,
            GridDivision::Eighth => 2,
            GridDivision::Sixteenth => 4,
            GridDivision::Triplet => 3,
            GridDivision::ThirtySecond => 8,
        }
    }

    /// Compact code for lock-free storage
    pub fn to_u8(self) -> u8 {
        match self {
            GridDivision::Quarter => 0,
            GridDivision::Eighth => 1,
            GridDivision::Sixteenth => 2,
            GridDivision::Triplet => 3,
            GridDivision::ThirtySecond => 4,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(GridDivision::Quarter),
            1 => Some(GridDivision::Eighth),
            2 => Some(GridDivision::Sixteenth),
            3 => Some(GridDivision::Triplet),
            4 => Some(GridDivision::ThirtySecond),
            _ => None,
        }
    }
}

/// Grid position - describes location in musical time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridPosition {
    /// Bar number (0-indexed)
    pub bar: u32,

    /// Beat number within bar (0-indexed)
    pub beat: u32,

    /// Subdivision within beat (0-indexed)
    pub subdivision: u32,
}

/// Beat grid anchored on the session sample clock
///
/// Line `i` sits at `phase + i * sub`; lines on odd subdivisions within a beat
/// are pushed later by `swing * sub`. Lines before the phase are allowed (negative
/// indices) so events just ahead of the first detected beat still snap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatGrid {
    /// Beat length in samples
    pub beat_period: f64,

    /// Sample position of a reference beat
    pub phase: f64,

    pub division: GridDivision,

    pub time_signature: TimeSignature,

    /// Swing amount [0.0, 1.0]
    pub swing: f32,
}

impl BeatGrid {
    /// Grid for a tempo estimate
    pub fn new(
        tempo: &TempoEstimate,
        sample_rate: u32,
        division: GridDivision,
        time_signature: TimeSignature,
        swing: f32,
    ) -> Self {
        BeatGrid {
            beat_period: tempo.beat_period_samples(sample_rate),
            phase: tempo.phase_samples as f64,
            division,
            time_signature,
            swing: clamp_unit(swing),
        }
    }

    /// Grid from a raw BPM; `None` for a non-positive tempo
    pub fn from_bpm(
        bpm: f64,
        sample_rate: u32,
        phase_samples: u64,
        division: GridDivision,
        time_signature: TimeSignature,
    ) -> Option<Self> {
        let tempo = TempoEstimate::new(bpm, 1.0, phase_samples)?;
        Some(BeatGrid::new(&tempo, sample_rate, division, time_signature, 0.0))
    }

    pub fn set_swing(&mut self, swing: f32) {
        self.swing = clamp_unit(swing);
    }

    pub fn set_division(&mut self, division: GridDivision) {
        self.division = division;
    }

    /// Length of one grid subdivision in samples
    pub fn subdivision_samples(&self) -> f64 {
        self.beat_period / self.division.subdivisions_per_beat() as f64
    }

    /// Sample time of grid line `index`, swing included
    pub fn line_time(&self, index: i64) -> f64 {
        let sub = self.subdivision_samples();
        let spb = self.division.subdivisions_per_beat() as i64;
        let mut time = self.phase + index as f64 * sub;

        if self.swing > 0.0 && index.rem_euclid(spb) % 2 == 1 {
            time += self.swing as f64 * sub;
        }

        time
    }

    /// Nearest grid line to `timestamp`: (line index, line time)
    /// Ties go to the earlier line.
    pub fn nearest_line(&self, timestamp: f64) -> (i64, f64) {
        let sub = self.subdivision_samples();
        if !sub.is_finite() || sub <= 0.0 || !timestamp.is_finite() {
            return (0, self.phase);
        }

        let base = ((timestamp - self.phase) / sub).floor() as i64;
        let mut best = (base, self.line_time(base));
        let mut best_distance = (best.1 - timestamp).abs();

        for index in [base - 1, base + 1] {
            let time = self.line_time(index);
            let distance = (time - timestamp).abs();
            let earlier = time < best.1;
            if distance < best_distance || (distance == best_distance && earlier) {
                best = (index, time);
                best_distance = distance;
            }
        }

        best
    }

    /// Grid position of line `index`
    pub fn position_of(&self, index: i64) -> GridPosition {
        let spb = self.division.subdivisions_per_beat() as i64;
        let bpb = self.time_signature.beats_per_bar() as i64;

        let index = index.max(0);
        let beat_index = index / spb;

        GridPosition {
            bar: (beat_index / bpb) as u32,
            beat: (beat_index % bpb) as u32,
            subdivision: (index % spb) as u32,
        }
    }

    /// Sample time of a grid position
    pub fn timestamp_for_position(&self, position: &GridPosition) -> f64 {
        let spb = self.division.subdivisions_per_beat() as i64;
        let bpb = self.time_signature.beats_per_bar() as i64;
        let index = (position.bar as i64 * bpb + position.beat as i64) * spb + position.subdivision as i64;
        self.line_time(index)
    }

    /// Bar number for a timestamp (0-indexed, counted from the phase)
    pub fn bar_number(&self, timestamp: f64) -> u32 {
        let samples_per_bar = self.beat_period * self.time_signature.beats_per_bar() as f64;
        if samples_per_bar > 0.0 && timestamp > self.phase {
            ((timestamp - self.phase) / samples_per_bar).floor() as u32
        } else {
            0
        }
    }

    /// Beat number within bar for a timestamp (1-indexed: 1, 2, 3, 4)
    pub fn beat_in_bar(&self, timestamp: f64) -> u32 {
        let beats_per_bar = self.time_signature.beats_per_bar();
        if self.beat_period <= 0.0 || timestamp <= self.phase {
            return 1;
        }

        let beat = ((timestamp - self.phase) / self.beat_period).floor() as u64;
        (beat % beats_per_bar as u64) as u32 + 1
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 120 BPM at 48 kHz: 24000 samples per beat
    fn grid(division: GridDivision) -> BeatGrid {
        BeatGrid::from_bpm(120.0, 48000, 0, division, TimeSignature::FourFour).unwrap()
    }

    #[test]
    fn test_time_signature_beats() {
        assert_eq!(TimeSignature::FourFour.beats_per_bar(), 4);
        assert_eq!(TimeSignature::ThreeFour.beats_per_bar(), 3);
        assert_eq!(TimeSignature::SixEight.beats_per_bar(), 6);
        assert_eq!(TimeSignature::SixEight.beat_unit(), 8);
    }

    #[test]
    fn test_grid_division_subdivisions() {
        assert_eq!(GridDivision::Quarter.subdivisions_per_beat(), 1);
        assert_eq!(GridDivision::Eighth.subdivisions_per_beat(), 2);
        assert_eq!(GridDivision::Sixteenth.subdivisions_per_beat(), 4);
        assert_eq!(GridDivision::Triplet.subdivisions_per_beat(), 3);
        assert_eq!(GridDivision::ThirtySecond.subdivisions_per_beat(), 8);
    }

    #[test]
    fn test_division_codes() {
        for code in 0..5 {
            let division = GridDivision::from_u8(code).unwrap();
            assert_eq!(division.to_u8(), code);
        }
        assert!(GridDivision::from_u8(9).is_none());
    }

    #[test]
    fn test_line_times_120_bpm() {
        let grid = grid(GridDivision::Quarter);

        assert_eq!(grid.line_time(0), 0.0);
        assert_eq!(grid.line_time(1), 24000.0);
        assert_eq!(grid.line_time(3), 72000.0);
        assert_eq!(grid.line_time(-1), -24000.0);
    }

    #[test]
    fn test_nearest_line() {
        let grid = grid(GridDivision::Sixteenth);

        let (index, time) = grid.nearest_line(6200.0);
        assert_eq!(index, 1);
        assert_eq!(time, 6000.0);

        let (index, _) = grid.nearest_line(8900.0);
        assert_eq!(index, 1);
    }

    #[test]
    fn test_nearest_line_tie_goes_earlier() {
        let grid = grid(GridDivision::Sixteenth);
        let (index, time) = grid.nearest_line(9000.0);
        assert_eq!(index, 1);
        assert_eq!(time, 6000.0);
    }

    #[test]
    fn test_swing_delays_off_beats() {
        let mut grid = grid(GridDivision::Eighth);
        grid.set_swing(0.5);

        // On-beat unchanged, off-beat pushed by half an eighth
        assert_eq!(grid.line_time(0), 0.0);
        assert_eq!(grid.line_time(1), 12000.0 + 6000.0);
        assert_eq!(grid.line_time(2), 24000.0);

        let (index, _) = grid.nearest_line(17000.0);
        assert_eq!(index, 1);
    }

    #[test]
    fn test_grid_position() {
        let grid = grid(GridDivision::Eighth);

        let position = grid.position_of(2); // Second beat
        assert_eq!(position.bar, 0);
        assert_eq!(position.beat, 1);
        assert_eq!(position.subdivision, 0);

        let position = grid.position_of(9);
        assert_eq!(position.bar, 1);
        assert_eq!(position.beat, 0);
        assert_eq!(position.subdivision, 1);

        assert_eq!(grid.timestamp_for_position(&position), grid.line_time(9));
    }

    #[test]
    fn test_bar_number() {
        let grid = grid(GridDivision::Quarter);

        // 4/4 at 120 BPM: 96000 samples per bar
        assert_eq!(grid.bar_number(24000.0), 0);
        assert_eq!(grid.bar_number(120000.0), 1);
        assert_eq!(grid.bar_number(216000.0), 2);
    }

    #[test]
    fn test_beat_in_bar() {
        let grid = grid(GridDivision::Quarter);

        assert_eq!(grid.beat_in_bar(4800.0), 1);
        assert_eq!(grid.beat_in_bar(28800.0), 2);
        assert_eq!(grid.beat_in_bar(52800.0), 3);
        assert_eq!(grid.beat_in_bar(76800.0), 4);
        assert_eq!(grid.beat_in_bar(100800.0), 1);
    }

    #[test]
    fn test_from_bpm_rejects_zero() {
        assert!(BeatGrid::from_bpm(0.0, 48000, 0, GridDivision::Quarter, TimeSignature::FourFour).is_none());
    }
}
