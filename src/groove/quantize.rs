// Soft Quantization - Preserves human feel while aligning to the beat grid
// Strength-based snapping with swing, on integer sample timestamps

use serde::{Deserialize, Serialize};

use super::grid::{BeatGrid, GridDivision, GridPosition, TimeSignature};
use super::onset::OnsetEvent;
use super::tempo::TempoEstimate;
use crate::engine::Stage;

/// Settings for quantization behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizeSettings {
    /// Grid resolution
    pub division: GridDivision,

    pub time_signature: TimeSignature,

    /// Quantization strength [0.0, 1.0]
    /// 0.0 = no quantization (preserve original timing)
    /// 1.0 = full snap to grid
    /// 0.5 = halfway between original and grid
    pub strength: f32,

    /// Swing amount [0.0, 1.0] - delays off-beats
    /// 0.0 = straight timing
    /// 0.5 = typical swing feel
    /// 1.0 = maximum swing
    pub swing: f32,

    /// Events closer than this to their predecessor move with it (grace notes, flams)
    pub group_threshold_ms: f64,
}

impl Default for QuantizeSettings {
    fn default() -> Self {
        QuantizeSettings {
            division: GridDivision::Sixteenth,
            time_signature: TimeSignature::FourFour,
            strength: 0.8,
            swing: 0.0,
            group_threshold_ms: 30.0,
        }
    }
}

/// An onset with both original and quantized timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizedEvent {
    /// Original timestamp before quantization (samples)
    pub original_timestamp: u64,

    /// Quantized timestamp after grid alignment (samples)
    pub quantized_timestamp: u64,

    /// Applied strength: 0.0 = unmodified, 1.0 = fully snapped
    pub strength_of_snap: f32,

    /// Position on the musical grid
    pub grid_position: GridPosition,

    /// How much the event moved (positive = later, negative = earlier)
    pub snap_delta: i64,
}

/// One quantization request
#[derive(Debug, Clone, Copy)]
pub struct QuantizeInput {
    pub onset: OnsetEvent,
    pub tempo: TempoEstimate,
}

/// Streaming quantizer: snaps each onset against the current tempo grid
#[derive(Debug, Clone)]
pub struct RhythmQuantizer {
    settings: QuantizeSettings,
    sample_rate: u32,
}

impl RhythmQuantizer {
    pub fn new(settings: QuantizeSettings, sample_rate: u32) -> Self {
        RhythmQuantizer {
            settings,
            sample_rate,
        }
    }

    pub fn settings(&self) -> &QuantizeSettings {
        &self.settings
    }

    pub fn set_division(&mut self, division: GridDivision) {
        self.settings.division = division;
    }

    pub fn set_swing(&mut self, swing: f32) {
        self.settings.swing = unit(swing);
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.settings.strength = unit(strength);
    }

    /// Grid implied by a tempo estimate and the current settings
    pub fn grid(&self, tempo: &TempoEstimate) -> BeatGrid {
        BeatGrid::new(
            tempo,
            self.sample_rate,
            self.settings.division,
            self.settings.time_signature,
            self.settings.swing,
        )
    }

    /// Quantize a single timestamp against the grid of `tempo`
    pub fn quantize(&self, timestamp: u64, tempo: &TempoEstimate) -> QuantizedEvent {
        snap(timestamp, &self.grid(tempo), self.settings.strength)
    }
}

impl Stage<QuantizeInput> for RhythmQuantizer {
    type Output = QuantizedEvent;

    fn process(&mut self, input: &QuantizeInput) -> Option<QuantizedEvent> {
        Some(self.quantize(input.onset.timestamp_samples, &input.tempo))
    }

    // Stateless between frames
    fn reset(&mut self) {}
}

fn snap(timestamp: u64, grid: &BeatGrid, strength: f32) -> QuantizedEvent {
    let strength = unit(strength);
    let original = timestamp as f64;
    let (index, line) = grid.nearest_line(original);

    // strength = 0.0 -> original timestamp, strength = 1.0 -> grid line
    let quantized_timestamp = if strength <= 0.0 {
        timestamp
    } else {
        (original + (line - original) * strength as f64).round().max(0.0) as u64
    };

    QuantizedEvent {
        original_timestamp: timestamp,
        quantized_timestamp,
        strength_of_snap: strength,
        grid_position: grid.position_of(index),
        snap_delta: quantized_timestamp as i64 - timestamp as i64,
    }
}

/// Quantize a list of onsets to a beat grid
///
/// Algorithm:
/// 1. Split onsets into groups of closely-spaced events (grace notes)
/// 2. Snap each group's first event to the grid with the configured strength
/// 3. Move the rest of the group by the same delta, preserving relative timing
pub fn quantize_onsets(
    onsets: &[OnsetEvent],
    tempo: &TempoEstimate,
    sample_rate: u32,
    settings: &QuantizeSettings,
) -> Vec<QuantizedEvent> {
    if onsets.is_empty() {
        return Vec::new();
    }

    let quantizer = RhythmQuantizer::new(settings.clone(), sample_rate);
    let grid = quantizer.grid(tempo);
    let threshold = (settings.group_threshold_ms.max(0.0) * sample_rate as f64 / 1000.0) as u64;

    let mut quantized = Vec::with_capacity(onsets.len());

    for group in identify_onset_groups(onsets, threshold) {
        let leader = snap(onsets[group[0]].timestamp_samples, &grid, settings.strength);
        quantized.push(leader);

        for &i in &group[1..] {
            let original = onsets[i].timestamp_samples;
            let moved = (original as i64 + leader.snap_delta).max(0) as u64;
            let (index, _) = grid.nearest_line(moved as f64);

            quantized.push(QuantizedEvent {
                original_timestamp: original,
                quantized_timestamp: moved,
                strength_of_snap: leader.strength_of_snap,
                grid_position: grid.position_of(index),
                snap_delta: moved as i64 - original as i64,
            });
        }
    }

    quantized.sort_by_key(|event| event.quantized_timestamp);
    quantized
}

/// Identify groups of closely-spaced onsets
/// Returns groups as vectors of onset indices
fn identify_onset_groups(onsets: &[OnsetEvent], threshold_samples: u64) -> Vec<Vec<usize>> {
    if onsets.is_empty() {
        return Vec::new();
    }

    let mut groups = Vec::new();
    let mut current_group = vec![0];

    for i in 1..onsets.len() {
        let gap = onsets[i]
            .timestamp_samples
            .saturating_sub(onsets[i - 1].timestamp_samples);

        if gap <= threshold_samples {
            current_group.push(i);
        } else {
            groups.push(current_group);
            current_group = vec![i];
        }
    }
    groups.push(current_group);

    groups
}

fn unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
