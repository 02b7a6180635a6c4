// Voice leading
// Picks the octave placement of each chord tone that moves least from the previous voicing

use serde::{Deserialize, Serialize};

use super::chord::ChordEstimate;
use super::chroma::PitchClass;
use crate::engine::Stage;

pub const MAX_VOICES: usize = 8;

/// Octave placements considered per chord tone
const PLACEMENTS: usize = 3;

/// Ascending MIDI pitches, at most MAX_VOICES
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Voicing {
    pitches: [u8; MAX_VOICES],
    len: u8,
}

impl Voicing {
    /// Sorts the pitches; anything past MAX_VOICES is dropped
    pub fn new(pitches: &[u8]) -> Self {
        let mut voicing = Voicing::default();
        for &p in pitches.iter().take(MAX_VOICES) {
            voicing.pitches[voicing.len as usize] = p;
            voicing.len += 1;
        }
        voicing.pitches[..voicing.len as usize].sort_unstable();
        voicing
    }

    pub fn pitches(&self) -> &[u8] {
        &self.pitches[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn pitch_class(&self, voice: usize) -> Option<PitchClass> {
        self.pitches().get(voice).map(|p| p % 12)
    }

    /// MIDI octave of a voice (middle C = octave 4)
    pub fn octave(&self, voice: usize) -> Option<i8> {
        self.pitches().get(voice).map(|p| (*p / 12) as i8 - 1)
    }
}

impl Serialize for Voicing {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.pitches().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Voicing {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pitches = Vec::<u8>::deserialize(deserializer)?;
        if pitches.len() > MAX_VOICES {
            return Err(serde::de::Error::invalid_length(pitches.len(), &"at most 8 voices"));
        }
        Ok(Voicing::new(&pitches))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicingChange {
    pub voicing: Voicing,
    /// Sum of semitone moves under the optimal assignment
    pub total_distance: u32,
    /// Largest single-voice move
    pub max_leap: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicingConfig {
    pub min_pitch: u8,
    pub max_pitch: u8,
    /// Register of the root when there is no previous voicing
    pub default_center: u8,
    /// Chord tones beyond this are left out
    pub max_voices: usize,
}

impl Default for VoicingConfig {
    fn default() -> Self {
        VoicingConfig {
            min_pitch: 36,
            max_pitch: 96,
            default_center: 60,
            max_voices: 6,
        }
    }
}

/// Minimal-cost monotone assignment between two ascending voicings.
/// Returns (total distance, max leap). With unequal sizes the shorter side is
/// matched into the longer one; each unmatched voice costs its distance to the
/// nearest voice of the shorter side.
pub fn assignment_cost(from: &[u8], to: &[u8]) -> (u32, u8) {
    if from.is_empty() || to.is_empty() {
        return (0, 0);
    }

    if from.len() == to.len() {
        return from.iter().zip(to.iter()).fold((0u32, 0u8), |(total, leap), (&a, &b)| {
            let d = a.abs_diff(b);
            (total + d as u32, leap.max(d))
        });
    }

    let (short, long) = if from.len() < to.len() { (from, to) } else { (to, from) };

    // dp[i][j]: best (total, leap) with short[..i] matched inside long[..j]
    const INF: (u32, u8) = (u32::MAX, u8::MAX);
    let mut dp = [[INF; MAX_VOICES + 1]; MAX_VOICES + 1];
    dp[0][0] = (0, 0);

    for j in 1..=long.len() {
        let nearest = short.iter().map(|&s| s.abs_diff(long[j - 1])).min().unwrap_or(0);
        for i in 0..=short.len().min(j) {
            // long[j-1] left unmatched
            let mut best = dp[i][j - 1];
            if best != INF {
                best = (best.0 + nearest as u32, best.1.max(nearest));
            }

            if i > 0 && dp[i - 1][j - 1] != INF {
                let d = short[i - 1].abs_diff(long[j - 1]);
                let prev = dp[i - 1][j - 1];
                let matched = (prev.0 + d as u32, prev.1.max(d));
                if matched < best {
                    best = matched;
                }
            }

            dp[i][j] = best;
        }
    }

    dp[short.len()][long.len()]
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    voicing: Voicing,
    total: u32,
    leap: u8,
}

/// Lower total, then smaller max leap, then lower pitches
fn better(a: &Scored, b: &Scored) -> bool {
    (a.total, a.leap, a.voicing.pitches()) < (b.total, b.leap, b.voicing.pitches())
}

pub struct VoiceLeadingEngine {
    config: VoicingConfig,
    previous: Option<Voicing>,
    last_chord: Option<(PitchClass, u8)>,
}

impl VoiceLeadingEngine {
    pub fn new(config: VoicingConfig) -> Self {
        VoiceLeadingEngine {
            config,
            previous: None,
            last_chord: None,
        }
    }

    pub fn previous(&self) -> Option<&Voicing> {
        self.previous.as_ref()
    }

    /// Playable pitch range, clamped to MIDI and never inverted
    fn range(&self) -> (u8, u8) {
        let hi = self.config.max_pitch.min(127);
        (self.config.min_pitch.min(hi), hi)
    }

    /// Chord tones as pitch classes, root first
    fn chord_tones(&self, chord: &ChordEstimate) -> ([PitchClass; MAX_VOICES], usize) {
        let mut tones = [0u8; MAX_VOICES];
        let mut count = 0;
        if let Some(template) = chord.template() {
            let limit = self.config.max_voices.clamp(1, MAX_VOICES);
            for &interval in template.intervals.iter().take(limit) {
                tones[count] = (chord.root + interval) % 12;
                count += 1;
            }
        }
        (tones, count)
    }

    /// Up to three placements of a pitch class nearest `center`, inside the range
    fn placements(&self, pc: PitchClass, center: f32) -> ([u8; PLACEMENTS], usize) {
        let mut out = [0u8; PLACEMENTS];
        let mut count = 0;

        let (lo, hi) = self.range();

        // Candidates in range, ordered by distance to the center (lower on ties)
        let mut candidates = [0u8; 11];
        let mut n = 0;
        let mut p = lo + (pc + 12 - lo % 12) % 12;
        while p <= hi && n < candidates.len() {
            candidates[n] = p;
            n += 1;
            match p.checked_add(12) {
                Some(next) => p = next,
                None => break,
            }
        }
        candidates[..n].sort_by(|a, b| {
            let da = (*a as f32 - center).abs();
            let db = (*b as f32 - center).abs();
            da.total_cmp(&db).then(a.cmp(b))
        });

        for &c in candidates[..n].iter().take(PLACEMENTS) {
            out[count] = c;
            count += 1;
        }
        (out, count)
    }

    /// Close root-position voicing with the root nearest the default center.
    /// Tones stacked past the top of the range fold down by octaves.
    fn initial_voicing(&self, tones: &[PitchClass]) -> Option<Voicing> {
        let root = *tones.first()?;
        let (placements, count) = self.placements(root, self.config.default_center as f32);
        if count == 0 {
            return None;
        }

        // Stack upward from the root
        let mut stacked = [0u16; MAX_VOICES];
        stacked[0] = placements[0] as u16;
        for (i, &pc) in tones.iter().enumerate().skip(1) {
            let last = stacked[i - 1];
            let step = (pc as u16 + 12 - last % 12) % 12;
            stacked[i] = last + if step == 0 { 12 } else { step };
        }

        let (lo, hi) = self.range();
        let (lo, hi) = (lo as u16, hi as u16);

        // Drop the whole stack an octave if the top overflows and the root still fits
        let top = stacked[tones.len() - 1];
        let shift = if top > hi && stacked[0] >= lo + 12 { 12 } else { 0 };

        let mut pitches = [0u8; MAX_VOICES];
        for (slot, &p) in pitches.iter_mut().zip(&stacked[..tones.len()]) {
            let mut p = p - shift;
            while p > hi && p >= lo + 12 {
                p -= 12;
            }
            if p > hi || p < lo {
                return None;
            }
            *slot = p as u8;
        }

        Some(Voicing::new(&pitches[..tones.len()]))
    }

    /// Best voicing of `tones` relative to `previous`
    fn lead(&self, tones: &[PitchClass], previous: &Voicing) -> Option<Scored> {
        let prev = previous.pitches();
        let center = prev.iter().map(|&p| p as f32).sum::<f32>() / prev.len().max(1) as f32;

        let mut options = [[0u8; PLACEMENTS]; MAX_VOICES];
        let mut option_counts = [0usize; MAX_VOICES];
        let mut combinations = 1usize;
        for (i, &pc) in tones.iter().enumerate() {
            let (placements, count) = self.placements(pc, center);
            if count == 0 {
                return None;
            }
            options[i] = placements;
            option_counts[i] = count;
            combinations *= count;
        }

        let mut best: Option<Scored> = None;
        let mut buffer = [0u8; MAX_VOICES];

        for combination in 0..combinations {
            // Mixed-radix digits select one placement per tone
            let mut rest = combination;
            for i in 0..tones.len() {
                buffer[i] = options[i][rest % option_counts[i]];
                rest /= option_counts[i];
            }

            let voicing = Voicing::new(&buffer[..tones.len()]);
            let (total, leap) = assignment_cost(prev, voicing.pitches());
            let scored = Scored { voicing, total, leap };

            if best.map_or(true, |b| better(&scored, &b)) {
                best = Some(scored);
            }
        }

        best
    }
}

impl Stage<ChordEstimate> for VoiceLeadingEngine {
    type Output = VoicingChange;

    /// New voicing when the chord changes; `None` while the chord holds
    fn process(&mut self, chord: &ChordEstimate) -> Option<VoicingChange> {
        let key = (chord.root, chord.template_id);
        if self.last_chord == Some(key) {
            return None;
        }

        let (tones, count) = self.chord_tones(chord);
        let tones = &tones[..count];

        let change = match self.previous {
            Some(previous) => {
                let scored = self.lead(tones, &previous)?;
                VoicingChange {
                    voicing: scored.voicing,
                    total_distance: scored.total,
                    max_leap: scored.leap,
                }
            }
            None => VoicingChange {
                voicing: self.initial_voicing(tones)?,
                total_distance: 0,
                max_leap: 0,
            },
        };

        self.last_chord = Some(key);
        self.previous = Some(change.voicing);
        Some(change)
    }

    fn reset(&mut self) {
        self.previous = None;
        self.last_chord = None;
    }
}
