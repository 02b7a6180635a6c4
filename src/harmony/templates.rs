// Chord template table
// 32 pitch-class-set masks, interval lists relative to the root

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Triad,
    Seventh,
    Extension,
    Suspended,
    Altered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChordTemplate {
    pub id: u8,
    /// Suffix appended to the root name ("" for a major triad)
    pub label: &'static str,
    pub quality: ChordQuality,
    /// Semitones above the root, root first, ascending
    pub intervals: &'static [u8],
}

impl ChordTemplate {
    /// Binary pitch-class mask for root C
    pub fn mask(&self) -> [f32; 12] {
        let mut mask = [0.0; 12];
        for &interval in self.intervals {
            mask[(interval % 12) as usize] = 1.0;
        }
        mask
    }

    pub fn tone_count(&self) -> usize {
        self.intervals.len()
    }
}

pub const TEMPLATE_COUNT: usize = 32;

pub const MAJOR_TRIAD: u8 = 0;
pub const MINOR_TRIAD: u8 = 1;
pub const DOMINANT_SEVENTH: u8 = 8;
pub const MAJOR_SEVENTH: u8 = 9;
pub const MINOR_SEVENTH: u8 = 10;

const fn t(id: u8, label: &'static str, quality: ChordQuality, intervals: &'static [u8]) -> ChordTemplate {
    ChordTemplate {
        id,
        label,
        quality,
        intervals,
    }
}

use ChordQuality::{Altered, Extension, Seventh, Suspended, Triad};

pub const CHORD_TEMPLATES: [ChordTemplate; TEMPLATE_COUNT] = [
    t(0, "", Triad, &[0, 4, 7]),
    t(1, "m", Triad, &[0, 3, 7]),
    t(2, "dim", Triad, &[0, 3, 6]),
    t(3, "aug", Triad, &[0, 4, 8]),
    t(4, "sus2", Suspended, &[0, 2, 7]),
    t(5, "sus4", Suspended, &[0, 5, 7]),
    t(6, "7sus4", Suspended, &[0, 5, 7, 10]),
    t(7, "5", Suspended, &[0, 7]),
    t(8, "7", Seventh, &[0, 4, 7, 10]),
    t(9, "maj7", Seventh, &[0, 4, 7, 11]),
    t(10, "m7", Seventh, &[0, 3, 7, 10]),
    t(11, "mMaj7", Seventh, &[0, 3, 7, 11]),
    t(12, "m7b5", Seventh, &[0, 3, 6, 10]),
    t(13, "dim7", Seventh, &[0, 3, 6, 9]),
    t(14, "aug7", Seventh, &[0, 4, 8, 10]),
    t(15, "augMaj7", Seventh, &[0, 4, 8, 11]),
    t(16, "6", Seventh, &[0, 4, 7, 9]),
    t(17, "m6", Seventh, &[0, 3, 7, 9]),
    t(18, "add9", Extension, &[0, 2, 4, 7]),
    t(19, "madd9", Extension, &[0, 2, 3, 7]),
    t(20, "9", Extension, &[0, 2, 4, 7, 10]),
    t(21, "maj9", Extension, &[0, 2, 4, 7, 11]),
    t(22, "m9", Extension, &[0, 2, 3, 7, 10]),
    t(23, "11", Extension, &[0, 2, 4, 5, 7, 10]),
    t(24, "m11", Extension, &[0, 2, 3, 5, 7, 10]),
    t(25, "13", Extension, &[0, 2, 4, 7, 9, 10]),
    t(26, "maj13", Extension, &[0, 2, 4, 7, 9, 11]),
    t(27, "6/9", Extension, &[0, 2, 4, 7, 9]),
    t(28, "7b9", Altered, &[0, 1, 4, 7, 10]),
    t(29, "7#9", Altered, &[0, 3, 4, 7, 10]),
    t(30, "7b5", Altered, &[0, 4, 6, 10]),
    t(31, "7#11", Altered, &[0, 4, 6, 7, 10]),
];

pub fn template(id: u8) -> Option<&'static ChordTemplate> {
    CHORD_TEMPLATES.get(id as usize)
}
