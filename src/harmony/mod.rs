// Harmony Engine - Chroma, Chords, Keys, and Voice Leading
// Harmonic structure extracted from the shared spectral frames

pub mod chord;
pub mod chroma;
pub mod scale;
pub mod templates;
pub mod voicing;

pub use chord::{ChordAnalyzer, ChordConfig, ChordEstimate, ChordTable, ScoringPath, CANDIDATE_COUNT};
pub use chroma::{pitch_class_name, ChromaConfig, ChromaExtractor, ChromaVector, PitchClass};
pub use scale::{KeyMode, KeyProfileSet, ScaleConfig, ScaleDetector, ScaleEstimate};
pub use templates::{ChordQuality, ChordTemplate, CHORD_TEMPLATES, TEMPLATE_COUNT};
pub use voicing::{assignment_cost, VoiceLeadingEngine, Voicing, VoicingChange, VoicingConfig};
