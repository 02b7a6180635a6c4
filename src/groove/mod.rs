// Groove Engine - Onsets, Tempo, Grid, and Quantization
// Musical timing extracted from the shared spectral frames

pub mod grid;
pub mod onset;
pub mod quantize;
pub mod tempo;

pub use grid::{BeatGrid, GridDivision, GridPosition, TimeSignature};
pub use onset::{detect_onsets, OnsetConfig, OnsetDetector, OnsetEvent};
pub use quantize::{quantize_onsets, QuantizeInput, QuantizeSettings, QuantizedEvent, RhythmQuantizer};
pub use tempo::{estimate_tempo, TempoConfig, TempoEstimate, TempoEstimator, TempoInput};
