// Audio module
// Frame views, the shared spectral front end, and WAV ingestion

pub mod frame;
pub mod ingest;
pub mod spectrum;

pub use frame::{AudioFrame, SampleLayout};
pub use ingest::{ingest_wav, ingest_wav_file, AudioData, AudioError};
pub use spectrum::{FrameQuality, SpectralFrame, SpectrumAnalyzer};
