// Cadenza - Real-time groove and harmony analysis
// Module declarations

pub mod audio;
pub mod engine;
pub mod groove;
pub mod harmony;
pub mod messaging;

pub use engine::{AnalysisEngine, EngineConfig, EngineError, RuntimeParams, Stage, Worker};
pub use messaging::{Message, OscClient, OscHub, OscServer};
