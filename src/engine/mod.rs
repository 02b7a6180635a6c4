// Analysis engine
// Runs every groove and harmony stage inline on the audio thread and publishes
// typed messages through the lock-free queue

pub mod config;
pub mod params;
mod stage;
pub mod worker;

pub use config::{AudioConfig, ConfigError, EngineConfig, MessagingConfig};
pub use params::{ParamSnapshot, RuntimeParams};
pub use stage::Stage;
pub use worker::{Worker, WorkerReport};

use std::sync::Arc;
use thiserror::Error;

use crate::audio::{AudioFrame, SpectrumAnalyzer};
use crate::groove::{
    OnsetDetector, QuantizeInput, RhythmQuantizer, TempoEstimate, TempoEstimator, TempoInput,
};
use crate::harmony::{
    ChordAnalyzer, ChordEstimate, ChromaExtractor, ScaleDetector, ScaleEstimate, VoiceLeadingEngine,
};
use crate::messaging::{Consumer, Message, Producer, RtMessageQueue};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to start worker thread: {0}")]
    Worker(#[from] std::io::Error),
}

/// Counters kept by the audio thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Audio frames analyzed
    pub frames_accepted: u64,
    /// Audio frames refused for a channel count or sample rate mismatch
    pub frames_rejected: u64,
    /// Spectral frames run through the stages
    pub analysis_frames: u64,
    /// Messages refused by the full queue
    pub messages_dropped: u64,
}

pub struct AnalysisEngine {
    config: EngineConfig,
    params: Arc<RuntimeParams>,
    applied_generation: Option<u64>,

    spectrum: SpectrumAnalyzer,
    onset: OnsetDetector,
    tempo: TempoEstimator,
    quantizer: RhythmQuantizer,
    chroma: ChromaExtractor,
    chord: ChordAnalyzer,
    scale: ScaleDetector,
    voicing: VoiceLeadingEngine,

    producer: Producer<Message>,

    tempo_estimate: Option<TempoEstimate>,
    published_chord: Option<ChordEstimate>,
    published_key: Option<ScaleEstimate>,
    stats: EngineStats,
}

impl AnalysisEngine {
    /// Validate the config, allocate every stage and the message queue.
    /// The returned consumer belongs to the worker side.
    pub fn new(
        config: EngineConfig,
        params: Arc<RuntimeParams>,
    ) -> Result<(Self, Consumer<Message>), EngineError> {
        config.validate()?;

        let audio = &config.audio;
        let spectrum = SpectrumAnalyzer::new(
            audio.window_size,
            audio.hop_size,
            audio.sample_rate,
            audio.noise_floor,
        );
        let onset = OnsetDetector::new(config.onset.clone(), spectrum.bin_count(), audio.sample_rate);
        let tempo = TempoEstimator::new(config.tempo.clone(), audio.sample_rate, audio.hop_size);
        let quantizer = RhythmQuantizer::new(config.quantize.clone(), audio.sample_rate);
        let chroma = ChromaExtractor::new(config.chroma.clone(), audio.window_size, audio.sample_rate);
        let chord = ChordAnalyzer::new(config.chord.clone());
        let scale = ScaleDetector::new(config.scale.clone());
        let voicing = VoiceLeadingEngine::new(config.voicing.clone());

        let (producer, consumer) = RtMessageQueue::new(config.messaging.queue_capacity);

        log::info!(
            "Analysis engine ready: {} Hz, {} ch, window {}, hop {}",
            audio.sample_rate,
            audio.channels,
            audio.window_size,
            audio.hop_size
        );

        let engine = AnalysisEngine {
            config,
            params,
            applied_generation: None,
            spectrum,
            onset,
            tempo,
            quantizer,
            chroma,
            chord,
            scale,
            voicing,
            producer,
            tempo_estimate: None,
            published_chord: None,
            published_key: None,
            stats: EngineStats::default(),
        };
        Ok((engine, consumer))
    }

    /// Engine with its own parameter block seeded from `config`
    pub fn with_config(config: EngineConfig) -> Result<(Self, Consumer<Message>), EngineError> {
        let params = Arc::new(RuntimeParams::from_config(&config));
        Self::new(config, params)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for adjusting parameters from other threads
    pub fn params(&self) -> Arc<RuntimeParams> {
        Arc::clone(&self.params)
    }

    /// Session clock: samples consumed since construction (not reset by `reset`)
    pub fn session_samples(&self) -> u64 {
        self.spectrum.samples_consumed()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            messages_dropped: self.producer.dropped_count(),
            ..self.stats
        }
    }

    pub fn tempo(&self) -> Option<TempoEstimate> {
        self.tempo_estimate
    }

    pub fn chord(&self) -> Option<ChordEstimate> {
        self.published_chord
    }

    pub fn key(&self) -> Option<ScaleEstimate> {
        self.published_key
    }

    /// Analyze one audio callback's worth of samples.
    ///
    /// Never allocates, locks or blocks. Frames whose channel count or sample
    /// rate differ from the configuration are counted and skipped. Returns the
    /// number of analysis frames run.
    pub fn process(&mut self, frame: &AudioFrame) -> usize {
        if frame.channels() != self.config.audio.channels
            || frame.sample_rate() != self.config.audio.sample_rate
        {
            self.stats.frames_rejected += 1;
            return 0;
        }
        self.stats.frames_accepted += 1;
        self.apply_params();

        let mut hops = 0;
        for i in 0..frame.frame_count() {
            if self.spectrum.push(frame.mono_sample(i)) {
                self.analyze_hop();
                hops += 1;
            }
        }
        hops
    }

    /// Clear every stage's history in place. The session clock keeps running.
    pub fn reset(&mut self) {
        self.spectrum.reset();
        self.onset.reset();
        self.tempo.reset();
        self.quantizer.reset();
        self.chroma.reset();
        self.chord.reset();
        self.scale.reset();
        self.voicing.reset();
        self.tempo_estimate = None;
        self.published_chord = None;
        self.published_key = None;
    }

    fn apply_params(&mut self) {
        let generation = self.params.generation();
        if self.applied_generation == Some(generation) {
            return;
        }

        let p = self.params.snapshot();
        self.onset.set_threshold_factor(p.onset_threshold_factor);
        self.onset.set_min_onset_gap_ms(p.min_onset_gap_ms as f64);
        self.quantizer.set_division(p.division);
        self.quantizer.set_swing(p.swing);
        self.quantizer.set_strength(p.strength);
        self.chord.set_hysteresis_margin(p.hysteresis_margin);
        self.scale.set_profile_set(p.profile_set);
        self.applied_generation = Some(p.generation);
    }

    fn analyze_hop(&mut self) {
        self.stats.analysis_frames += 1;

        let spectral = self.spectrum.analyze();
        let timestamp = spectral.timestamp;
        let onset = self.onset.process(&spectral);
        let chroma = self.chroma.process(&spectral);

        // Groove: onset -> tempo -> quantize
        if let Some(onset) = onset {
            if self.config.messaging.emit_onsets {
                self.publish(Message::onset(&onset));
            }
        }

        if let Some(tempo) = self.tempo.process(&TempoInput { timestamp, onset }) {
            self.tempo_estimate = Some(tempo);
            self.publish(Message::tempo(&tempo, timestamp));
        }

        if let (Some(onset), Some(tempo)) = (onset, self.tempo_estimate) {
            if let Some(event) = self.quantizer.process(&QuantizeInput { onset, tempo }) {
                if self.config.messaging.emit_quantized {
                    self.publish(Message::quantized(&event));
                }
            }
        }

        // Harmony: chroma -> chord -> key -> voicing
        let Some(chroma) = chroma else {
            return;
        };

        let chord_change = self
            .chord
            .process(&chroma)
            .filter(|chord| !self.published_chord.is_some_and(|p| p.same_chord(chord)));
        if let Some(chord) = chord_change {
            self.published_chord = Some(chord);
            self.publish(Message::chord(&chord, timestamp));
        }

        if let Some(key) = self.scale.process(&chroma) {
            let changed = self
                .published_key
                .map_or(true, |p| !p.same_key(&key) || p.ambiguous != key.ambiguous);
            if changed {
                self.published_key = Some(key);
                self.publish(Message::key(&key, timestamp));
            }
        }

        if let Some(chord) = chord_change {
            if let Some(change) = self.voicing.process(&chord) {
                self.publish(Message::voicing(&change, timestamp));
            }
        }
    }

    #[inline]
    fn publish(&mut self, message: Message) {
        // Full queue: the producer counts the drop
        let _ = self.producer.push(message);
    }
}
