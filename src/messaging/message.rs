// Typed analysis messages
// Address + small inline argument list + sample timestamp

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;

use crate::groove::{OnsetEvent, QuantizedEvent, TempoEstimate};
use crate::harmony::{ChordEstimate, ScaleEstimate, VoicingChange};

/// Addresses published by the analysis engine
pub mod addresses {
    pub const ONSET: &str = "/groove/onset";
    pub const TEMPO: &str = "/groove/tempo";
    pub const QUANTIZED: &str = "/groove/quantized";
    pub const CHORD: &str = "/harmony/chord";
    pub const KEY: &str = "/harmony/key";
    pub const VOICING: &str = "/harmony/voicing";
}

/// Arguments stored inline before a message spills to the heap
pub const INLINE_ARGS: usize = 8;

/// One OSC argument
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Int(i32),
    Float(f32),
    Str(Cow<'static, str>),
    Blob(Vec<u8>),
    Long(i64),
    Double(f64),
    Bool(bool),
    Nil,
}

impl Argument {
    /// OSC 1.0 type tag
    pub fn type_tag(&self) -> u8 {
        match self {
            Argument::Int(_) => b'i',
            Argument::Float(_) => b'f',
            Argument::Str(_) => b's',
            Argument::Blob(_) => b'b',
            Argument::Long(_) => b'h',
            Argument::Double(_) => b'd',
            Argument::Bool(true) => b'T',
            Argument::Bool(false) => b'F',
            Argument::Nil => b'N',
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Argument::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Argument::Long(v) => Some(*v),
            Argument::Int(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Argument::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Argument::Double(v) => Some(*v),
            Argument::Float(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Floats compare by bit pattern so NaN payloads survive a round trip
impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Argument::Int(a), Argument::Int(b)) => a == b,
            (Argument::Float(a), Argument::Float(b)) => a.to_bits() == b.to_bits(),
            (Argument::Str(a), Argument::Str(b)) => a == b,
            (Argument::Blob(a), Argument::Blob(b)) => a == b,
            (Argument::Long(a), Argument::Long(b)) => a == b,
            (Argument::Double(a), Argument::Double(b)) => a.to_bits() == b.to_bits(),
            (Argument::Bool(a), Argument::Bool(b)) => a == b,
            (Argument::Nil, Argument::Nil) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int(v) => write!(f, "{}", v),
            Argument::Float(v) => write!(f, "{:.4}", v),
            Argument::Str(s) => write!(f, "{:?}", s),
            Argument::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Argument::Long(v) => write!(f, "{}", v),
            Argument::Double(v) => write!(f, "{:.4}", v),
            Argument::Bool(v) => write!(f, "{}", v),
            Argument::Nil => write!(f, "nil"),
        }
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Long(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Double(v)
    }
}

impl From<bool> for Argument {
    fn from(v: bool) -> Self {
        Argument::Bool(v)
    }
}

impl From<&'static str> for Argument {
    fn from(v: &'static str) -> Self {
        Argument::Str(Cow::Borrowed(v))
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::Str(Cow::Owned(v))
    }
}

pub type Arguments = SmallVec<[Argument; INLINE_ARGS]>;

/// A typed message on the session clock
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: Cow<'static, str>,
    pub args: Arguments,
    /// Session sample index the message refers to
    pub timestamp: u64,
}

impl Message {
    pub fn new(address: impl Into<Cow<'static, str>>, timestamp: u64) -> Self {
        Message {
            address: address.into(),
            args: SmallVec::new(),
            timestamp,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Argument>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<Argument>) {
        self.args.push(arg.into());
    }

    pub fn arg(&self, index: usize) -> Option<&Argument> {
        self.args.get(index)
    }

    /// True while the arguments live inline (no heap allocation)
    pub fn is_inline(&self) -> bool {
        !self.args.spilled()
    }

    /// `/groove/onset` timestamp(h) strength(f)
    pub fn onset(onset: &OnsetEvent) -> Self {
        Message::new(addresses::ONSET, onset.timestamp_samples)
            .with_arg(onset.timestamp_samples as i64)
            .with_arg(onset.strength)
    }

    /// `/groove/tempo` bpm(d) confidence(f) phase(h)
    pub fn tempo(tempo: &TempoEstimate, timestamp: u64) -> Self {
        Message::new(addresses::TEMPO, timestamp)
            .with_arg(tempo.bpm)
            .with_arg(tempo.confidence)
            .with_arg(tempo.phase_samples as i64)
    }

    /// `/groove/quantized` original(h) quantized(h) snap(f) bar(i) beat(i) subdivision(i) delta(h)
    pub fn quantized(event: &QuantizedEvent) -> Self {
        Message::new(addresses::QUANTIZED, event.original_timestamp)
            .with_arg(event.original_timestamp as i64)
            .with_arg(event.quantized_timestamp as i64)
            .with_arg(event.strength_of_snap)
            .with_arg(event.grid_position.bar as i32)
            .with_arg(event.grid_position.beat as i32)
            .with_arg(event.grid_position.subdivision as i32)
            .with_arg(event.snap_delta)
    }

    /// `/harmony/chord` root(i) template(i) score(f) confidence(f) label(s)
    pub fn chord(chord: &ChordEstimate, timestamp: u64) -> Self {
        let label = chord.template().map(|t| t.label).unwrap_or("");
        Message::new(addresses::CHORD, timestamp)
            .with_arg(chord.root as i32)
            .with_arg(chord.template_id as i32)
            .with_arg(chord.score)
            .with_arg(chord.confidence)
            .with_arg(label)
    }

    /// `/harmony/key` tonic(i) mode(s) correlation(f) margin(f) ambiguous(T/F)
    pub fn key(key: &ScaleEstimate, timestamp: u64) -> Self {
        Message::new(addresses::KEY, timestamp)
            .with_arg(key.tonic as i32)
            .with_arg(key.mode.name())
            .with_arg(key.correlation)
            .with_arg(key.margin_over_second_best)
            .with_arg(key.ambiguous)
    }

    /// `/harmony/voicing` total_distance(i) max_leap(i) pitches(i...)
    pub fn voicing(change: &VoicingChange, timestamp: u64) -> Self {
        let mut message = Message::new(addresses::VOICING, timestamp)
            .with_arg(change.total_distance as i32)
            .with_arg(change.max_leap as i32);
        for &pitch in change.voicing.pitches() {
            message.push(pitch as i32);
        }
        message
    }
}

/// `address @timestamp arg arg ...`
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}", self.address, self.timestamp)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groove::GridPosition;
    use crate::harmony::{KeyMode, Voicing};

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(Argument::Float(f32::NAN), Argument::Float(f32::NAN));
        assert_ne!(Argument::Float(0.0), Argument::Float(-0.0));
        assert_ne!(Argument::Int(1), Argument::Long(1));
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Argument::Bool(true).type_tag(), b'T');
        assert_eq!(Argument::Bool(false).type_tag(), b'F');
        assert_eq!(Argument::Nil.type_tag(), b'N');
        assert_eq!(Argument::from("x").type_tag(), b's');
    }

    #[test]
    fn test_engine_messages_stay_inline() {
        let quantized = QuantizedEvent {
            original_timestamp: 10,
            quantized_timestamp: 12,
            strength_of_snap: 1.0,
            grid_position: GridPosition::default(),
            snap_delta: 2,
        };
        assert!(Message::quantized(&quantized).is_inline());

        let change = VoicingChange {
            voicing: Voicing::new(&[48, 52, 55, 58, 62, 65]),
            total_distance: 4,
            max_leap: 2,
        };
        let message = Message::voicing(&change, 0);
        assert_eq!(message.args.len(), 8);
        assert!(message.is_inline());

        let key = ScaleEstimate {
            tonic: 9,
            mode: KeyMode::Minor,
            correlation: 0.8,
            margin_over_second_best: 0.1,
            ambiguous: false,
        };
        let message = Message::key(&key, 42);
        assert!(message.is_inline());
        assert!(matches!(message.arg(1), Some(Argument::Str(Cow::Borrowed("minor")))));
    }

    #[test]
    fn test_display() {
        let message = Message::new("/harmony/chord", 480)
            .with_arg(9)
            .with_arg(0.5f32)
            .with_arg("m")
            .with_arg(true);
        assert_eq!(message.to_string(), "/harmony/chord @480 9 0.5000 \"m\" true");
    }

    #[test]
    fn test_onset_message_layout() {
        let message = Message::onset(&OnsetEvent {
            timestamp_samples: 44100,
            strength: 0.5,
        });
        assert_eq!(message.address, addresses::ONSET);
        assert_eq!(message.timestamp, 44100);
        assert_eq!(message.arg(0).and_then(Argument::as_long), Some(44100));
        assert_eq!(message.arg(1).and_then(Argument::as_float), Some(0.5));
    }
}
