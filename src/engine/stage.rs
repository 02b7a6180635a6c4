// Shared capability of every analysis stage

/// One step of the per-frame analysis chain.
///
/// A stage consumes one input (a spectral frame, a chroma vector, an onset
/// report, ...) and produces zero or one typed result. It owns its history and
/// must not allocate in `process`; `reset` clears that history in place.
pub trait Stage<In: ?Sized> {
    type Output;

    fn process(&mut self, input: &In) -> Option<Self::Output>;

    fn reset(&mut self);
}
