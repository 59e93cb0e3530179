use crate::{
    config::NodeConfig, error::Result, generator::GenerationState, id::FlakeId, time::TimeSource,
};

/// A minimal interface for the per-process sequence state machine.
///
/// Implementations own the [`crate::GenerationState`] and make each
/// read-modify-write step atomic, so concurrent callers never observe the
/// same `(second, sequence)` pair.
pub trait SequenceGenerator<T>
where
    T: TimeSource,
{
    /// Creates a new generator in the idle state.
    fn new(config: NodeConfig, time: T) -> Self;

    /// Creates a generator that resumes from `state`. Every later step must
    /// come strictly after it.
    fn from_state(state: GenerationState, config: NodeConfig, time: T) -> Self;

    /// The identity stamped into every ID.
    fn config(&self) -> NodeConfig;

    /// Advances the state at the current time and encodes the result.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ClockRegressed`] if the clock reads earlier than the
    ///   last second used by this generator
    /// - [`crate::Error::SequenceExhausted`] if every sequence value of the
    ///   current second has been issued
    /// - [`crate::Error::ClockBeforeEpoch`] or
    ///   [`crate::Error::TimestampOverflow`] if the clock is outside the
    ///   range the timestamp field can represent
    fn try_next_id(&self) -> Result<FlakeId>;
}
