use parking_lot::Mutex;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::NodeConfig,
    error::Result,
    generator::{GenerationState, SequenceGenerator, state::epoch_offset},
    id::FlakeId,
    time::TimeSource,
};

/// A lock-based sequence generator suitable for multi-threaded environments.
///
/// The whole state-machine step, including the clock read, runs under a
/// single [`Mutex`].
///
/// ## Recommended When
/// - Fair access across threads is important
/// - Your target doesn't support 64-bit atomics
///
/// ## See Also
/// - [`AtomicSequenceGenerator`]
///
/// [`AtomicSequenceGenerator`]: crate::AtomicSequenceGenerator
pub struct LockSequenceGenerator<T>
where
    T: TimeSource,
{
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<Mutex<GenerationState>>,
    #[cfg(not(feature = "cache-padded"))]
    state: Mutex<GenerationState>,
    config: NodeConfig,
    time: T,
}

impl<T> LockSequenceGenerator<T>
where
    T: TimeSource,
{
    /// Creates a new [`LockSequenceGenerator`] in the idle state.
    ///
    /// # Example
    /// ```
    /// use flakeguard::{LockSequenceGenerator, NodeConfig, SystemClock};
    ///
    /// let config = NodeConfig::try_new(1, 2).unwrap();
    /// let generator = LockSequenceGenerator::new(config, SystemClock);
    ///
    /// let id = generator.try_next_id().unwrap();
    /// assert_eq!(id.machine_id(), 1);
    /// assert_eq!(id.node_id(), 2);
    /// ```
    pub fn new(config: NodeConfig, time: T) -> Self {
        Self::from_state(GenerationState::Idle, config, time)
    }

    /// Creates a generator preloaded with the given state, e.g. the durable
    /// watermark read at startup.
    pub fn from_state(state: GenerationState, config: NodeConfig, time: T) -> Self {
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(Mutex::new(state)),
            #[cfg(not(feature = "cache-padded"))]
            state: Mutex::new(state),
            config,
            time,
        }
    }

    /// Generates the next ID.
    ///
    /// # Errors
    ///
    /// See [`SequenceGenerator::try_next_id`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_next_id(&self) -> Result<FlakeId> {
        let mut state = self.state.lock();

        // Read the clock under the lock so a caller that sampled an older
        // second can't be ordered after one that sampled a newer second.
        let now = self.time.current_secs();
        let offset = epoch_offset(now)?;
        let tick = state.advance(now)?;
        *state = GenerationState::Active(tick);
        drop(state);

        Ok(FlakeId::from_components(
            offset,
            self.config.machine_id(),
            self.config.node_id(),
            tick.sequence,
        ))
    }

    /// Returns a copy of the current state.
    pub fn state(&self) -> GenerationState {
        *self.state.lock()
    }
}

impl<T> SequenceGenerator<T> for LockSequenceGenerator<T>
where
    T: TimeSource,
{
    fn new(config: NodeConfig, time: T) -> Self {
        Self::new(config, time)
    }

    fn from_state(state: GenerationState, config: NodeConfig, time: T) -> Self {
        Self::from_state(state, config, time)
    }

    fn config(&self) -> NodeConfig {
        self.config
    }

    fn try_next_id(&self) -> Result<FlakeId> {
        self.try_next_id()
    }
}
