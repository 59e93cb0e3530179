use portable_atomic::{AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::NodeConfig,
    error::Result,
    generator::{GenerationState, SequenceGenerator, state::epoch_offset},
    id::FlakeId,
    time::TimeSource,
};

/// A lock-free sequence generator suitable for multi-threaded environments.
///
/// The `(second, sequence)` state is packed into a single [`AtomicU64`] and
/// advanced with a compare-and-swap loop. A lost race is retried against the
/// fresh state, so contention never skips or duplicates a sequence value.
///
/// ## Recommended When
/// - Fair access can be sacrificed for higher throughput
///
/// ## See Also
/// - [`LockSequenceGenerator`]
///
/// [`LockSequenceGenerator`]: crate::LockSequenceGenerator
pub struct AtomicSequenceGenerator<T>
where
    T: TimeSource,
{
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU64,
    config: NodeConfig,
    time: T,
}

impl<T> AtomicSequenceGenerator<T>
where
    T: TimeSource,
{
    /// Creates a new [`AtomicSequenceGenerator`] in the idle state.
    ///
    /// # Example
    /// ```
    /// use flakeguard::{AtomicSequenceGenerator, NodeConfig, SystemClock};
    ///
    /// let config = NodeConfig::try_new(4, 0).unwrap();
    /// let generator = AtomicSequenceGenerator::new(config, SystemClock);
    ///
    /// let first = generator.try_next_id().unwrap();
    /// let second = generator.try_next_id().unwrap();
    /// assert!(first < second);
    /// ```
    pub fn new(config: NodeConfig, time: T) -> Self {
        Self::from_state(GenerationState::Idle, config, time)
    }

    /// Creates a generator preloaded with the given state, e.g. the durable
    /// watermark read at startup.
    pub fn from_state(state: GenerationState, config: NodeConfig, time: T) -> Self {
        let packed = state.to_packed();
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(AtomicU64::new(packed)),
            #[cfg(not(feature = "cache-padded"))]
            state: AtomicU64::new(packed),
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
        loop {
            // Load before reading the clock: any second already stored was
            // sampled no later than our own reading.
            let current_raw = self.state.load(Ordering::Acquire);
            let now = self.time.current_secs();
            let offset = epoch_offset(now)?;
            let tick = GenerationState::from_packed(current_raw).advance(now)?;
            let next_raw = GenerationState::Active(tick).to_packed();

            if self
                .state
                .compare_exchange_weak(current_raw, next_raw, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(FlakeId::from_components(
                    offset,
                    self.config.machine_id(),
                    self.config.node_id(),
                    tick.sequence,
                ));
            }

            // CAS failed - another thread won the race. Retry against the
            // state it committed.
            core::hint::spin_loop();
        }
    }

    /// Returns a copy of the current state.
    pub fn state(&self) -> GenerationState {
        GenerationState::from_packed(self.state.load(Ordering::Acquire))
    }
}

impl<T> SequenceGenerator<T> for AtomicSequenceGenerator<T>
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
