use core::{fmt, marker::PhantomData, time::Duration};

use portable_atomic::{AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::NodeConfig,
    error::Result,
    generator::{
        AtomicSequenceGenerator, GenerationState, LockSequenceGenerator, SequenceGenerator, Tick,
    },
    guard::{ClockGuard, DEFAULT_STORE_TIMEOUT},
    id::FlakeId,
    store::CoordinationStore,
    time::TimeSource,
};

/// What [`IdentityGenerator::generate`] does when the watermark write fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WatermarkPolicy {
    /// Return an ID only once the watermark covering its second is durable.
    ///
    /// A failed write discards the ID (it was never handed out) and reports
    /// [`crate::Error::CoordinationUnavailable`]. Every issued ID is covered
    /// by the cross-restart guard, at the cost of a store round trip on the
    /// first ID of each second.
    #[default]
    Durable,
    /// Return the ID even if the watermark write fails.
    ///
    /// The failure is logged and counted in [`GeneratorStats`]. Generation
    /// keeps working through a store outage, but a restart during the outage
    /// is only guarded up to the last successful write.
    BestEffort,
}

impl fmt::Display for WatermarkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => f.write_str("durable"),
            Self::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// Tuning for [`IdentityGenerator::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeneratorOptions {
    pub policy: WatermarkPolicy,
    /// Upper bound on every coordination store call.
    pub store_timeout: Duration,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            policy: WatermarkPolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// Point-in-time counters for operators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneratorStats {
    /// IDs returned to callers.
    pub generated: u64,
    /// Watermark writes that failed or timed out.
    pub watermark_failures: u64,
    /// Highest watermark read or written, in Unix seconds.
    pub last_watermark: Option<u64>,
}

/// An [`IdentityGenerator`] backed by [`LockSequenceGenerator`].
pub type LockIdentityGenerator<S, T> = IdentityGenerator<S, T, LockSequenceGenerator<T>>;

/// An [`IdentityGenerator`] backed by [`AtomicSequenceGenerator`].
pub type AtomicIdentityGenerator<S, T> = IdentityGenerator<S, T, AtomicSequenceGenerator<T>>;

/// The composition root: sequence state machine, encoder, and clock guard.
///
/// [`IdentityGenerator::start`] runs the startup clock check once;
/// [`IdentityGenerator::generate`] is the only operation request handlers
/// need.
///
/// # Example
///
/// ```
/// use flakeguard::{GeneratorOptions, LockIdentityGenerator, MemoryStore, NodeConfig, SystemClock};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let config = NodeConfig::try_new(1, 0).unwrap();
/// let store = MemoryStore::new();
/// let generator =
///     LockIdentityGenerator::start(config, SystemClock, store.clone(), GeneratorOptions::default())
///         .await
///         .unwrap();
///
/// let id = generator.generate().await.unwrap();
/// assert_eq!(id.machine_id(), 1);
/// assert!(store.value("machine_1/ts").is_some());
/// # });
/// ```
pub struct IdentityGenerator<S, T, G>
where
    S: CoordinationStore,
    T: TimeSource,
    G: SequenceGenerator<T>,
{
    sequencer: G,
    guard: ClockGuard<S>,
    policy: WatermarkPolicy,
    generated: AtomicU64,
    watermark_failures: AtomicU64,
    _time: PhantomData<fn() -> T>,
}

impl<S, T, G> IdentityGenerator<S, T, G>
where
    S: CoordinationStore,
    T: TimeSource,
    G: SequenceGenerator<T>,
{
    /// Checks the clock against the persisted watermark and returns a ready
    /// generator.
    ///
    /// The watermark also becomes the generator's floor: IDs are only issued
    /// for seconds after it, even if the clock later steps back.
    ///
    /// # Errors
    ///
    /// Every error here is fatal: the process must not serve IDs.
    /// - [`crate::Error::ClockRegressedPersisted`] if the clock is behind the
    ///   watermark
    /// - [`crate::Error::CoordinationUnavailable`] if the watermark cannot be
    ///   read
    /// - [`crate::Error::CorruptWatermark`] if the stored value is not a
    ///   timestamp
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(time, store),
            fields(machine_id = config.machine_id(), node_id = config.node_id())
        )
    )]
    pub async fn start(
        config: NodeConfig,
        time: T,
        store: S,
        options: GeneratorOptions,
    ) -> Result<Self> {
        let guard =
            ClockGuard::new(store, config.machine_id()).with_timeout(options.store_timeout);
        let watermark = guard.check_startup_clock(time.current_secs()).await?;

        // Seconds up to and including the watermark may already hold IDs from
        // an earlier run, so the sequencer starts with that second exhausted.
        let state = watermark.map_or(GenerationState::Idle, |second| {
            GenerationState::Active(Tick {
                second,
                sequence: FlakeId::max_sequence(),
            })
        });

        Ok(Self {
            sequencer: G::from_state(state, config, time),
            guard,
            policy: options.policy,
            generated: AtomicU64::new(0),
            watermark_failures: AtomicU64::new(0),
            _time: PhantomData,
        })
    }

    /// Generates one ID and moves the watermark forward.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ClockRegressed`] and
    ///   [`crate::Error::SequenceExhausted`]: retry after
    ///   [`crate::Error::retry_after`]
    /// - [`crate::Error::CoordinationUnavailable`]: only under
    ///   [`WatermarkPolicy::Durable`]; the ID was discarded
    /// - [`crate::Error::ClockBeforeEpoch`] and
    ///   [`crate::Error::TimestampOverflow`]: the host clock is unusable
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn generate(&self) -> Result<FlakeId> {
        let id = self.sequencer.try_next_id()?;

        if let Err(e) = self.guard.record_watermark(id.unix_secs()).await {
            self.watermark_failures.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                WatermarkPolicy::Durable => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, id = id.to_raw(), "watermark write failed, discarding id");
                    return Err(e);
                }
                WatermarkPolicy::BestEffort => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, id = id.to_raw(), "watermark write failed, issuing id anyway");
                    #[cfg(not(feature = "tracing"))]
                    drop(e);
                }
            }
        }

        self.generated.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub fn config(&self) -> NodeConfig {
        self.sequencer.config()
    }

    pub fn policy(&self) -> WatermarkPolicy {
        self.policy
    }

    pub fn guard(&self) -> &ClockGuard<S> {
        &self.guard
    }

    pub fn stats(&self) -> GeneratorStats {
        GeneratorStats {
            generated: self.generated.load(Ordering::Relaxed),
            watermark_failures: self.watermark_failures.load(Ordering::Relaxed),
            last_watermark: self.guard.last_watermark(),
        }
    }
}
