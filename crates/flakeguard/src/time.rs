use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use portable_atomic::{AtomicU64, Ordering};

/// Flakeguard epoch: Friday, January 1, 2016 00:00:00 UTC
pub const EPOCH: Duration = Duration::from_secs(EPOCH_SECS);

/// [`EPOCH`] as whole seconds since the Unix epoch.
pub const EPOCH_SECS: u64 = 1_451_606_400;

/// A trait for wall-clock time sources with second resolution.
///
/// This abstraction allows you to plug in the real system clock or a mocked
/// time source in tests. Unlike a monotonic timer, the value is expected to
/// follow the host's wall clock, which is exactly why the generators guard
/// against it going backwards.
///
/// # Example
///
/// ```
/// use flakeguard::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_secs(&self) -> u64 {
///         1_700_000_000
///     }
/// }
///
/// assert_eq!(FixedTime.current_secs(), 1_700_000_000);
/// ```
pub trait TimeSource {
    /// Returns the current time in whole seconds since the Unix epoch.
    fn current_secs(&self) -> u64;
}

/// The host's wall clock, read through [`SystemTime`].
///
/// A clock reading earlier than 1970 is reported as `0`, which every
/// generator rejects as being before [`EPOCH`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// A shared, manually driven clock.
///
/// Clones observe the same time, so a test can hand one clone to a generator
/// and move time forward (or backward) through another.
///
/// ```
/// use flakeguard::{ManualClock, TimeSource};
///
/// let clock = ManualClock::new(1_700_000_000);
/// let handle = clock.clone();
/// handle.advance(5);
/// assert_eq!(clock.current_secs(), 1_700_000_005);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(secs)),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::Release);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::AcqRel);
    }

    pub fn rewind(&self, secs: u64) {
        self.secs.fetch_sub(secs, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn current_secs(&self) -> u64 {
        self.secs.load(Ordering::Acquire)
    }
}
