use core::{future::Future, time::Duration};

use portable_atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{Error, Result, StoreError},
    store::CoordinationStore,
};

/// How long a single coordination store call may take before it is treated
/// as [`Error::CoordinationUnavailable`].
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Returns the coordination store key holding the watermark for
/// `machine_id`.
///
/// ```
/// assert_eq!(flakeguard::watermark_key(7), "machine_7/ts");
/// ```
pub fn watermark_key(machine_id: u64) -> String {
    format!("machine_{machine_id}/ts")
}

/// Cross-restart clock rollback guard.
///
/// Keeps the durable watermark, the last Unix second a machine ID is known to
/// have used, in a [`CoordinationStore`]. The startup check refuses to run on
/// a clock that reads earlier than the watermark; every generation then moves
/// the watermark forward.
///
/// Writes are serialized and only ever move the watermark forward, so a
/// delayed write for an older second can never overwrite a newer one from
/// the same process. A second that is already covered by a durable write is
/// not written again.
pub struct ClockGuard<S> {
    store: S,
    key: String,
    timeout: Duration,
    /// Highest watermark known to be durable; `0` when none is known.
    watermark: AtomicU64,
    write_lock: Mutex<()>,
}

impl<S> ClockGuard<S>
where
    S: CoordinationStore,
{
    pub fn new(store: S, machine_id: u64) -> Self {
        Self {
            store,
            key: watermark_key(machine_id),
            timeout: DEFAULT_STORE_TIMEOUT,
            watermark: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Overrides [`DEFAULT_STORE_TIMEOUT`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The highest watermark read or written by this guard, if any.
    pub fn last_watermark(&self) -> Option<u64> {
        match self.watermark.load(Ordering::Acquire) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Reads the persisted watermark.
    ///
    /// A missing key and a stored value of `0` or below all mean there is no
    /// watermark.
    ///
    /// # Errors
    ///
    /// - [`Error::CoordinationUnavailable`] if the store fails or times out
    /// - [`Error::CorruptWatermark`] if the value is not a decimal integer
    pub async fn read_watermark(&self) -> Result<Option<u64>> {
        let Some(raw) = self.call(self.store.get(&self.key)).await? else {
            return Ok(None);
        };

        let parsed = core::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok());
        match parsed {
            Some(ts) if ts <= 0 => Ok(None),
            Some(ts) => Ok(Some(ts.unsigned_abs())),
            None => Err(Error::CorruptWatermark {
                key: self.key.clone(),
                value: String::from_utf8_lossy(&raw).into_owned(),
            }),
        }
    }

    /// Validates the clock against the persisted watermark. Runs once, before
    /// the first ID is generated.
    ///
    /// Returns the watermark that was found, if any.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockRegressedPersisted`] if `now` is earlier than the
    ///   watermark
    /// - any error from [`Self::read_watermark`]
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self), fields(key = %self.key)))]
    pub async fn check_startup_clock(&self, now: u64) -> Result<Option<u64>> {
        let Some(watermark) = self.read_watermark().await? else {
            #[cfg(feature = "tracing")]
            tracing::info!("no watermark found, treating as first run");
            return Ok(None);
        };

        if now < watermark {
            #[cfg(feature = "tracing")]
            tracing::error!(now, watermark, "clock is behind the persisted watermark");
            return Err(Error::ClockRegressedPersisted { now, watermark });
        }

        self.watermark.fetch_max(watermark, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        tracing::info!(watermark, "clock is ahead of the persisted watermark");
        Ok(Some(watermark))
    }

    /// Persists `now` as the new watermark.
    ///
    /// Returns `false` when the store already holds a watermark at or past
    /// `now` written or read by this guard, in which case nothing is sent.
    ///
    /// # Errors
    ///
    /// [`Error::CoordinationUnavailable`] if the write fails or times out.
    /// The in-memory watermark is left untouched, so the next call retries.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(key = %self.key)))]
    pub async fn record_watermark(&self, now: u64) -> Result<bool> {
        if now <= self.watermark.load(Ordering::Acquire) {
            return Ok(false);
        }

        let _write = self.write_lock.lock().await;
        // Another writer may have covered `now` while we waited.
        if now <= self.watermark.load(Ordering::Acquire) {
            return Ok(false);
        }

        let value = now.to_string().into_bytes();
        self.call(self.store.put(&self.key, value)).await?;
        self.watermark.store(now, Ordering::Release);
        Ok(true)
    }

    async fn call<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = core::result::Result<T, StoreError>>,
    {
        let source = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => StoreError::Timeout(self.timeout),
        };
        #[cfg(feature = "tracing")]
        tracing::warn!(key = %self.key, error = %source, "coordination store call failed");
        Err(Error::CoordinationUnavailable {
            key: self.key.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    const T: u64 = 1_700_000_000;

    struct BrokenStore;

    impl CoordinationStore for BrokenStore {
        async fn get(&self, _key: &str) -> core::result::Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }

        async fn put(&self, _key: &str, _value: Vec<u8>) -> core::result::Result<(), StoreError> {
            Err(StoreError::UnexpectedStatus {
                status: 500,
                body: "rpc error".into(),
            })
        }
    }

    struct StalledStore;

    impl CoordinationStore for StalledStore {
        async fn get(&self, _key: &str) -> core::result::Result<Option<Vec<u8>>, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn put(&self, _key: &str, _value: Vec<u8>) -> core::result::Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_watermark_passes() {
        let guard = ClockGuard::new(MemoryStore::new(), 1);
        assert_eq!(guard.check_startup_clock(T).await, Ok(None));
        assert_eq!(guard.last_watermark(), None);
    }

    #[tokio::test]
    async fn zero_watermark_is_treated_as_missing() {
        let store = MemoryStore::new();
        store.insert(watermark_key(1), b"0".to_vec());
        let guard = ClockGuard::new(store, 1);
        assert_eq!(guard.check_startup_clock(1).await, Ok(None));
    }

    #[tokio::test]
    async fn negative_watermark_is_treated_as_missing() {
        let store = MemoryStore::new();
        store.insert(watermark_key(1), b"-1".to_vec());
        let guard = ClockGuard::new(store, 1);
        assert_eq!(guard.read_watermark().await, Ok(None));
        assert_eq!(guard.check_startup_clock(T).await, Ok(None));
    }

    #[tokio::test]
    async fn out_of_range_watermark_is_corrupt() {
        let store = MemoryStore::new();
        store.insert(watermark_key(1), b"18446744073709551615".to_vec());
        let guard = ClockGuard::new(store, 1);
        assert!(matches!(
            guard.read_watermark().await,
            Err(Error::CorruptWatermark { .. })
        ));
    }

    #[tokio::test]
    async fn clock_behind_watermark_is_refused() {
        let store = MemoryStore::new();
        store.insert(watermark_key(2), T.to_string().into_bytes());
        let guard = ClockGuard::new(store, 2);
        assert_eq!(
            guard.check_startup_clock(T - 5).await,
            Err(Error::ClockRegressedPersisted {
                now: T - 5,
                watermark: T
            })
        );
    }

    #[tokio::test]
    async fn clock_at_or_past_watermark_passes() {
        let store = MemoryStore::new();
        store.insert(watermark_key(2), T.to_string().into_bytes());
        let guard = ClockGuard::new(store, 2);
        assert_eq!(guard.check_startup_clock(T).await, Ok(Some(T)));
        assert_eq!(guard.check_startup_clock(T + 30).await, Ok(Some(T)));
        assert_eq!(guard.last_watermark(), Some(T));
    }

    #[tokio::test]
    async fn watermark_with_whitespace_parses() {
        let store = MemoryStore::new();
        store.insert(watermark_key(0), b" 1700000000\n".to_vec());
        let guard = ClockGuard::new(store, 0);
        assert_eq!(guard.read_watermark().await, Ok(Some(T)));
    }

    #[tokio::test]
    async fn corrupt_watermark_is_reported() {
        let store = MemoryStore::new();
        store.insert(watermark_key(3), b"yesterday".to_vec());
        let guard = ClockGuard::new(store, 3);
        assert_eq!(
            guard.check_startup_clock(T).await,
            Err(Error::CorruptWatermark {
                key: "machine_3/ts".into(),
                value: "yesterday".into()
            })
        );
    }

    #[tokio::test]
    async fn record_writes_decimal_ascii() {
        let store = MemoryStore::new();
        let guard = ClockGuard::new(store.clone(), 4);
        assert_eq!(guard.record_watermark(T).await, Ok(true));
        assert_eq!(store.value("machine_4/ts"), Some(b"1700000000".to_vec()));
        assert_eq!(guard.last_watermark(), Some(T));
    }

    #[tokio::test]
    async fn record_never_moves_backwards() {
        let store = MemoryStore::new();
        let guard = ClockGuard::new(store.clone(), 4);
        assert_eq!(guard.record_watermark(T + 1).await, Ok(true));
        assert_eq!(guard.record_watermark(T + 1).await, Ok(false));
        assert_eq!(guard.record_watermark(T).await, Ok(false));
        assert_eq!(store.value("machine_4/ts"), Some(b"1700000001".to_vec()));
    }

    #[tokio::test]
    async fn startup_watermark_covers_same_second() {
        let store = MemoryStore::new();
        store.insert(watermark_key(5), T.to_string().into_bytes());
        let guard = ClockGuard::new(store, 5);
        guard.check_startup_clock(T).await.unwrap();
        assert_eq!(guard.record_watermark(T).await, Ok(false));
        assert_eq!(guard.record_watermark(T + 1).await, Ok(true));
    }

    #[tokio::test]
    async fn store_failures_become_coordination_errors() {
        let guard = ClockGuard::new(BrokenStore, 6);
        assert_eq!(
            guard.check_startup_clock(T).await,
            Err(Error::CoordinationUnavailable {
                key: "machine_6/ts".into(),
                source: StoreError::Transport("connection refused".into()),
            })
        );
        assert!(matches!(
            guard.record_watermark(T).await,
            Err(Error::CoordinationUnavailable {
                source: StoreError::UnexpectedStatus { status: 500, .. },
                ..
            })
        ));
        assert_eq!(guard.last_watermark(), None);
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let timeout = Duration::from_millis(20);
        let guard = ClockGuard::new(StalledStore, 7).with_timeout(timeout);
        assert_eq!(
            guard.check_startup_clock(T).await,
            Err(Error::CoordinationUnavailable {
                key: "machine_7/ts".into(),
                source: StoreError::Timeout(timeout),
            })
        );
        assert!(guard.record_watermark(T).await.is_err());
    }
}
