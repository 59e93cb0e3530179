use core::future::Future;

use crate::error::StoreError;

/// A linearizable, durable key-value store with plain get/put semantics.
///
/// This is the only capability the clock guard needs from the outside world.
/// No compare-and-swap is used: two processes sharing a machine ID can lose
/// each other's watermark writes, which is why sharing one is unsupported.
///
/// Implementations should not apply their own retry policy; the caller wraps
/// every call in a timeout and decides what a failure means.
pub trait CoordinationStore: Send + Sync {
    /// Reads `key`. `Ok(None)` means the key does not exist.
    ///
    /// # Errors
    ///
    /// Any transport or backend failure.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Any transport or backend failure, or a write the store refused.
    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<(), StoreError>> + Send;
}
