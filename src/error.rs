/// Errors that can occur when interacting with a [`HoldLimiter`](crate::HoldLimiter)
/// or an `AsyncHoldLimiter`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A limiter must admit at least one holder.
    #[error("Capacity must be at least 1")]
    ZeroCapacity,
    /// Hold durations and acquire timeouts cannot be negative.
    #[error("Duration must not be negative, got {0}")]
    NegativeDuration(chrono::Duration),
    /// A permit cannot currently be acquired because every slot is held.
    #[error("A permit cannot currently be acquired")]
    NoPermitAvailable,
    /// A permit was handed back to a limiter that never granted it, or the slot pool
    /// was asked to hold more slots than its capacity.
    #[error("Released a permit that was not acquired from this rate limiter")]
    ReleaseWithoutAcquire,
    /// An internal mutex was poisoned.
    #[error("Mutex poisoned")]
    MutexPoisoned,
    /// The underlying tokio semaphore was closed.
    #[cfg(feature = "tokio")]
    #[error("Slot pool closed")]
    PoolClosed(#[from] tokio::sync::AcquireError),
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::MutexPoisoned
    }
}
