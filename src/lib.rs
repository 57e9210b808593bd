//! # Heldback
//!
//! `heldback` throttles concurrent access to a shared resource, such as a rate-limited
//! API, to at most N simultaneous holders, and keeps every slot held for a minimum
//! duration after it was granted before anyone else can use it.
//!
//! The main types are [`HoldLimiter`] for thread-based callers and, with the `tokio`
//! feature, `AsyncHoldLimiter` for async callers. Both hand out permits. Releasing a
//! permit (explicitly, or by dropping it) waits until the minimum hold has passed and
//! then returns the slot to the pool.
//!
//! Acquisition can be bounded by a timeout. A timed-out acquisition is not an error:
//! it yields `None`, and the caller simply has nothing to release.
//!
//! ```
//! use heldback::{BlockingRateLimiter, HoldLimiter};
//!
//! let limiter = HoldLimiter::new(
//!     2,
//!     chrono::Duration::milliseconds(10),
//!     chrono::Duration::milliseconds(100),
//! )?;
//!
//! if let Some(permit) = limiter.acquire_permit()? {
//!     // call the throttled resource here
//!     permit.release()?;
//! }
//! # Ok::<(), heldback::Error>(())
//! ```

mod config;
mod error;
mod hold;
mod hold_limiter;
mod slot_pool;

#[cfg(feature = "tokio")]
mod async_hold_limiter;

#[cfg(feature = "tokio")]
pub use async_hold_limiter::*;
pub use config::{Config, HoldPolicy};
pub use error::Error;
pub use hold_limiter::*;

/// A limiter that can hand out permits without waiting.
pub trait RateLimiter {
    type Permit<'a>
    where
        Self: 'a;

    /// Takes a permit if a slot is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPermitAvailable`] if every slot is held.
    fn try_acquire_permit(&self) -> Result<Self::Permit<'_>, Error>;
}

/// A limiter whose acquisitions block the calling thread.
pub trait BlockingRateLimiter: RateLimiter {
    /// Waits for a permit, up to the configured acquire timeout.
    ///
    /// Returns `Ok(None)` if no slot became free in time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutexPoisoned`] if the limiter's internal state is poisoned.
    fn acquire_permit(&self) -> Result<Option<Self::Permit<'_>>, Error>;
}

/// A limiter whose acquisitions are awaited.
#[cfg(feature = "tokio")]
pub trait AsyncRateLimiter: RateLimiter {
    /// Waits for a permit, up to the configured acquire timeout.
    ///
    /// Resolves to `Ok(None)` if no slot became free in time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutexPoisoned`] if the limiter's internal state is poisoned.
    fn acquire_permit(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Self::Permit<'_>>, Error>>;
}
