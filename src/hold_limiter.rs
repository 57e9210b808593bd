use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::hold::HoldClock;
use crate::slot_pool::SlotPool;
use crate::{Config, Error, HoldPolicy};

/// A RAII permit for one slot of a [`HoldLimiter`].
///
/// Releasing the permit, or dropping it, blocks the current thread until the minimum
/// hold has passed and then returns the slot to the pool.
#[derive(Debug)]
#[must_use]
pub struct Permit<'a> {
    limiter: &'a HoldLimiter,
    granted_at: Instant,
    released: bool,
}

impl<'a> Permit<'a> {
    fn new(limiter: &'a HoldLimiter, granted_at: Instant) -> Self {
        Self {
            limiter,
            granted_at,
            released: false,
        }
    }

    /// When the slot was granted.
    #[must_use]
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }

    /// How long the slot has been held so far.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.granted_at.elapsed()
    }

    /// Waits out the minimum hold, then returns the slot to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutexPoisoned`] if the limiter's bookkeeping was poisoned. The
    /// slot is returned to the pool regardless.
    pub fn release(mut self) -> Result<(), Error> {
        self.release_impl()
    }

    fn release_impl(&mut self) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        tracing::debug!("Releasing permit held for {:?}", self.held_for());
        let waited = self.limiter.hold.wait_out_blocking(self.granted_at);
        let returned = self.limiter.pool.put();
        tracing::trace!("Slot returned after {:?}", self.held_for());
        waited.and(returned)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.release_impl() {
            tracing::warn!("Failed to release permit: {error}");
        }
    }
}

/// A blocking limiter that admits at most `capacity` simultaneous holders and keeps
/// each slot held for at least `min_hold` after it was granted.
///
/// ```
/// use heldback::{BlockingRateLimiter, HoldLimiter, RateLimiter};
///
/// let limiter = HoldLimiter::new(1, chrono::Duration::zero(), chrono::Duration::zero())?;
///
/// let permit = limiter.try_acquire_permit()?;
/// assert!(limiter.try_acquire_permit().is_err());
///
/// permit.release()?;
/// assert!(limiter.acquire_permit()?.is_some());
/// # Ok::<(), heldback::Error>(())
/// ```
#[derive(Debug)]
pub struct HoldLimiter {
    pool: SlotPool,
    hold: HoldClock,
    acquire_timeout: Option<Duration>,
}

impl HoldLimiter {
    /// Creates a limiter with `capacity` slots and the default [`HoldPolicy`].
    ///
    /// An `acquire_timeout` of zero makes acquisitions wait until a slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `capacity` is 0, and
    /// [`Error::NegativeDuration`] if either duration is negative.
    pub fn new(
        capacity: usize,
        min_hold: chrono::Duration,
        acquire_timeout: chrono::Duration,
    ) -> Result<Self, Error> {
        Self::from_config(
            &Config::new(capacity)
                .with_min_hold(min_hold)
                .with_acquire_timeout(acquire_timeout),
        )
    }

    /// Creates a limiter from a [`Config`].
    ///
    /// # Errors
    ///
    /// Same as [`HoldLimiter::new`].
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Ok(Self::from_settings(config.resolve()?))
    }

    fn from_settings(settings: Settings) -> Self {
        Self {
            pool: SlotPool::new(settings.capacity),
            hold: HoldClock::new(settings.min_hold, settings.hold_policy),
            acquire_timeout: settings.acquire_timeout,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Slots currently in the pool. May change as soon as it is read.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.pool.available()
    }

    /// Slots currently held, including permits still waiting out their hold.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available_permits()
    }

    #[must_use]
    pub fn min_hold(&self) -> Duration {
        self.hold.min_hold()
    }

    /// `None` when acquisitions wait forever.
    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }

    #[must_use]
    pub fn hold_policy(&self) -> HoldPolicy {
        self.hold.policy()
    }

    /// Releases a permit previously granted by this limiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReleaseWithoutAcquire`] if `permit` came from another limiter.
    /// That permit is still released, back to the limiter that granted it.
    pub fn release(&self, permit: Permit<'_>) -> Result<(), Error> {
        if !std::ptr::eq(permit.limiter, self) {
            tracing::debug!("Rejecting release of a permit granted elsewhere");
            return Err(Error::ReleaseWithoutAcquire);
        }
        permit.release()
    }

    fn grant(&self) -> Result<Permit<'_>, Error> {
        let granted_at = Instant::now();
        let permit = Permit::new(self, granted_at);
        self.hold.record_grant(granted_at)?;
        tracing::debug!("Permit granted, {} slots left", self.available_permits());
        Ok(permit)
    }

    fn try_acquire_permit_impl(&self) -> Result<Permit<'_>, Error> {
        tracing::debug!("Trying to acquire permit without waiting");
        if !self.pool.try_take()? {
            tracing::trace!("No permit available, all slots in use");
            return Err(Error::NoPermitAvailable);
        }
        self.grant()
    }

    fn acquire_permit_impl(&self) -> Result<Option<Permit<'_>>, Error> {
        tracing::debug!(
            "Trying to acquire permit, timeout {timeout:?}",
            timeout = self.acquire_timeout
        );
        if !self.pool.take(self.acquire_timeout)? {
            tracing::debug!("No permit became available in time");
            return Ok(None);
        }
        self.grant().map(Some)
    }
}

impl super::RateLimiter for HoldLimiter {
    type Permit<'a> = Permit<'a>;

    /// Attempts to acquire a permit without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPermitAvailable`] if every slot is held.
    /// Returns [`Error::MutexPoisoned`] if the internal state mutex is poisoned.
    fn try_acquire_permit(&self) -> Result<Self::Permit<'_>, Error> {
        self.try_acquire_permit_impl()
    }
}

impl super::BlockingRateLimiter for HoldLimiter {
    /// Blocks until a permit is granted or the acquire timeout passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutexPoisoned`] if the internal state mutex is poisoned.
    fn acquire_permit(&self) -> Result<Option<Self::Permit<'_>>, Error> {
        self.acquire_permit_impl()
    }
}
