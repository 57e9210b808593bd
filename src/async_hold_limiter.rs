use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Settings;
use crate::hold::HoldClock;
use crate::{Config, Error, HoldPolicy};

/// A RAII permit for one slot of an [`AsyncHoldLimiter`].
///
/// [`release`](AsyncPermit::release) waits out the minimum hold before returning the
/// slot. Dropping the permit instead hands the slot to a background task on the
/// current tokio runtime that waits out the hold and then returns it. Outside a
/// runtime the drop blocks the thread for the remaining hold.
#[derive(Debug)]
#[must_use]
pub struct AsyncPermit<'a> {
    limiter: &'a AsyncHoldLimiter,
    slot: Option<OwnedSemaphorePermit>,
    granted_at: Instant,
}

impl AsyncPermit<'_> {
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
    /// Cancelling this future falls back to the drop behaviour, so the hold is still
    /// honoured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutexPoisoned`] if the limiter's bookkeeping was poisoned. The
    /// slot is returned to the pool regardless.
    pub async fn release(mut self) -> Result<(), Error> {
        tracing::debug!("Releasing permit held for {:?}", self.held_for());
        let waited = self.limiter.hold.wait_out(self.granted_at).await;
        drop(self.slot.take());
        tracing::trace!("Slot returned after {:?}", self.held_for());
        waited
    }
}

impl Drop for AsyncPermit<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let hold = Arc::clone(&self.limiter.hold);
        let granted_at = self.granted_at;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::trace!("Deferring slot return to a background task");
                runtime.spawn(async move {
                    if let Err(error) = hold.wait_out(granted_at).await {
                        tracing::warn!("Failed to wait out hold for dropped permit: {error}");
                    }
                    drop(slot);
                });
            }
            Err(_) => {
                if let Err(error) = hold.wait_out_blocking(granted_at) {
                    tracing::warn!("Failed to wait out hold for dropped permit: {error}");
                }
                drop(slot);
            }
        }
    }
}

/// An async limiter that admits at most `capacity` simultaneous holders and keeps each
/// slot held for at least `min_hold` after it was granted.
///
/// Slots live in a [`tokio::sync::Semaphore`], so waiting acquisitions are served in
/// the order they started waiting.
#[derive(Debug)]
pub struct AsyncHoldLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
    hold: Arc<HoldClock>,
    acquire_timeout: Option<Duration>,
}

impl AsyncHoldLimiter {
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
    /// Same as [`AsyncHoldLimiter::new`].
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Ok(Self::from_settings(config.resolve()?))
    }

    fn from_settings(settings: Settings) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(settings.capacity)),
            capacity: settings.capacity,
            hold: Arc::new(HoldClock::new(settings.min_hold, settings.hold_policy)),
            acquire_timeout: settings.acquire_timeout,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently in the pool. May change as soon as it is read.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    /// Slots currently held, including permits still waiting out their hold.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity - self.available_permits()
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
    /// That permit is dropped, which returns it to the limiter that granted it.
    pub async fn release(&self, permit: AsyncPermit<'_>) -> Result<(), Error> {
        if !std::ptr::eq(permit.limiter, self) {
            tracing::debug!("Rejecting release of a permit granted elsewhere");
            return Err(Error::ReleaseWithoutAcquire);
        }
        permit.release().await
    }

    fn grant(&self, slot: OwnedSemaphorePermit) -> Result<AsyncPermit<'_>, Error> {
        let granted_at = Instant::now();
        let permit = AsyncPermit {
            limiter: self,
            slot: Some(slot),
            granted_at,
        };
        self.hold.record_grant(granted_at)?;
        tracing::debug!("Permit granted, {} slots left", self.available_permits());
        Ok(permit)
    }

    fn try_acquire_permit_impl(&self) -> Result<AsyncPermit<'_>, Error> {
        tracing::debug!("Trying to acquire permit without waiting");
        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            tracing::trace!("No permit available, all slots in use");
            return Err(Error::NoPermitAvailable);
        };
        self.grant(slot)
    }

    async fn acquire_permit_impl(&self) -> Result<Option<AsyncPermit<'_>>, Error> {
        tracing::debug!(
            "Trying to acquire permit, timeout {timeout:?}",
            timeout = self.acquire_timeout
        );
        let acquire = Arc::clone(&self.slots).acquire_owned();
        let slot = match self.acquire_timeout {
            None => acquire.await?,
            // Whichever of the slot and the timer the runtime sees first wins.
            Some(timeout) => match tokio::time::timeout(timeout, acquire).await {
                Ok(slot) => slot?,
                Err(_) => {
                    tracing::debug!("No permit became available in time");
                    return Ok(None);
                }
            },
        };
        self.grant(slot).map(Some)
    }
}

impl super::RateLimiter for AsyncHoldLimiter {
    type Permit<'a> = AsyncPermit<'a>;

    /// Attempts to acquire a permit without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPermitAvailable`] if every slot is held.
    fn try_acquire_permit(&self) -> Result<Self::Permit<'_>, Error> {
        self.try_acquire_permit_impl()
    }
}

impl super::AsyncRateLimiter for AsyncHoldLimiter {
    /// Waits for a permit until one is granted or the acquire timeout passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutexPoisoned`] if the internal state mutex is poisoned.
    fn acquire_permit(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Self::Permit<'_>>, Error>> {
        self.acquire_permit_impl()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{AsyncRateLimiter, RateLimiter};

    fn ms(millis: i64) -> chrono::Duration {
        chrono::Duration::milliseconds(millis)
    }

    fn std_ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test]
    async fn test_permit_already_available() {
        let limiter = AsyncHoldLimiter::new(1, ms(100), ms(0)).unwrap();

        let start = Instant::now();
        let permit = limiter.acquire_permit().await.unwrap();
        let elapsed = start.elapsed();

        assert!(permit.is_some());
        assert!(elapsed < std_ms(100));
        assert_eq!(limiter.in_use(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_rejected() {
        let result = AsyncHoldLimiter::new(0, ms(0), ms(0));

        assert!(matches!(result, Err(Error::ZeroCapacity)));
    }

    #[tokio::test]
    async fn test_try_acquire_fails_when_all_slots_are_held() {
        let limiter = AsyncHoldLimiter::new(1, ms(0), ms(0)).unwrap();

        let _permit = limiter.try_acquire_permit().unwrap();
        let result = limiter.try_acquire_permit();

        assert!(matches!(result, Err(Error::NoPermitAvailable)));
    }

    #[tokio::test]
    async fn test_release_waits_out_min_hold() {
        let limiter = AsyncHoldLimiter::new(1, ms(100), ms(0)).unwrap();

        let permit = limiter.try_acquire_permit().unwrap();
        let granted_at = permit.granted_at();
        permit.release().await.unwrap();

        let held = granted_at.elapsed();
        assert!(held >= std_ms(100));
        assert!(held < std_ms(500));
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_dropped_permit_returns_slot_after_min_hold() {
        let limiter = AsyncHoldLimiter::new(1, ms(100), ms(0)).unwrap();

        let permit = limiter.try_acquire_permit().unwrap();
        let granted_at = permit.granted_at();
        drop(permit);
        assert_eq!(limiter.available_permits(), 0);

        let next = limiter.acquire_permit().await.unwrap();

        assert!(next.is_some());
        assert!(granted_at.elapsed() >= std_ms(100));
    }

    #[tokio::test]
    async fn test_cancelled_release_still_honours_min_hold() {
        let limiter = AsyncHoldLimiter::new(1, ms(150), ms(0)).unwrap();

        let permit = limiter.try_acquire_permit().unwrap();
        let granted_at = permit.granted_at();
        let result = tokio::time::timeout(std_ms(20), permit.release()).await;

        assert!(result.is_err());
        assert_eq!(limiter.available_permits(), 0);

        let next = limiter.acquire_permit().await.unwrap();

        assert!(next.is_some());
        assert!(granted_at.elapsed() >= std_ms(150));
    }

    #[test]
    fn test_dropping_permit_outside_a_runtime_blocks_for_min_hold() {
        let limiter = AsyncHoldLimiter::new(2, ms(50), ms(0)).unwrap();

        let permit = limiter.try_acquire_permit().unwrap();
        let granted_at = permit.granted_at();
        drop(permit);

        assert!(granted_at.elapsed() >= std_ms(50));
        assert_eq!(limiter.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_release_on_a_different_limiter_is_rejected() {
        let granting = AsyncHoldLimiter::new(1, ms(0), ms(0)).unwrap();
        let other = AsyncHoldLimiter::new(1, ms(0), ms(0)).unwrap();

        let permit = granting.try_acquire_permit().unwrap();
        let result = other.release(permit).await;

        assert!(matches!(result, Err(Error::ReleaseWithoutAcquire)));
        assert_eq!(other.available_permits(), 1);
        assert!(granting.acquire_permit().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_waiter_is_granted_after_holder_finishes_hold() {
        // capacity=1, min_hold=100ms, no timeout; the second caller arrives at t=10ms.
        let limiter = AsyncHoldLimiter::new(1, ms(100), ms(0)).unwrap();
        let start = Instant::now();

        let first = limiter.acquire_permit().await.unwrap().unwrap();
        let (released, second) = tokio::join!(first.release(), async {
            tokio::time::sleep(std_ms(10)).await;
            limiter.acquire_permit().await
        });

        released.unwrap();
        assert!(second.unwrap().is_some());
        assert!(start.elapsed() >= std_ms(100));
    }

    #[tokio::test]
    async fn test_acquire_is_denied_after_timeout() {
        // capacity=2, no hold, 50ms timeout, both slots held.
        let limiter = AsyncHoldLimiter::new(2, ms(0), ms(50)).unwrap();
        let _first = limiter.try_acquire_permit().unwrap();
        let _second = limiter.try_acquire_permit().unwrap();

        let start = Instant::now();
        let third = limiter.acquire_permit().await.unwrap();
        let elapsed = start.elapsed();

        assert!(third.is_none());
        assert!(elapsed >= std_ms(50));
        assert!(elapsed < std_ms(500));
        assert_eq!(limiter.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_acquire_does_not_block_while_capacity_remains() {
        // capacity=3, no hold, no timeout; a fourth caller waits for a release.
        let limiter = AsyncHoldLimiter::new(3, ms(0), ms(0)).unwrap();

        let start = Instant::now();
        let first = limiter.acquire_permit().await.unwrap().unwrap();
        let _second = limiter.acquire_permit().await.unwrap().unwrap();
        let _third = limiter.acquire_permit().await.unwrap().unwrap();
        assert!(start.elapsed() < std_ms(50));

        let start = Instant::now();
        let (released, fourth) = tokio::join!(
            async {
                tokio::time::sleep(std_ms(50)).await;
                first.release().await
            },
            limiter.acquire_permit()
        );

        released.unwrap();
        assert!(fourth.unwrap().is_some());
        assert!(start.elapsed() >= std_ms(40));
    }

    #[tokio::test]
    async fn test_last_grant_policy_waits_for_most_recent_grant() {
        // capacity=2, min_hold=200ms: A at t=0, B at t=50ms, A releases at t=60ms.
        let limiter = AsyncHoldLimiter::from_config(
            &Config::new(2)
                .with_min_hold(ms(200))
                .with_hold_policy(HoldPolicy::LastGrant),
        )
        .unwrap();
        let start = Instant::now();

        let holder_a = limiter.acquire_permit().await.unwrap().unwrap();
        tokio::time::sleep(std_ms(50)).await;
        let _holder_b = limiter.acquire_permit().await.unwrap().unwrap();
        tokio::time::sleep(std_ms(10)).await;
        holder_a.release().await.unwrap();

        assert!(start.elapsed() >= std_ms(250));
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_outstanding_permits_never_exceed_capacity() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        const CAPACITY: usize = 3;
        let limiter = Arc::new(AsyncHoldLimiter::new(CAPACITY, ms(5), ms(0)).unwrap());
        let outstanding = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let outstanding = Arc::clone(&outstanding);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let permit = limiter.acquire_permit().await.unwrap().unwrap();
                    let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std_ms(2)).await;
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                    permit.release().await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
        assert_eq!(limiter.available_permits(), CAPACITY);
    }
}
