use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{Error, HoldPolicy};

/// Hold bookkeeping shared by the blocking and async limiters.
///
/// Knows how long a slot must stay held after a grant and, for
/// [`HoldPolicy::LastGrant`], when the most recent grant happened.
#[derive(Debug)]
pub(crate) struct HoldClock {
    min_hold: Duration,
    policy: HoldPolicy,
    last_grant: Mutex<Option<Instant>>,
}

impl HoldClock {
    pub(crate) fn new(min_hold: Duration, policy: HoldPolicy) -> Self {
        Self {
            min_hold,
            policy,
            last_grant: Mutex::new(None),
        }
    }

    pub(crate) fn min_hold(&self) -> Duration {
        self.min_hold
    }

    pub(crate) fn policy(&self) -> HoldPolicy {
        self.policy
    }

    pub(crate) fn record_grant(&self, at: Instant) -> Result<(), Error> {
        if self.policy == HoldPolicy::PerHolder {
            return Ok(());
        }
        let mut last_grant = self.last_grant.lock()?;
        tracing::trace!("Recording shared grant time");
        *last_grant = Some(last_grant.map_or(at, |previous| previous.max(at)));
        Ok(())
    }

    /// The instant a permit granted at `granted_at` may be returned to the pool.
    ///
    /// Read once when the release starts; grants landing afterwards do not move it.
    /// `None` when the deadline lies beyond the clock's range.
    pub(crate) fn hold_deadline(&self, granted_at: Instant) -> Result<Option<Instant>, Error> {
        let reference = match self.policy {
            HoldPolicy::PerHolder => granted_at,
            HoldPolicy::LastGrant => self
                .last_grant
                .lock()?
                .map_or(granted_at, |last| last.max(granted_at)),
        };
        Ok(reference.checked_add(self.min_hold))
    }

    /// How much longer to wait for `deadline`, as seen at `now`.
    fn remaining_until(&self, deadline: Option<Instant>, now: Instant) -> Duration {
        // An unrepresentable deadline is waited out one full hold at a time.
        deadline.map_or(self.min_hold, |deadline| deadline.saturating_duration_since(now))
    }

    /// Blocks the calling thread until the hold for `granted_at` has passed.
    pub(crate) fn wait_out_blocking(&self, granted_at: Instant) -> Result<(), Error> {
        let deadline = self.hold_deadline(granted_at)?;
        loop {
            let remaining = self.remaining_until(deadline, Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            tracing::trace!("Holding slot for another {remaining:?}");
            std::thread::sleep(remaining);
        }
    }

    /// Async counterpart of [`wait_out_blocking`](Self::wait_out_blocking).
    #[cfg(feature = "tokio")]
    pub(crate) async fn wait_out(&self, granted_at: Instant) -> Result<(), Error> {
        let deadline = self.hold_deadline(granted_at)?;
        loop {
            let remaining = self.remaining_until(deadline, Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            tracing::trace!("Holding slot for another {remaining:?}");
            tokio::time::sleep(remaining).await;
        }
    }
}
