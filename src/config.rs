use crate::Error;

/// Which grant a release measures the minimum hold against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HoldPolicy {
    /// Each permit is held for at least `min_hold` after its own grant.
    #[default]
    PerHolder,
    /// A permit is held until `min_hold` has passed since the most recent grant by any
    /// holder, as seen when the release starts. Grants landing during the wait do not
    /// extend it.
    LastGrant,
}

/// Configuration for a hold limiter.
///
/// ```
/// use heldback::{Config, HoldPolicy};
///
/// let config = Config::new(4)
///     .with_min_hold(chrono::Duration::milliseconds(250))
///     .with_acquire_timeout(chrono::Duration::seconds(2))
///     .with_hold_policy(HoldPolicy::LastGrant);
/// assert_eq!(config.capacity, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum number of simultaneous holders.
    pub capacity: usize,
    /// Minimum time between a grant and the slot returning to the pool.
    pub min_hold: chrono::Duration,
    /// How long an acquisition waits for a slot. Zero waits forever.
    pub acquire_timeout: chrono::Duration,
    /// Which grant the minimum hold is measured from, see [`HoldPolicy`].
    pub hold_policy: HoldPolicy,
}

impl Config {
    /// A configuration with no minimum hold and no acquire timeout.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            min_hold: chrono::Duration::zero(),
            acquire_timeout: chrono::Duration::zero(),
            hold_policy: HoldPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_min_hold(mut self, min_hold: chrono::Duration) -> Self {
        self.min_hold = min_hold;
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, acquire_timeout: chrono::Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    #[must_use]
    pub fn with_hold_policy(mut self, hold_policy: HoldPolicy) -> Self {
        self.hold_policy = hold_policy;
        self
    }

    pub(crate) fn resolve(&self) -> Result<Settings, Error> {
        if self.capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        let min_hold = to_std(self.min_hold)?;
        let acquire_timeout = Some(to_std(self.acquire_timeout)?).filter(|t| !t.is_zero());

        Ok(Settings {
            capacity: self.capacity,
            min_hold,
            acquire_timeout,
            hold_policy: self.hold_policy,
        })
    }
}

/// Validated form of [`Config`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Settings {
    pub(crate) capacity: usize,
    pub(crate) min_hold: std::time::Duration,
    /// `None` waits forever.
    pub(crate) acquire_timeout: Option<std::time::Duration>,
    pub(crate) hold_policy: HoldPolicy,
}

fn to_std(duration: chrono::Duration) -> Result<std::time::Duration, Error> {
    duration
        .to_std()
        .map_err(|_| Error::NegativeDuration(duration))
}
