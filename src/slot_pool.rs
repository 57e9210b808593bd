use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::Error;

/// Blocking counting semaphore backing [`HoldLimiter`](crate::HoldLimiter).
///
/// Holds `capacity` interchangeable slots. Taking blocks while the pool is empty,
/// returning wakes one waiter.
#[derive(Debug)]
pub(crate) struct SlotPool {
    capacity: usize,
    available: Mutex<usize>,
    returned: Condvar,
}

impl SlotPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
            returned: Condvar::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn available(&self) -> usize {
        // The counter is only ever updated whole, so a poisoned value is still accurate.
        *self
            .available
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Takes a slot if one is free right now.
    pub(crate) fn try_take(&self) -> Result<bool, Error> {
        let mut available = self.available.lock()?;
        if *available == 0 {
            return Ok(false);
        }
        *available -= 1;
        Ok(true)
    }

    /// Takes a slot, waiting up to `timeout` (or forever when `None`).
    ///
    /// Returns `false` if the pool stayed empty for the whole timeout. A slot returned
    /// at the moment the timeout expires is granted if the wakeup sees it.
    pub(crate) fn take(&self, timeout: Option<Duration>) -> Result<bool, Error> {
        let mut available = self.available.lock()?;
        tracing::trace!("Slot pool lock acquired, {available} available", available = *available);

        match timeout {
            None => {
                while *available == 0 {
                    available = self.returned.wait(available)?;
                }
            }
            Some(timeout) => {
                let (guard, _) = self
                    .returned
                    .wait_timeout_while(available, timeout, |available| *available == 0)?;
                available = guard;
                if *available == 0 {
                    return Ok(false);
                }
            }
        }

        *available -= 1;
        Ok(true)
    }

    /// Returns a slot and wakes one waiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReleaseWithoutAcquire`] if every slot is already in the pool.
    pub(crate) fn put(&self) -> Result<(), Error> {
        let mut available = self.available.lock()?;
        if *available == self.capacity {
            return Err(Error::ReleaseWithoutAcquire);
        }
        *available += 1;
        drop(available);

        self.returned.notify_one();
        Ok(())
    }
}
