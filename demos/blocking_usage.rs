//! Example usage of the `HoldLimiter` with plain threads.
//!
//! Uses `HoldPolicy::LastGrant`: a release waits until the minimum hold has passed
//! since the most recent grant by anyone, not just the releasing thread's own grant.

use std::time::Instant;

use chrono::Duration;
use heldback::{BlockingRateLimiter, Config, Error, HoldLimiter, HoldPolicy};

fn call_api(limiter: &HoldLimiter, worker: usize, start: Instant) -> Result<(), Error> {
    // No acquire timeout is configured, so this always yields a permit.
    let Some(permit) = limiter.acquire_permit()? else {
        return Ok(());
    };
    println!(
        "[{:.0?}] worker {worker} granted, {} slots in use",
        start.elapsed(),
        limiter.in_use()
    );
    permit.release()?;
    println!("[{:.0?}] worker {worker} released", start.elapsed());
    Ok(())
}

fn main() -> Result<(), Error> {
    let limiter = HoldLimiter::from_config(
        &Config::new(3)
            .with_min_hold(Duration::milliseconds(200))
            .with_hold_policy(HoldPolicy::LastGrant),
    )?;
    let start = Instant::now();

    println!("--- Starting Blocking Example ---");

    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..6)
            .map(|worker| {
                let limiter = &limiter;
                scope.spawn(move || call_api(limiter, worker, start))
            })
            .collect();

        for worker in workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => println!("Worker failed: {e}"),
                Err(_) => println!("Worker panicked"),
            }
        }
    });

    println!("All workers finished after {:.0?}", start.elapsed());
    Ok(())
}
