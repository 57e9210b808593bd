//! Example usage of the `AsyncHoldLimiter` in an async context.
//!
//! Ten workers share a limiter that admits two at a time. Every slot stays held for at
//! least 500ms after it was granted, so the throttled resource sees at most two
//! requests per half second. Workers give up if they wait longer than two seconds.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use heldback::{AsyncHoldLimiter, AsyncRateLimiter, Error};

async fn call_api(
    limiter: Arc<AsyncHoldLimiter>,
    worker: usize,
    start: Instant,
) -> Result<(), Error> {
    let Some(permit) = limiter.acquire_permit().await? else {
        println!("[{:.0?}] worker {worker} gave up waiting", start.elapsed());
        return Ok(());
    };
    println!("[{:.0?}] worker {worker} calling the API", start.elapsed());

    // Simulate a quick request; the hold keeps the slot for the rest of the 500ms.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    permit.release().await?;
    println!("[{:.0?}] worker {worker} returned its slot", start.elapsed());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let limiter = Arc::new(AsyncHoldLimiter::new(
        2,
        Duration::milliseconds(500),
        Duration::seconds(2),
    )?);
    let start = Instant::now();

    println!("--- Starting Async Example ---");

    let workers: Vec<_> = (0..10)
        .map(|worker| tokio::spawn(call_api(Arc::clone(&limiter), worker, start)))
        .collect();

    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => println!("Worker failed: {e}"),
            Err(e) => println!("Worker panicked: {e}"),
        }
    }

    println!("All workers finished after {:.0?}", start.elapsed());
    Ok(())
}
