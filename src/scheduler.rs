//! Global request rate limiting via time-slot reservation.
//!
//! The remote site tolerates at most one request per second, globally —
//! not per caller. [`RequestScheduler`] enforces that by handing out
//! *slots*: each caller atomically reserves the next free point in time and
//! then sleeps until it arrives. Ten simultaneous callers get slots now,
//! +1s, +2s, ... — a single-server FIFO queue with a one second service
//! time.
//!
//! The reservation (read-modify-write of the shared next-slot timestamp) is
//! the only synchronized section; the sleep happens outside it and may
//! overlap arbitrarily across tasks. That overlap is what produces true
//! temporal spacing instead of serializing whole requests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use booksync_core::scheduler::RequestScheduler;
//!
//! # async fn example() {
//! let scheduler = Arc::new(RequestScheduler::default());
//!
//! // First caller proceeds immediately.
//! scheduler.acquire_slot().await;
//!
//! // Second caller waits out the remainder of the interval.
//! scheduler.acquire_slot().await;
//! # }
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument};

/// Minimum spacing between outbound requests.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Global request scheduler enforcing a minimum inter-request interval.
///
/// Designed to be wrapped in `Arc` and shared by every component that
/// performs HTTP calls. A caller that is cancelled while sleeping has
/// already consumed its slot; the reservation is not rolled back.
#[derive(Debug)]
pub struct RequestScheduler {
    /// Spacing between granted slots.
    interval: Duration,

    /// The next point in time a slot may be granted at.
    /// `None` until the first reservation; never in the past when read.
    next_slot: Mutex<Option<Instant>>,
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl RequestScheduler {
    /// Creates a scheduler with the given minimum spacing between requests.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Returns the configured inter-request interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until it is the caller's turn to send a request.
    ///
    /// Reserves the next free slot atomically, then sleeps until that slot
    /// arrives. Slots are granted in arrival order and any two granted
    /// slots are at least [`interval`](Self::interval) apart.
    #[instrument(skip(self))]
    pub async fn acquire_slot(&self) {
        let wait = {
            let mut next_slot = self
                .next_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();

            // The slot for this caller: now, or the reserved next slot,
            // whichever is later. Advancing next_slot before releasing the
            // lock commits the reservation even though the sleep below is
            // unsynchronized.
            let wait = match *next_slot {
                Some(at) if at > now => at - now,
                _ => Duration::ZERO,
            };
            *next_slot = Some(now + wait + self.interval);
            wait
        };

        if wait.is_zero() {
            debug!("slot available immediately");
        } else {
            debug!(wait_ms = wait.as_millis(), "waiting for request slot");
            tokio::time::sleep(wait).await;
        }
    }
}
