//! Request pacing for the mapping provider.
//!
//! `RequestPacer` spaces outbound calls so the provider sees at most
//! `requests_per_second` requests, no matter how many tasks share the client.
//! Each `acquire()` reserves the next free slot under a short lock and sleeps
//! outside it, so concurrent callers queue up in FIFO reservation order.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};

/// In-process requests-per-second pacer.
/// Safe to share via `Arc<RequestPacer>` across async tasks.
pub struct RequestPacer {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = requests_per_second.max(1);
        Self {
            min_interval: Duration::from_secs_f64(1.0 / rps as f64),
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until a request slot is free. Returns immediately when the pacer
    /// is idle; otherwise sleeps until the reserved slot.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };
        sleep_until(slot).await;
    }
}
