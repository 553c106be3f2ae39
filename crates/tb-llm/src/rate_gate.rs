use std::time::Instant;

use tokio::sync::Mutex;
use tokio::time::Duration;

/// Per-session token-bucket rate gate sitting in front of the model
/// invocation (§5): bounds how often this session can call the model even
/// when the caller (a runaway tool loop, an impatient client retrying
/// `chat`) would otherwise hammer it, independent of the per-adapter retry
/// backoff in `router`, which reacts to failures rather than pacing success.
pub struct RateGate {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateGate {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.001),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_does_not_wait() {
        let gate = RateGate::new(3, 100.0);
        let started = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exceeding_capacity_waits_for_refill() {
        let gate = RateGate::new(1, 20.0);
        gate.acquire().await;
        let started = Instant::now();
        gate.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
