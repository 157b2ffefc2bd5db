use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token-bucket rate limiter (spec.md §4.6 "Rate limiting"). Continuous
/// refill at `capacity / 60` tokens per second; `acquire()` awaits until a
/// token is available. Avoids a background ticker task by computing the
/// elapsed-time refill lazily on each call.
pub struct TokenBucket {
    inner: Mutex<Inner>,
    capacity: f64,
    refill_per_sec: f64,
}

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity_per_minute: u32) -> Self {
        let capacity = capacity_per_minute.max(1) as f64;
        TokenBucket {
            inner: Mutex::new(Inner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    fn refill(&self, inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        inner.last_refill = now;
    }

    /// Awaits until `n` tokens are available, then consumes them.
    pub async fn acquire(&self, n: u32) {
        let n = n as f64;
        loop {
            let wait = {
                let mut inner = self.inner.lock().unwrap();
                self.refill(&mut inner);
                if inner.tokens >= n {
                    inner.tokens -= n;
                    None
                } else {
                    let deficit = n - inner.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d.max(Duration::from_millis(1))).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_never_exceeds_capacity_plus_one_per_window() {
        let bucket = TokenBucket::new(60);
        let start = Instant::now();
        let mut calls = 0;
        while start.elapsed() < Duration::from_millis(50) {
            bucket.acquire(2).await;
            calls += 1;
        }
        // 60/min == 1/sec of single-token refill; over 50ms we should only
        // ever drain the initial burst capacity, never an unbounded amount.
        assert!(calls <= 60, "token bucket let through {calls} calls unexpectedly fast");
    }

    #[tokio::test]
    async fn acquire_blocks_when_bucket_empty() {
        let bucket = TokenBucket::new(60);
        bucket.acquire(60).await; // drain initial capacity
        let start = Instant::now();
        bucket.acquire(2).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
