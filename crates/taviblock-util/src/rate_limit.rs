//! Rate limiting utilities

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ClientId;

/// Simple token-bucket rate limiter for control-channel clients
#[derive(Debug)]
pub struct RateLimiter {
    max_tokens: u32,
    refill_interval: Duration,
    clients: HashMap<ClientId, ClientBucket>,
}

#[derive(Debug)]
struct ClientBucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_tokens: max_requests,
            refill_interval: interval,
            clients: HashMap::new(),
        }
    }

    /// Check if a request should be allowed for the given client.
    ///
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        let now = Instant::now();

        let bucket = self.clients.entry(client_id.clone()).or_insert(ClientBucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        if elapsed >= self.refill_interval {
            let intervals = (elapsed.as_millis() / self.refill_interval.as_millis()) as u32;
            bucket.tokens = (bucket.tokens + intervals * self.max_tokens).min(self.max_tokens);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Remove a client's rate limit state
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.clients.remove(client_id);
    }
}
