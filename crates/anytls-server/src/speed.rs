//! Per-user speed limiting.
//!
//! Buckets are keyed by user id and live for the process: tokens accumulate
//! across reconnects, so tearing a bucket down on every connection would let
//! a reconnecting client escape its cap. `get` hands out the same instance
//! for the same user; `update` re-parameterises it in place.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::RwLock;

use anytls_core::defaults::{BURST_PER_MBIT, BYTES_PER_MBIT};

/// Token bucket for one user.
#[derive(Debug)]
pub struct SpeedBucket {
    /// Bytes per second.
    rate: AtomicU64,
    /// Burst allowance in bytes.
    burst: AtomicU64,
    limiter: RwLock<Arc<DefaultDirectRateLimiter>>,
}

impl SpeedBucket {
    fn new(mbps: i64) -> Self {
        let (rate, burst) = params(mbps);
        Self {
            rate: AtomicU64::new(rate),
            burst: AtomicU64::new(burst),
            limiter: RwLock::new(Arc::new(build_limiter(rate, burst))),
        }
    }

    pub fn rate_bytes_per_sec(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn burst_bytes(&self) -> u64 {
        self.burst.load(Ordering::Relaxed)
    }

    /// Swap in a limiter with new parameters. Accumulated burst resets.
    fn reconfigure(&self, mbps: i64) {
        let (rate, burst) = params(mbps);
        self.rate.store(rate, Ordering::Relaxed);
        self.burst.store(burst, Ordering::Relaxed);
        *self.limiter.write() = Arc::new(build_limiter(rate, burst));
    }

    /// Debit `n` bytes, suspending until that many tokens are available.
    pub async fn wait(&self, n: usize) {
        let limiter = self.limiter.read().clone();
        // Transfers larger than the burst can never be satisfied in one
        // debit; charge the burst instead.
        let n = (n as u64).min(self.burst_bytes()).min(u64::from(u32::MAX)) as u32;
        if let Some(n) = NonZeroU32::new(n) {
            let _ = limiter.until_n_ready(n).await;
        }
    }
}

fn params(mbps: i64) -> (u64, u64) {
    let mbps = mbps.max(0) as u64;
    (
        mbps.saturating_mul(BYTES_PER_MBIT),
        mbps.saturating_mul(BURST_PER_MBIT),
    )
}

fn build_limiter(rate: u64, burst: u64) -> DefaultDirectRateLimiter {
    let rate = NonZeroU32::new(rate.min(u64::from(u32::MAX)) as u32).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst.min(u64::from(u32::MAX)) as u32).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))
}

/// Registry of per-user buckets with lazy creation.
#[derive(Debug, Default)]
pub struct SpeedLimiter {
    buckets: RwLock<HashMap<i64, Arc<SpeedBucket>>>,
}

impl SpeedLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket for `user_id`, created on first use. A non-positive cap
    /// yields `None`: the connection runs unlimited.
    pub fn get(&self, user_id: i64, mbps: i64) -> Option<Arc<SpeedBucket>> {
        if mbps <= 0 {
            return None;
        }
        if let Some(bucket) = self.buckets.read().get(&user_id) {
            return Some(bucket.clone());
        }
        let mut buckets = self.buckets.write();
        Some(
            buckets
                .entry(user_id)
                .or_insert_with(|| Arc::new(SpeedBucket::new(mbps)))
                .clone(),
        )
    }

    /// Re-parameterise (or create) a user's bucket; a non-positive cap
    /// removes it.
    pub fn update(&self, user_id: i64, mbps: i64) {
        if mbps <= 0 {
            self.remove(user_id);
            return;
        }
        let mut buckets = self.buckets.write();
        match buckets.get(&user_id) {
            Some(bucket) => bucket.reconfigure(mbps),
            None => {
                buckets.insert(user_id, Arc::new(SpeedBucket::new(mbps)));
            }
        }
    }

    pub fn remove(&self, user_id: i64) {
        self.buckets.write().remove(&user_id);
    }
}
