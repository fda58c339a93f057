//! Per-client rate limiting.
//!
//! One token bucket per client address, created lazily and swept once the
//! client has been idle past a threshold, so memory stays bounded by the set
//! of *active* clients. All bucket state lives behind a single lock owned by
//! [`IpRateLimiter`]; the critical section is O(1).

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    net::IpAddr,
    num::NonZeroU32,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Clients idle past this threshold are dropped by the sweeper.
pub const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(3 * 60);
/// Cadence of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
pub struct LimiterConfig {
    rps: f64,
    burst: u32,
    enabled: bool,
    idle_after: Duration,
    sweep_interval: Duration,
}

impl LimiterConfig {
    #[must_use]
    pub fn new(rps: f64, burst: u32, enabled: bool) -> Self {
        Self {
            rps,
            burst,
            enabled,
            idle_after: DEFAULT_IDLE_AFTER,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
        .normalize()
    }

    #[must_use]
    pub const fn with_idle_after(mut self, idle_after: Duration) -> Self {
        self.idle_after = idle_after;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self.normalize()
    }

    #[must_use]
    fn normalize(mut self) -> Self {
        if !self.rps.is_finite() || self.rps <= 0.0 {
            self.rps = 2.0;
        }
        self.burst = self.burst.max(1);
        if self.sweep_interval.is_zero() {
            self.sweep_interval = Duration::from_secs(1);
        }
        self
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn rps(&self) -> f64 {
        self.rps
    }

    #[must_use]
    pub const fn burst(&self) -> u32 {
        self.burst
    }

    /// Bucket quota: one token every `1/rps` seconds, up to `burst` held.
    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(Duration::from_secs_f64(1.0 / self.rps))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

struct ClientEntry {
    bucket: DefaultDirectRateLimiter,
    last_seen: Instant,
}

/// Shared admission state for all request-handling tasks and the sweeper.
pub struct IpRateLimiter {
    config: LimiterConfig,
    clients: Mutex<HashMap<IpAddr, ClientEntry>>,
}

impl IpRateLimiter {
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Admit or reject one request from `addr`.
    ///
    /// Fetch-or-create, the `last_seen` update and the token take happen in
    /// one critical section, so two racing requests from a fresh address can
    /// never both observe an untouched bucket. When the limiter is disabled
    /// this returns `true` without touching the map.
    #[must_use]
    pub fn admit(&self, addr: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut clients = self.clients.lock();
        let entry = clients.entry(addr).or_insert_with(|| ClientEntry {
            bucket: RateLimiter::direct(self.config.quota()),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        entry.bucket.check().is_ok()
    }

    /// Drop clients idle past the configured threshold; returns how many
    /// entries were removed.
    pub fn sweep_idle(&self) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        let idle_after = self.config.idle_after;
        clients.retain(|_, entry| entry.last_seen.elapsed() <= idle_after);
        before - clients.len()
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Start the periodic sweep; stops when `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; skip the first tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_idle();
                        if removed > 0 {
                            debug!(
                                removed,
                                active = limiter.client_count(),
                                "swept idle rate limit clients"
                            );
                        }
                    }
                }
            }
        })
    }
}
