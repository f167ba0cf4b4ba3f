/// Per-client rate limiting.
///
/// Two independent limiters, matching the reference implementation's split:
/// `SubscriptionRateLimiter` guards subscribe/unsubscribe calls with a token
/// bucket and escalates repeat offenders to a timed block; `RequestRateLimiter`
/// guards ordinary RPC calls with a sliding window plus a cost budget and
/// never blocks, it just rejects the request that would overflow the window.
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

struct ClientState {
    tokens: f64,
    last_refill: Instant,
    subscriptions: usize,
    violations: u32,
    blocked_until: Option<Instant>,
}

pub struct SubscriptionRateLimiter {
    clients: HashMap<String, ClientState>,
    rate_per_sec: f64,
    burst: f64,
    max_subs_per_client: u32,
    violation_threshold: u32,
    block_duration: Duration,
}

impl SubscriptionRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            clients: HashMap::new(),
            rate_per_sec: config.sub_rate_per_sec,
            burst: config.sub_burst,
            max_subs_per_client: config.max_subs_per_client,
            violation_threshold: config.violation_threshold,
            block_duration: Duration::from_secs(config.block_duration_secs),
        }
    }

    fn refill(&mut self, client: &str) {
        let burst = self.burst;
        let rate = self.rate_per_sec;
        let state = self
            .clients
            .entry(client.to_string())
            .or_insert_with(|| ClientState {
                tokens: burst,
                last_refill: Instant::now(),
                subscriptions: 0,
                violations: 0,
                blocked_until: None,
            });
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(burst);
        state.last_refill = now;
    }

    /// Returns `Ok(())` if the client may subscribe, `Err(reason)` otherwise.
    pub fn can_subscribe(&mut self, client: &str) -> Result<(), String> {
        self.refill(client);
        let state = self.clients.get(client).unwrap();

        if let Some(until) = state.blocked_until {
            if Instant::now() < until {
                return Err("client temporarily blocked for repeated violations".to_string());
            }
        }
        if state.subscriptions as u32 >= self.max_subs_per_client {
            return Err("max subscriptions per client exceeded".to_string());
        }
        if state.tokens < 1.0 {
            self.record_violation(client);
            return Err("subscription rate exceeded".to_string());
        }
        Ok(())
    }

    pub fn record_subscription(&mut self, client: &str) {
        if let Some(state) = self.clients.get_mut(client) {
            state.tokens -= 1.0;
            state.subscriptions += 1;
        }
    }

    pub fn record_unsubscription(&mut self, client: &str) {
        if let Some(state) = self.clients.get_mut(client) {
            state.subscriptions = state.subscriptions.saturating_sub(1);
        }
    }

    fn record_violation(&mut self, client: &str) {
        if let Some(state) = self.clients.get_mut(client) {
            state.violations += 1;
            if state.violations >= self.violation_threshold {
                state.blocked_until = Some(Instant::now() + self.block_duration);
            }
        }
    }

    pub fn remove_client(&mut self, client: &str) {
        self.clients.remove(client);
    }

    pub fn global_stats(&self) -> (usize, usize) {
        let blocked = self
            .clients
            .values()
            .filter(|s| s.blocked_until.map(|t| Instant::now() < t).unwrap_or(false))
            .count();
        (self.clients.len(), blocked)
    }
}

struct RequestWindow {
    timestamps: VecDeque<Instant>,
    cost_spent: f64,
}

pub struct RequestRateLimiter {
    clients: HashMap<String, RequestWindow>,
    window: Duration,
    max_requests: u32,
    cost_hard_limit: f64,
}

impl RequestRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            clients: HashMap::new(),
            window: Duration::from_secs(config.request_window_secs),
            max_requests: config.max_requests_per_window,
            cost_hard_limit: config.cost_hard_limit,
        }
    }

    /// Checks (without recording) whether one more request of `cost` fits
    /// within the client's current window.
    pub fn check_request(&mut self, client: &str, cost: f64) -> Result<(), String> {
        let window = self.window;
        let state = self
            .clients
            .entry(client.to_string())
            .or_insert_with(|| RequestWindow { timestamps: VecDeque::new(), cost_spent: 0.0 });
        let cutoff = Instant::now() - window;
        while state.timestamps.front().map(|t| *t < cutoff).unwrap_or(false) {
            state.timestamps.pop_front();
        }
        if state.timestamps.len() as u32 >= self.max_requests {
            return Err("request rate exceeded".to_string());
        }
        if state.cost_spent + cost > self.cost_hard_limit {
            return Err("cost budget exceeded".to_string());
        }
        Ok(())
    }

    pub fn record_request(&mut self, client: &str, cost: f64) {
        if let Some(state) = self.clients.get_mut(client) {
            state.timestamps.push_back(Instant::now());
            state.cost_spent += cost;
        }
    }

    pub fn cost_remaining(&self, client: &str) -> f64 {
        self.clients
            .get(client)
            .map(|s| (self.cost_hard_limit - s.cost_spent).max(0.0))
            .unwrap_or(self.cost_hard_limit)
    }

    pub fn remove_client(&mut self, client: &str) {
        self.clients.remove(client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            max_subs_per_client: 5,
            sub_rate_per_sec: 1000.0,
            sub_burst: 2.0,
            violation_threshold: 2,
            block_duration_secs: 60,
            request_window_secs: 60,
            max_requests_per_window: 3,
            cost_hard_limit: 10.0,
        }
    }

    #[test]
    fn subscription_limiter_blocks_after_repeated_violations() {
        let mut limiter = SubscriptionRateLimiter::new(&test_config());
        limiter.can_subscribe("a").unwrap();
        limiter.record_subscription("a");
        limiter.can_subscribe("a").unwrap();
        limiter.record_subscription("a");

        assert!(limiter.can_subscribe("a").is_err());
        assert!(limiter.can_subscribe("a").is_err());
        assert!(limiter.can_subscribe("a").is_err());
    }

    #[test]
    fn subscription_limiter_enforces_max_subs_per_client() {
        let mut config = test_config();
        config.max_subs_per_client = 1;
        config.sub_burst = 100.0;
        let mut limiter = SubscriptionRateLimiter::new(&config);
        limiter.can_subscribe("a").unwrap();
        limiter.record_subscription("a");
        assert!(limiter.can_subscribe("a").is_err());
    }

    #[test]
    fn request_limiter_enforces_window_count_and_cost() {
        let mut limiter = RequestRateLimiter::new(&test_config());
        for _ in 0..3 {
            limiter.check_request("a", 1.0).unwrap();
            limiter.record_request("a", 1.0);
        }
        assert!(limiter.check_request("a", 1.0).is_err());
    }

    #[test]
    fn request_limiter_enforces_cost_budget() {
        let mut config = test_config();
        config.max_requests_per_window = 1000;
        config.cost_hard_limit = 5.0;
        let mut limiter = RequestRateLimiter::new(&config);
        limiter.check_request("a", 4.0).unwrap();
        limiter.record_request("a", 4.0);
        assert!(limiter.check_request("a", 2.0).is_err());
    }
}
