//! Trailing-window rate limiting with failure escalation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use forge_config::types::RateLimitConfig;
use tracing::debug;

/// Length of the trailing provision-count window.
pub const PROVISION_WINDOW: Duration = Duration::from_secs(60);

/// Ceiling on the failure-escalated minimum interval.
const MAX_EFFECTIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Exponent cap so the doubling math cannot overflow.
const MAX_ESCALATIONS: u32 = 16;

#[derive(Debug, Default)]
struct ProfileWindow {
    /// Provision timestamps inside the trailing window, oldest first.
    provisions: VecDeque<Instant>,
    last_provision: Option<Instant>,
    consecutive_failures: u32,
}

impl ProfileWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.provisions.front()
            && now.duration_since(*front) >= window
        {
            self.provisions.pop_front();
        }
    }

    fn effective_interval(&self, limits: &RateLimitConfig) -> Duration {
        let base = Duration::from_millis(limits.min_interval_ms);
        let doublings = self.consecutive_failures.min(MAX_ESCALATIONS);
        let escalated = base.saturating_mul(1u32 << doublings);
        escalated.min(MAX_EFFECTIVE_INTERVAL)
    }

    fn interval_satisfied(&self, now: Instant, limits: &RateLimitConfig) -> bool {
        match self.last_provision {
            Some(last) => now.duration_since(last) >= self.effective_interval(limits),
            None => true,
        }
    }
}

/// Per-profile provisioning throttle.
///
/// A request is denied when the trailing-window provision count has
/// reached the profile's per-minute cap, or when the elapsed time
/// since the last provision is below the minimum interval. Consecutive
/// failures double the effective interval; any success resets it.
///
/// `record_provision` re-checks the window cap under the same lock as
/// the recording, so two concurrent callers can never both take the
/// last slot.
#[derive(Debug)]
pub struct ProvisionRateLimiter {
    window: Duration,
    profiles: Mutex<HashMap<String, ProfileWindow>>,
}

impl Default for ProvisionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionRateLimiter {
    pub fn new() -> Self {
        Self::with_window(PROVISION_WINDOW)
    }

    /// A limiter with a shortened window. Test-oriented; production
    /// callers use [`ProvisionRateLimiter::new`].
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Advisory check: would a provision be admitted right now?
    pub fn can_provision(&self, profile: &str, limits: &RateLimitConfig) -> bool {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let state = profiles.entry(profile.to_string()).or_default();
        let now = Instant::now();
        state.prune(now, self.window);
        (state.provisions.len() as u32) < limits.max_per_minute
            && state.interval_satisfied(now, limits)
    }

    /// Atomically claim one provision slot in the trailing window.
    ///
    /// Returns `false` without recording when the window is already at
    /// capacity. Dispatch must only follow a `true` return.
    pub fn record_provision(&self, profile: &str, limits: &RateLimitConfig) -> bool {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let state = profiles.entry(profile.to_string()).or_default();
        let now = Instant::now();
        state.prune(now, self.window);
        if (state.provisions.len() as u32) >= limits.max_per_minute {
            debug!(profile, "provision window full");
            return false;
        }
        state.provisions.push_back(now);
        state.last_provision = Some(now);
        true
    }

    /// Note a failed provisioning attempt; widens the effective
    /// minimum interval for the next one.
    pub fn record_failure(&self, profile: &str) {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let state = profiles.entry(profile.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        debug!(profile, failures = state.consecutive_failures, "provision failure recorded");
    }

    /// Any success clears the escalation.
    pub fn reset_failures(&self, profile: &str) {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = profiles.get_mut(profile) {
            state.consecutive_failures = 0;
        }
    }

    /// Free slots left in the trailing window.
    pub fn remaining_in_window(&self, profile: &str, limits: &RateLimitConfig) -> u32 {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let state = profiles.entry(profile.to_string()).or_default();
        state.prune(Instant::now(), self.window);
        limits.max_per_minute.saturating_sub(state.provisions.len() as u32)
    }

    /// How long until a provision could be admitted; `None` when one
    /// could go right now.
    pub fn wait_time(&self, profile: &str, limits: &RateLimitConfig) -> Option<Duration> {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let state = profiles.entry(profile.to_string()).or_default();
        let now = Instant::now();
        state.prune(now, self.window);

        let mut wait = Duration::ZERO;
        if (state.provisions.len() as u32) >= limits.max_per_minute
            && let Some(oldest) = state.provisions.front()
        {
            wait = wait.max(self.window.saturating_sub(now.duration_since(*oldest)));
        }
        if let Some(last) = state.last_provision {
            let interval = state.effective_interval(limits);
            wait = wait.max(interval.saturating_sub(now.duration_since(last)));
        }
        (wait > Duration::ZERO).then_some(wait)
    }

    /// Current failure streak for a profile.
    pub fn consecutive_failures(&self, profile: &str) -> u32 {
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles
            .get(profile)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// The failure-escalated minimum interval currently in force.
    pub fn effective_interval(&self, profile: &str, limits: &RateLimitConfig) -> Duration {
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles
            .get(profile)
            .map(|s| s.effective_interval(limits))
            .unwrap_or_else(|| Duration::from_millis(limits.min_interval_ms))
    }
}
