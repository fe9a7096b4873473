//! Three-dimensional brute force throttling: per-IP, per-session, global.
//!
//! State is an explicit injected store, not a process global, so tests run
//! with isolated instances. Every operation takes `now` so window and block
//! arithmetic is deterministic under test.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

fn global_window() -> Duration {
    Duration::hours(1)
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    /// IP block threshold.
    pub max_attempts: u32,
    /// Session block threshold; takes precedence over the IP threshold.
    pub session_max_attempts: u32,
    /// Shared hourly failure budget across all callers.
    pub max_global_attempts_per_hour: u32,
    pub block_time: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            session_max_attempts: 3,
            max_global_attempts_per_hour: 50,
            block_time: Duration::minutes(5),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Entry {
    failed_attempts: u32,
    blocked_until: Option<DateTime<Utc>>,
}

impl Entry {
    /// Active block, clearing the entry in place once expiry is observed.
    fn active_block(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.blocked_until {
            Some(until) if now < until => Some(until),
            Some(_) => {
                self.blocked_until = None;
                None
            }
            None => None,
        }
    }
}

#[derive(Debug)]
struct GlobalWindowState {
    failed_attempts: u32,
    window_start: DateTime<Utc>,
}

/// Result of a block check across all sources; `blocked_until` is the
/// latest-expiring active block ("most restrictive wins").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockVerdict {
    pub blocked_until: Option<DateTime<Utc>>,
}

impl BlockVerdict {
    #[must_use]
    pub const fn blocked(&self) -> bool {
        self.blocked_until.is_some()
    }

    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.blocked_until
            .map_or(0, |until| (until - now).num_seconds().max(0))
    }
}

/// Policy decision after a recorded failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Session threshold crossed; the caller must also mirror `until` into
    /// the signed session cookie.
    SessionBlocked { until: DateTime<Utc> },
    IpBlocked { until: DateTime<Utc> },
    /// Below both thresholds: suspend for `delay_seconds` before responding.
    Delayed {
        delay_seconds: u64,
        remaining_attempts: u32,
    },
}

pub struct RateLimitStore {
    config: RateLimitConfig,
    ip: Mutex<HashMap<String, Entry>>,
    session: Mutex<HashMap<String, Entry>>,
    global: Mutex<GlobalWindowState>,
}

impl RateLimitStore {
    #[must_use]
    pub fn new(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            ip: Mutex::new(HashMap::new()),
            session: Mutex::new(HashMap::new()),
            global: Mutex::new(GlobalWindowState {
                failed_attempts: 0,
                window_start: now,
            }),
        }
    }

    /// Progressive delay in seconds: 1, 2, 4, 8, then capped at 16.
    #[must_use]
    pub const fn progressive_delay_seconds(attempt_count: u32) -> u64 {
        if attempt_count == 0 {
            return 0;
        }
        let exponent = attempt_count - 1;
        if exponent >= 4 {
            16
        } else {
            1 << exponent
        }
    }

    /// Check the global hourly budget, resetting the window when elapsed.
    pub fn check_global(&self, now: DateTime<Utc>) -> bool {
        let mut global = self.global.lock().expect("global window lock poisoned");
        if now - global.window_start > global_window() {
            global.failed_attempts = 0;
            global.window_start = now;
        }
        global.failed_attempts < self.config.max_global_attempts_per_hour
    }

    /// A caller is blocked if any of the three sources reports an active
    /// block: the IP table, the session table, or the persisted mirror from
    /// the caller's signed cookie. Expired in-memory entries are cleared as
    /// they are observed.
    pub fn check_blocked(
        &self,
        ip_key: &str,
        session_key: &str,
        persisted_session_block: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> BlockVerdict {
        let mut blocked_until: Option<DateTime<Utc>> = None;
        let mut consider = |candidate: Option<DateTime<Utc>>| {
            if let Some(until) = candidate {
                blocked_until = Some(blocked_until.map_or(until, |current| current.max(until)));
            }
        };

        {
            let mut ip = self.ip.lock().expect("ip table lock poisoned");
            consider(ip.get_mut(ip_key).and_then(|entry| entry.active_block(now)));
        }
        {
            let mut session = self.session.lock().expect("session table lock poisoned");
            consider(
                session
                    .get_mut(session_key)
                    .and_then(|entry| entry.active_block(now)),
            );
        }
        consider(persisted_session_block.filter(|until| now < *until));

        BlockVerdict { blocked_until }
    }

    /// Record a failed attempt: increment all three counters, then apply
    /// precedence. Session blocking wins over IP blocking because the session
    /// id is the harder-to-evade signal. Each per-key update happens under
    /// that table's lock, so a block set here cannot be silently overwritten
    /// by a concurrent failure on the same key.
    pub fn record_failure(
        &self,
        ip_key: &str,
        session_key: &str,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        {
            let mut global = self.global.lock().expect("global window lock poisoned");
            global.failed_attempts += 1;
        }

        let block_until = now + self.config.block_time;

        let (session_attempts, session_blocked) = {
            let mut session = self.session.lock().expect("session table lock poisoned");
            let entry = session.entry(session_key.to_string()).or_default();
            entry.failed_attempts += 1;
            let blocked = entry.failed_attempts >= self.config.session_max_attempts;
            if blocked {
                entry.blocked_until = Some(block_until);
            }
            (entry.failed_attempts, blocked)
        };

        let ip_attempts = {
            let mut ip = self.ip.lock().expect("ip table lock poisoned");
            let entry = ip.entry(ip_key.to_string()).or_default();
            entry.failed_attempts += 1;
            if !session_blocked && entry.failed_attempts >= self.config.max_attempts {
                entry.blocked_until = Some(block_until);
            }
            entry.failed_attempts
        };

        if session_blocked {
            return FailureOutcome::SessionBlocked { until: block_until };
        }
        if ip_attempts >= self.config.max_attempts {
            return FailureOutcome::IpBlocked { until: block_until };
        }

        // Delay scales with session attempts, the stronger signal.
        let remaining_attempts = (self.config.session_max_attempts - session_attempts)
            .min(self.config.max_attempts - ip_attempts);
        FailureOutcome::Delayed {
            delay_seconds: Self::progressive_delay_seconds(session_attempts),
            remaining_attempts,
        }
    }

    /// Malformed input is still a counted guess (it must not be a free
    /// format-probing channel), but it triggers neither blocks nor delay.
    pub fn record_invalid_format(&self, ip_key: &str, session_key: &str) {
        {
            let mut global = self.global.lock().expect("global window lock poisoned");
            global.failed_attempts += 1;
        }
        {
            let mut session = self.session.lock().expect("session table lock poisoned");
            session
                .entry(session_key.to_string())
                .or_default()
                .failed_attempts += 1;
        }
        {
            let mut ip = self.ip.lock().expect("ip table lock poisoned");
            ip.entry(ip_key.to_string()).or_default().failed_attempts += 1;
        }
    }

    /// Reset counters and clear blocks for this caller after a successful
    /// authorization, but only when no block is active: a correct credential
    /// presented during a lockout must not clear it.
    ///
    /// # Errors
    /// Returns the still-active block when the reset was refused.
    pub fn record_success(
        &self,
        ip_key: &str,
        session_key: &str,
        persisted_session_block: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), BlockVerdict> {
        let verdict = self.check_blocked(ip_key, session_key, persisted_session_block, now);
        if verdict.blocked() {
            return Err(verdict);
        }

        {
            let mut ip = self.ip.lock().expect("ip table lock poisoned");
            ip.remove(ip_key);
        }
        {
            let mut session = self.session.lock().expect("session table lock poisoned");
            session.remove(session_key);
        }
        {
            let mut global = self.global.lock().expect("global window lock poisoned");
            global.failed_attempts = 0;
            global.window_start = now;
        }

        Ok(())
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
