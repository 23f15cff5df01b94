//! Consecutive-failure counting per profile and error domain.
//!
//! The breaker never blocks a fetch. It reports when a domain has failed
//! often enough to be considered open, and what backoff would suit it.

use crate::error::ErrorDomain;
use crate::profiles::ProfileId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

const MAX_BACKOFF_FACTOR: u32 = 16;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerReport {
    pub profile_id: ProfileId,
    pub domain: ErrorDomain,
    pub consecutive_failures: u32,
    pub open: bool,
    pub last_failure: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    states: HashMap<(ProfileId, ErrorDomain), BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            states: HashMap::new(),
        }
    }

    /// Counts a failure and returns the new consecutive count.
    pub fn record_failure(&mut self, profile_id: ProfileId, domain: ErrorDomain, now: DateTime<Utc>) -> u32 {
        let state = self
            .states
            .entry((profile_id, domain))
            .or_insert(BreakerState {
                consecutive_failures: 0,
                last_failure: now,
            });
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = now;
        state.consecutive_failures
    }

    /// A success clears every domain for the profile.
    pub fn record_success(&mut self, profile_id: ProfileId) {
        self.states.retain(|(id, _), _| *id != profile_id);
    }

    pub fn failures(&self, profile_id: ProfileId, domain: ErrorDomain) -> u32 {
        self.states
            .get(&(profile_id, domain))
            .map_or(0, |s| s.consecutive_failures)
    }

    pub fn is_open(&self, profile_id: ProfileId, domain: ErrorDomain) -> bool {
        self.failures(profile_id, domain) >= self.threshold
    }

    /// Backoff suggested for an open breaker: `base` doubled for each failure
    /// past the threshold, capped at 16x. Zero while closed.
    pub fn suggested_backoff(&self, profile_id: ProfileId, domain: ErrorDomain, base: Duration) -> Duration {
        let failures = self.failures(profile_id, domain);
        if failures < self.threshold {
            return Duration::ZERO;
        }
        let exponent = (failures - self.threshold).min(4);
        base.saturating_mul((1u32 << exponent).min(MAX_BACKOFF_FACTOR))
    }

    pub fn forget(&mut self, profile_id: &ProfileId) {
        self.states.retain(|(id, _), _| id != profile_id);
    }

    pub fn report(&self) -> Vec<BreakerReport> {
        let mut reports: Vec<BreakerReport> = self
            .states
            .iter()
            .map(|((profile_id, domain), state)| BreakerReport {
                profile_id: *profile_id,
                domain: *domain,
                consecutive_failures: state.consecutive_failures,
                open: state.consecutive_failures >= self.threshold,
                last_failure: state.last_failure,
            })
            .collect();
        reports.sort_by(|a, b| {
            (a.profile_id, a.domain.as_str()).cmp(&(b.profile_id, b.domain.as_str()))
        });
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold_and_resets_on_success() {
        let mut breaker = CircuitBreaker::new(3);
        let id = ProfileId::new();
        let now = Utc::now();
        breaker.record_failure(id, ErrorDomain::Network, now);
        breaker.record_failure(id, ErrorDomain::Network, now);
        assert!(!breaker.is_open(id, ErrorDomain::Network));
        assert_eq!(breaker.record_failure(id, ErrorDomain::Network, now), 3);
        assert!(breaker.is_open(id, ErrorDomain::Network));
        assert!(!breaker.is_open(id, ErrorDomain::Server));

        breaker.record_success(id);
        assert_eq!(breaker.failures(id, ErrorDomain::Network), 0);
        assert!(breaker.report().is_empty());
    }

    #[test]
    fn test_profiles_are_isolated() {
        let mut breaker = CircuitBreaker::new(1);
        let (a, b) = (ProfileId::new(), ProfileId::new());
        breaker.record_failure(a, ErrorDomain::RateLimit, Utc::now());
        breaker.record_success(b);
        assert!(breaker.is_open(a, ErrorDomain::RateLimit));
        assert!(!breaker.is_open(b, ErrorDomain::RateLimit));
    }

    #[test]
    fn test_suggested_backoff_grows_and_caps() {
        let mut breaker = CircuitBreaker::new(2);
        let id = ProfileId::new();
        let base = Duration::from_secs(10);
        assert_eq!(breaker.suggested_backoff(id, ErrorDomain::Network, base), Duration::ZERO);
        for _ in 0..2 {
            breaker.record_failure(id, ErrorDomain::Network, Utc::now());
        }
        assert_eq!(breaker.suggested_backoff(id, ErrorDomain::Network, base), base);
        breaker.record_failure(id, ErrorDomain::Network, Utc::now());
        assert_eq!(
            breaker.suggested_backoff(id, ErrorDomain::Network, base),
            Duration::from_secs(20)
        );
        for _ in 0..10 {
            breaker.record_failure(id, ErrorDomain::Network, Utc::now());
        }
        assert_eq!(
            breaker.suggested_backoff(id, ErrorDomain::Network, base),
            Duration::from_secs(160)
        );
    }
}
