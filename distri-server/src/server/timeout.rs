//! Reclaiming work from stalled connections.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::AssignmentTimeout;

/// Adaptive timeouts allow this many times the longest recent round trip.
const ADAPTIVE_FACTOR: u32 = 2;

/// Number of recent round trips the adaptive limit is computed over.
const ROUND_TRIP_WINDOW: usize = 32;

/// Adaptive timeouts never drop below this.
const ADAPTIVE_FLOOR: Duration = Duration::from_secs(5);

/// Adaptive timeout before any round trip has been observed.
const ADAPTIVE_INITIAL: Duration = Duration::from_secs(60);

/// Decides how long a connection may hold a work item.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    mode: Option<AssignmentTimeout>,
    recent: VecDeque<Duration>,
}

impl TimeoutPolicy {
    pub fn new(mode: Option<AssignmentTimeout>) -> Self {
        Self {
            mode,
            recent: VecDeque::with_capacity(ROUND_TRIP_WINDOW),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode.is_some()
    }

    /// Record the time between sending work and receiving its solution.
    pub fn observe(&mut self, round_trip: Duration) {
        if self.recent.len() == ROUND_TRIP_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(round_trip);
    }

    /// Longest of the last few round trips.
    pub fn max_round_trip(&self) -> Option<Duration> {
        self.recent.iter().max().copied()
    }

    /// Current limit, or `None` when reclaiming is disabled.
    pub fn limit(&self) -> Option<Duration> {
        match self.mode? {
            AssignmentTimeout::Fixed(limit) => Some(limit),
            AssignmentTimeout::Adaptive => Some(match self.max_round_trip() {
                Some(max) => (max * ADAPTIVE_FACTOR).max(ADAPTIVE_FLOOR),
                None => ADAPTIVE_INITIAL,
            }),
        }
    }

    /// How often to look for stalled connections.
    pub fn sweep_period(&self) -> Duration {
        self.limit()
            .map_or(Duration::from_secs(1), |limit| limit / 4)
            .clamp(Duration::from_millis(100), Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled() {
        let policy = TimeoutPolicy::new(None);
        assert!(!policy.is_enabled());
        assert_eq!(policy.limit(), None);
    }

    #[test]
    fn test_fixed_ignores_observations() {
        let mut policy = TimeoutPolicy::new(Some(AssignmentTimeout::Fixed(Duration::from_secs(30))));
        policy.observe(Duration::from_secs(100));
        assert_eq!(policy.limit(), Some(Duration::from_secs(30)));
        assert_eq!(policy.sweep_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_adaptive_tracks_longest_round_trip() {
        let mut policy = TimeoutPolicy::new(Some(AssignmentTimeout::Adaptive));
        assert_eq!(policy.limit(), Some(ADAPTIVE_INITIAL));

        policy.observe(Duration::from_secs(1));
        assert_eq!(policy.limit(), Some(ADAPTIVE_FLOOR));

        policy.observe(Duration::from_secs(10));
        policy.observe(Duration::from_secs(4));
        assert_eq!(policy.max_round_trip(), Some(Duration::from_secs(10)));
        assert_eq!(policy.limit(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_adaptive_forgets_old_outliers() {
        let mut policy = TimeoutPolicy::new(Some(AssignmentTimeout::Adaptive));
        policy.observe(Duration::from_secs(100));
        assert_eq!(policy.limit(), Some(Duration::from_secs(200)));

        for _ in 0..ROUND_TRIP_WINDOW - 1 {
            policy.observe(Duration::from_secs(1));
        }
        assert_eq!(policy.max_round_trip(), Some(Duration::from_secs(100)));

        policy.observe(Duration::from_secs(1));
        assert_eq!(policy.max_round_trip(), Some(Duration::from_secs(1)));
        assert_eq!(policy.limit(), Some(ADAPTIVE_FLOOR));
    }
}
