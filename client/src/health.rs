//! Connection health monitoring
//!
//! Tracks how long the locally detected zone and the connected server's
//! zone have disagreed, how long a commit has been in flight, jumps in the
//! reported position and a rolling success rate of round trips. Each
//! problem is reported as an `Anomaly` once per episode.

use shared::error::{require_nonzero, ConfigError};
use shared::{Vec2, Zone};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomaly {
    /// Local and connected zones disagreed for longer than the threshold.
    ProlongedMismatch { duration: Duration },
    /// A commit has been in flight for too long.
    StuckTransition { elapsed: Duration },
    ChronicMismatch { count: u32 },
    /// Teleport or respawn rather than movement.
    PositionJump { distance: f32 },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::ProlongedMismatch { duration } => {
                write!(f, "zone mismatch for {:?}", duration)
            }
            Anomaly::StuckTransition { elapsed } => {
                write!(f, "transition in flight for {:?}", elapsed)
            }
            Anomaly::ChronicMismatch { count } => {
                write!(f, "{} consecutive mismatch increments", count)
            }
            Anomaly::PositionJump { distance } => {
                write!(f, "position jumped {:.1} units", distance)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthConfig {
    /// The mismatch counter grows at most once per period.
    pub mismatch_increment_period: Duration,
    pub prolonged_mismatch: Duration,
    pub stuck_transition: Duration,
    pub chronic_mismatch_count: u32,
    pub position_jump: f32,
    /// Outcomes kept for the rolling success rate.
    pub outcome_window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            mismatch_increment_period: Duration::from_secs(1),
            prolonged_mismatch: Duration::from_secs(5),
            stuck_transition: Duration::from_secs(10),
            chronic_mismatch_count: 10,
            position_jump: 100.0,
            outcome_window: 50,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("mismatch_increment_period", self.mismatch_increment_period)?;
        require_nonzero("prolonged_mismatch", self.prolonged_mismatch)?;
        require_nonzero("stuck_transition", self.stuck_transition)?;
        if self.outcome_window == 0 {
            return Err(ConfigError::invalid("outcome_window", "must be greater than zero"));
        }
        if !self.position_jump.is_finite() || self.position_jump <= 0.0 {
            return Err(ConfigError::invalid("position_jump", "must be a positive distance"));
        }
        Ok(())
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    mismatch_since: Option<Instant>,
    last_increment: Option<Instant>,
    consecutive_mismatches: u32,
    prolonged_reported: bool,
    chronic_reported: bool,
    commit_started: Option<Instant>,
    stuck_reported: bool,
    last_position: Option<Vec2>,
    outcomes: VecDeque<bool>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            mismatch_since: None,
            last_increment: None,
            consecutive_mismatches: 0,
            prolonged_reported: false,
            chronic_reported: false,
            commit_started: None,
            stuck_reported: false,
            last_position: None,
            outcomes: VecDeque::new(),
        }
    }

    pub fn consecutive_mismatches(&self) -> u32 {
        self.consecutive_mismatches
    }

    pub fn mismatch_duration(&self, now: Instant) -> Option<Duration> {
        self.mismatch_since
            .map(|since| now.saturating_duration_since(since))
    }

    /// Compares the local zone with the connected server's zone. Nothing is
    /// counted while disconnected.
    pub fn observe_zones(&mut self, local: Zone, connected: Option<Zone>, now: Instant) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let Some(connected) = connected else {
            return anomalies;
        };

        if connected == local {
            self.mismatch_since = None;
            self.last_increment = None;
            self.consecutive_mismatches = 0;
            self.prolonged_reported = false;
            self.chronic_reported = false;
            return anomalies;
        }

        let since = *self.mismatch_since.get_or_insert(now);

        let due = self.last_increment.map_or(true, |last| {
            now.saturating_duration_since(last) >= self.config.mismatch_increment_period
        });
        if due {
            self.consecutive_mismatches += 1;
            self.last_increment = Some(now);
        }

        let duration = now.saturating_duration_since(since);
        if duration >= self.config.prolonged_mismatch && !self.prolonged_reported {
            self.prolonged_reported = true;
            anomalies.push(Anomaly::ProlongedMismatch { duration });
        }

        if self.consecutive_mismatches >= self.config.chronic_mismatch_count && !self.chronic_reported {
            self.chronic_reported = true;
            anomalies.push(Anomaly::ChronicMismatch {
                count: self.consecutive_mismatches,
            });
        }

        anomalies
    }

    pub fn observe_position(&mut self, position: Vec2) -> Option<Anomaly> {
        let previous = self.last_position.replace(position)?;
        let distance = previous.distance(position);
        (distance > self.config.position_jump).then_some(Anomaly::PositionJump { distance })
    }

    /// Forgets the last position so the next update is not read as a jump.
    pub fn clear_position(&mut self) {
        self.last_position = None;
    }

    pub fn commit_started(&mut self, now: Instant) {
        self.commit_started = Some(now);
        self.stuck_reported = false;
    }

    pub fn commit_finished(&mut self, success: bool) {
        self.commit_started = None;
        self.record_outcome(success);
    }

    pub fn is_committing(&self) -> bool {
        self.commit_started.is_some()
    }

    pub fn check_stuck(&mut self, now: Instant) -> Option<Anomaly> {
        let elapsed = now.saturating_duration_since(self.commit_started?);
        if elapsed > self.config.stuck_transition && !self.stuck_reported {
            self.stuck_reported = true;
            return Some(Anomaly::StuckTransition { elapsed });
        }
        None
    }

    pub fn record_outcome(&mut self, success: bool) {
        self.outcomes.push_back(success);
        while self.outcomes.len() > self.config.outcome_window {
            self.outcomes.pop_front();
        }
    }

    /// Share of recent round trips that succeeded; 1.0 with no history.
    pub fn success_rate(&self) -> f32 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.outcomes.iter().filter(|ok| **ok).count();
        successes as f32 / self.outcomes.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_mismatch_increment_is_rate_limited() {
        let mut health = HealthMonitor::new(HealthConfig::default());
        let start = Instant::now();
        let mut prolonged_at = None;

        // Six seconds of disagreement, updated every 50ms.
        for ms in (0..6000).step_by(50) {
            for anomaly in health.observe_zones(Zone::new(1, 0), Some(Zone::new(0, 0)), at(start, ms)) {
                if let Anomaly::ProlongedMismatch { .. } = anomaly {
                    prolonged_at = Some(ms);
                }
            }
        }

        assert_eq!(health.consecutive_mismatches(), 6);
        assert_eq!(prolonged_at, Some(5000));
    }

    #[test]
    fn test_agreement_resets_mismatch() {
        let mut health = HealthMonitor::new(HealthConfig::default());
        let start = Instant::now();

        health.observe_zones(Zone::new(1, 0), Some(Zone::new(0, 0)), start);
        health.observe_zones(Zone::new(1, 0), Some(Zone::new(0, 0)), at(start, 1000));
        assert_eq!(health.consecutive_mismatches(), 2);

        health.observe_zones(Zone::new(0, 0), Some(Zone::new(0, 0)), at(start, 1100));
        assert_eq!(health.consecutive_mismatches(), 0);
        assert!(health.mismatch_duration(at(start, 1100)).is_none());
    }

    #[test]
    fn test_disconnected_is_not_mismatch() {
        let mut health = HealthMonitor::new(HealthConfig::default());
        let anomalies = health.observe_zones(Zone::new(1, 0), None, Instant::now());

        assert!(anomalies.is_empty());
        assert_eq!(health.consecutive_mismatches(), 0);
    }

    #[test]
    fn test_chronic_mismatch_reported_once() {
        let mut health = HealthMonitor::new(HealthConfig::default());
        let start = Instant::now();
        let mut chronic = 0;

        for second in 0..15 {
            for anomaly in health.observe_zones(Zone::new(1, 0), Some(Zone::new(0, 0)), at(start, second * 1000)) {
                if let Anomaly::ChronicMismatch { count } = anomaly {
                    assert_eq!(count, 10);
                    chronic += 1;
                }
            }
        }

        assert_eq!(chronic, 1);
    }

    #[test]
    fn test_position_jump() {
        let mut health = HealthMonitor::new(HealthConfig::default());

        assert!(health.observe_position(Vec2::new(0.0, 0.0)).is_none());
        assert!(health.observe_position(Vec2::new(50.0, 0.0)).is_none());
        match health.observe_position(Vec2::new(300.0, 0.0)) {
            Some(Anomaly::PositionJump { distance }) => assert_approx_eq!(distance, 250.0, 0.001),
            other => panic!("expected a position jump, got {:?}", other),
        }
    }

    #[test]
    fn test_stuck_transition() {
        let mut health = HealthMonitor::new(HealthConfig::default());
        let start = Instant::now();

        assert!(health.check_stuck(start).is_none());
        health.commit_started(start);
        assert!(health.check_stuck(at(start, 9000)).is_none());
        assert!(matches!(
            health.check_stuck(at(start, 10_500)),
            Some(Anomaly::StuckTransition { .. })
        ));
        assert!(health.check_stuck(at(start, 11_000)).is_none());

        health.commit_finished(false);
        assert!(!health.is_committing());
    }

    #[test]
    fn test_success_rate_window() {
        let mut health = HealthMonitor::new(HealthConfig {
            outcome_window: 4,
            ..HealthConfig::default()
        });
        assert_approx_eq!(health.success_rate(), 1.0, 1e-6);

        for ok in [false, false, true, true, true, true] {
            health.record_outcome(ok);
        }
        assert_approx_eq!(health.success_rate(), 1.0, 1e-6);

        health.record_outcome(false);
        assert_approx_eq!(health.success_rate(), 0.75, 1e-6);
    }
}
