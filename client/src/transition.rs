//! Client-side zone transition state machine
//!
//! Decides when the client's own connection should move to another zone
//! server. Raw zone changes are filtered three ways before a commit:
//! hysteresis (the position must be clearly past the boundary), debounce
//! (the candidate must persist) and a minimum spacing between commits.
//! Bursts of commits trip a cooldown. A forced commit bypasses all of it
//! when the local zone and the connected server's zone have disagreed for
//! too long.

use log::{debug, warn};
use shared::error::{require_nonzero, ConfigError};
use shared::{Vec2, Zone, ZoneGrid};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionConfig {
    /// Distance past a boundary before a new zone is considered.
    pub hysteresis: f32,
    pub debounce: Duration,
    pub min_between_transitions: Duration,
    /// Window in which rapid commits are counted.
    pub rapid_window: Duration,
    pub max_rapid_transitions: usize,
    pub cooldown: Duration,
    /// Local and connected zones may disagree this long before a forced
    /// commit.
    pub forced_after: Duration,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            hysteresis: 2.0,
            debounce: Duration::from_millis(150),
            min_between_transitions: Duration::from_millis(200),
            rapid_window: Duration::from_secs(5),
            max_rapid_transitions: 8,
            cooldown: Duration::from_millis(1500),
            forced_after: Duration::from_secs(5),
        }
    }
}

impl TransitionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.hysteresis.is_finite() || self.hysteresis < 0.0 {
            return Err(ConfigError::invalid(
                "hysteresis",
                "must be a finite, non-negative distance",
            ));
        }
        if self.max_rapid_transitions == 0 {
            return Err(ConfigError::invalid(
                "max_rapid_transitions",
                "must be greater than zero",
            ));
        }
        require_nonzero("rapid_window", self.rapid_window)?;
        require_nonzero("forced_after", self.forced_after)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    Stable(Zone),
    PendingConfirm { candidate: Zone, since: Instant },
    Cooldown { until: Instant },
}

/// What the session should do after a position update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Stay,
    /// A candidate is being debounced; a good moment to pre-connect.
    Pending { candidate: Zone },
    Commit { from: Zone, to: Zone },
    /// Debounce was bypassed after a prolonged mismatch.
    ForcedCommit {
        from: Zone,
        to: Zone,
        mismatch: Duration,
    },
}

pub struct ClientTransitionController {
    grid: ZoneGrid,
    config: TransitionConfig,
    state: TransitionState,
    stable_zone: Zone,
    last_commit: Option<Instant>,
    recent_commits: VecDeque<Instant>,
    mismatch_since: Option<Instant>,
    commits: u64,
    forced_commits: u64,
}

impl ClientTransitionController {
    pub fn new(grid: ZoneGrid, config: TransitionConfig, initial: Zone) -> Self {
        Self {
            grid,
            config,
            state: TransitionState::Stable(initial),
            stable_zone: initial,
            last_commit: None,
            recent_commits: VecDeque::new(),
            mismatch_since: None,
            commits: 0,
            forced_commits: 0,
        }
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    pub fn stable_zone(&self) -> Zone {
        self.stable_zone
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn forced_commits(&self) -> u64 {
        self.forced_commits
    }

    pub fn config(&self) -> &TransitionConfig {
        &self.config
    }

    /// Settles on `zone` without counting a commit, e.g. after a reconnect.
    pub fn reset_to(&mut self, zone: Zone) {
        self.stable_zone = zone;
        self.state = TransitionState::Stable(zone);
        self.mismatch_since = None;
    }

    /// Feeds one position update. `connected` is the zone of the server
    /// the client is attached to, if any.
    pub fn update(&mut self, position: Vec2, connected: Option<Zone>, now: Instant) -> Decision {
        let candidate = self.grid.zone_of(position);

        if let Some(decision) = self.check_forced(candidate, connected, now) {
            return decision;
        }

        // A pending candidate survives a sample that dips back, so the
        // debounce keeps running from when the candidate first appeared.
        if candidate == self.stable_zone {
            if let TransitionState::Cooldown { until } = self.state {
                if now >= until {
                    self.state = TransitionState::Stable(self.stable_zone);
                }
            }
            return Decision::Stay;
        }

        if let TransitionState::Cooldown { until } = self.state {
            if now < until {
                return Decision::Stay;
            }
            self.state = TransitionState::Stable(self.stable_zone);
        }

        let depth = self.grid.penetration(self.stable_zone, candidate, position);
        if depth < self.config.hysteresis {
            return Decision::Stay;
        }

        let since = match self.state {
            TransitionState::PendingConfirm {
                candidate: pending,
                since,
            } if pending == candidate => since,
            _ => {
                debug!("Zone {} is now a candidate", candidate);
                self.state = TransitionState::PendingConfirm {
                    candidate,
                    since: now,
                };
                now
            }
        };

        let debounced = now.saturating_duration_since(since) >= self.config.debounce;
        let spaced = self.last_commit.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.config.min_between_transitions
        });

        if debounced && spaced {
            let from = self.commit(candidate, now);
            return Decision::Commit {
                from,
                to: candidate,
            };
        }

        Decision::Pending { candidate }
    }

    fn check_forced(
        &mut self,
        candidate: Zone,
        connected: Option<Zone>,
        now: Instant,
    ) -> Option<Decision> {
        match connected {
            Some(zone) if zone != candidate => {
                let since = *self.mismatch_since.get_or_insert(now);
                let mismatch = now.saturating_duration_since(since);
                if mismatch < self.config.forced_after {
                    return None;
                }

                warn!(
                    "Local zone {} and connected zone {} disagreed for {:?}, forcing transition",
                    candidate, zone, mismatch
                );
                let from = self.stable_zone;
                self.stable_zone = candidate;
                self.state = TransitionState::Stable(candidate);
                self.last_commit = Some(now);
                self.mismatch_since = None;
                self.forced_commits += 1;
                Some(Decision::ForcedCommit {
                    from,
                    to: candidate,
                    mismatch,
                })
            }
            _ => {
                self.mismatch_since = None;
                None
            }
        }
    }

    fn commit(&mut self, to: Zone, now: Instant) -> Zone {
        let from = self.stable_zone;
        self.stable_zone = to;
        self.state = TransitionState::Stable(to);
        self.last_commit = Some(now);
        self.commits += 1;

        self.recent_commits.push_back(now);
        while let Some(&oldest) = self.recent_commits.front() {
            if now.saturating_duration_since(oldest) > self.config.rapid_window {
                self.recent_commits.pop_front();
            } else {
                break;
            }
        }

        if self.recent_commits.len() > self.config.max_rapid_transitions {
            warn!(
                "{} transitions within {:?}, cooling down for {:?}",
                self.recent_commits.len(),
                self.config.rapid_window,
                self.config.cooldown
            );
            self.state = TransitionState::Cooldown {
                until: now + self.config.cooldown,
            };
            self.recent_commits.clear();
        }

        from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(config: TransitionConfig) -> ClientTransitionController {
        ClientTransitionController::new(ZoneGrid::default(), config, Zone::new(0, 0))
    }

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_same_zone_is_stay() {
        let mut c = controller(TransitionConfig::default());
        let now = Instant::now();
        assert_eq!(c.update(Vec2::new(10.0, 10.0), Some(Zone::new(0, 0)), now), Decision::Stay);
        assert_eq!(c.state(), TransitionState::Stable(Zone::new(0, 0)));
    }

    #[test]
    fn test_commit_after_debounce() {
        let mut c = controller(TransitionConfig::default());
        let start = Instant::now();
        let connected = Some(Zone::new(0, 0));
        let position = Vec2::new(510.0, 10.0);

        assert_eq!(
            c.update(position, connected, start),
            Decision::Pending {
                candidate: Zone::new(1, 0)
            }
        );
        assert_eq!(
            c.update(position, connected, at(start, 100)),
            Decision::Pending {
                candidate: Zone::new(1, 0)
            }
        );
        assert_eq!(
            c.update(position, connected, at(start, 150)),
            Decision::Commit {
                from: Zone::new(0, 0),
                to: Zone::new(1, 0)
            }
        );
        assert_eq!(c.stable_zone(), Zone::new(1, 0));
        assert_eq!(c.commits(), 1);
    }

    #[test]
    fn test_hysteresis_filters_noise() {
        let mut c = controller(TransitionConfig::default());
        let start = Instant::now();

        for i in 0..20 {
            let decision = c.update(Vec2::new(501.0, 10.0), Some(Zone::new(0, 0)), at(start, i * 50));
            assert_eq!(decision, Decision::Stay);
        }
        assert_eq!(c.state(), TransitionState::Stable(Zone::new(0, 0)));
    }

    #[test]
    fn test_dip_back_to_stable_keeps_pending() {
        let config = TransitionConfig {
            hysteresis: 0.0,
            ..TransitionConfig::default()
        };
        let mut c = controller(config);
        let start = Instant::now();
        let connected = Some(Zone::new(0, 0));

        c.update(Vec2::new(510.0, 10.0), connected, start);
        assert_eq!(
            c.update(Vec2::new(499.0, 10.0), connected, at(start, 50)),
            Decision::Stay
        );
        assert_eq!(
            c.state(),
            TransitionState::PendingConfirm {
                candidate: Zone::new(1, 0),
                since: start
            }
        );

        // The debounce counts from the first sample, not from the dip.
        assert_eq!(
            c.update(Vec2::new(510.0, 10.0), connected, at(start, 150)),
            Decision::Commit {
                from: Zone::new(0, 0),
                to: Zone::new(1, 0)
            }
        );
    }

    #[test]
    fn test_expired_cooldown_settles_in_stable_zone() {
        let config = TransitionConfig {
            debounce: Duration::ZERO,
            max_rapid_transitions: 1,
            ..TransitionConfig::default()
        };
        let mut c = controller(config);
        let start = Instant::now();

        c.update(Vec2::new(510.0, 10.0), None, start);
        c.update(Vec2::new(1010.0, 10.0), None, at(start, 300));
        assert!(matches!(c.state(), TransitionState::Cooldown { .. }));

        // Still cooling down.
        c.update(Vec2::new(1020.0, 10.0), None, at(start, 1000));
        assert!(matches!(c.state(), TransitionState::Cooldown { .. }));

        assert_eq!(c.update(Vec2::new(1020.0, 10.0), None, at(start, 1800)), Decision::Stay);
        assert_eq!(c.state(), TransitionState::Stable(Zone::new(2, 0)));
    }

    #[test]
    fn test_oscillation_at_boundary_commits_rarely() {
        let mut c = controller(TransitionConfig::default());
        let start = Instant::now();
        let mut commits = 0;

        // 2 seconds of flipping between x=499 and x=501 every 50ms.
        for i in 0..40 {
            let x = if i % 2 == 0 { 499.0 } else { 501.0 };
            let connected = Some(c.stable_zone());
            if let Decision::Commit { .. } = c.update(Vec2::new(x, 10.0), connected, at(start, i * 50)) {
                commits += 1;
            }
        }

        assert!(commits <= 10, "{} commits", commits);
        assert_eq!(commits, 0);
    }

    #[test]
    fn test_debounce_bound_without_hysteresis() {
        let config = TransitionConfig {
            hysteresis: 0.0,
            debounce: Duration::ZERO,
            max_rapid_transitions: 1000,
            ..TransitionConfig::default()
        };
        let mut c = controller(config);
        let start = Instant::now();
        let mut commits = 0;

        for i in 0..40 {
            let x = if i % 2 == 0 { 501.0 } else { 499.0 };
            let connected = Some(c.stable_zone());
            if let Decision::Commit { .. } = c.update(Vec2::new(x, 10.0), connected, at(start, i * 50)) {
                commits += 1;
            }
        }

        // floor(2s / 200ms)
        assert!(commits <= 10, "{} commits", commits);
        assert!(commits > 0);
    }

    #[test]
    fn test_min_time_between_transitions() {
        let config = TransitionConfig {
            debounce: Duration::ZERO,
            ..TransitionConfig::default()
        };
        let mut c = controller(config);
        let start = Instant::now();

        assert!(matches!(
            c.update(Vec2::new(510.0, 10.0), None, start),
            Decision::Commit { .. }
        ));
        assert!(matches!(
            c.update(Vec2::new(1010.0, 10.0), None, at(start, 100)),
            Decision::Pending { .. }
        ));
        assert!(matches!(
            c.update(Vec2::new(1010.0, 10.0), None, at(start, 200)),
            Decision::Commit { .. }
        ));
    }

    #[test]
    fn test_rapid_transitions_enter_cooldown() {
        let config = TransitionConfig {
            debounce: Duration::ZERO,
            max_rapid_transitions: 3,
            ..TransitionConfig::default()
        };
        let mut c = controller(config);
        let start = Instant::now();

        for i in 0..4u64 {
            let x = 510.0 + 500.0 * i as f32;
            c.update(Vec2::new(x, 10.0), None, at(start, i * 250));
        }
        assert!(matches!(c.state(), TransitionState::Cooldown { .. }));

        // Ignored while cooling down.
        let decision = c.update(Vec2::new(2510.0, 10.0), None, at(start, 1000));
        assert_eq!(decision, Decision::Stay);

        // Accepted again once the cooldown has passed.
        let decision = c.update(Vec2::new(2510.0, 10.0), None, at(start, 2300));
        assert!(matches!(decision, Decision::Commit { .. }));
    }

    #[test]
    fn test_forced_transition_after_prolonged_mismatch() {
        let config = TransitionConfig {
            hysteresis: 50.0,
            ..TransitionConfig::default()
        };
        let mut c = controller(config);
        let start = Instant::now();
        let connected = Some(Zone::new(0, 0));
        // 10 units past the boundary never clears the hysteresis.
        let position = Vec2::new(510.0, 10.0);

        for ms in (0..5000).step_by(100) {
            assert_eq!(c.update(position, connected, at(start, ms)), Decision::Stay);
        }

        match c.update(position, connected, at(start, 5000)) {
            Decision::ForcedCommit { from, to, mismatch } => {
                assert_eq!(from, Zone::new(0, 0));
                assert_eq!(to, Zone::new(1, 0));
                assert_eq!(mismatch, Duration::from_secs(5));
            }
            other => panic!("expected a forced commit, got {:?}", other),
        }
        assert_eq!(c.forced_commits(), 1);
    }

    #[test]
    fn test_forced_transition_ignores_cooldown() {
        let config = TransitionConfig {
            debounce: Duration::ZERO,
            max_rapid_transitions: 1,
            cooldown: Duration::from_secs(60),
            ..TransitionConfig::default()
        };
        let mut c = controller(config);
        let start = Instant::now();

        c.update(Vec2::new(510.0, 10.0), None, start);
        c.update(Vec2::new(1010.0, 10.0), None, at(start, 300));
        assert!(matches!(c.state(), TransitionState::Cooldown { .. }));

        let connected = Some(Zone::new(2, 0));
        c.update(Vec2::new(1510.0, 10.0), connected, at(start, 400));
        let decision = c.update(Vec2::new(1510.0, 10.0), connected, at(start, 5400));
        assert!(matches!(decision, Decision::ForcedCommit { .. }));
    }

    #[test]
    fn test_config_validation() {
        assert!(TransitionConfig::default().validate().is_ok());
        let bad = TransitionConfig {
            hysteresis: -1.0,
            ..TransitionConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
