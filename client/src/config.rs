use crate::backoff::BackoffConfig;
use crate::health::HealthConfig;
use crate::transition::TransitionConfig;
use shared::error::{require_nonzero, ConfigError};
use shared::rpc::RpcDeadlines;
use shared::{PlayerId, Vec2, ZoneGrid};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub player_id: PlayerId,
    pub name: String,
    pub session_key: String,
    pub coordinator_addr: SocketAddr,
    pub grid: ZoneGrid,
    /// Where the player enters the world on the first join.
    pub spawn_at: Vec2,
    pub transition: TransitionConfig,
    pub backoff: BackoffConfig,
    pub health: HealthConfig,
    pub deadlines: RpcDeadlines,
    pub tick_interval: Duration,
    pub heartbeat_interval: Duration,
    pub watchdog_interval: Duration,
    pub stats_interval: Duration,
    /// Deadline for one detached `Move` send.
    pub move_deadline: Duration,
    /// The server link is considered lost after this long without world
    /// state.
    pub world_state_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_id: 1,
            name: "player".to_string(),
            session_key: "local".to_string(),
            coordinator_addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            grid: ZoneGrid::default(),
            spawn_at: Vec2::new(250.0, 250.0),
            transition: TransitionConfig::default(),
            backoff: BackoffConfig::default(),
            health: HealthConfig::default(),
            deadlines: RpcDeadlines::default(),
            tick_interval: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(1),
            watchdog_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(5),
            move_deadline: Duration::from_millis(100),
            world_state_timeout: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if !self.spawn_at.x.is_finite() || !self.spawn_at.y.is_finite() {
            return Err(ConfigError::invalid("spawn_at", "must be a finite position"));
        }
        require_nonzero("tick_interval", self.tick_interval)?;
        require_nonzero("heartbeat_interval", self.heartbeat_interval)?;
        require_nonzero("watchdog_interval", self.watchdog_interval)?;
        require_nonzero("stats_interval", self.stats_interval)?;
        require_nonzero("move_deadline", self.move_deadline)?;
        require_nonzero("world_state_timeout", self.world_state_timeout)?;
        require_nonzero("reliable_deadline", self.deadlines.reliable)?;
        require_nonzero("heartbeat_deadline", self.deadlines.heartbeat)?;
        self.transition.validate()?;
        self.backoff.validate()?;
        self.health.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default().validate().unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.backoff.max_attempts, 10);
    }

    #[test]
    fn test_zero_move_deadline_rejected() {
        let config = ClientConfig {
            move_deadline: Duration::ZERO,
            ..ClientConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("move_deadline"));
    }

    #[test]
    fn test_nested_configs_are_validated() {
        let mut config = ClientConfig::default();
        config.transition.hysteresis = -1.0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
