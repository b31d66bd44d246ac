use crate::pool::PoolConfig;
use crate::transfer::TransferConfig;
use shared::error::{require_nonzero, ConfigError};
use shared::rpc::RpcDeadlines;
use shared::{ServerId, ZoneGrid};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ZoneServerConfig {
    pub server_id: ServerId,
    pub bind_addr: SocketAddr,
    /// Endpoint registered with the coordinator. Defaults to the bound
    /// socket address.
    pub advertise_addr: Option<SocketAddr>,
    pub coordinator_addr: SocketAddr,
    pub grid: ZoneGrid,
    pub tick_interval: Duration,
    pub scan_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stats_interval: Duration,
    pub deadlines: RpcDeadlines,
    pub transfer: TransferConfig,
    pub pool: PoolConfig,
    pub max_entities: usize,
    pub max_clients: usize,
    /// Attached clients silent for longer than this are detached.
    pub client_timeout: Duration,
}

impl Default for ZoneServerConfig {
    fn default() -> Self {
        Self {
            server_id: ServerId::new("zone-server"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            advertise_addr: None,
            coordinator_addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            grid: ZoneGrid::default(),
            tick_interval: Duration::from_millis(50),
            scan_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(10),
            stats_interval: Duration::from_secs(5),
            deadlines: RpcDeadlines::default(),
            transfer: TransferConfig::default(),
            pool: PoolConfig::default(),
            max_entities: 10_000,
            max_clients: 64,
            client_timeout: Duration::from_secs(5),
        }
    }
}

impl ZoneServerConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.server_id.as_str().is_empty() {
            return Err(ConfigError::invalid("server_id", "must not be empty"));
        }
        require_nonzero("tick_interval", self.tick_interval)?;
        require_nonzero("scan_interval", self.scan_interval)?;
        require_nonzero("heartbeat_interval", self.heartbeat_interval)?;
        require_nonzero("stats_interval", self.stats_interval)?;
        require_nonzero("reliable_deadline", self.deadlines.reliable)?;
        require_nonzero("heartbeat_deadline", self.deadlines.heartbeat)?;
        require_nonzero("push_deadline", self.transfer.push_deadline)?;
        require_nonzero("client_timeout", self.client_timeout)?;
        self.transfer.window.validate()?;
        self.pool.validate()?;
        if self.max_entities == 0 {
            return Err(ConfigError::invalid("max_entities", "must be greater than zero"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ZoneServerConfig::default().validate().unwrap();
        assert_eq!(config.scan_interval, Duration::from_millis(100));
        assert_eq!(config.client_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_scan_interval_rejected() {
        let config = ZoneServerConfig {
            scan_interval: Duration::ZERO,
            ..ZoneServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scan_interval"));
    }

    #[test]
    fn test_empty_server_id_rejected() {
        let config = ZoneServerConfig {
            server_id: ServerId::new(""),
            ..ZoneServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
