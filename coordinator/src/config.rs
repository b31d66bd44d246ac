use shared::error::{require_nonzero, ConfigError};
use shared::ZoneGrid;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind_addr: SocketAddr,
    pub grid: ZoneGrid,
    /// Servers silent for longer than this are evicted.
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    pub mailbox_capacity: usize,
    /// Snapshot file; `None` keeps state in memory only.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            grid: ZoneGrid::default(),
            heartbeat_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(10),
            mailbox_capacity: 1024,
            snapshot_path: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        require_nonzero("heartbeat_timeout", self.heartbeat_timeout)?;
        require_nonzero("sweep_interval", self.sweep_interval)?;
        if self.sweep_interval > self.heartbeat_timeout {
            return Err(ConfigError::invalid(
                "sweep_interval",
                "must not exceed heartbeat_timeout",
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::invalid(
                "mailbox_capacity",
                "must be greater than zero",
            ));
        }
        Ok(self)
    }
}
