use shared::{ConfigError, TransportError, Zone};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no server owns zone {0}")]
    NoServer(Zone),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("gave up reconnecting after {attempts} attempts")]
    Exhausted { attempts: u32 },
}
