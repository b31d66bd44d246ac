use crate::store::StoreError;
use shared::{RemoteError, ServerId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("unknown server {0}")]
    UnknownServer(ServerId),
    #[error("coordinator mailbox closed")]
    MailboxClosed,
}

impl CoordinatorError {
    /// Form sent back to a remote caller.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            CoordinatorError::Persistence(e) => RemoteError::Persistence(e.to_string()),
            CoordinatorError::UnknownServer(_) => RemoteError::NotRegistered,
            CoordinatorError::MailboxClosed => RemoteError::Internal(self.to_string()),
        }
    }
}
