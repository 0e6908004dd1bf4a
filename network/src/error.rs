use bitswap_types::PeerId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    Disconnected(PeerId),

    #[error("send timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),
}
