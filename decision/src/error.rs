use bitswap_types::{PeerId, TypesError};
use bitswap_utils::LoggingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid want-list: {0}")]
    InvalidWant(#[from] TypesError),

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("config error: {0}")]
    Config(String),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("engine already started")]
    AlreadyStarted,

    #[error("shutdown timeout")]
    ShutdownTimeout,

    #[error("task join error: {0}")]
    Join(String),
}
