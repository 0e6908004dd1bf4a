use thiserror::Error;

/// Errors raised while decoding identifiers or validating inbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid block id length: expected 32 bytes, got {0}")]
    InvalidBlockIdLength(usize),

    #[error("want entry for {block} has negative priority {priority}")]
    NegativePriority { block: String, priority: i32 },
}
