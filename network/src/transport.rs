use async_trait::async_trait;
use bitswap_types::{Block, PeerId};

use crate::TransportError;

/// Delivers blocks to remote peers.
///
/// `send` resolves once the block has been handed to the peer's connection.
/// A returned error means the peer did not receive it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: &PeerId, block: &Block) -> Result<(), TransportError>;
}
