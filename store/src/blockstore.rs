//! Block retrieval trait.

use async_trait::async_trait;
use bitswap_types::{Block, BlockId};

use crate::StoreError;

/// Read access to locally held blocks.
///
/// `has` is expected to be cheap (typically answered from an existence
/// cache). `get` may perform I/O and is awaited by engine workers outside
/// of any engine lock.
#[async_trait]
pub trait Blockstore: Send + Sync {
    /// Whether the block is held locally.
    fn has(&self, id: &BlockId) -> Result<bool, StoreError>;

    /// Fetch a block, failing with [`StoreError::NotFound`] when absent.
    async fn get(&self, id: &BlockId) -> Result<Block, StoreError>;

    /// Payload size of a held block, `None` when the block is not held.
    ///
    /// Backends that keep size metadata should override this to avoid
    /// reading the payload.
    async fn get_size(&self, id: &BlockId) -> Result<Option<usize>, StoreError> {
        if !self.has(id)? {
            return Ok(None);
        }
        match self.get(id).await {
            Ok(block) => Ok(Some(block.len())),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
