//! In-memory blockstore.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bitswap_types::{Block, BlockId};

use crate::{Blockstore, StoreError};

/// A thread-safe, process-local blockstore.
#[derive(Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<BlockId, Block>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block, replacing any previous copy.
    pub fn put(&self, block: Block) -> Result<(), StoreError> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        blocks.insert(block.id(), block);
        Ok(())
    }

    /// Remove a block. Returns whether it was present.
    pub fn delete(&self, id: &BlockId) -> Result<bool, StoreError> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(blocks.remove(id).is_some())
    }

    pub fn len(&self) -> usize {
        self.blocks.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    fn has(&self, id: &BlockId) -> Result<bool, StoreError> {
        let blocks = self
            .blocks
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(blocks.contains_key(id))
    }

    async fn get(&self, id: &BlockId) -> Result<Block, StoreError> {
        let blocks = self
            .blocks
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        blocks.get(id).cloned().ok_or(StoreError::NotFound(*id))
    }

    async fn get_size(&self, id: &BlockId) -> Result<Option<usize>, StoreError> {
        let blocks = self
            .blocks
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(blocks.get(id).map(Block::len))
    }
}
