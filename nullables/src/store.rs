//! Nullable blockstore: in-memory blocks with scripted failures.

use async_trait::async_trait;
use bitswap_store::{Blockstore, StoreError};
use bitswap_types::{Block, BlockId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// An in-memory blockstore for testing.
///
/// Failures queued with [`fail_get`](Self::fail_get) are returned by `get`
/// for that block, one per call, before the stored block is served again.
pub struct NullBlockstore {
    blocks: Mutex<HashMap<BlockId, Block>>,
    scripted_failures: Mutex<HashMap<BlockId, VecDeque<StoreError>>>,
    get_delay: Mutex<Option<Duration>>,
    gets: AtomicUsize,
}

impl NullBlockstore {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            scripted_failures: Mutex::new(HashMap::new()),
            get_delay: Mutex::new(None),
            gets: AtomicUsize::new(0),
        }
    }

    /// Create a store pre-populated with blocks.
    pub fn with_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let store = Self::new();
        for block in blocks {
            store.insert(block);
        }
        store
    }

    pub fn insert(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.id(), block);
    }

    pub fn remove(&self, id: &BlockId) {
        self.blocks.lock().unwrap().remove(id);
    }

    /// Make the next `get` of `id` fail with `error`. Calls stack.
    pub fn fail_get(&self, id: BlockId, error: StoreError) {
        self.scripted_failures
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push_back(error);
    }

    /// Delay every `get` by `delay` to simulate slow storage.
    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    /// Number of `get` calls served so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl Default for NullBlockstore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Blockstore for NullBlockstore {
    fn has(&self, id: &BlockId) -> Result<bool, StoreError> {
        Ok(self.blocks.lock().unwrap().contains_key(id))
    }

    async fn get(&self, id: &BlockId) -> Result<Block, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);

        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted_failures
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        self.blocks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn get_size(&self, id: &BlockId) -> Result<Option<usize>, StoreError> {
        Ok(self.blocks.lock().unwrap().get(id).map(Block::len))
    }
}
