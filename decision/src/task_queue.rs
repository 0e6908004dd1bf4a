//! Per-partner task queue.
//!
//! Tasks are served largest block first, then by requester priority, then in
//! creation order. A second want for a block that already has a task updates
//! that task in place.
//!
//! Cancellation leaves a tombstone in the order index instead of removing the
//! entry; tombstones are skipped on pop and swept once they outnumber live
//! tasks. [`TaskQueue::len`] counts them, [`TaskQueue::pending`] does not.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use bitswap_types::BlockId;

/// Tombstones tolerated before a sweep, on top of the live task count.
const TOMBSTONE_SLACK: usize = 64;

/// One (peer, block) request awaiting dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerTask {
    pub block: BlockId,
    pub priority: i32,
    /// Payload size once known; unknown sizes sort after every known size.
    pub size: Option<usize>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    seq: u64,
}

impl PeerTask {
    /// Creation order within the owning queue.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Sort key: ascending iteration yields the next task to serve.
type OrderKey = (Reverse<usize>, Reverse<i32>, u64);

fn order_key(task: &PeerTask) -> OrderKey {
    (
        // Unknown sizes rank below a known zero.
        Reverse(task.size.map_or(0, |s| s + 1)),
        Reverse(task.priority),
        task.seq,
    )
}

struct Entry {
    task: PeerTask,
    cancelled: bool,
}

#[derive(Default)]
pub struct TaskQueue {
    entries: HashMap<BlockId, Entry>,
    order: BTreeMap<OrderKey, BlockId>,
    live: usize,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, or update the existing task for `block` in place.
    ///
    /// A known size is never replaced by an unknown one. Returns `true` when
    /// a new pending task was created (including reviving a cancelled one).
    pub fn add_task(&mut self, block: BlockId, priority: i32, size: Option<usize>) -> bool {
        if let Some(entry) = self.entries.get_mut(&block) {
            self.order.remove(&order_key(&entry.task));
            let revived = entry.cancelled;
            if revived {
                entry.cancelled = false;
                entry.task.attempts = 0;
                entry.task.seq = self.next_seq;
                self.next_seq += 1;
                self.live += 1;
            }
            entry.task.priority = priority;
            if size.is_some() {
                entry.task.size = size;
            }
            self.order.insert(order_key(&entry.task), block);
            return revived;
        }

        let task = PeerTask {
            block,
            priority,
            size,
            attempts: 0,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.order.insert(order_key(&task), block);
        self.entries.insert(
            block,
            Entry {
                task,
                cancelled: false,
            },
        );
        self.live += 1;
        true
    }

    /// Put a previously popped task back, keeping its attempt count.
    ///
    /// If a task for the same block was added meanwhile, that one wins.
    pub fn requeue(&mut self, mut task: PeerTask) -> bool {
        if self.contains(&task.block) {
            return false;
        }
        if let Some(stale) = self.entries.remove(&task.block) {
            self.order.remove(&order_key(&stale.task));
        }
        task.seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(order_key(&task), task.block);
        self.entries.insert(
            task.block,
            Entry {
                task,
                cancelled: false,
            },
        );
        self.live += 1;
        true
    }

    /// Remove and return the next task to serve, skipping cancelled entries.
    pub fn pop_task(&mut self) -> Option<PeerTask> {
        while let Some((_, block)) = self.order.pop_first() {
            let Some(entry) = self.entries.remove(&block) else {
                continue;
            };
            if entry.cancelled {
                continue;
            }
            self.live -= 1;
            return Some(entry.task);
        }
        None
    }

    /// Cancel the pending task for `block`. Returns whether one was pending.
    pub fn remove_task(&mut self, block: &BlockId) -> bool {
        let Some(entry) = self.entries.get_mut(block) else {
            return false;
        };
        if entry.cancelled {
            return false;
        }
        entry.cancelled = true;
        self.live -= 1;

        if self.order.len() - self.live > self.live.max(TOMBSTONE_SLACK) {
            self.sweep();
        }
        true
    }

    pub fn contains(&self, block: &BlockId) -> bool {
        self.entries.get(block).is_some_and(|e| !e.cancelled)
    }

    pub fn get(&self, block: &BlockId) -> Option<&PeerTask> {
        self.entries
            .get(block)
            .filter(|e| !e.cancelled)
            .map(|e| &e.task)
    }

    /// Queue length including cancelled entries not yet swept.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tasks still awaiting dispatch.
    pub fn pending(&self) -> usize {
        self.live
    }

    /// Drop every tombstone.
    pub fn sweep(&mut self) {
        let entries = &mut self.entries;
        self.order.retain(|_, block| {
            let keep = entries.get(block).is_some_and(|e| !e.cancelled);
            if !keep {
                entries.remove(block);
            }
            keep
        });
    }
}
