//! Active partner bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitswap_types::{BlockId, WantEntry};

use crate::ledger::Ledger;
use crate::strategy::PartnerState;
use crate::task_queue::{PeerTask, TaskQueue};

/// A connected peer as seen by the scheduler.
///
/// Holds the peer's want-list, its pending tasks and the counters the
/// fairness strategy orders on. Owned by the request queue; never shared.
pub struct Partner {
    ledger: Arc<Ledger>,
    /// Tasks handed to a worker and not yet reported done.
    in_flight: usize,
    /// Blocks of those tasks. A block in here is never queued again.
    in_flight_blocks: HashSet<BlockId>,
    /// Penalty counter, see the engine's freeze policy.
    freeze: u32,
    frozen_at_secs: Option<u64>,
    tasks: TaskQueue,
    /// Everything the peer asked for, held locally or not.
    wantlist: HashMap<BlockId, i32>,
}

impl Partner {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            in_flight: 0,
            in_flight_blocks: HashSet::new(),
            freeze: 0,
            frozen_at_secs: None,
            tasks: TaskQueue::new(),
            wantlist: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn freeze(&self) -> u32 {
        self.freeze
    }

    pub(crate) fn set_freeze(&mut self, value: u32) {
        self.freeze = value;
    }

    pub(crate) fn frozen_at_secs(&self) -> Option<u64> {
        self.frozen_at_secs
    }

    pub(crate) fn set_frozen_at(&mut self, at: Option<u64>) {
        self.frozen_at_secs = at;
    }

    /// Strategy input for this partner.
    pub fn state(&self) -> PartnerState {
        PartnerState {
            pending: self.tasks.pending(),
            freeze: self.freeze,
            active: self.in_flight,
            backlog: self.tasks.len(),
        }
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    // -- Want-list -------------------------------------------------------------

    /// Record a want and, when the block size is known, queue a task for it.
    ///
    /// A block already being served is only recorded.
    pub fn want(&mut self, block: BlockId, priority: i32, size: Option<usize>) {
        self.wantlist.insert(block, priority);
        if self.in_flight_blocks.contains(&block) {
            return;
        }
        if size.is_some() || self.tasks.contains(&block) {
            self.tasks.add_task(block, priority, size);
        }
    }

    /// Forget a want and cancel its task. Returns whether anything changed.
    pub fn cancel(&mut self, block: &BlockId) -> bool {
        let wanted = self.wantlist.remove(block).is_some();
        let cancelled = self.tasks.remove_task(block);
        wanted || cancelled
    }

    pub fn wants(&self, block: &BlockId) -> bool {
        self.wantlist.contains_key(block)
    }

    pub fn wanted_blocks(&self) -> impl Iterator<Item = &BlockId> {
        self.wantlist.keys()
    }

    /// Want-list ordered by descending priority, then block id.
    pub fn wantlist(&self) -> Vec<WantEntry> {
        let mut entries: Vec<WantEntry> = self
            .wantlist
            .iter()
            .map(|(block, priority)| WantEntry {
                block: *block,
                priority: *priority,
                cancel: false,
            })
            .collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.block.cmp(&b.block)));
        entries
    }

    /// Queue a task for a block that just became available locally.
    ///
    /// Returns `false` if the peer does not want it or a task already exists
    /// or is in flight.
    pub fn block_available(&mut self, block: BlockId, size: usize) -> bool {
        let Some(&priority) = self.wantlist.get(&block) else {
            return false;
        };
        if self.tasks.contains(&block) || self.in_flight_blocks.contains(&block) {
            return false;
        }
        self.tasks.add_task(block, priority, Some(size))
    }

    // -- Dispatch --------------------------------------------------------------

    /// Take the next task and count it as in flight.
    pub(crate) fn dispatch(&mut self) -> Option<PeerTask> {
        let task = self.tasks.pop_task()?;
        self.in_flight += 1;
        self.in_flight_blocks.insert(task.block);
        Some(task)
    }

    /// Release the in-flight slot held by `block`.
    pub(crate) fn complete(&mut self, block: &BlockId) {
        debug_assert!(self.in_flight > 0, "completion without dispatch");
        self.in_flight = self.in_flight.saturating_sub(1);
        self.in_flight_blocks.remove(block);
    }

    pub fn is_in_flight(&self, block: &BlockId) -> bool {
        self.in_flight_blocks.contains(block)
    }

    /// The block reached the peer; it no longer wants it.
    pub(crate) fn delivered(&mut self, block: &BlockId) {
        self.wantlist.remove(block);
    }

    /// Put a failed task back if the peer still wants the block.
    pub(crate) fn retry(&mut self, task: PeerTask) -> bool {
        if !self.wants(&task.block) {
            return false;
        }
        self.tasks.requeue(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bitswap_types::PeerId;

    fn partner() -> Partner {
        Partner::new(Arc::new(Ledger::new(PeerId::new([1; 32]))))
    }

    fn id(n: u8) -> BlockId {
        BlockId::new([n; 32])
    }

    #[test]
    fn want_without_size_is_only_recorded() {
        let mut p = partner();
        p.want(id(1), 5, None);
        assert!(p.wants(&id(1)));
        assert_eq!(p.state().pending, 0);

        assert!(p.block_available(id(1), 128));
        assert_eq!(p.state().pending, 1);
        assert_eq!(p.tasks().get(&id(1)).unwrap().priority, 5);
    }

    #[test]
    fn repeated_want_updates_existing_task() {
        let mut p = partner();
        p.want(id(1), 1, Some(10));
        p.want(id(1), 4, Some(12));
        assert_eq!(p.tasks().len(), 1);
        let task = p.tasks().get(&id(1)).unwrap();
        assert_eq!((task.priority, task.size), (4, Some(12)));
    }

    #[test]
    fn dispatch_and_complete_track_in_flight() {
        let mut p = partner();
        p.want(id(1), 1, Some(10));
        let task = p.dispatch().unwrap();
        assert_eq!(p.state().active, 1);
        assert_eq!(p.state().pending, 0);

        p.complete(&id(1));
        assert!(p.retry(task));
        assert_eq!(p.state().pending, 1);
        assert_eq!(p.state().active, 0);
    }

    #[test]
    fn retry_is_dropped_after_cancel() {
        let mut p = partner();
        p.want(id(1), 1, Some(10));
        let task = p.dispatch().unwrap();
        assert!(p.cancel(&id(1)));
        p.complete(&id(1));
        assert!(!p.retry(task));
        assert_eq!(p.state().pending, 0);
    }

    #[test]
    fn wantlist_is_sorted_by_priority() {
        let mut p = partner();
        p.want(id(1), 1, None);
        p.want(id(2), 9, None);
        p.want(id(3), 5, None);
        let order: Vec<_> = p.wantlist().iter().map(|e| e.block).collect();
        assert_eq!(order, vec![id(2), id(3), id(1)]);
    }

    #[test]
    fn rebroadcast_want_does_not_requeue_in_flight_block() {
        let mut p = partner();
        p.want(id(1), 1, Some(10));
        let task = p.dispatch().unwrap();
        assert!(p.is_in_flight(&id(1)));

        p.want(id(1), 3, Some(10));
        assert!(!p.block_available(id(1), 10));
        assert_eq!(p.state().pending, 0);
        assert!(p.wants(&id(1)));

        // A failed send may go back once the slot is released.
        p.complete(&id(1));
        assert!(!p.is_in_flight(&id(1)));
        assert!(p.retry(task));
        assert_eq!(p.state().pending, 1);
        assert_eq!(p.state().active, 0);
    }
}
