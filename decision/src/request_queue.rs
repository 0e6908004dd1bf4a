//! Global request queue.
//!
//! [`QueueCore`] owns the partner registry, the frozen set and a heap of the
//! partners currently eligible for service, ordered by a [`Strategy`].
//! [`PeerRequestQueue`] wraps it in a single async mutex and lets workers
//! suspend in [`pop`](PeerRequestQueue::pop) until work is schedulable.
//!
//! A partner is in the heap exactly when it is registered, not frozen, has
//! at least one pending task and has a free in-flight slot. Every mutation
//! ends by repositioning the partners it touched, which keeps that true.
//! Nothing in here awaits while holding the lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitswap_types::{BlockId, PeerId, WantEntry};
use bitswap_utils::unix_now_secs;
use tokio::sync::{Mutex, Notify};

use crate::heap::IndexedHeap;
use crate::ledger::Ledger;
use crate::partner::Partner;
use crate::shutdown::ShutdownSignal;
use crate::strategy::{PartnerState, Strategy};
use crate::task_queue::PeerTask;

/// A task handed to a worker.
#[derive(Debug)]
pub struct Dispatch {
    pub peer: PeerId,
    pub task: PeerTask,
    pub ledger: Arc<Ledger>,
}

/// How a dispatched task ended, reported through `done`.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The block reached the peer.
    Sent,
    /// The task was abandoned.
    Dropped,
    /// The task should be attempted again if the peer still wants it.
    Retry(PeerTask),
}

/// A want-list entry with the local size lookup already done.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedWant {
    pub entry: WantEntry,
    /// Payload size when the block is held locally.
    pub size: Option<usize>,
}

/// Adjustment applied to a partner's freeze value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreezeUpdate {
    /// One more observation window below the debt-ratio threshold.
    Penalize,
    /// The ratio recovered; active partners shed one point.
    Recover,
    /// Periodic decay by the given amount.
    Decay(u32),
    /// Clear the penalty entirely.
    Reset,
}

/// A lifecycle change caused by a freeze update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Frozen,
    Thawed { frozen_secs: u64 },
}

/// Active and frozen partner identifiers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerListing {
    pub active: Vec<PeerId>,
    pub frozen: Vec<PeerId>,
}

/// Synchronous scheduling state. All invariants live here.
pub struct QueueCore {
    partners: HashMap<PeerId, Partner>,
    frozen: HashSet<PeerId>,
    heap: IndexedHeap<PeerId>,
    strategy: Arc<dyn Strategy>,
    max_in_flight: usize,
}

impl QueueCore {
    pub fn new(strategy: Arc<dyn Strategy>, max_in_flight: usize) -> Self {
        Self {
            partners: HashMap::new(),
            frozen: HashSet::new(),
            heap: IndexedHeap::new(),
            strategy,
            max_in_flight: max_in_flight.max(1),
        }
    }

    // -- Partner lifecycle -----------------------------------------------------

    /// Register a partner. Returns its ledger, existing or new.
    pub fn add_partner(&mut self, peer: PeerId) -> Arc<Ledger> {
        let partner = self
            .partners
            .entry(peer)
            .or_insert_with(|| Partner::new(Arc::new(Ledger::new(peer))));
        Arc::clone(partner.ledger())
    }

    /// Drop a partner with all of its tasks. Returns its final ledger.
    pub fn remove_partner(&mut self, peer: &PeerId) -> Option<Arc<Ledger>> {
        if !self.partners.contains_key(peer) {
            return None;
        }
        let Self {
            partners, heap, strategy, ..
        } = self;
        heap.remove(peer, |a, b| {
            strategy.before(&partners[a].state(), &partners[b].state())
        });
        self.frozen.remove(peer);
        let partner = self.partners.remove(peer)?;
        Some(Arc::clone(partner.ledger()))
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.partners.contains_key(peer)
    }

    pub fn ledger(&self, peer: &PeerId) -> Option<Arc<Ledger>> {
        self.partners.get(peer).map(|p| Arc::clone(p.ledger()))
    }

    pub fn ledgers(&self) -> Vec<(PeerId, Arc<Ledger>)> {
        self.partners
            .iter()
            .map(|(id, p)| (*id, Arc::clone(p.ledger())))
            .collect()
    }

    pub fn partner_state(&self, peer: &PeerId) -> Option<PartnerState> {
        self.partners.get(peer).map(Partner::state)
    }

    pub fn wantlist(&self, peer: &PeerId) -> Option<Vec<WantEntry>> {
        self.partners.get(peer).map(Partner::wantlist)
    }

    pub fn is_frozen(&self, peer: &PeerId) -> bool {
        self.frozen.contains(peer)
    }

    pub fn frozen_peers(&self) -> Vec<PeerId> {
        self.frozen.iter().copied().collect()
    }

    pub fn list_peers(&self) -> PeerListing {
        let mut active: Vec<PeerId> = self
            .partners
            .keys()
            .filter(|id| !self.frozen.contains(id))
            .copied()
            .collect();
        let mut frozen: Vec<PeerId> = self.frozen.iter().copied().collect();
        active.sort();
        frozen.sort();
        PeerListing { active, frozen }
    }

    /// Partners eligible for the next pop.
    pub fn schedulable(&self) -> usize {
        self.heap.len()
    }

    // -- Task level ------------------------------------------------------------

    /// Apply a validated want-list update.
    ///
    /// With `full` set, recorded wants missing from `wants` are cancelled
    /// first. Returns whether the partner is schedulable afterwards.
    pub fn apply_wants(&mut self, peer: PeerId, full: bool, wants: &[ResolvedWant]) -> bool {
        self.add_partner(peer);
        let Some(partner) = self.partners.get_mut(&peer) else {
            return false;
        };

        if full {
            let keep: HashSet<BlockId> = wants
                .iter()
                .filter(|w| !w.entry.cancel)
                .map(|w| w.entry.block)
                .collect();
            let stale: Vec<BlockId> = partner
                .wanted_blocks()
                .filter(|b| !keep.contains(b))
                .copied()
                .collect();
            for block in stale {
                partner.cancel(&block);
            }
        }

        for want in wants {
            if want.entry.cancel {
                partner.cancel(&want.entry.block);
            } else {
                partner.want(want.entry.block, want.entry.priority, want.size);
            }
        }
        self.reposition(&peer)
    }

    /// Queue tasks for every partner that wants a newly available block.
    ///
    /// Returns the partners that gained a task.
    pub fn blocks_available(&mut self, blocks: &[(BlockId, usize)]) -> Vec<PeerId> {
        let mut touched = Vec::new();
        for (peer, partner) in self.partners.iter_mut() {
            let mut gained = false;
            for (block, size) in blocks {
                gained |= partner.block_available(*block, *size);
            }
            if gained {
                touched.push(*peer);
            }
        }
        for peer in &touched {
            self.reposition(peer);
        }
        touched
    }

    /// Cancel one want. A no-op for unknown peers or blocks.
    pub fn remove(&mut self, peer: &PeerId, block: &BlockId) -> bool {
        let changed = match self.partners.get_mut(peer) {
            Some(partner) => partner.cancel(block),
            None => false,
        };
        if changed {
            self.reposition(peer);
        }
        changed
    }

    /// Take the top partner's next task and mark it in flight.
    pub fn pop(&mut self) -> Option<Dispatch> {
        let Self {
            partners,
            heap,
            strategy,
            frozen,
            ..
        } = self;
        let peer = heap.pop(|a, b| strategy.before(&partners[a].state(), &partners[b].state()))?;

        assert!(
            !frozen.contains(&peer),
            "frozen partner {peer:?} was in the request heap"
        );
        let partner = partners
            .get_mut(&peer)
            .unwrap_or_else(|| panic!("request heap held unregistered partner {peer:?}"));
        let task = partner
            .dispatch()
            .unwrap_or_else(|| panic!("request heap held partner {peer:?} with no pending task"));
        let ledger = Arc::clone(partner.ledger());

        self.reposition(&peer);
        Some(Dispatch { peer, task, ledger })
    }

    /// Release the in-flight slot taken by `pop`.
    ///
    /// Returns whether the partner is schedulable afterwards. Partners
    /// removed while the task was in flight are ignored.
    pub fn done(&mut self, peer: &PeerId, task_block: &BlockId, outcome: TaskOutcome) -> bool {
        let Some(partner) = self.partners.get_mut(peer) else {
            return false;
        };
        partner.complete(task_block);
        match outcome {
            TaskOutcome::Sent => partner.delivered(task_block),
            TaskOutcome::Dropped => {}
            TaskOutcome::Retry(task) => {
                partner.retry(task);
            }
        }
        self.reposition(peer)
    }

    // -- Freeze / thaw ---------------------------------------------------------

    /// Apply freeze adjustments and move partners across the ceiling.
    ///
    /// A partner freezes once its value exceeds `ceiling` and thaws once it
    /// drops below it.
    pub fn apply_freeze(
        &mut self,
        updates: &[(PeerId, FreezeUpdate)],
        ceiling: u32,
    ) -> Vec<(PeerId, Transition)> {
        let mut transitions = Vec::new();
        for (peer, update) in updates {
            let Some(partner) = self.partners.get_mut(peer) else {
                continue;
            };
            let frozen = self.frozen.contains(peer);
            let value = partner.freeze();
            let value = match update {
                // Frozen partners are only moved by decay or repayment.
                FreezeUpdate::Penalize | FreezeUpdate::Recover if frozen => value,
                FreezeUpdate::Penalize => value.saturating_add(1),
                FreezeUpdate::Recover => value.saturating_sub(1),
                FreezeUpdate::Decay(step) => value.saturating_sub(*step),
                FreezeUpdate::Reset => 0,
            };
            partner.set_freeze(value);

            if !frozen && value > ceiling {
                partner.set_frozen_at(Some(unix_now_secs()));
                self.frozen.insert(*peer);
                transitions.push((*peer, Transition::Frozen));
            } else if frozen && value < ceiling {
                let since = partner.frozen_at_secs().unwrap_or_else(unix_now_secs);
                partner.set_frozen_at(None);
                self.frozen.remove(peer);
                transitions.push((
                    *peer,
                    Transition::Thawed {
                        frozen_secs: unix_now_secs().saturating_sub(since),
                    },
                ));
            }
            self.reposition(peer);
        }
        transitions
    }

    // -- Invariants ------------------------------------------------------------

    /// Check every structural invariant, describing the first violation.
    pub fn verify(&self) -> Result<(), String> {
        for peer in self.heap.keys() {
            let Some(partner) = self.partners.get(peer) else {
                return Err(format!("heap holds unregistered partner {peer:?}"));
            };
            if self.frozen.contains(peer) {
                return Err(format!("partner {peer:?} is both queued and frozen"));
            }
            if partner.state().pending == 0 {
                return Err(format!("partner {peer:?} is queued with no pending task"));
            }
            if partner.in_flight() >= self.max_in_flight {
                return Err(format!("partner {peer:?} is queued at its in-flight bound"));
            }
        }
        for peer in &self.frozen {
            if !self.partners.contains_key(peer) {
                return Err(format!("frozen set holds unregistered partner {peer:?}"));
            }
        }
        for (peer, partner) in &self.partners {
            if self.eligible(peer, partner) != self.heap.contains(peer) {
                return Err(format!("partner {peer:?} heap membership is stale"));
            }
            if let Some(block) = partner
                .wanted_blocks()
                .find(|b| partner.is_in_flight(b) && partner.tasks().contains(b))
            {
                return Err(format!("partner {peer:?} has {block} both queued and in flight"));
            }
        }
        Ok(())
    }

    fn eligible(&self, peer: &PeerId, partner: &Partner) -> bool {
        !self.frozen.contains(peer)
            && partner.state().pending > 0
            && partner.in_flight() < self.max_in_flight
    }

    /// Bring the heap in line with the partner's current state.
    fn reposition(&mut self, peer: &PeerId) -> bool {
        let eligible = match self.partners.get(peer) {
            Some(partner) => self.eligible(peer, partner),
            None => false,
        };
        let Self {
            partners,
            heap,
            strategy,
            ..
        } = self;
        let before = |a: &PeerId, b: &PeerId| {
            strategy.before(&partners[a].state(), &partners[b].state())
        };
        if eligible {
            heap.push(*peer, before);
        } else {
            heap.remove(peer, before);
        }
        eligible
    }
}

/// Shared request queue with suspending pop.
pub struct PeerRequestQueue {
    core: Mutex<QueueCore>,
    notify: Notify,
}

impl PeerRequestQueue {
    pub fn new(strategy: Arc<dyn Strategy>, max_in_flight: usize) -> Self {
        Self {
            core: Mutex::new(QueueCore::new(strategy, max_in_flight)),
            notify: Notify::new(),
        }
    }

    /// Run `f` against the locked core. `f` must not block.
    pub async fn with_core<R>(&self, f: impl FnOnce(&mut QueueCore) -> R) -> R {
        let mut core = self.core.lock().await;
        f(&mut core)
    }

    pub async fn apply_wants(&self, peer: PeerId, full: bool, wants: &[ResolvedWant]) {
        let schedulable = self.core.lock().await.apply_wants(peer, full, wants);
        if schedulable {
            self.notify.notify_one();
        }
    }

    pub async fn blocks_available(&self, blocks: &[(BlockId, usize)]) -> Vec<PeerId> {
        let touched = self.core.lock().await.blocks_available(blocks);
        if !touched.is_empty() {
            self.notify.notify_one();
        }
        touched
    }

    pub async fn remove(&self, peer: &PeerId, block: &BlockId) -> bool {
        self.core.lock().await.remove(peer, block)
    }

    /// Pop the next dispatch, waiting while nothing is schedulable.
    ///
    /// Returns `None` once `signal` reports shutdown.
    pub async fn pop(&self, signal: &mut ShutdownSignal) -> Option<Dispatch> {
        loop {
            if signal.is_shutdown() {
                return None;
            }
            let notified = self.notify.notified();
            if let Some(dispatch) = self.try_pop().await {
                return Some(dispatch);
            }
            tokio::select! {
                _ = notified => {}
                _ = signal.cancelled() => return None,
            }
        }
    }

    /// Pop without waiting.
    pub async fn try_pop(&self) -> Option<Dispatch> {
        let mut core = self.core.lock().await;
        let dispatch = core.pop()?;
        // Wake another worker if more work remains.
        if core.schedulable() > 0 {
            self.notify.notify_one();
        }
        Some(dispatch)
    }

    pub async fn done(&self, peer: &PeerId, block: &BlockId, outcome: TaskOutcome) {
        let schedulable = self.core.lock().await.done(peer, block, outcome);
        if schedulable {
            self.notify.notify_one();
        }
    }

    pub async fn apply_freeze(
        &self,
        updates: &[(PeerId, FreezeUpdate)],
        ceiling: u32,
    ) -> Vec<(PeerId, Transition)> {
        let mut core = self.core.lock().await;
        let transitions = core.apply_freeze(updates, ceiling);
        let thawed = transitions
            .iter()
            .any(|(_, t)| matches!(t, Transition::Thawed { .. }));
        if thawed && core.schedulable() > 0 {
            self.notify.notify_one();
        }
        transitions
    }
}
