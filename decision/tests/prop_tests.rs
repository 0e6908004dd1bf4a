use std::cmp::Reverse;
use std::sync::Arc;

use proptest::prelude::*;

use bitswap_decision::{
    backlog_first, fair, Dispatch, FreezeUpdate, Ledger, PartnerState, QueueCore, ResolvedWant,
    TaskOutcome, TaskQueue,
};
use bitswap_types::{BlockId, PeerId, WantEntry};

fn block(n: u8) -> BlockId {
    BlockId::new([n; 32])
}

fn peer(n: u8) -> PeerId {
    PeerId::new([n; 32])
}

fn partner_state() -> impl Strategy<Value = PartnerState> {
    (0usize..4, 0u32..3, 0usize..3, 0usize..6).prop_map(|(pending, freeze, active, backlog)| {
        PartnerState {
            pending,
            freeze,
            active,
            backlog,
        }
    })
}

#[derive(Clone, Debug)]
enum QueueOp {
    Want { peer: u8, block: u8, priority: i32, held: bool },
    Cancel { peer: u8, block: u8 },
    Arrive { block: u8 },
    Pop,
    Done { index: usize, retry: bool },
    Penalize { peer: u8 },
    Decay { peer: u8 },
    Remove { peer: u8 },
}

fn queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        4 => (0u8..4, 0u8..8, 0i32..5, any::<bool>())
            .prop_map(|(peer, block, priority, held)| QueueOp::Want { peer, block, priority, held }),
        1 => (0u8..4, 0u8..8).prop_map(|(peer, block)| QueueOp::Cancel { peer, block }),
        1 => (0u8..8).prop_map(|block| QueueOp::Arrive { block }),
        4 => Just(QueueOp::Pop),
        3 => (any::<usize>(), any::<bool>()).prop_map(|(index, retry)| QueueOp::Done { index, retry }),
        1 => (0u8..4).prop_map(|peer| QueueOp::Penalize { peer }),
        1 => (0u8..4).prop_map(|peer| QueueOp::Decay { peer }),
        1 => (0u8..4).prop_map(|peer| QueueOp::Remove { peer }),
    ]
}

proptest! {
    /// Tasks pop by size descending, then priority descending, then age.
    #[test]
    fn task_queue_pops_in_order(
        adds in prop::collection::vec((0u8..16, 0i32..8, 0usize..5), 1..60),
        removes in prop::collection::vec(0u8..16, 0..10),
    ) {
        let mut queue = TaskQueue::new();
        for (b, priority, size) in &adds {
            queue.add_task(block(*b), *priority, Some(*size));
        }
        for b in &removes {
            queue.remove_task(&block(*b));
        }
        let expected = queue.pending();

        let mut popped = Vec::new();
        while let Some(task) = queue.pop_task() {
            popped.push(task);
        }
        prop_assert_eq!(popped.len(), expected);
        prop_assert!(queue.pop_task().is_none());

        for pair in popped.windows(2) {
            let key = |t: &bitswap_decision::PeerTask| {
                (Reverse(t.size.map_or(0, |s| s + 1)), Reverse(t.priority), t.seq())
            };
            prop_assert!(key(&pair[0]) < key(&pair[1]), "out of order: {:?}", pair);
        }
        for b in &removes {
            prop_assert!(popped.iter().all(|t| t.block != block(*b)));
        }
    }

    /// Both built-in strategies are strict weak orderings.
    #[test]
    fn strategies_are_strict_weak_orders(
        a in partner_state(),
        b in partner_state(),
        c in partner_state(),
    ) {
        for before in [fair, backlog_first] {
            let incomparable = |x: &PartnerState, y: &PartnerState| !before(x, y) && !before(y, x);

            prop_assert!(!before(&a, &a));
            prop_assert!(!(before(&a, &b) && before(&b, &a)));
            if before(&a, &b) && before(&b, &c) {
                prop_assert!(before(&a, &c));
            }
            if incomparable(&a, &b) && incomparable(&b, &c) {
                prop_assert!(incomparable(&a, &c));
            }
        }
    }

    /// Under any interleaving the queue only hands out real pending work and
    /// its partner heap stays consistent.
    #[test]
    fn request_queue_invariants_hold(ops in prop::collection::vec(queue_op(), 1..120)) {
        let mut core = QueueCore::new(Arc::new(fair), 2);
        let mut outstanding: Vec<Dispatch> = Vec::new();
        let ceiling = 1;

        for op in ops {
            match op {
                QueueOp::Want { peer: p, block: b, priority, held } => {
                    let want = ResolvedWant {
                        entry: WantEntry { block: block(b), priority, cancel: false },
                        size: held.then_some(b as usize * 10),
                    };
                    core.apply_wants(peer(p), false, &[want]);
                }
                QueueOp::Cancel { peer: p, block: b } => {
                    core.remove(&peer(p), &block(b));
                }
                QueueOp::Arrive { block: b } => {
                    core.blocks_available(&[(block(b), b as usize * 10)]);
                }
                QueueOp::Pop => {
                    let schedulable = core.schedulable();
                    match core.pop() {
                        Some(dispatch) => {
                            prop_assert!(schedulable > 0);
                            prop_assert!(!core.is_frozen(&dispatch.peer));
                            outstanding.push(dispatch);
                        }
                        None => prop_assert_eq!(schedulable, 0),
                    }
                }
                QueueOp::Done { index, retry } => {
                    if !outstanding.is_empty() {
                        let dispatch = outstanding.swap_remove(index % outstanding.len());
                        let outcome = if retry {
                            TaskOutcome::Retry(dispatch.task.clone())
                        } else {
                            TaskOutcome::Sent
                        };
                        core.done(&dispatch.peer, &dispatch.task.block, outcome);
                    }
                }
                QueueOp::Penalize { peer: p } => {
                    core.apply_freeze(&[(peer(p), FreezeUpdate::Penalize)], ceiling);
                }
                QueueOp::Decay { peer: p } => {
                    core.apply_freeze(&[(peer(p), FreezeUpdate::Decay(1))], ceiling);
                }
                QueueOp::Remove { peer: p } => {
                    core.remove_partner(&peer(p));
                    outstanding.retain(|d| d.peer != peer(p));
                }
            }
            prop_assert_eq!(core.verify(), Ok(()));
        }

        for peer_id in core.list_peers().active.iter().chain(core.list_peers().frozen.iter()) {
            let state = core.partner_state(peer_id).unwrap();
            let in_flight = outstanding.iter().filter(|d| d.peer == *peer_id).count();
            prop_assert_eq!(state.active, in_flight);
            prop_assert!(state.active <= 2);
        }
    }

    /// Ledger counters never decrease and the ratio tracks them.
    #[test]
    fn ledger_counters_are_monotonic(
        ops in prop::collection::vec((any::<bool>(), 0u64..1_000_000), 1..50),
    ) {
        let ledger = Ledger::new(peer(1));
        let (mut sent, mut received) = (0u64, 0u64);
        for (outbound, bytes) in ops {
            if outbound {
                ledger.add_sent(bytes);
            } else {
                ledger.add_received(bytes);
            }
            prop_assert!(ledger.bytes_sent() >= sent);
            prop_assert!(ledger.bytes_received() >= received);
            sent = ledger.bytes_sent();
            received = ledger.bytes_received();

            let receipt = ledger.receipt();
            if sent == 0 {
                prop_assert!(receipt.debt_ratio.is_infinite());
            } else {
                prop_assert_eq!(receipt.debt_ratio, received as f64 / sent as f64);
            }
        }
    }
}
