//! Nullable transport that records deliveries without sending them.

use async_trait::async_trait;
use bitswap_network::{Transport, TransportError};
use bitswap_types::{Block, BlockId, PeerId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// A block "delivered" through the [`NullTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentBlock {
    pub peer: PeerId,
    pub block: BlockId,
    pub len: usize,
}

/// A test transport that records blocks instead of sending them.
pub struct NullTransport {
    sent: Mutex<Vec<SentBlock>>,
    unreachable: Mutex<HashSet<PeerId>>,
    failures_remaining: AtomicUsize,
    notify: Notify,
}

impl NullTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            failures_remaining: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Every send to `peer` fails with `Disconnected` until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self, peer: PeerId) {
        self.unreachable.lock().unwrap().insert(peer);
    }

    pub fn reconnect(&self, peer: &PeerId) {
        self.unreachable.lock().unwrap().remove(peer);
    }

    /// The next `count` sends fail with an IO error, whatever the peer.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// All recorded deliveries, in send order.
    pub fn sent(&self) -> Vec<SentBlock> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, peer: &PeerId) -> Vec<SentBlock> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.peer == *peer)
            .cloned()
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Wait until at least `count` deliveries were recorded.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_sends(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.sent_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, peer: &PeerId, block: &Block) -> Result<(), TransportError> {
        if self.unreachable.lock().unwrap().contains(peer) {
            return Err(TransportError::Disconnected(*peer));
        }
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Io("injected failure".into()));
        }

        self.sent.lock().unwrap().push(SentBlock {
            peer: *peer,
            block: block.id(),
            len: block.len(),
        });
        self.notify.notify_waiters();
        Ok(())
    }
}
