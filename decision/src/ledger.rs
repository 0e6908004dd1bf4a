//! Per-peer exchange accounting.
//!
//! Every counter is an atomic so that workers serving the same peer record
//! traffic without taking the request-queue lock or a per-ledger mutex.

use std::sync::atomic::{AtomicU64, Ordering};

use bitswap_types::PeerId;
use bitswap_utils::unix_now_secs;
use serde::Serialize;

/// Debt ratio reported for a peer we have never sent anything to.
pub const NO_DEBT: f64 = f64::INFINITY;

/// Running account of the bytes exchanged with one peer.
///
/// Both byte counters only ever grow; additions saturate at `u64::MAX`
/// instead of wrapping.
#[derive(Debug)]
pub struct Ledger {
    peer: PeerId,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    exchanged: AtomicU64,
    last_exchange_secs: AtomicU64,
}

impl Ledger {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            exchanged: AtomicU64::new(0),
            last_exchange_secs: AtomicU64::new(0),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Record bytes delivered to the peer.
    pub fn add_sent(&self, bytes: u64) {
        saturating_add(&self.bytes_sent, bytes);
    }

    /// Record bytes received from the peer.
    pub fn add_received(&self, bytes: u64) {
        saturating_add(&self.bytes_received, bytes);
    }

    /// Count one completed block exchange in either direction.
    pub fn record_exchange(&self) {
        saturating_add(&self.exchanged, 1);
        self.last_exchange_secs
            .store(unix_now_secs(), Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Acquire)
    }

    pub fn exchanged(&self) -> u64 {
        self.exchanged.load(Ordering::Relaxed)
    }

    pub fn last_exchange_secs(&self) -> u64 {
        self.last_exchange_secs.load(Ordering::Relaxed)
    }

    /// Bytes received divided by bytes sent.
    ///
    /// Returns [`NO_DEBT`] while nothing has been sent. A low ratio marks a
    /// peer that takes much more than it gives.
    pub fn debt_ratio(&self) -> f64 {
        debt_ratio(self.bytes_sent(), self.bytes_received())
    }

    /// Consistent snapshot of the ledger, with the ratio derived from the
    /// same counter values it reports.
    pub fn receipt(&self) -> Receipt {
        let sent = self.bytes_sent();
        let received = self.bytes_received();
        Receipt {
            peer: self.peer,
            sent,
            received,
            exchanged: self.exchanged(),
            last_exchange_secs: self.last_exchange_secs(),
            debt_ratio: debt_ratio(sent, received),
        }
    }
}

/// Read-only view of a [`Ledger`] for diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Receipt {
    pub peer: PeerId,
    pub sent: u64,
    pub received: u64,
    pub exchanged: u64,
    pub last_exchange_secs: u64,
    pub debt_ratio: f64,
}

fn debt_ratio(sent: u64, received: u64) -> f64 {
    if sent == 0 {
        return NO_DEBT;
    }
    received as f64 / sent as f64
}

fn saturating_add(counter: &AtomicU64, amount: u64) {
    // fetch_update only fails when the closure returns None, which it never does.
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_add(amount))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn peer() -> PeerId {
        PeerId::new([9; 32])
    }

    #[test]
    fn counters_accumulate() {
        let ledger = Ledger::new(peer());
        ledger.add_sent(100);
        ledger.add_sent(50);
        ledger.add_received(30);
        assert_eq!(ledger.bytes_sent(), 150);
        assert_eq!(ledger.bytes_received(), 30);
        assert!((ledger.debt_ratio() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn nothing_sent_means_no_debt() {
        let ledger = Ledger::new(peer());
        assert_eq!(ledger.debt_ratio(), NO_DEBT);
        ledger.add_received(10);
        assert_eq!(ledger.debt_ratio(), NO_DEBT);
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let ledger = Ledger::new(peer());
        ledger.add_sent(u64::MAX - 1);
        ledger.add_sent(10);
        assert_eq!(ledger.bytes_sent(), u64::MAX);
    }

    #[test]
    fn exchange_updates_count_and_timestamp() {
        let ledger = Ledger::new(peer());
        assert_eq!(ledger.last_exchange_secs(), 0);
        ledger.record_exchange();
        ledger.record_exchange();
        let receipt = ledger.receipt();
        assert_eq!(receipt.exchanged, 2);
        assert!(receipt.last_exchange_secs > 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let ledger = Arc::new(Ledger::new(peer()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        ledger.add_sent(3);
                        ledger.add_received(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.bytes_sent(), 24_000);
        assert_eq!(ledger.bytes_received(), 8_000);
    }
}
