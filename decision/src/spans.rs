//! [`tracing::Span`] constructors for the engine's long-running tasks.

use bitswap_types::PeerId;
use tracing::{info_span, Span};

/// Span covering one worker for its whole lifetime.
pub fn worker_span(worker: usize) -> Span {
    info_span!("decision_worker", worker = worker)
}

/// Span covering the observation and decay loop.
pub fn maintenance_span() -> Span {
    info_span!("decision_maintenance")
}

/// Span covering the handling of one inbound want-list.
pub fn message_span(peer: &PeerId, entries: usize, full: bool) -> Span {
    info_span!("wantlist_received", peer = %peer.short(), entries = entries, full = full)
}

/// Span covering one block delivery attempt.
pub fn serve_span(peer: &PeerId, attempt: u32) -> Span {
    info_span!("serve_block", peer = %peer.short(), attempt = attempt)
}
