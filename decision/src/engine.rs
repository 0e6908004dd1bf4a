//! The decision engine.
//!
//! Ties the request queue to the blockstore and transport collaborators:
//! inbound want-lists become tasks, a fixed pool of workers drains the
//! queue, and a maintenance task runs the freeze policy.
//!
//! Freeze policy: every observation window, each partner that has been
//! sent at least the grace allowance is judged on its debt ratio. Below
//! the threshold its freeze value goes up by one; at or above it an active
//! partner sheds one point. Past the ceiling the partner is frozen and
//! leaves scheduling entirely. The decay tick lowers every frozen value,
//! and a block received from a frozen peer lowers it too (or clears it if
//! the ratio recovered), so a frozen peer thaws once below the ceiling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bitswap_network::Transport;
use bitswap_store::Blockstore;
use bitswap_types::{Block, BlockId, PeerId, WantEntry, WantlistMessage};
use bitswap_utils::format_duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::config::EngineConfig;
use crate::ledger::Receipt;
use crate::metrics::EngineMetrics;
use crate::request_queue::{
    Dispatch, FreezeUpdate, PeerListing, PeerRequestQueue, ResolvedWant, TaskOutcome, Transition,
};
use crate::shutdown::{ShutdownController, ShutdownSignal};
use crate::spans::{maintenance_span, message_span, serve_span, worker_span};
use crate::strategy::Strategy;
use crate::task_queue::PeerTask;
use crate::EngineError;

pub struct Engine {
    config: EngineConfig,
    queue: PeerRequestQueue,
    store: Arc<dyn Blockstore>,
    transport: Arc<dyn Transport>,
    metrics: EngineMetrics,
    shutdown: ShutdownController,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine using the strategy named in `config`.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Blockstore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, EngineError> {
        let strategy = config.strategy.build();
        Self::with_strategy(config, strategy, store, transport)
    }

    /// Build an engine with a custom partner ordering.
    pub fn with_strategy(
        config: EngineConfig,
        strategy: Arc<dyn Strategy>,
        store: Arc<dyn Blockstore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, EngineError> {
        config.validate()?;
        let queue = PeerRequestQueue::new(strategy, config.max_in_flight_per_partner);
        Ok(Arc::new(Self {
            config,
            queue,
            store,
            transport,
            metrics: EngineMetrics::new(),
            shutdown: ShutdownController::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn queue(&self) -> &PeerRequestQueue {
        &self.queue
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the worker pool and the maintenance task.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let mut handles = self.handles.lock().await;
        for worker in 0..self.config.workers {
            let engine = Arc::clone(self);
            let signal = self.shutdown.subscribe();
            handles.push(tokio::spawn(
                engine.run_worker(signal).instrument(worker_span(worker)),
            ));
        }
        let engine = Arc::clone(self);
        let signal = self.shutdown.subscribe();
        handles.push(tokio::spawn(
            engine.run_maintenance(signal).instrument(maintenance_span()),
        ));

        info!(
            workers = self.config.workers,
            strategy = ?self.config.strategy,
            "decision engine started"
        );
        Ok(())
    }

    /// Stop all tasks and wait for them within the configured timeout.
    ///
    /// Tasks still running at the deadline are aborted.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.shutdown.shutdown();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().await);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
        let mut timed_out = false;
        let mut join_error = None;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    join_error.get_or_insert_with(|| e.to_string());
                }
                Err(_) => {
                    handle.abort();
                    timed_out = true;
                }
            }
        }

        if timed_out {
            warn!("decision engine tasks did not stop in time");
            return Err(EngineError::ShutdownTimeout);
        }
        if let Some(e) = join_error {
            return Err(EngineError::Join(e));
        }
        info!("decision engine stopped");
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    // ── Peer lifecycle ──────────────────────────────────────────────────

    pub async fn add_peer(&self, peer: PeerId) {
        let added = self
            .queue
            .with_core(|core| {
                let added = !core.contains(&peer);
                core.add_partner(peer);
                added
            })
            .await;
        if added {
            debug!(peer = %peer.short(), "peer added");
            self.refresh_gauges().await;
        }
    }

    /// Reap all state for a disconnected peer, returning its final ledger.
    pub async fn remove_peer(&self, peer: &PeerId) -> Result<Receipt, EngineError> {
        let ledger = self
            .queue
            .with_core(|core| core.remove_partner(peer))
            .await
            .ok_or(EngineError::UnknownPeer(*peer))?;
        let receipt = ledger.receipt();
        info!(
            peer = %peer.short(),
            sent = receipt.sent,
            received = receipt.received,
            "peer removed"
        );
        self.refresh_gauges().await;
        Ok(receipt)
    }

    pub async fn list_peers(&self) -> PeerListing {
        self.queue.with_core(|core| core.list_peers()).await
    }

    pub async fn ledger_for_peer(&self, peer: &PeerId) -> Option<Receipt> {
        let ledger = self.queue.with_core(|core| core.ledger(peer)).await?;
        Some(ledger.receipt())
    }

    pub async fn wantlist_for_peer(&self, peer: &PeerId) -> Option<Vec<WantEntry>> {
        self.queue.with_core(|core| core.wantlist(peer)).await
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Apply a want-list message from `peer`.
    ///
    /// A malformed message is rejected whole and changes nothing. Unknown
    /// peers are registered on their first message.
    pub async fn message_received(
        &self,
        peer: PeerId,
        message: &WantlistMessage,
    ) -> Result<(), EngineError> {
        let span = message_span(&peer, message.entries.len(), message.full);
        async {
            let entries = message.validate()?;

            // Size lookups may hit storage, so they run before taking the lock.
            let mut wants = Vec::with_capacity(entries.len());
            for entry in entries {
                let size = if entry.cancel {
                    None
                } else {
                    self.lookup_size(&entry.block).await
                };
                wants.push(ResolvedWant { entry, size });
            }

            self.queue.apply_wants(peer, message.full, &wants).await;
            debug!(entries = wants.len(), "want-list applied");
            self.refresh_gauges().await;
            Ok::<(), EngineError>(())
        }
        .instrument(span)
        .await
    }

    /// Credit a block received from `peer`.
    ///
    /// Storing the block and announcing it through
    /// [`notify_new_blocks`](Self::notify_new_blocks) is up to the caller.
    pub async fn block_received(&self, peer: PeerId, block: &Block) {
        let (ledger, frozen) = self
            .queue
            .with_core(|core| (core.add_partner(peer), core.is_frozen(&peer)))
            .await;
        ledger.add_received(block.len() as u64);
        ledger.record_exchange();
        self.metrics.bytes_received.inc_by(block.len() as u64);
        debug!(peer = %peer.short(), block = %block.id(), len = block.len(), "block received");

        if frozen {
            let update = if ledger.debt_ratio() >= self.config.debt_ratio_threshold {
                FreezeUpdate::Reset
            } else {
                FreezeUpdate::Decay(self.config.freeze_decay_step)
            };
            let transitions = self
                .queue
                .apply_freeze(&[(peer, update)], self.config.freeze_ceiling)
                .await;
            self.report(&transitions).await;
        }
    }

    /// Queue tasks for partners that want blocks the node just obtained.
    ///
    /// Returns how many partners gained work.
    pub async fn notify_new_blocks(&self, blocks: &[Block]) -> usize {
        let available: Vec<(BlockId, usize)> = blocks.iter().map(|b| (b.id(), b.len())).collect();
        let touched = self.queue.blocks_available(&available).await;
        if !touched.is_empty() {
            debug!(blocks = blocks.len(), partners = touched.len(), "new blocks queued");
        }
        touched.len()
    }

    async fn lookup_size(&self, block: &BlockId) -> Option<usize> {
        match self.store.get_size(block).await {
            Ok(size) => size,
            Err(e) => {
                self.metrics.store_errors.inc();
                warn!(block = %block, error = %e, "size lookup failed, recording want only");
                None
            }
        }
    }

    // ── Freeze policy ───────────────────────────────────────────────────

    /// Judge every unfrozen partner's debt ratio for one observation window.
    ///
    /// Frozen partners are left to [`decay`](Self::decay) and repayment.
    pub async fn observe(&self) -> Vec<(PeerId, Transition)> {
        let ledgers = self
            .queue
            .with_core(|core| {
                let mut ledgers = core.ledgers();
                ledgers.retain(|(peer, _)| !core.is_frozen(peer));
                ledgers
            })
            .await;
        let updates: Vec<(PeerId, FreezeUpdate)> = ledgers
            .into_iter()
            .filter(|(_, ledger)| ledger.bytes_sent() >= self.config.grace_bytes)
            .map(|(peer, ledger)| {
                if ledger.debt_ratio() < self.config.debt_ratio_threshold {
                    (peer, FreezeUpdate::Penalize)
                } else {
                    (peer, FreezeUpdate::Recover)
                }
            })
            .collect();
        if updates.is_empty() {
            return Vec::new();
        }
        let transitions = self
            .queue
            .apply_freeze(&updates, self.config.freeze_ceiling)
            .await;
        self.report(&transitions).await;
        transitions
    }

    /// Lower the freeze value of every frozen partner by one decay step.
    pub async fn decay(&self) -> Vec<(PeerId, Transition)> {
        let frozen = self.queue.with_core(|core| core.frozen_peers()).await;
        if frozen.is_empty() {
            return Vec::new();
        }
        let step = self.config.freeze_decay_step;
        let updates: Vec<(PeerId, FreezeUpdate)> = frozen
            .into_iter()
            .map(|peer| (peer, FreezeUpdate::Decay(step)))
            .collect();
        let transitions = self
            .queue
            .apply_freeze(&updates, self.config.freeze_ceiling)
            .await;
        self.report(&transitions).await;
        transitions
    }

    async fn report(&self, transitions: &[(PeerId, Transition)]) {
        if transitions.is_empty() {
            return;
        }
        for (peer, transition) in transitions {
            match transition {
                Transition::Frozen => {
                    self.metrics.freezes.inc();
                    info!(peer = %peer.short(), "partner frozen");
                }
                Transition::Thawed { frozen_secs } => {
                    self.metrics.thaws.inc();
                    info!(
                        peer = %peer.short(),
                        frozen_for = %format_duration(*frozen_secs),
                        "partner thawed"
                    );
                }
            }
        }
        self.refresh_gauges().await;
    }

    async fn refresh_gauges(&self) {
        let listing = self.list_peers().await;
        self.metrics
            .set_partners(listing.active.len(), listing.frozen.len());
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    async fn run_worker(self: Arc<Self>, mut signal: ShutdownSignal) {
        debug!("worker started");
        while let Some(dispatch) = self.queue.pop(&mut signal).await {
            let started = Instant::now();
            let span = serve_span(&dispatch.peer, dispatch.task.attempts);
            let outcome = tokio::select! {
                outcome = self.serve(&dispatch).instrument(span) => outcome,
                _ = signal.cancelled() => TaskOutcome::Dropped,
            };
            self.queue
                .done(&dispatch.peer, &dispatch.task.block, outcome)
                .await;
            self.metrics
                .serve_time_ms
                .observe(started.elapsed().as_secs_f64() * 1000.0);
        }
        debug!("worker stopped");
    }

    async fn run_maintenance(self: Arc<Self>, mut signal: ShutdownSignal) {
        let now = tokio::time::Instant::now();
        let mut observe = interval_at(
            now + self.config.observation_interval(),
            self.config.observation_interval(),
        );
        let mut decay = interval_at(
            now + self.config.decay_interval(),
            self.config.decay_interval(),
        );
        observe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        decay.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = signal.cancelled() => break,
                _ = observe.tick() => {
                    self.observe().await;
                }
                _ = decay.tick() => {
                    self.decay().await;
                }
            }
        }
        debug!("maintenance stopped");
    }

    /// Resolve and deliver one task. Never holds the queue lock.
    async fn serve(&self, dispatch: &Dispatch) -> TaskOutcome {
        let Dispatch { peer, task, ledger } = dispatch;

        let block = match self.store.get(&task.block).await {
            Ok(block) => block,
            Err(e) if e.is_not_found() => {
                self.metrics.blocks_not_found.inc();
                debug!(block = %task.block, "block not held, dropping task");
                return TaskOutcome::Dropped;
            }
            Err(e) => {
                self.metrics.store_errors.inc();
                warn!(block = %task.block, error = %e, "blockstore error");
                return self.retry_or_drop(task.clone());
            }
        };

        match self.transport.send(peer, &block).await {
            Ok(()) => {
                let len = block.len() as u64;
                ledger.add_sent(len);
                ledger.record_exchange();
                self.metrics.blocks_sent.inc();
                self.metrics.bytes_sent.inc_by(len);
                debug!(block = %task.block, len, "block sent");
                TaskOutcome::Sent
            }
            Err(e) => {
                self.metrics.transport_errors.inc();
                warn!(block = %task.block, error = %e, "send failed");
                self.retry_or_drop(task.clone())
            }
        }
    }

    fn retry_or_drop(&self, mut task: PeerTask) -> TaskOutcome {
        if task.attempts < self.config.max_retries {
            task.attempts += 1;
            self.metrics.tasks_retried.inc();
            TaskOutcome::Retry(task)
        } else {
            self.metrics.tasks_dropped.inc();
            warn!(
                block = %task.block,
                attempts = task.attempts + 1,
                "retries exhausted, dropping task"
            );
            TaskOutcome::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitswap_nullables::{NullBlockstore, NullTransport};
    use crate::task_queue::TaskQueue;
    use bitswap_types::RawWantEntry;

    fn engine_with(config: EngineConfig) -> (Arc<Engine>, Arc<NullBlockstore>, Arc<NullTransport>) {
        let store = Arc::new(NullBlockstore::new());
        let transport = Arc::new(NullTransport::new());
        let engine = Engine::new(config, store.clone(), transport.clone()).unwrap();
        (engine, store, transport)
    }

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        let store = Arc::new(NullBlockstore::new());
        let transport = Arc::new(NullTransport::new());
        assert!(matches!(
            Engine::new(config, store, transport),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let (engine, _, _) = engine_with(EngineConfig::default());
        engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(EngineError::AlreadyStarted)));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn remove_unknown_peer_is_an_error() {
        let (engine, _, _) = engine_with(EngineConfig::default());
        assert!(matches!(
            engine.remove_peer(&peer(1)).await,
            Err(EngineError::UnknownPeer(_))
        ));
        engine.add_peer(peer(1)).await;
        let receipt = engine.remove_peer(&peer(1)).await.unwrap();
        assert_eq!(receipt.sent, 0);
        assert!(engine.list_peers().await.active.is_empty());
    }

    #[tokio::test]
    async fn malformed_message_changes_nothing() {
        let (engine, store, _) = engine_with(EngineConfig::default());
        let block = Block::new(vec![1u8; 16]);
        store.insert(block.clone());
        let message = WantlistMessage::incremental(vec![
            RawWantEntry::want(block.id(), 1),
            RawWantEntry {
                key: vec![0u8; 5],
                priority: 1,
                cancel: false,
            },
        ]);
        let err = engine.message_received(peer(1), &message).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidWant(_)));
        assert!(engine.list_peers().await.active.is_empty());
        assert!(engine.wantlist_for_peer(&peer(1)).await.is_none());
    }

    #[tokio::test]
    async fn block_received_credits_ledger() {
        let (engine, _, _) = engine_with(EngineConfig::default());
        engine.block_received(peer(2), &Block::new(vec![7u8; 300])).await;
        let receipt = engine.ledger_for_peer(&peer(2)).await.unwrap();
        assert_eq!(receipt.received, 300);
        assert_eq!(receipt.exchanged, 1);
        assert_eq!(engine.metrics().bytes_received.get(), 300);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let (engine, _, _) = engine_with(EngineConfig {
            max_retries: 2,
            ..EngineConfig::default()
        });
        let mut queue = TaskQueue::new();
        queue.add_task(BlockId::for_data(b"x"), 1, Some(1));
        let mut task = queue.pop_task().unwrap();
        for expected in 1..=2 {
            match engine.retry_or_drop(task) {
                TaskOutcome::Retry(t) => {
                    assert_eq!(t.attempts, expected);
                    task = t;
                }
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert!(matches!(engine.retry_or_drop(task), TaskOutcome::Dropped));
        assert_eq!(engine.metrics().tasks_retried.get(), 2);
        assert_eq!(engine.metrics().tasks_dropped.get(), 1);
    }
}
