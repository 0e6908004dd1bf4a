//! Decision engine for peer-to-peer block exchange.
//!
//! Decides which peer gets served next, with which block, and which peers
//! are cut off for taking far more than they give:
//! - [`ledger`] tracks bytes exchanged with each peer
//! - [`task_queue`] orders one peer's pending block requests
//! - [`request_queue`] picks the next partner via a pluggable [`Strategy`]
//!   and keeps frozen partners out of scheduling
//! - [`engine`] runs the worker pool and the freeze/thaw policy

pub mod config;
pub mod engine;
pub mod error;
pub mod heap;
pub mod ledger;
pub mod metrics;
pub mod partner;
pub mod request_queue;
pub mod shutdown;
pub mod spans;
pub mod strategy;
pub mod task_queue;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use ledger::{Ledger, Receipt, NO_DEBT};
pub use metrics::EngineMetrics;
pub use request_queue::{
    Dispatch, FreezeUpdate, PeerListing, PeerRequestQueue, QueueCore, ResolvedWant, TaskOutcome,
    Transition,
};
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use strategy::{backlog_first, fair, PartnerState, Strategy, StrategyKind};
pub use task_queue::{PeerTask, TaskQueue};
