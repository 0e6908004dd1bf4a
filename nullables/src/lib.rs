//! Nullable infrastructure for deterministic testing.
//!
//! The decision engine talks to its environment only through the
//! `Blockstore` and `Transport` traits. This crate provides test-friendly
//! implementations of both that:
//! - Never touch the filesystem or network
//! - Record every call for later assertions
//! - Can be told to fail on demand
//!
//! Usage: hand these to the engine in place of the real collaborators.

pub mod store;
pub mod transport;

pub use store::NullBlockstore;
pub use transport::{NullTransport, SentBlock};
