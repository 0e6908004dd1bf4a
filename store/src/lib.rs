//! Blockstore abstraction for the decision engine.
//!
//! The engine never touches disk itself. It resolves wanted blocks through
//! the [`Blockstore`] trait; production backends and the in-memory
//! [`MemoryBlockstore`] both implement it.

pub mod blockstore;
pub mod error;
pub mod memory;

pub use blockstore::Blockstore;
pub use error::StoreError;
pub use memory::MemoryBlockstore;
