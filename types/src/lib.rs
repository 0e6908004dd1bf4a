//! Fundamental types for the block exchange decision engine.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: content-derived block identifiers, peer identifiers, block
//! payloads and the inbound want-list message surface.

pub mod block;
pub mod error;
pub mod message;
pub mod peer;

pub use block::{Block, BlockId};
pub use error::TypesError;
pub use message::{RawWantEntry, WantEntry, WantlistMessage};
pub use peer::PeerId;
