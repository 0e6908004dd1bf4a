//! Transport abstraction for the decision engine.
//!
//! Framing, encryption and connection management live behind the
//! [`Transport`] trait. The engine only hands it resolved blocks.

pub mod error;
pub mod transport;

pub use error::TransportError;
pub use transport::Transport;
