//! Shared utilities for the block exchange decision engine.

pub mod logging;
pub mod time;

pub use logging::{init_logging, LogFormat, LoggingError};
pub use time::{format_duration, unix_now_secs};
