//! Utility modules: reconnect backoff, text truncation, logging setup.

pub mod backoff;
pub mod logging;
pub mod truncate;
