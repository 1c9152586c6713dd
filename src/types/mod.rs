//! Core conversation and stream types.

pub mod message;
pub mod stream;

pub use message::*;
pub use stream::*;
