//! Model stream parsing and UI adapter frames.

pub mod accumulator;
pub mod adapter;
pub mod parser;

pub use accumulator::ToolCallAccumulator;
pub use adapter::{AdapterFrame, AdapterTool};
pub use parser::{parse_stream, ParsedTurn, StreamParser};
