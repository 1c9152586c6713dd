//! Tool schemas and argument handling.

pub mod arguments;
pub mod catalog;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use catalog::{catalog, definition};
pub use types::{AgentToolParameters, ParameterBuilder, ToolDefinition};
pub use validation::validate_arguments;
