//! Command validation and argv building.
//!
//! [`build`] is the single gate between a model-requested tool call and the
//! sandbox: it resolves the tool, shape-checks structured arguments, builds
//! the argv, then applies the allow-list and the deny table.
//!
//! ```
//! use sandrun::command;
//! use sandrun::tools::ToolArguments;
//!
//! let args = ToolArguments::new(serde_json::json!({ "target": "10.0.0.5", "scan_type": "quick" }));
//! let request = command::build("nmap_scan", &args).unwrap();
//! assert_eq!(request.argv(), vec!["nmap", "-F", "10.0.0.5"]);
//! ```

pub mod builders;
pub mod policy;
pub mod registry;

pub use registry::{BuilderFn, ToolKind};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;
use crate::tools::{catalog, validate_arguments, ToolArguments};

/// A validated command, ready to run in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Unique per invocation.
    pub execution_id: String,
    pub command: String,
    pub args: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            execution_id: new_execution_id(),
            command: command.into(),
            args,
        }
    }

    /// Binary followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// The command line as it will run, space-joined.
    pub fn command_line(&self) -> String {
        render_command_line(&self.command, &self.args)
    }
}

/// Fresh execution id.
pub fn new_execution_id() -> String {
    format!("exec_{}", uuid::Uuid::new_v4().simple())
}

pub fn render_command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a validated [`ExecutionRequest`] for `tool_name` with `arguments`.
pub fn build(tool_name: &str, arguments: &ToolArguments) -> Result<ExecutionRequest, ValidationError> {
    let result = build_inner(tool_name, arguments);
    if let Err(err) = &result {
        warn!(tool = tool_name, reason = %err.reason, "tool call rejected");
    }
    result
}

fn build_inner(tool_name: &str, arguments: &ToolArguments) -> Result<ExecutionRequest, ValidationError> {
    let kind = ToolKind::from_name(tool_name)
        .ok_or_else(|| ValidationError::for_tool(tool_name, format!("unknown tool: {tool_name}")))?;

    if !kind.is_raw() {
        let definition = catalog::definition(kind);
        validate_arguments(arguments.raw(), &definition.parameters.schema)
            .map_err(|e| ValidationError::for_tool(tool_name, e.reason))?;
    }

    let mut argv = (kind.builder())(arguments)
        .map_err(|e| ValidationError::for_tool(tool_name, e.reason))?
        .into_iter();
    let command = argv
        .next()
        .ok_or_else(|| ValidationError::for_tool(tool_name, "command is empty"))?;
    let args: Vec<String> = argv.collect();

    // The raw path has nothing but the literal string to go on, so the deny
    // table speaks first and the reason names the dangerous pattern.
    let checked = if kind.is_raw() {
        check_denied(&command, &args).and_then(|_| check_allowed(&command))
    } else {
        check_command_line(&command, &args)
    };
    checked.map_err(|e| ValidationError::for_tool(tool_name, e.reason))?;

    Ok(ExecutionRequest::new(command, args))
}

/// Allow-list then deny table for an already assembled command.
///
/// The session server re-runs this on every `execute` it receives.
pub fn check_command_line(command: &str, args: &[String]) -> Result<(), ValidationError> {
    check_allowed(command)?;
    check_denied(command, args)
}

fn check_allowed(command: &str) -> Result<(), ValidationError> {
    if policy::is_allowed(command) {
        Ok(())
    } else {
        Err(ValidationError::new(format!("{command} is not an allowed tool")))
    }
}

fn check_denied(command: &str, args: &[String]) -> Result<(), ValidationError> {
    let line = render_command_line(command, args);
    let hits = policy::denied_by(&line);
    if hits.is_empty() {
        return Ok(());
    }
    let mut rationales: Vec<&str> = hits.iter().map(|rule| rule.rationale).collect();
    rationales.dedup();
    Err(ValidationError::new(format!(
        "command blocked: {}",
        rationales.join("; ")
    )))
}
