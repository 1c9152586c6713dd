//! CLI entry point for sandrun.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};

/// sandrun CLI
#[derive(Parser, Debug)]
#[command(name = "sandrun", version, about = "Agent tool calls, executed in a sandbox")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the session server
    Serve(ServeArgs),
    /// Run one agent turn against the model
    Chat(ChatArgs),
    /// Validate a tool call and print the command it would run
    Check(CheckArgs),
    /// List the tools offered to the model
    Tools,
}

/// Arguments for `sandrun serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides SANDRUN_BIND)
    #[arg(short, long)]
    pub bind: Option<String>,
}

/// How `chat` renders the loop.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Streamed text plus tool progress on stderr
    #[default]
    Text,
    /// Adapter frames as server-sent events on stdout
    Sse,
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Run tools in-process even when SANDRUN_TOKEN is set
    #[arg(long)]
    pub local: bool,

    /// System prompt (overrides SANDRUN_SYSTEM_PROMPT)
    #[arg(short, long)]
    pub system: Option<String>,

    /// User prompt
    pub prompt: String,
}

/// Arguments for `sandrun check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Tool name, e.g. nmap_scan
    pub tool: String,
    /// Arguments as a JSON object
    #[arg(default_value = "{}")]
    pub arguments: String,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
