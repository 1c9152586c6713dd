//! Handlers for the CLI subcommands.

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ChatArgs, CheckArgs, OutputFormat, ServeArgs};
use crate::agent::{AgentDriver, AgentEvent, AgentEventSink, LocalDispatcher, ToolDispatcher, TurnOutcome};
use crate::command;
use crate::config::SandrunConfig;
use crate::error::SandrunError;
use crate::sandbox::{OutputKind, SandboxExecutor};
use crate::session::{SessionClient, SessionServer};
use crate::stream::AdapterFrame;
use crate::tools::ToolArguments;

/// Cancelled on the first Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

/// Handle `sandrun serve`.
pub async fn handle_serve(args: ServeArgs) -> Result<(), SandrunError> {
    let config = SandrunConfig::load()?;
    let verifier = config.token_verifier()?;
    if verifier.is_empty() {
        warn!("no tokens configured (SANDRUN_AUTH_TOKENS); every auth attempt will fail");
    }
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let server = SessionServer::bind(
        bind.as_str(),
        Arc::new(verifier),
        SandboxExecutor::new(config.sandbox.clone()),
    )
    .await?;
    server.serve(ctrl_c_token()).await
}

/// Handle `sandrun chat <prompt>`.
pub async fn handle_chat(args: ChatArgs) -> Result<(), SandrunError> {
    let config = SandrunConfig::load()?;
    let provider = Arc::new(config.provider()?);

    let client = match (&config.client.token, args.local) {
        (Some(_), false) => Some(Arc::new(SessionClient::connect(config.client_config()?).await?)),
        _ => None,
    };
    let dispatcher: Arc<dyn ToolDispatcher> = match &client {
        Some(client) => Arc::clone(client) as Arc<dyn ToolDispatcher>,
        None => {
            info!(sandbox = %config.sandbox.sandbox_name, "running tools in-process");
            Arc::new(LocalDispatcher::new(SandboxExecutor::new(config.sandbox.clone())))
        }
    };

    let sink: AgentEventSink = match args.format {
        OutputFormat::Text => Arc::new(print_text_event),
        OutputFormat::Sse => {
            print_sse(&AdapterFrame::Connected);
            Arc::new(|event: AgentEvent| {
                if let Some(frame) = AdapterFrame::from_event(&event) {
                    print_sse(&frame);
                }
            })
        }
    };

    let system_prompt = args.system.as_deref().unwrap_or_else(|| config.system_prompt());
    let mut driver = AgentDriver::new(provider, dispatcher)
        .with_system_prompt(system_prompt)
        .with_event_sink(sink);

    let cancel = ctrl_c_token();
    let result = driver.run_turn(args.prompt, &cancel).await;

    if let Ok(TurnOutcome::Cancelled { pending }) = &result {
        let dropped = driver.discard_pending();
        eprintln!("\ncancelled ({pending} pending tool calls, {dropped} discarded)");
    }
    if args.format == OutputFormat::Text {
        println!();
    }
    if let Some(client) = client {
        client.close().await?;
    }
    result.map(|_| ())
}

/// Handle `sandrun check <tool> <json>`.
pub fn handle_check(args: CheckArgs) -> Result<(), SandrunError> {
    let value: serde_json::Value = serde_json::from_str(&args.arguments)
        .map_err(|e| SandrunError::Parse(format!("arguments are not valid JSON: {e}")))?;
    let request = command::build(&args.tool, &ToolArguments::new(value))?;
    println!("{}", request.command_line());
    Ok(())
}

/// Handle `sandrun tools`.
pub fn handle_tools() -> Result<(), SandrunError> {
    for tool in crate::tools::catalog() {
        println!("{:<18} {}", tool.name, tool.description);
    }
    Ok(())
}

fn print_sse(frame: &AdapterFrame) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(frame.to_sse().as_bytes());
    let _ = stdout.flush();
}

fn print_text_event(event: AgentEvent) {
    match event {
        AgentEvent::TextDelta { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolInvoking { tool, call_id, .. } => eprintln!("\n> {tool} ({call_id})"),
        AgentEvent::ToolOutput { output, .. } => match output.kind {
            OutputKind::Command => eprintln!("  {}", output.content.trim_end()),
            OutputKind::Stdout | OutputKind::Stderr => eprint!("{}", output.content),
            OutputKind::Info | OutputKind::Error => eprintln!("  ! {}", output.content.trim_end()),
        },
        AgentEvent::ToolFinished { tool, status, .. } => eprintln!("  [{tool}] {}", status.label()),
        AgentEvent::ToolRejected { tool, reason, .. } => eprintln!("  [{tool}] rejected: {reason}"),
        AgentEvent::Error { message } => eprintln!("\nerror: {message}"),
        AgentEvent::TurnComplete { .. } => {}
    }
}
