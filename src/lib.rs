//! sandrun: streamed tool-call orchestration for agents that drive
//! command-line tools inside a sandbox.
//!
//! A model streams a reply; [`stream`] reassembles any tool calls from
//! their fragments; [`agent`] queues them and runs them one at a time;
//! [`command`] turns each call into a validated argv; [`sandbox`] runs it
//! through the container runtime; [`session`] carries executions over a
//! WebSocket between the agent and the sandbox host.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sandrun::agent::{AgentDriver, LocalDispatcher};
//! use sandrun::config::SandrunConfig;
//! use sandrun::sandbox::SandboxExecutor;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> sandrun::error::Result<()> {
//! let config = SandrunConfig::load()?;
//! let dispatcher = LocalDispatcher::new(SandboxExecutor::new(config.sandbox.clone()));
//! let mut driver = AgentDriver::new(Arc::new(config.provider()?), Arc::new(dispatcher))
//!     .with_system_prompt(config.system_prompt());
//! let outcome = driver.run_turn("Who owns example.com?", &CancellationToken::new()).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod command;
pub mod config;
pub mod error;
pub mod provider;
pub mod sandbox;
pub mod session;
pub mod stream;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Result, SandrunError, ValidationError};
