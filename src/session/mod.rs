//! Session protocol between an agent-side client and the execution server.

pub mod auth;
pub mod client;
pub mod protocol;
pub mod server;

pub use auth::{Identity, StaticTokenVerifier, TokenVerifier, DEFAULT_TIER};
pub use client::{ClientConfig, ClientEvent, CloseReason, ConnectionState, SessionClient};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{Session, SessionServer};

pub use crate::util::backoff::ReconnectPolicy;
