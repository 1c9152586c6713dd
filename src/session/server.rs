//! WebSocket session server.
//!
//! One task per connection owns that connection's [`Session`] and
//! [`ExecutionRegistry`]; nothing is shared between connections except the
//! executor configuration and the token verifier.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::TokenVerifier;
use super::protocol::{ClientMessage, ServerMessage};
use crate::command::{self, ExecutionRequest};
use crate::error::SandrunError;
use crate::sandbox::{ExecutionEvent, ExecutionRegistry, SandboxExecutor};

type ServerSocket = WebSocketStream<TcpStream>;

struct ServerState {
    verifier: Arc<dyn TokenVerifier>,
    executor: SandboxExecutor,
}

/// Accepts session connections and runs their commands in the sandbox.
pub struct SessionServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl SessionServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        verifier: Arc<dyn TokenVerifier>,
        executor: SandboxExecutor,
    ) -> Result<Self, SandrunError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState { verifier, executor }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SandrunError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires. Open connections are
    /// closed cleanly and their executions cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), SandrunError> {
        let addr = self.local_addr()?;
        info!(%addr, sandbox = %self.state.executor.config().sandbox_name, "session server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&self.state);
                        let shutdown = shutdown.child_token();
                        tokio::spawn(handle_connection(stream, peer, state, shutdown));
                    }
                    Err(error) => warn!(%error, "accept failed"),
                },
            }
        }

        info!(%addr, "session server stopped");
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>, shutdown: CancellationToken) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(error) => {
            warn!(%peer, %error, "websocket handshake failed");
            return;
        }
    };

    let mut connection = Connection::new(socket, state);
    info!(connection_id = %connection.session.connection_id, %peer, "connection opened");
    connection.run(shutdown).await;
    info!(
        connection_id = %connection.session.connection_id,
        user_id = ?connection.session.user_id,
        "connection closed"
    );
}

/// Per-connection state, created on connect and dropped on disconnect.
#[derive(Debug)]
pub struct Session {
    pub connection_id: String,
    pub user_id: Option<String>,
    pub tier: Option<String>,
    /// At most one execution in flight per connection.
    pub current_execution_id: Option<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            tier: None,
            current_execution_id: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

enum Flow {
    Continue,
    Close,
}

struct Connection {
    socket: ServerSocket,
    session: Session,
    registry: ExecutionRegistry,
    events_tx: mpsc::UnboundedSender<ExecutionEvent>,
    events_rx: mpsc::UnboundedReceiver<ExecutionEvent>,
    state: Arc<ServerState>,
}

impl Connection {
    fn new(socket: ServerSocket, state: Arc<ServerState>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            socket,
            session: Session::new(),
            registry: ExecutionRegistry::new(),
            events_tx,
            events_rx,
            state,
        }
    }

    async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            let flow = tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = self.close(CloseCode::Away, "server shutting down").await;
                    break;
                }
                Some(event) = self.events_rx.recv() => self.on_execution_event(event).await,
                frame = self.socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_text(&text).await,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => self.on_text(&text).await,
                        Err(_) => self.send(ServerMessage::error("binary frames must be UTF-8 JSON")).await,
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => Ok(Flow::Continue),
                    Some(Err(error)) => {
                        debug!(connection_id = %self.session.connection_id, %error, "receive failed");
                        break;
                    }
                },
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(error) => {
                    debug!(connection_id = %self.session.connection_id, %error, "send failed");
                    break;
                }
            }
        }

        if !self.registry.is_empty() {
            info!(
                connection_id = %self.session.connection_id,
                live = self.registry.len(),
                "cancelling executions of closed connection"
            );
        }
        self.registry.cancel_all();
    }

    async fn on_text(&mut self, text: &str) -> Result<Flow, SandrunError> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(connection_id = %self.session.connection_id, %error, "protocol error");
                return self.send(ServerMessage::error(error.to_string())).await;
            }
        };

        match message {
            ClientMessage::Auth { token } => self.on_auth(&token).await,
            ClientMessage::Execute {
                command,
                args,
                execution_id,
            } => {
                self.on_execute(ExecutionRequest {
                    execution_id,
                    command,
                    args,
                })
                .await
            }
            ClientMessage::Cancel { execution_id } => {
                if !self.registry.cancel(&execution_id) {
                    debug!(connection_id = %self.session.connection_id, %execution_id, "cancel for unknown execution ignored");
                }
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_auth(&mut self, token: &str) -> Result<Flow, SandrunError> {
        match self.state.verifier.verify(token).await {
            Ok(identity) => {
                info!(connection_id = %self.session.connection_id, user_id = %identity.user_id, "connection authenticated");
                self.session.user_id = Some(identity.user_id.clone());
                self.session.tier = Some(identity.tier.clone());
                self.send(ServerMessage::AuthSuccess {
                    user_id: identity.user_id,
                    tier: identity.tier,
                })
                .await
            }
            Err(error) => {
                warn!(connection_id = %self.session.connection_id, %error, "authentication failed");
                let message = match error {
                    SandrunError::Authentication(message) => message,
                    other => other.to_string(),
                };
                self.send(ServerMessage::AuthError { message }).await?;
                self.close(CloseCode::Policy, "authentication failed").await?;
                Ok(Flow::Close)
            }
        }
    }

    async fn on_execute(&mut self, request: ExecutionRequest) -> Result<Flow, SandrunError> {
        let id = request.execution_id.clone();
        if !self.session.is_authenticated() {
            return self.send(ServerMessage::execution_error(id, "not authenticated")).await;
        }
        if let Some(current) = &self.session.current_execution_id {
            let message = format!("execution {current} is already in progress");
            return self.send(ServerMessage::execution_error(id, message)).await;
        }
        if id.trim().is_empty() {
            return self.send(ServerMessage::error("execute requires an executionId")).await;
        }
        if let Err(rejected) = command::check_command_line(&request.command, &request.args) {
            warn!(connection_id = %self.session.connection_id, execution_id = %id, reason = %rejected, "execute rejected");
            return self.send(ServerMessage::execution_error(id, rejected.reason)).await;
        }

        let record = self.state.executor.spawn(request, self.events_tx.clone());
        if let Err(error) = self.registry.insert(record) {
            return self.send(ServerMessage::execution_error(id, error.to_string())).await;
        }
        self.session.current_execution_id = Some(id);
        Ok(Flow::Continue)
    }

    async fn on_execution_event(&mut self, event: ExecutionEvent) -> Result<Flow, SandrunError> {
        if let ExecutionEvent::Terminal { execution_id, .. } = &event {
            self.registry.finish(execution_id);
            if self.session.current_execution_id.as_deref() == Some(execution_id.as_str()) {
                self.session.current_execution_id = None;
            }
        }
        self.send(ServerMessage::from(event)).await
    }

    async fn send(&mut self, message: ServerMessage) -> Result<Flow, SandrunError> {
        self.socket.send(Message::Text(message.encode()?.into())).await?;
        Ok(Flow::Continue)
    }

    async fn close(&mut self, code: CloseCode, reason: &'static str) -> Result<(), SandrunError> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await?;
        Ok(())
    }
}
