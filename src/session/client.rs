//! Reconnecting session client.
//!
//! A background supervisor owns the socket. Callers talk to it through a
//! command channel, and server messages are routed back to the waiting
//! [`SessionClient::execute`] call by execution id. On an abnormal close the
//! supervisor reconnects with exponential backoff and re-authenticates; a
//! clean close from either side is final.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::Identity;
use super::protocol::{ClientMessage, ServerMessage};
use crate::command::ExecutionRequest;
use crate::error::SandrunError;
use crate::sandbox::{ExecutionOutcome, TerminalOutputEvent, TerminalStatus};
use crate::util::backoff::ReconnectPolicy;

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`SessionClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub token: String,
    pub reconnect: ReconnectPolicy,
    /// Bound on connect plus the auth round trip.
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready { user_id: String, tier: String },
    Reconnecting { attempt: usize },
    Closed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// [`SessionClient::close`] was called or the client was dropped.
    Client,
    /// The server sent a close frame.
    Server,
    ReconnectExhausted,
    AuthenticationFailed,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Disconnected { reason: String },
    Reconnected { user_id: String },
    /// An `error` message not tied to any execution.
    ServerError { message: String },
    Closed { reason: CloseReason },
}

type Route = mpsc::UnboundedSender<ServerMessage>;

struct Shared {
    routes: Mutex<HashMap<String, Route>>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Shared {
    fn routes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Dropping every route fails all in-flight executions with
    /// [`SandrunError::ConnectionLost`].
    fn clear_routes(&self) {
        let dropped = {
            let mut routes = self.routes();
            let n = routes.len();
            routes.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "dropped in-flight execution routes");
        }
    }

    fn route(&self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "ignoring unparseable server message");
                return;
            }
        };

        let Some(execution_id) = message.execution_id().map(str::to_string) else {
            match message {
                ServerMessage::Error { message, .. } => self.emit(ClientEvent::ServerError { message }),
                other => debug!(message = ?other, "ignoring unsolicited server message"),
            }
            return;
        };

        let terminal = message.terminal_status().is_some();
        let mut routes = self.routes();
        match routes.get(&execution_id) {
            Some(route) => {
                let _ = route.send(message);
                if terminal {
                    routes.remove(&execution_id);
                }
            }
            None => debug!(%execution_id, "message for unknown execution"),
        }
    }
}

struct RouteGuard {
    shared: Arc<Shared>,
    execution_id: String,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        self.shared.routes().remove(&self.execution_id);
    }
}

/// Client side of the session protocol.
pub struct SessionClient {
    commands: mpsc::UnboundedSender<ClientMessage>,
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionClient {
    /// Connect and authenticate. Fails without retrying if the first
    /// handshake does not succeed.
    pub async fn connect(config: ClientConfig) -> Result<Self, SandrunError> {
        let (socket, identity) = open_session(&config).await?;
        info!(url = %config.url, user_id = %identity.user_id, "session established");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Ready {
            user_id: identity.user_id,
            tier: identity.tier,
        });
        let shared = Arc::new(Shared {
            routes: Mutex::new(HashMap::new()),
            state: state_tx,
            events: events_tx,
        });
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_supervisor_loop(
            socket,
            commands_rx,
            Arc::clone(&shared),
            config,
            shutdown.clone(),
        ));

        Ok(Self {
            commands: commands_tx,
            shared,
            events: Mutex::new(Some(events_rx)),
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Lifecycle events. Can be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Run `request` on the server and wait for its terminal message.
    ///
    /// Output chunks are handed to `on_output` as they arrive. Firing
    /// `cancel` sends a `cancel` for the execution and keeps waiting for the
    /// server's acknowledgement.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        on_output: &mut (dyn FnMut(&TerminalOutputEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, SandrunError> {
        if !self.state().is_ready() {
            return Err(SandrunError::NotConnected);
        }

        let id = request.execution_id.clone();
        let (route_tx, mut route_rx) = mpsc::unbounded_channel();
        {
            let mut routes = self.shared.routes();
            if routes.contains_key(&id) {
                return Err(SandrunError::InvalidState(format!("execution {id} is already pending")));
            }
            routes.insert(id.clone(), route_tx);
        }
        let _guard = RouteGuard {
            shared: Arc::clone(&self.shared),
            execution_id: id.clone(),
        };

        self.commands
            .send(ClientMessage::Execute {
                command: request.command.clone(),
                args: request.args.clone(),
                execution_id: id.clone(),
            })
            .map_err(|_| SandrunError::NotConnected)?;
        debug!(execution_id = %id, command = %request.command, "execute sent");

        let mut outcome = ExecutionOutcome::new(id.clone(), TerminalStatus::Cancelled);
        let mut cancel_sent = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    debug!(execution_id = %id, "cancel requested");
                    if self.commands.send(ClientMessage::Cancel { execution_id: id.clone() }).is_err() {
                        return Err(SandrunError::ConnectionLost);
                    }
                }
                message = route_rx.recv() => match message {
                    // The server cancels a dropped connection's executions.
                    None if cancel_sent => return Ok(outcome),
                    None => return Err(SandrunError::ConnectionLost),
                    Some(ServerMessage::Output { execution_id, output_type, data, timestamp }) => {
                        let event = TerminalOutputEvent {
                            execution_id,
                            kind: output_type,
                            content: data,
                            timestamp,
                        };
                        outcome.record(event.kind, &event.content);
                        on_output(&event);
                    }
                    Some(other) => {
                        if let Some(status) = other.terminal_status() {
                            outcome.status = status;
                            return Ok(outcome);
                        }
                    }
                },
            }
        }
    }

    /// Ask the server to cancel `execution_id`. Unknown ids are ignored
    /// server-side.
    pub fn cancel(&self, execution_id: &str) -> Result<(), SandrunError> {
        if !self.state().is_ready() {
            return Err(SandrunError::NotConnected);
        }
        self.commands
            .send(ClientMessage::Cancel {
                execution_id: execution_id.to_string(),
            })
            .map_err(|_| SandrunError::NotConnected)
    }

    /// Close the session cleanly. No reconnection follows.
    pub async fn close(&self) -> Result<(), SandrunError> {
        self.shutdown.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.await
                .map_err(|error| SandrunError::Stream(format!("session supervisor failed: {error}")))?;
        }
        Ok(())
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum ConnectionOutcome {
    Shutdown,
    ServerClosed,
    Disconnected(String),
}

async fn run_supervisor_loop(
    mut socket: ClientSocket,
    mut commands_rx: mpsc::UnboundedReceiver<ClientMessage>,
    shared: Arc<Shared>,
    config: ClientConfig,
    shutdown: CancellationToken,
) {
    let close_reason = 'supervise: loop {
        let reason = match run_active_connection(&mut socket, &mut commands_rx, &shared, &shutdown).await {
            ConnectionOutcome::Shutdown => break CloseReason::Client,
            ConnectionOutcome::ServerClosed => break CloseReason::Server,
            ConnectionOutcome::Disconnected(reason) => reason,
        };

        warn!(%reason, "session connection lost");
        shared.set_state(ConnectionState::Reconnecting { attempt: 1 });
        shared.clear_routes();
        // Anything queued for the dead socket belongs to executions that
        // already failed.
        while commands_rx.try_recv().is_ok() {}
        shared.emit(ClientEvent::Disconnected { reason });

        let mut attempt = 0usize;
        loop {
            if attempt >= config.reconnect.max_attempts {
                warn!(attempts = attempt, "session reconnect attempts exhausted");
                break 'supervise CloseReason::ReconnectExhausted;
            }
            attempt += 1;
            shared.set_state(ConnectionState::Reconnecting { attempt });

            let delay = config.reconnect.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = shutdown.cancelled() => break 'supervise CloseReason::Client,
                _ = tokio::time::sleep(delay) => {}
            }

            match open_session(&config).await {
                Ok((reconnected, identity)) => {
                    info!(attempt, user_id = %identity.user_id, "session re-established");
                    socket = reconnected;
                    shared.emit(ClientEvent::Reconnected {
                        user_id: identity.user_id.clone(),
                    });
                    shared.set_state(ConnectionState::Ready {
                        user_id: identity.user_id,
                        tier: identity.tier,
                    });
                    continue 'supervise;
                }
                Err(SandrunError::Authentication(message)) => {
                    warn!(%message, "re-authentication rejected");
                    break 'supervise CloseReason::AuthenticationFailed;
                }
                Err(error) => warn!(attempt, %error, "reconnect attempt failed"),
            }
        }
    };

    shared.set_state(ConnectionState::Closed);
    shared.clear_routes();
    info!(reason = ?close_reason, "session closed");
    shared.emit(ClientEvent::Closed { reason: close_reason });
}

async fn run_active_connection(
    socket: &mut ClientSocket,
    commands_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    shared: &Shared,
    shutdown: &CancellationToken,
) -> ConnectionOutcome {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                return ConnectionOutcome::Shutdown;
            }
            command = commands_rx.recv() => {
                let Some(command) = command else {
                    let _ = socket.send(Message::Close(None)).await;
                    return ConnectionOutcome::Shutdown;
                };
                let text = match command.encode() {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(%error, "failed to encode client message");
                        continue;
                    }
                };
                if let Err(error) = socket.send(Message::Text(text.into())).await {
                    return ConnectionOutcome::Disconnected(format!("send failed: {error}"));
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.route(&text),
                Some(Ok(Message::Binary(bytes))) => {
                    if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                        shared.route(&text);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed session");
                    return ConnectionOutcome::ServerClosed;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return ConnectionOutcome::Disconnected(error.to_string()),
                None => return ConnectionOutcome::Disconnected("connection closed without a close frame".into()),
            },
        }
    }
}

/// Connect and run the `auth` round trip, bounded by the handshake timeout.
async fn open_session(config: &ClientConfig) -> Result<(ClientSocket, Identity), SandrunError> {
    let handshake = async {
        let (mut socket, _) = connect_async(config.url.as_str()).await.map_err(map_connect_error)?;
        let auth = ClientMessage::Auth {
            token: config.token.clone(),
        }
        .encode()?;
        socket.send(Message::Text(auth.into())).await?;
        let identity = await_auth_reply(&mut socket).await?;
        Ok::<_, SandrunError>((socket, identity))
    };

    tokio::time::timeout(config.handshake_timeout, handshake)
        .await
        .map_err(|_| SandrunError::Timeout(config.handshake_timeout.as_millis() as u64))?
}

async fn await_auth_reply(socket: &mut ClientSocket) -> Result<Identity, SandrunError> {
    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => match ServerMessage::parse(&text)? {
                ServerMessage::AuthSuccess { user_id, tier } => return Ok(Identity { user_id, tier }),
                ServerMessage::AuthError { message } => return Err(SandrunError::Authentication(message)),
                other => debug!(message = ?other, "ignoring message before auth reply"),
            },
            Message::Close(_) => return Err(SandrunError::ConnectionLost),
            _ => {}
        }
    }
    Err(SandrunError::ConnectionLost)
}

fn map_connect_error(error: WsError) -> SandrunError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                SandrunError::Authentication(format!("session handshake rejected with status {status}"))
            } else {
                SandrunError::api(status, format!("session handshake failed with status {status}"))
            }
        }
        WsError::Io(error) => SandrunError::Io(error),
        WsError::Url(error) => SandrunError::Configuration(format!("invalid session url: {error}")),
        other => SandrunError::WebSocket(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shared() -> (Arc<Shared>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            routes: Mutex::new(HashMap::new()),
            state,
            events,
        });
        (shared, events_rx)
    }

    #[test]
    fn terminal_message_releases_route() {
        let (shared, _events) = shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.routes().insert("exec_1".into(), tx);

        shared.route(r#"{"type":"output","payload":{"executionId":"exec_1","outputType":"stdout","data":"hi","timestamp":"2024-01-01T00:00:00Z"}}"#);
        assert!(shared.routes().contains_key("exec_1"));
        shared.route(r#"{"type":"cancelled","payload":{"executionId":"exec_1"}}"#);
        assert!(shared.routes().is_empty());

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Output { .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Cancelled { .. })));
    }

    #[test]
    fn connection_wide_errors_become_events() {
        let (shared, mut events) = shared();
        shared.route(r#"{"type":"error","payload":{"message":"bad frame","timestamp":"2024-01-01T00:00:00Z"}}"#);
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ServerError {
                message: "bad frame".into()
            }
        );
    }

    #[test]
    fn clearing_routes_disconnects_waiters() {
        let (shared, _events) = shared();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        shared.routes().insert("exec_1".into(), tx);
        shared.clear_routes();
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[test]
    fn handshake_401_maps_to_authentication() {
        let response = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(401)
            .body(None)
            .unwrap();
        assert!(matches!(
            map_connect_error(WsError::Http(response)),
            SandrunError::Authentication(_)
        ));
    }
}
