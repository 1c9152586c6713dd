//! Spawns validated commands inside the sandbox and streams their output.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{ExecutionEvent, OutputKind, TerminalOutputEvent, TerminalStatus};
use super::registry::ExecutionRecord;
use super::SandboxConfig;
use crate::command::ExecutionRequest;

/// Exit code reported for executions killed at the time limit.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const READ_CHUNK: usize = 8 * 1024;
const TERM_GRACE: Duration = Duration::from_millis(500);
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Runs commands through `<runtime> exec -u <user> <sandbox> ...`.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: Arc<SandboxConfig>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Program and arguments actually handed to the OS.
    pub fn invocation(&self, request: &ExecutionRequest) -> (String, Vec<String>) {
        let mut args = vec![
            "exec".to_string(),
            "-u".to_string(),
            self.config.user.clone(),
            self.config.sandbox_name.clone(),
            request.command.clone(),
        ];
        args.extend(request.args.iter().cloned());
        (self.config.runtime.clone(), args)
    }

    /// Start `request` in the background.
    ///
    /// Output chunks and then exactly one terminal event for the request's
    /// execution id are sent on `events`. The returned record is the
    /// caller's handle for cancellation and bookkeeping.
    pub fn spawn(
        &self,
        request: ExecutionRequest,
        events: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> ExecutionRecord {
        let cancel = CancellationToken::new();
        let execution_id = request.execution_id.clone();
        let started_at = Instant::now();
        let task = tokio::spawn(run_execution(
            self.clone(),
            request,
            cancel.clone(),
            events,
        ));
        ExecutionRecord {
            execution_id,
            started_at,
            timeout: self.config.timeout,
            cancel,
            task,
        }
    }
}

async fn run_execution(
    executor: SandboxExecutor,
    request: ExecutionRequest,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ExecutionEvent>,
) {
    let id = request.execution_id.clone();
    let timeout = executor.config.timeout;
    send_output(&events, &id, OutputKind::Command, format!("$ {}", request.command_line()));

    let (program, args) = executor.invocation(&request);
    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(execution_id = %id, program = %program, error = %err, "failed to spawn execution");
            send_terminal(
                &events,
                &id,
                TerminalStatus::Failed {
                    message: format!("failed to start {}: {err}", request.command),
                },
            );
            return;
        }
    };

    info!(execution_id = %id, command = %request.command, pid = ?child.id(), "execution spawned");

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, OutputKind::Stdout, id.clone(), events.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, OutputKind::Stderr, id.clone(), events.clone())));
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let status = tokio::select! {
        waited = child.wait() => match waited {
            Ok(exit) => TerminalStatus::Completed { exit_code: exit.code().unwrap_or(-1) },
            Err(err) => TerminalStatus::Failed { message: format!("failed to wait for process: {err}") },
        },
        _ = cancel.cancelled() => {
            terminate(&mut child).await;
            TerminalStatus::Cancelled
        }
        _ = &mut deadline => {
            warn!(execution_id = %id, timeout_ms = timeout.as_millis() as u64, "execution timed out");
            terminate(&mut child).await;
            TerminalStatus::TimedOut { exit_code: TIMEOUT_EXIT_CODE }
        }
    };

    // Output is delivered asynchronously to process exit; drain it first so
    // the terminal event is always last.
    for mut handle in pumps {
        if tokio::time::timeout(FLUSH_GRACE, &mut handle).await.is_err() {
            debug!(execution_id = %id, "output pipe still open after exit; abandoning");
            handle.abort();
        }
    }

    if matches!(status, TerminalStatus::TimedOut { .. }) {
        send_output(
            &events,
            &id,
            OutputKind::Info,
            format!("Execution timed out after {}", format_duration(timeout)),
        );
    }

    info!(execution_id = %id, status = status.label(), exit_code = ?status.exit_code(), "execution finished");
    send_terminal(&events, &id, status);
}

/// SIGTERM the process group, then SIGKILL whatever is left.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(pid as i32);
        let _ = killpg(pgid, Signal::SIGTERM);
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn pump<R>(mut reader: R, kind: OutputKind, execution_id: String, events: mpsc::UnboundedSender<ExecutionEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = Utf8Chunker::default();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.push(&buf[..n]);
                if !text.is_empty() {
                    send_output(&events, &execution_id, kind, text);
                }
            }
            Err(err) => {
                debug!(execution_id = %execution_id, %kind, error = %err, "output read failed");
                break;
            }
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        send_output(&events, &execution_id, kind, rest);
    }
}

fn send_output(events: &mpsc::UnboundedSender<ExecutionEvent>, execution_id: &str, kind: OutputKind, content: String) {
    // A closed receiver means the owning connection is gone.
    let _ = events.send(ExecutionEvent::Output(TerminalOutputEvent {
        execution_id: execution_id.to_string(),
        kind,
        content,
        timestamp: Utc::now(),
    }));
}

fn send_terminal(events: &mpsc::UnboundedSender<ExecutionEvent>, execution_id: &str, status: TerminalStatus) {
    let _ = events.send(ExecutionEvent::Terminal {
        execution_id: execution_id.to_string(),
        status,
        timestamp: Utc::now(),
    });
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() > 0 && duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Decodes a byte stream into UTF-8 text without splitting codepoints
/// across chunk boundaries.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(rest) => {
                    text.push_str(rest);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid = consumed + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid + len;
                        }
                        // Incomplete trailing sequence: hold it for the next chunk.
                        None => {
                            consumed = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn invocation_goes_through_runtime_exec() {
        let executor = SandboxExecutor::new(SandboxConfig {
            runtime: "docker".into(),
            sandbox_name: "kali".into(),
            user: "pentester".into(),
            timeout: Duration::from_secs(300),
        });
        let request = ExecutionRequest::new("nmap", vec!["-F".into(), "10.0.0.5".into()]);
        let (program, args) = executor.invocation(&request);
        assert_eq!(program, "docker");
        assert_eq!(args, vec!["exec", "-u", "pentester", "kali", "nmap", "-F", "10.0.0.5"]);
    }

    #[test]
    fn chunker_holds_split_codepoint() {
        let bytes = "héllo".as_bytes();
        let mut decoder = Utf8Chunker::default();
        // 'é' is two bytes; split between them
        assert_eq!(decoder.push(&bytes[..2]), "h");
        assert_eq!(decoder.push(&bytes[2..]), "éllo");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn chunker_replaces_invalid_bytes() {
        let mut decoder = Utf8Chunker::default();
        assert_eq!(decoder.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn chunker_keeps_split_codepoint_after_invalid_byte() {
        let mut decoder = Utf8Chunker::default();
        assert_eq!(decoder.push(&[b'a', 0xff, 0xe2, 0x82]), "a\u{fffd}");
        assert_eq!(decoder.push(&[0xac, b'!']), "\u{20ac}!");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn chunker_flushes_dangling_bytes_lossily() {
        let mut decoder = Utf8Chunker::default();
        assert_eq!(decoder.push(&[b'x', 0xe2, 0x82]), "x");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::from_secs(300)), "300s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }
}
