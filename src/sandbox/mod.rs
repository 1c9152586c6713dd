//! Sandboxed process execution.
//!
//! Every command runs through an external container runtime as a
//! non-privileged user inside one named sandbox; nothing is spawned
//! directly on the host. All connections share that sandbox.

pub mod events;
pub mod executor;
pub mod registry;

pub use events::{ExecutionEvent, ExecutionOutcome, OutputKind, TerminalOutputEvent, TerminalStatus};
pub use executor::{SandboxExecutor, TIMEOUT_EXIT_CODE};
pub use registry::{ExecutionRecord, ExecutionRegistry};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wall-clock limit per execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Where and as whom commands run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container runtime CLI, e.g. `docker` or `podman`.
    pub runtime: String,
    /// Name of the shared sandbox container.
    pub sandbox_name: String,
    /// Restricted user inside the sandbox.
    pub user: String,
    /// Applies to every execution alike.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".into(),
            sandbox_name: "sandrun-sandbox".into(),
            user: "sandbox".into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
