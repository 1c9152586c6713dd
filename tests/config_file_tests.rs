//! Layered configuration loading: file, then environment.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use pretty_assertions::assert_eq;

use sandrun::config::SandrunConfig;
use sandrun::error::SandrunError;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 6] = [
    "SANDRUN_CONFIG",
    "SANDRUN_SANDBOX_NAME",
    "SANDRUN_EXEC_TIMEOUT_SECS",
    "SANDRUN_RUNTIME",
    "SANDRUN_SANDBOX_USER",
    "SANDRUN_RECONNECT_ATTEMPTS",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        for key in keys {
            std::env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn load_reads_file_then_environment() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[server]\nbind = \"0.0.0.0:9999\"\n\n[sandbox]\nsandbox_name = \"from-file\"\ntimeout = 90\n",
    )
    .unwrap();

    std::env::set_var("SANDRUN_CONFIG", &path);
    std::env::set_var("SANDRUN_SANDBOX_NAME", "from-env");

    let config = SandrunConfig::load().unwrap();
    assert_eq!(config.server.bind, "0.0.0.0:9999");
    assert_eq!(config.sandbox.sandbox_name, "from-env");
    assert_eq!(config.sandbox.timeout, Duration::from_secs(90));
    assert_eq!(config.sandbox.runtime, "docker");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);

    std::env::set_var("SANDRUN_CONFIG", "/nonexistent/sandrun/config.toml");
    let config = SandrunConfig::load().unwrap();
    assert_eq!(config.sandbox.sandbox_name, "sandrun-sandbox");
}

#[test]
fn malformed_file_is_a_configuration_error() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sandbox\nsandbox_name = ").unwrap();
    std::env::set_var("SANDRUN_CONFIG", &path);

    assert!(matches!(SandrunConfig::load(), Err(SandrunError::Configuration(_))));
}

#[test]
fn invalid_environment_number_fails_load() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);

    std::env::set_var("SANDRUN_CONFIG", "/nonexistent/sandrun/config.toml");
    std::env::set_var("SANDRUN_EXEC_TIMEOUT_SECS", "soon");
    match SandrunConfig::load() {
        Err(SandrunError::Configuration(message)) => assert!(message.contains("SANDRUN_EXEC_TIMEOUT_SECS")),
        other => panic!("expected configuration error, got {other:?}"),
    }
}
