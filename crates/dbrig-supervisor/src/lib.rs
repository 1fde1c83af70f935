//! Process Supervisor: spawns engine processes detached, waits for
//! readiness, and stops them with graceful-then-forced escalation. The
//! shutdown protocol is modeled as the explicit state machine the design
//! calls for (`Idle -> Graceful -> Signaled -> Forced -> Idle`) rather than a
//! callback chain, the same way the reconcile loop this is grounded on
//! drives restarts off an explicit decision tree instead of nested
//! callbacks.

use async_trait::async_trait;
use dbrig_common::error::{DbrigError, DbrigResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{info, warn};

const GRACEFUL_POLL_INTERVAL: Duration = Duration::from_millis(200);
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);
const SIGNALED_TIMEOUT: Duration = Duration::from_secs(2);
const SIGNALED_TIMEOUT_WINDOWS_MMAP: Duration = Duration::from_secs(5);
const FORCED_WINDOWS_HANDLE_WAIT: Duration = Duration::from_secs(3);

/// Explicit shutdown state machine. `Idle` is both the starting and the
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Graceful,
    Signaled,
    Forced,
}

/// Engine-specific "ask nicely" shutdown: issues the documented quiescence
/// command (a client-tool invocation, a protocol-level shutdown request,
/// …). Returning `false` just means the command couldn't be issued — the
/// state machine still proceeds to `Signaled`/`Forced` based on whether the
/// process is actually still alive.
#[async_trait]
pub trait GracefulShutdown: Send + Sync {
    async fn request_shutdown(&self) -> bool;
}

/// Engine-specific readiness probe: a short-timeout client-tool ping,
/// polled repeatedly by [`start`].
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Everything needed to spawn one engine process detached.
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    /// True when the engine itself writes its PID file (trusted as-is);
    /// false means the supervisor writes the spawned PID.
    pub engine_writes_pid: bool,
    /// True for engines whose bundled binary may re-fork after start
    /// (Cygwin-built servers, daemonizing processes) — after readiness, the
    /// supervisor re-discovers the real PID via the bound port.
    pub may_refork: bool,
    pub readiness_poll_interval: Duration,
    pub start_timeout: Duration,
}

pub struct StartOutcome {
    pub pid: u32,
    pub already_running: bool,
}

/// `isRunning` / the read half of `status`: true iff the PID file names a
/// live process. Authoritative per the Container invariant that `status` is
/// advisory and the supervisor is source of truth.
pub async fn is_running(pid_file: &Path) -> bool {
    match read_pid_file(pid_file).await {
        Some(pid) => dbrig_platform::is_process_alive(pid).await,
        None => false,
    }
}

pub struct StatusReport {
    pub running: bool,
    pub message: String,
}

pub async fn status(pid_file: &Path) -> StatusReport {
    match read_pid_file(pid_file).await {
        None => StatusReport {
            running: false,
            message: "not running (no pid file)".to_string(),
        },
        Some(pid) => {
            if dbrig_platform::is_process_alive(pid).await {
                StatusReport {
                    running: true,
                    message: format!("running (pid {pid})"),
                }
            } else {
                StatusReport {
                    running: false,
                    message: format!("not running (stale pid file for pid {pid})"),
                }
            }
        }
    }
}

/// `start(engine, container)`. Idempotent: if the container is already
/// running, returns the existing PID without spawning a second process.
pub async fn start(
    spec: &SpawnSpec,
    readiness: &dyn ReadinessProbe,
    port_for_refork_lookup: Option<u16>,
) -> DbrigResult<StartOutcome> {
    if let Some(pid) = read_pid_file(&spec.pid_file).await {
        if dbrig_platform::is_process_alive(pid).await {
            return Ok(StartOutcome {
                pid,
                already_running: true,
            });
        }
    }

    if let Some(parent) = spec.pid_file.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_file)
        .await
        .map_err(|err| {
            DbrigError::dependency_missing(
                format!("could not open log file: {err}"),
                "check permissions on the container directory",
            )
        })?;
    let log_stderr = log.try_clone().await.map_err(|err| {
        DbrigError::dependency_missing(
            format!("could not duplicate log handle: {err}"),
            "check permissions on the container directory",
        )
    })?;

    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    for (k, v) in &spec.env {
        command.env(k, v);
    }
    command
        .stdin(std::process::Stdio::null())
        .stdout(log.into_std().await)
        .stderr(log_stderr.into_std().await)
        .kill_on_drop(false);

    let mut child = command.spawn().map_err(|err| {
        DbrigError::dependency_missing(
            format!("failed to spawn {}: {err}", spec.program.display()),
            "verify the engine binary is installed and executable",
        )
    })?;

    let spawned_pid = child.id().ok_or_else(|| {
        DbrigError::dependency_missing(
            "spawned process has no pid (already exited)",
            "retry start; if this persists the binary may be broken",
        )
    })?;

    if !spec.engine_writes_pid {
        write_pid_file(&spec.pid_file, spawned_pid).await?;
    }

    let ready = race_readiness_against_exit(&mut child, readiness, spec.readiness_poll_interval, spec.start_timeout).await;

    match ready {
        ReadinessRace::Ready => {
            let mut final_pid = spawned_pid;
            if spec.may_refork {
                if let Some(port) = port_for_refork_lookup {
                    if let Some(real_pid) = dbrig_platform::find_process_by_port(port).await.first().copied() {
                        if real_pid != spawned_pid {
                            info!(spawned_pid, real_pid, "re-forked binary detected, updating pid file");
                            final_pid = real_pid;
                            write_pid_file(&spec.pid_file, final_pid).await?;
                        }
                    }
                }
            }
            Ok(StartOutcome {
                pid: final_pid,
                already_running: false,
            })
        }
        ReadinessRace::ExitedEarly(code) => {
            let _ = cleanup_pid_file(&spec.pid_file).await;
            Err(DbrigError::connection_failed(format!(
                "{} exited during startup (code {code:?})",
                spec.program.display()
            )))
        }
        ReadinessRace::TimedOut => {
            escalate_stop(spawned_pid, &spec.pid_file, false).await;
            Err(DbrigError::process_stop_timeout(
                spec.program.display().to_string(),
                spawned_pid,
            ))
        }
    }
}

enum ReadinessRace {
    Ready,
    ExitedEarly(Option<i32>),
    TimedOut,
}

async fn race_readiness_against_exit(
    child: &mut Child,
    readiness: &dyn ReadinessProbe,
    poll_interval: Duration,
    timeout: Duration,
) -> ReadinessRace {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return ReadinessRace::TimedOut;
        }
        tokio::select! {
            exit = child.wait() => {
                let code = exit.ok().and_then(|status| status.code());
                return ReadinessRace::ExitedEarly(code);
            }
            _ = tokio::time::sleep(poll_interval) => {
                if readiness.probe().await {
                    return ReadinessRace::Ready;
                }
            }
        }
    }
}

/// `stop(engine, container)`: the `Idle -> Graceful -> Signaled -> Forced`
/// escalation. A no-op (and PID-file-free) when nothing is running, per
/// testable property 7.
pub async fn stop(
    pid_file: &Path,
    graceful: &dyn GracefulShutdown,
    container_name: &str,
    windows_mmap_engine: bool,
) -> DbrigResult<()> {
    let Some(pid) = read_pid_file(pid_file).await else {
        return Ok(());
    };
    if !dbrig_platform::is_process_alive(pid).await {
        let _ = cleanup_pid_file(pid_file).await;
        return Ok(());
    }

    let _ = graceful.request_shutdown().await;
    if !poll_until_dead(pid, GRACEFUL_TIMEOUT, GRACEFUL_POLL_INTERVAL).await {
        let _ = cleanup_pid_file(pid_file).await;
        return Ok(());
    }

    signaled_then_forced(pid, pid_file, container_name, windows_mmap_engine).await
}

async fn signaled_then_forced(
    pid: u32,
    pid_file: &Path,
    container_name: &str,
    windows_mmap_engine: bool,
) -> DbrigResult<()> {
    let signaled_wait = if cfg!(windows) && windows_mmap_engine {
        SIGNALED_TIMEOUT_WINDOWS_MMAP
    } else {
        SIGNALED_TIMEOUT
    };
    let _ = dbrig_platform::terminate_process(pid, false).await;
    if !poll_until_dead(pid, signaled_wait, GRACEFUL_POLL_INTERVAL).await {
        let _ = cleanup_pid_file(pid_file).await;
        return Ok(());
    }

    let _ = dbrig_platform::terminate_process(pid, true).await;
    if cfg!(windows) {
        tokio::time::sleep(FORCED_WINDOWS_HANDLE_WAIT).await;
    }
    if dbrig_platform::is_process_alive(pid).await {
        warn!(pid, container_name, "process survived forced termination");
        return Err(DbrigError::process_stop_timeout(container_name, pid));
    }
    let _ = cleanup_pid_file(pid_file).await;
    Ok(())
}

/// Synchronously-shaped escalation used when [`start`] times out and has to
/// drive the half-started child through the same shutdown path as an
/// explicit `stop`, so no PID file is left behind after a cancelled start.
async fn escalate_stop(pid: u32, pid_file: &Path, windows_mmap_engine: bool) {
    if !dbrig_platform::is_process_alive(pid).await {
        let _ = cleanup_pid_file(pid_file).await;
        return;
    }
    let _ = signaled_then_forced(pid, pid_file, "startup-timeout", windows_mmap_engine).await;
}

async fn poll_until_dead(pid: u32, timeout: Duration, interval: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !dbrig_platform::is_process_alive(pid).await {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
    dbrig_platform::is_process_alive(pid).await
}

async fn read_pid_file(pid_file: &Path) -> Option<u32> {
    let contents = tokio::fs::read_to_string(pid_file).await.ok()?;
    contents.trim().parse().ok()
}

async fn write_pid_file(pid_file: &Path, pid: u32) -> DbrigResult<()> {
    if let Some(parent) = pid_file.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let mut file = tokio::fs::File::create(pid_file).await.map_err(|err| {
        DbrigError::dependency_missing(
            format!("could not write pid file: {err}"),
            "check permissions on the container directory",
        )
    })?;
    file.write_all(pid.to_string().as_bytes())
        .await
        .map_err(|err| {
            DbrigError::dependency_missing(
                format!("could not write pid file: {err}"),
                "check permissions on the container directory",
            )
        })
}

async fn cleanup_pid_file(pid_file: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(pid_file).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysReady;
    #[async_trait]
    impl ReadinessProbe for AlwaysReady {
        async fn probe(&self) -> bool {
            true
        }
    }

    struct NeverReady;
    #[async_trait]
    impl ReadinessProbe for NeverReady {
        async fn probe(&self) -> bool {
            false
        }
    }

    struct NoopGraceful;
    #[async_trait]
    impl GracefulShutdown for NoopGraceful {
        async fn request_shutdown(&self) -> bool {
            true
        }
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dbrig-supervisor-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn stop_on_nonexistent_pid_file_is_a_noop() {
        let dir = test_dir("stop-noop");
        let pid_file = dir.join("engine.pid");
        let result = stop(&pid_file, &NoopGraceful, "test", false).await;
        assert!(result.is_ok());
        assert!(!pid_file.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn start_is_idempotent_for_an_already_running_pid() {
        let dir = test_dir("start-idempotent");
        let pid_file = dir.join("engine.pid");
        // `sleep 5` stands in for a long-running engine process in this test.
        let spec = SpawnSpec {
            program: PathBuf::from("sleep"),
            args: vec!["5".to_string()],
            working_dir: None,
            env: vec![],
            log_file: dir.join("engine.log"),
            pid_file: pid_file.clone(),
            engine_writes_pid: false,
            may_refork: false,
            readiness_poll_interval: Duration::from_millis(10),
            start_timeout: Duration::from_secs(2),
        };
        let first = start(&spec, &AlwaysReady, None).await.unwrap();
        assert!(!first.already_running);

        let second = start(&spec, &AlwaysReady, None).await.unwrap();
        assert!(second.already_running);
        assert_eq!(second.pid, first.pid);

        let _ = dbrig_platform::terminate_process(first.pid, true).await;
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn start_times_out_when_never_ready() {
        let dir = test_dir("start-timeout");
        let pid_file = dir.join("engine.pid");
        let spec = SpawnSpec {
            program: PathBuf::from("sleep"),
            args: vec!["5".to_string()],
            working_dir: None,
            env: vec![],
            log_file: dir.join("engine.log"),
            pid_file: pid_file.clone(),
            engine_writes_pid: false,
            may_refork: false,
            readiness_poll_interval: Duration::from_millis(10),
            start_timeout: Duration::from_millis(100),
        };
        let result = start(&spec, &NeverReady, None).await;
        assert!(result.is_err());
        assert!(!pid_file.exists(), "pid file must be cleaned up after a timed-out start");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
