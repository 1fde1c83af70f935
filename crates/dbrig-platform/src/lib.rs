//! Platform Service: OS-specific facts and probes, as free functions rather
//! than a stateful struct — there is no per-call state to own, the same
//! shape as a host-facts utility module.

use dbrig_common::platform::PlatformTuple;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// `getPlatformInfo()`. `None` means the host isn't one of
/// {darwin,linux,win32} x {x64,arm64}; callers should fail with
/// `UNSUPPORTED_PLATFORM`.
pub fn get_platform_info() -> Option<PlatformTuple> {
    PlatformTuple::current()
}

/// `.exe` on win32, empty otherwise.
pub fn executable_extension() -> &'static str {
    match get_platform_info() {
        Some(p) => p.executable_extension(),
        None => "",
    }
}

/// Search `PATH` for an executable named `name` (with the platform's
/// extension already applied by the caller if relevant), returning the first
/// match that is actually executable. Never fails — "not found" is `None`,
/// per the Platform Service's one carve-out from "failures are reported,
/// never swallowed".
pub fn find_tool_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(path) {
            Ok(meta) => meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// `isPortAvailable(port)`: attempts a short-lived bind on 127.0.0.1. The
/// listener is dropped immediately, releasing the port back to the OS.
pub async fn is_port_available(port: u16) -> bool {
    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .is_ok()
}

/// `findProcessByPort(port)`: shells out to `lsof` on POSIX (falling back to
/// `ss` if `lsof` is unavailable) and to `netstat` on Windows, parsing
/// line-oriented tool output the same way the docker-ps tab-separated
/// parsing in the supervisor layer works.
pub async fn find_process_by_port(port: u16) -> Vec<u32> {
    if cfg!(windows) {
        find_process_by_port_windows(port).await
    } else {
        find_process_by_port_posix(port).await
    }
}

async fn find_process_by_port_posix(port: u16) -> Vec<u32> {
    let lsof = Command::new("lsof")
        .args(["-t", "-i", &format!(":{port}")])
        .output()
        .await;
    if let Ok(output) = lsof {
        if output.status.success() {
            return String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|l| l.trim().parse().ok())
                .collect();
        }
    }
    debug!(port, "lsof unavailable or found nothing, falling back to ss");
    let ss = Command::new("ss").args(["-ltnp"]).output().await;
    let Ok(output) = ss else {
        warn!(port, "neither lsof nor ss available to locate bound process");
        return Vec::new();
    };
    let needle = format!(":{port} ");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| line.contains(&needle))
        .filter_map(|line| {
            let pid_marker = line.split("pid=").nth(1)?;
            pid_marker
                .split(|c: char| !c.is_ascii_digit())
                .next()
                .and_then(|s| s.parse().ok())
        })
        .collect()
}

async fn find_process_by_port_windows(port: u16) -> Vec<u32> {
    let output = Command::new("netstat").args(["-ano"]).output().await;
    let Ok(output) = output else {
        warn!(port, "netstat unavailable to locate bound process");
        return Vec::new();
    };
    let needle = format!(":{port}");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| line.contains(&needle))
        .filter_map(|line| line.split_whitespace().last())
        .filter_map(|pid| pid.parse().ok())
        .collect()
}

/// `isProcessAlive(pid)`.
pub async fn is_process_alive(pid: u32) -> bool {
    if cfg!(windows) {
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}")])
            .output()
            .await;
        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()),
            Err(_) => false,
        }
    } else {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// `terminateProcess(pid, force)`: graceful signal (`SIGTERM`/non-forceful
/// `taskkill`) or forced termination, depending on OS and `force`.
pub async fn terminate_process(pid: u32, force: bool) -> std::io::Result<()> {
    if cfg!(windows) {
        let mut args = vec!["/PID".to_string(), pid.to_string()];
        if force {
            args.push("/F".to_string());
        }
        Command::new("taskkill").args(&args).output().await?;
    } else {
        let signal = if force { "-KILL" } else { "-TERM" };
        Command::new("kill")
            .args([signal, &pid.to_string()])
            .output()
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn port_becomes_unavailable_while_bound() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(port).await);
        drop(listener);
        assert!(is_port_available(port).await);
    }

    #[test]
    fn find_tool_on_path_returns_none_for_nonsense_name() {
        assert!(find_tool_on_path("definitely-not-a-real-binary-xyz").is_none());
    }
}
