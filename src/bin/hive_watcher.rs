// Hive Supervisor (§4.J)
//
// A separate, deliberately tiny process: writes its own pid file, then every
// SUPERVISOR_POLL_INTERVAL_SECS checks whether the daemon is alive and its
// heartbeat is fresh, restarting it if not. Grounded on the same
// `tokio::process::Command` spawn/pipe idiom the teacher uses for its MCP
// stdio transport (`engine/mcp/transport.rs`) and Docker helper
// (`engine/whatsapp/docker.rs`), scaled down to "spawn one child, forward
// its output, poll its liveness" since there's no bidirectional protocol to
// speak here.

use hive::atoms::constants::{
    HEARTBEAT_STALE_SECS, SUPERVISOR_POLL_INTERVAL_SECS, SUPERVISOR_SIGTERM_GRACE_SECS,
};
use hive::daemon::Runtime;
use log::{info, warn, LevelFilter};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;

#[tokio::main]
async fn main() {
    let home = match Runtime::resolve_home() {
        Ok(home) => home,
        Err(err) => {
            eprintln!("hive-watcher: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = std::fs::create_dir_all(&home) {
        eprintln!("hive-watcher: could not create home dir {home:?}: {err}");
        std::process::exit(1);
    }

    let log_level = std::env::var("HIVE_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let echo_stderr = std::env::var("HIVE_FOREGROUND").is_ok();
    if let Err(err) = hive::logging::init(home.join("daemon.log"), echo_stderr, log_level) {
        eprintln!("hive-watcher: failed to initialize logging: {err}");
    }

    let watcher_pid_path = home.join("daemon.watcher.pid");
    if let Err(err) = std::fs::write(&watcher_pid_path, std::process::id().to_string()) {
        warn!(target: "watcher", "could not write watcher pid file: {err}");
    }

    let stop_sentinel = home.join("daemon.stop");
    let mut ticker = tokio::time::interval(Duration::from_secs(SUPERVISOR_POLL_INTERVAL_SECS));
    loop {
        ticker.tick().await;

        if stop_sentinel.exists() {
            info!(target: "watcher", "stop sentinel present, exiting without spawning");
            break;
        }

        if daemon_is_healthy(&home) {
            continue;
        }

        warn!(target: "watcher", "daemon unhealthy or not running, restarting");
        if let Some(pid) = read_pid(&home.join("daemon.pid")) {
            terminate_daemon(pid).await;
        }
        spawn_daemon(&home);
    }

    let _ = std::fs::remove_file(&watcher_pid_path);
}

/// True if the daemon's pid is alive and its heartbeat was touched within
/// `HEARTBEAT_STALE_SECS`. A missing pid file or heartbeat file counts as
/// unhealthy.
fn daemon_is_healthy(home: &Path) -> bool {
    let Some(pid) = read_pid(&home.join("daemon.pid")) else {
        return false;
    };
    if !process_alive(pid) {
        return false;
    }
    let Ok(metadata) = std::fs::metadata(home.join("heartbeat")) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::from_secs(u64::MAX));
    age <= Duration::from_secs(HEARTBEAT_STALE_SECS)
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // `kill -0` sends no signal; it only probes existence/permission —
    // the standard Unix liveness check, shelled out the same way the
    // teacher's `tailscale`/`mail` command helpers run a one-shot child
    // and inspect its exit status rather than linking a signals crate.
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_alive(pid: u32) -> bool {
    // Best-effort: without a signal-0 probe, fall back to trusting a
    // present pid file. The heartbeat staleness check still catches hangs.
    pid != 0
}

#[cfg(unix)]
async fn terminate_daemon(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();
    tokio::time::sleep(Duration::from_secs(SUPERVISOR_SIGTERM_GRACE_SECS)).await;
    if process_alive(pid) {
        warn!(target: "watcher", "daemon {pid} still alive after grace period, sending SIGKILL");
        let _ = std::process::Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status();
    }
}

#[cfg(not(unix))]
async fn terminate_daemon(_pid: u32) {
    tokio::time::sleep(Duration::from_secs(SUPERVISOR_SIGTERM_GRACE_SECS)).await;
}

/// Spawn a fresh `hived`, preserving `HIVE_HOME` so the child binds the
/// same home directory this watcher is supervising, and forwarding its
/// stdout/stderr into the daemon log rather than the watcher's own.
fn spawn_daemon(home: &Path) {
    let exe = daemon_exe_path();
    let log_path = home.join("daemon.log");
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(err) => {
            warn!(target: "watcher", "could not open daemon log for child stdout: {err}");
            return;
        }
    };
    let log_file_err = match log_file.try_clone() {
        Ok(file) => file,
        Err(err) => {
            warn!(target: "watcher", "could not clone daemon log handle: {err}");
            return;
        }
    };

    let mut command = Command::new(exe);
    command
        .env("HIVE_HOME", home)
        .stdout(std::process::Stdio::from(log_file))
        .stderr(std::process::Stdio::from(log_file_err))
        .stdin(std::process::Stdio::null());

    match command.spawn() {
        Ok(mut child) => {
            info!(target: "watcher", "spawned daemon pid {:?}", child.id());
            // Detach: the watcher supervises by polling the pid file/heartbeat,
            // not by holding a `Child` handle across ticks.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        Err(err) => warn!(target: "watcher", "failed to spawn daemon: {err}"),
    }
}

fn daemon_exe_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join("hived")))
        .unwrap_or_else(|| PathBuf::from("hived"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_pid_parses_trimmed_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, "12345\n").unwrap();
        assert_eq!(read_pid(&path), Some(12345));
    }

    #[test]
    fn read_pid_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_pid(&dir.path().join("nope")), None);
    }

    #[test]
    fn daemon_unhealthy_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!daemon_is_healthy(dir.path()));
    }

    #[test]
    fn daemon_unhealthy_with_stale_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("daemon.pid"), std::process::id().to_string()).unwrap();
        let heartbeat = dir.path().join("heartbeat");
        std::fs::write(&heartbeat, "0").unwrap();
        let stale_time = SystemTime::now() - Duration::from_secs(HEARTBEAT_STALE_SECS + 10);
        let file = std::fs::File::open(&heartbeat).unwrap();
        file.set_modified(stale_time).unwrap();
        assert!(!daemon_is_healthy(dir.path()));
    }

    #[test]
    fn daemon_healthy_with_fresh_heartbeat_and_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("daemon.pid"), std::process::id().to_string()).unwrap();
        std::fs::write(dir.path().join("heartbeat"), "0").unwrap();
        assert!(daemon_is_healthy(dir.path()));
    }
}
