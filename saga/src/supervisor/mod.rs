//! Daemon process supervision.
//!
//! The inference daemons are co-tenant OS processes that must outlive the
//! short-lived contract rounds. Coordination is PID-file + signal-0 probe:
//! adopt a live daemon without connecting (it may be deep in model load),
//! spawn a new one otherwise, and never kill a live process at round end.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{info, warn};

use crate::types::{Result, SagaError};

/// How a daemon binary is launched and tracked.
#[derive(Debug, Clone)]
pub struct DaemonSpec {
    pub label: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub pid_file: PathBuf,
}

/// Result of a supervision pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonHandle {
    /// A live daemon from a previous round was adopted.
    Adopted(i32),
    /// A new daemon process was started this round.
    Spawned(i32),
}

impl DaemonHandle {
    pub fn pid(self) -> i32 {
        match self {
            DaemonHandle::Adopted(pid) | DaemonHandle::Spawned(pid) => pid,
        }
    }
}

/// Signal-0 liveness probe.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

fn read_pid(pid_file: &Path) -> Option<i32> {
    let raw = std::fs::read_to_string(pid_file).ok()?;
    raw.trim().parse().ok()
}

/// Guarantee one live daemon for this launch spec, across consecutive rounds.
pub async fn ensure_running(spec: &DaemonSpec) -> Result<DaemonHandle> {
    if let Some(pid) = read_pid(&spec.pid_file) {
        if process_alive(pid) {
            // Do not connect: the daemon may still be loading the model.
            info!(daemon = %spec.label, pid, "adopting existing daemon");
            return Ok(DaemonHandle::Adopted(pid));
        }
        info!(daemon = %spec.label, pid, "removing stale PID file");
        let _ = std::fs::remove_file(&spec.pid_file);
    }

    if !spec.binary.exists() {
        return Err(SagaError::Supervisor(format!(
            "daemon binary not found: {}",
            spec.binary.display()
        )));
    }

    info!(daemon = %spec.label, binary = %spec.binary.display(), "starting daemon");
    let mut child = Command::new(&spec.binary)
        .args(&spec.args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| SagaError::Supervisor(format!("spawn failed: {e}")))?;

    let pid = child.id() as i32;
    std::fs::write(&spec.pid_file, pid.to_string())?;

    // Give it a moment to come up; socket readiness may follow much later
    // during model loading, which is fine. try_wait (not signal-0) so an
    // already-exited child is reaped instead of lingering as a zombie.
    tokio::time::sleep(Duration::from_millis(500)).await;

    match child.try_wait() {
        Ok(Some(status)) => {
            let _ = std::fs::remove_file(&spec.pid_file);
            Err(SagaError::Supervisor(format!(
                "daemon {} exited immediately after spawn ({status})",
                spec.label
            )))
        }
        Ok(None) => {
            info!(daemon = %spec.label, pid, "daemon started");
            Ok(DaemonHandle::Spawned(pid))
        }
        Err(e) => {
            warn!(daemon = %spec.label, pid, error = %e, "spawn probe failed, assuming alive");
            Ok(DaemonHandle::Spawned(pid))
        }
    }
}

/// Remove PID-file evidence of a daemon, but ONLY when the process is
/// confirmed dead — a live daemon mid-model-load must not be disturbed.
pub fn cleanup_if_dead(spec: &DaemonSpec) {
    let Some(pid) = read_pid(&spec.pid_file) else {
        return;
    };
    if process_alive(pid) {
        warn!(daemon = %spec.label, pid, "daemon still alive, skipping cleanup");
        return;
    }
    info!(daemon = %spec.label, pid, "confirmed dead, removing PID file");
    let _ = std::fs::remove_file(&spec.pid_file);
}
