// ABOUTME: Child process supervision: process-group spawning, escalating stop, liveness.
// ABOUTME: Children run in their own process group so signals reach the whole tree.

use crate::error::Result;
use std::time::Duration;
use tokio::process::Command;

const STOP_GRACE: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(200);

/// Start a child in its own process group and return its pid.
///
/// The child handle is parked on a background task that waits for exit,
/// so the kernel entry is reaped even when nobody calls `stop`.
pub fn start(mut cmd: Command) -> Result<u32> {
    cmd.process_group(0);
    let mut child = cmd.spawn()?;
    let pid = child.id().expect("freshly spawned child has a pid");

    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    Ok(pid)
}

/// Stop a process: SIGTERM to its process group (falling back to the single
/// pid), wait up to ten seconds, then SIGKILL the group. A process that is
/// already gone counts as stopped.
pub async fn stop(pid: u32) {
    signal_group(pid, libc::SIGTERM);

    let deadline = tokio::time::Instant::now() + STOP_GRACE;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            return;
        }
        tokio::time::sleep(STOP_POLL).await;
    }

    signal_group(pid, libc::SIGKILL);
}

/// Liveness probe: signal 0 succeeds iff the pid exists.
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Deliver a signal to the process group of `pid`, or to `pid` alone if the
/// group cannot be determined. "No such process" is swallowed.
fn signal_group(pid: u32, signal: libc::c_int) {
    unsafe {
        let pgid = libc::getpgid(pid as libc::pid_t);
        if pgid > 0 {
            libc::killpg(pgid, signal);
        } else {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_liveness() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let pid = start(cmd).unwrap();
        assert!(is_alive(pid));

        stop(pid).await;
        // Give the kernel a beat to finish the exit.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn stop_of_dead_pid_is_silent() {
        let mut cmd = Command::new("true");
        cmd.stdout(std::process::Stdio::null());
        let pid = start(cmd).unwrap();
        // Let it exit on its own first.
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop(pid).await;
    }

    #[tokio::test]
    async fn stop_kills_the_whole_group() {
        // A shell that spawns a grandchild; stopping the shell must take
        // the grandchild down with it.
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & wait"]);
        let pid = start(cmd).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(is_alive(pid));

        stop(pid).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!is_alive(pid));
    }
}
