//! Pidfile management and signaling of a running supervisor.
//!
//! The pidfile holds a single integer and a trailing newline. Liveness is
//! probed with signal 0; a pidfile whose process is gone is treated the
//! same as no pidfile at all.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{BrimError, Result};

/// How long a signaled process gets to disappear before we give up.
const PID_WAIT: Duration = Duration::from_secs(15);

fn pidfile_error(path: &Path, message: impl Into<String>) -> BrimError {
    BrimError::Pidfile {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// The pid recorded in the file, if the file exists and holds an integer.
pub fn read_pid(path: &Path) -> Option<Pid> {
    let text = fs::read_to_string(path).ok()?;
    // Pidfiles without an integer are simply ignored.
    text.trim().parse::<i32>().ok().map(Pid::from_raw)
}

/// Whether the process is still around, by signal 0.
pub fn is_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

/// The recorded pid, but only if that process is still alive.
pub fn live_pid(path: &Path) -> Option<Pid> {
    read_pid(path).filter(|pid| is_alive(*pid))
}

/// Fail if the pidfile names a live process.
pub fn check_not_running(path: &Path) -> Result<()> {
    match live_pid(path) {
        Some(pid) => Err(pidfile_error(path, format!("{pid} already running"))),
        None => Ok(()),
    }
}

/// Fail early if the pidfile could not be created later.
pub fn ensure_writable(path: &Path) -> Result<()> {
    fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map(|_| ())
        .map_err(|err| pidfile_error(path, err.to_string()))
}

/// Record a pid. Written exactly once per supervisor start.
pub fn write(path: &Path, pid: Pid) -> Result<()> {
    fs::write(path, format!("{pid}\n")).map_err(|err| pidfile_error(path, err.to_string()))
}

pub fn remove(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Send a signal to the recorded process if it is alive. Returns the pid
/// the signal went to, or `None` when nothing is running.
pub fn signal_running(path: &Path, signal: Signal) -> Result<Option<Pid>> {
    let Some(pid) = live_pid(path) else {
        return Ok(None);
    };
    match kill(pid, signal) {
        Ok(()) => Ok(Some(pid)),
        Err(nix::errno::Errno::ESRCH) => Ok(None),
        Err(err) => Err(pidfile_error(path, format!("could not signal {pid}: {err}"))),
    }
}

/// Signal the recorded process and wait for it to exit, then remove the
/// pidfile. Returns the pid that exited, or `None` when nothing was
/// running.
pub fn signal_and_wait(path: &Path, signal: Signal) -> Result<Option<Pid>> {
    let Some(pid) = signal_running(path, signal)? else {
        return Ok(None);
    };
    let deadline = Instant::now() + PID_WAIT;
    while is_alive(pid) {
        if Instant::now() >= deadline {
            return Err(pidfile_error(
                path,
                format!("{pid} did not exit after {} seconds", PID_WAIT.as_secs()),
            ));
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    remove(path);
    Ok(Some(pid))
}
