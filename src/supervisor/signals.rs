//! Parent-side signal recording.
//!
//! Handlers only store the signal number; the supervisor loop picks it up
//! on its next tick. Children reset everything to the default disposition
//! right after fork, before their own runtime installs its handlers.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{BrimError, Result};

static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// What the parent should do about the last signal received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentSignal {
    /// TERM/INT: signal children, wait out the grace, escalate to KILL.
    Shutdown,
    /// QUIT: release the listeners first, then drain within the grace.
    GracefulShutdown,
    /// HUP: full restart of all workers under the same plan.
    Restart,
}

extern "C" fn record(signum: libc::c_int) {
    LAST_SIGNAL.store(signum, Ordering::SeqCst);
}

const HANDLED: [Signal; 4] = [
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGHUP,
];

/// Install the recording handlers in the parent.
pub fn install_parent_handlers() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(record), SaFlags::empty(), SigSet::empty());
    for signal in HANDLED {
        // SAFETY: `record` only performs an atomic store, which is
        // async-signal-safe.
        unsafe { sigaction(signal, &action) }.map_err(|err| {
            BrimError::Supervisor(format!("could not install {signal} handler: {err}"))
        })?;
    }
    Ok(())
}

/// Restore default dispositions in a freshly forked child.
pub fn reset_child_handlers() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in HANDLED {
        // SAFETY: restoring the default disposition.
        let _ = unsafe { sigaction(signal, &action) };
    }
}

/// Consume the most recent signal, if any.
pub fn take() -> Option<ParentSignal> {
    match LAST_SIGNAL.swap(0, Ordering::SeqCst) {
        0 => None,
        n if n == Signal::SIGHUP as i32 => Some(ParentSignal::Restart),
        n if n == Signal::SIGQUIT as i32 => Some(ParentSignal::GracefulShutdown),
        _ => Some(ParentSignal::Shutdown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_the_signal() {
        LAST_SIGNAL.store(Signal::SIGHUP as i32, Ordering::SeqCst);
        assert_eq!(take(), Some(ParentSignal::Restart));
        assert_eq!(take(), None);

        LAST_SIGNAL.store(Signal::SIGTERM as i32, Ordering::SeqCst);
        assert_eq!(take(), Some(ParentSignal::Shutdown));

        LAST_SIGNAL.store(Signal::SIGQUIT as i32, Ordering::SeqCst);
        assert_eq!(take(), Some(ParentSignal::GracefulShutdown));
    }
}
