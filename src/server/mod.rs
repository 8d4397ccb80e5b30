//! In-worker dispatch loops.
//!
//! # Data Flow
//! ```text
//! supervisor forks a worker
//!     → worker builds a current-thread tokio runtime
//!     → http.rs / tcp.rs / udp.rs: inherited socket → accept/recv loop,
//!       one lightweight task per request, connection, or datagram
//!     → daemon.rs: constructs the daemon and invokes it once
//! ```
//!
//! # Design Decisions
//! - One single-threaded runtime per worker: tasks suspend on I/O, sleeps,
//!   and explicit yields, and are never preempted
//! - Shutdown is delivered as a watch flag: forked workers flip it from
//!   SIGTERM, zero-worker loops running inside the parent get it flipped
//!   by the supervisor directly
//! - Worker loops return `Ok(())` only for a cooperative shutdown; any
//!   other return restarts the worker
//! - Every accepted socket is owned by exactly one task and closed on all
//!   exit paths

pub mod daemon;
pub mod http;
pub mod tcp;
pub mod udp;

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{watch, Semaphore};

use crate::error::{BrimError, Result};

/// Build the single-threaded runtime a worker runs its loop on.
pub(crate) fn worker_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| BrimError::Supervisor(format!("could not build worker runtime: {err}")))
}

/// A shutdown flag flipped by SIGTERM. Must be called inside a runtime.
pub(crate) fn term_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                let _ = tx.send(true);
            }
            Err(err) => {
                tracing::error!(error = %err, "could not watch for shutdown");
            }
        }
    });
    rx
}

/// Wait up to `grace` for every outstanding task permit to come back.
pub(crate) async fn drain(semaphore: Arc<Semaphore>, total: usize, grace: Duration) {
    let _ = tokio::time::timeout(grace, semaphore.acquire_many(total as u32)).await;
}
