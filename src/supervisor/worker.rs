//! Worker supervision: fork, reap, classify, restart with backoff.
//!
//! # Responsibilities
//! - Maintain exactly one live child per worker slot (N per listener
//!   sub-instance, one per daemon)
//! - Classify exits: a zero status paired with a byte on the slot's
//!   cooperation pipe is a requested shutdown and is not restarted;
//!   everything else restarts with exponential backoff
//! - Forward SIGTERM to every live child at shutdown, escalate to SIGKILL
//!   after the grace period, and reap everything
//! - Run zero-worker sub-instances on threads inside the parent process
//!
//! # Design Decisions
//! - Reaping polls `waitpid(WNOHANG)` on a short tick; the same tick drives
//!   pending backoff restarts
//! - Backoff starts at one second, doubles to a minute, and resets once a
//!   child has stayed alive for a minute

use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};
use tokio::sync::watch;

use crate::config::plan::{LaunchPlan, SubKind};
use crate::error::{BrimError, Result};
use crate::handlers::FactoryRegistry;
use crate::server;
use crate::stats::{epoch_secs, BucketStats, StatsSet};
use crate::supervisor::signals::{self, ParentSignal};

/// Supervisor loop tick.
const TICK: Duration = Duration::from_millis(100);

/// First restart delay.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling for the restart delay.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// A child alive at least this long resets its backoff.
const STABLE_AFTER: Duration = Duration::from_secs(60);

/// A listening socket acquired before the privilege drop.
#[derive(Debug)]
pub enum BoundSocket {
    Tcp(std::net::TcpListener),
    Udp(std::net::UdpSocket),
}

impl BoundSocket {
    /// Duplicate the descriptor for handing into a worker.
    pub fn try_clone(&self) -> std::io::Result<BoundSocket> {
        match self {
            BoundSocket::Tcp(listener) => listener.try_clone().map(BoundSocket::Tcp),
            BoundSocket::Udp(socket) => socket.try_clone().map(BoundSocket::Udp),
        }
    }
}

/// What a slot's child process runs.
#[derive(Debug, Clone, Copy)]
enum SlotTask {
    Worker { sub: usize, index: usize },
    Daemon { index: usize },
}

/// How a child ended.
#[derive(Debug, Clone, Copy)]
enum ExitKind {
    Code(i32),
    Signal(Signal),
}

struct Slot {
    task: SlotTask,
    pid: Option<Pid>,
    /// Read end of the cooperation pipe; the child writes one byte before a
    /// requested exit.
    coop: Option<std::fs::File>,
    consecutive_restarts: u32,
    started: Instant,
    restart_at: Option<Instant>,
    retired: bool,
}

/// Restart delay for the k-th consecutive restart.
fn backoff_delay(consecutive_restarts: u32) -> Duration {
    let secs = BACKOFF_BASE.as_secs() << consecutive_restarts.min(6);
    Duration::from_secs(secs.min(BACKOFF_CAP.as_secs()))
}

/// The parent controller's supervision engine.
pub struct Supervisor {
    plan: Arc<LaunchPlan>,
    registry: Arc<FactoryRegistry>,
    sockets: Vec<BoundSocket>,
    set: StatsSet,
    slots: Vec<Slot>,
    daemon_group: Option<usize>,
    inparent: Vec<(watch::Sender<bool>, std::thread::JoinHandle<()>)>,
    shutting_down: bool,
}

impl Supervisor {
    pub fn new(
        plan: Arc<LaunchPlan>,
        registry: Arc<FactoryRegistry>,
        sockets: Vec<BoundSocket>,
        set: StatsSet,
    ) -> Self {
        let mut slots = Vec::new();
        for (sub, instance) in plan.subs.iter().enumerate() {
            for index in 0..instance.workers {
                slots.push(Slot {
                    task: SlotTask::Worker { sub, index },
                    pid: None,
                    coop: None,
                    consecutive_restarts: 0,
                    started: Instant::now(),
                    restart_at: None,
                    retired: false,
                });
            }
        }
        for index in 0..plan.daemons.daemons.len() {
            slots.push(Slot {
                task: SlotTask::Daemon { index },
                pid: None,
                coop: None,
                consecutive_restarts: 0,
                started: Instant::now(),
                restart_at: None,
                retired: false,
            });
        }
        let daemon_group = (!plan.daemons.daemons.is_empty()).then(|| plan.subs.len());
        Self {
            plan,
            registry,
            sockets,
            set,
            slots,
            daemon_group,
            inparent: Vec::new(),
            shutting_down: false,
        }
    }

    /// Fork everything and supervise until a shutdown signal arrives.
    pub fn run(mut self) -> Result<()> {
        signals::install_parent_handlers()?;
        self.fork_all()?;
        self.spawn_inparent()?;
        tracing::info!(pid = %nix::unistd::getpid(), "supervisor running");
        loop {
            match signals::take() {
                Some(ParentSignal::Shutdown) => {
                    self.shutdown(false);
                    break;
                }
                Some(ParentSignal::GracefulShutdown) => {
                    self.shutdown(true);
                    break;
                }
                Some(ParentSignal::Restart) => self.restart_all()?,
                None => {}
            }
            self.reap();
            self.start_due();
            std::thread::sleep(TICK);
        }
        Ok(())
    }

    fn fork_all(&mut self) -> Result<()> {
        for index in 0..self.slots.len() {
            if self.slots[index].pid.is_none() && !self.slots[index].retired {
                self.fork_slot(index)?;
            }
        }
        Ok(())
    }

    /// Start zero-worker sub-instances on threads inside this process.
    fn spawn_inparent(&mut self) -> Result<()> {
        for index in 0..self.plan.subs.len() {
            if self.plan.subs[index].workers != 0 {
                continue;
            }
            let socket = self.sockets[index].try_clone().map_err(|err| {
                BrimError::Supervisor(format!("could not dup in-parent socket: {err}"))
            })?;
            let (tx, rx) = watch::channel(false);
            let plan = Arc::clone(&self.plan);
            let registry = Arc::clone(&self.registry);
            let set = self.set.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}:inparent", self.plan.subs[index].name))
                .spawn(move || {
                    let sub = &plan.subs[index];
                    let group = set.group(index);
                    group.mark_started(epoch_secs());
                    let result = match (sub.kind, socket) {
                        (SubKind::Wsgi, BoundSocket::Tcp(listener)) => server::http::run_inparent(
                            sub, listener, &group, &set, &registry, &plan.json, plan.grace, rx,
                        ),
                        (SubKind::Tcp, BoundSocket::Tcp(listener)) => server::tcp::run_inparent(
                            sub, listener, &group, &set, &registry, &plan.json, plan.grace, rx,
                        ),
                        (SubKind::Udp, BoundSocket::Udp(socket)) => server::udp::run_inparent(
                            sub, socket, &group, &set, &registry, &plan.json, plan.grace, rx,
                        ),
                        _ => Err(BrimError::Supervisor(
                            "listener kind mismatch".to_string(),
                        )),
                    };
                    if let Err(err) = result {
                        tracing::error!(section = %sub.name, error = %err, "in-parent loop failed");
                    }
                })
                .map_err(|err| {
                    BrimError::Supervisor(format!("could not spawn in-parent thread: {err}"))
                })?;
            self.inparent.push((tx, handle));
        }
        Ok(())
    }

    fn fork_slot(&mut self, index: usize) -> Result<()> {
        let (coop_read, coop_write) =
            pipe().map_err(|err| BrimError::Supervisor(format!("pipe failed: {err}")))?;
        // SAFETY: marking the parent's end non-blocking for the reap check.
        unsafe { libc::fcntl(coop_read.as_raw_fd(), libc::F_SETFL, libc::O_NONBLOCK) };

        let task = self.slots[index].task;
        // SAFETY: the child only runs its dispatch loop and exits; it never
        // returns into the supervisor loop.
        match unsafe { fork() }
            .map_err(|err| BrimError::Supervisor(format!("fork failed: {err}")))?
        {
            ForkResult::Parent { child } => {
                drop(coop_write);
                let (group, _) = self.task_bucket(task);
                group.mark_started(epoch_secs());
                let slot = &mut self.slots[index];
                slot.pid = Some(child);
                slot.started = Instant::now();
                slot.restart_at = None;
                slot.coop = Some(std::fs::File::from(coop_read));
                tracing::debug!(pid = %child, ?task, "worker forked");
                Ok(())
            }
            ForkResult::Child => {
                drop(coop_read);
                signals::reset_child_handlers();
                let code = match self.run_child(task) {
                    Ok(()) => {
                        let mut coop = std::fs::File::from(coop_write);
                        let _ = coop.write_all(b"x");
                        0
                    }
                    Err(err) => {
                        tracing::error!(?task, error = %err, "worker failed");
                        1
                    }
                };
                std::process::exit(code);
            }
        }
    }

    /// The child's half of a fork: run the slot's dispatch loop.
    fn run_child(&self, task: SlotTask) -> Result<()> {
        match task {
            SlotTask::Worker { sub, index } => {
                let instance = &self.plan.subs[sub];
                let group = self.set.group(sub);
                let socket = self.sockets[sub].try_clone().map_err(|err| {
                    BrimError::Supervisor(format!("could not dup worker socket: {err}"))
                })?;
                match (instance.kind, socket) {
                    (SubKind::Wsgi, BoundSocket::Tcp(listener)) => server::http::run_worker(
                        instance,
                        listener,
                        &group,
                        index,
                        &self.set,
                        &self.registry,
                        &self.plan.json,
                        self.plan.grace,
                    ),
                    (SubKind::Tcp, BoundSocket::Tcp(listener)) => server::tcp::run_worker(
                        instance,
                        listener,
                        &group,
                        index,
                        &self.set,
                        &self.registry,
                        &self.plan.json,
                        self.plan.grace,
                    ),
                    (SubKind::Udp, BoundSocket::Udp(socket)) => server::udp::run_worker(
                        instance,
                        socket,
                        &group,
                        index,
                        &self.set,
                        &self.registry,
                        &self.plan.json,
                        self.plan.grace,
                    ),
                    _ => Err(BrimError::Supervisor("listener kind mismatch".to_string())),
                }
            }
            SlotTask::Daemon { index } => {
                let group_index = self.daemon_group.ok_or_else(|| {
                    BrimError::Supervisor("daemon slot without a daemon group".to_string())
                })?;
                let group = self.set.group(group_index);
                server::daemon::run_daemon(
                    &self.plan.daemons.daemons[index],
                    &group,
                    index,
                    &self.set,
                    &self.registry,
                    &self.plan.json,
                )
            }
        }
    }

    /// The stat group and bucket a slot writes into.
    fn task_bucket(&self, task: SlotTask) -> (BucketStats, usize) {
        match task {
            SlotTask::Worker { sub, index } => (self.set.group(sub), index),
            SlotTask::Daemon { index } => {
                let group_index = self.daemon_group.unwrap_or(self.set.group_count() - 1);
                (self.set.group(group_index), index)
            }
        }
    }

    /// Collect every exited child without blocking.
    fn reap(&mut self) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(WaitStatus::Exited(pid, code)) => self.on_exit(pid, ExitKind::Code(code)),
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    self.on_exit(pid, ExitKind::Signal(signal))
                }
                Ok(_) => {}
                Err(Errno::EINTR) => {}
                Err(_) => break,
            }
        }
    }

    fn on_exit(&mut self, pid: Pid, kind: ExitKind) {
        let Some(index) = self.slots.iter().position(|slot| slot.pid == Some(pid)) else {
            return;
        };
        let task = self.slots[index].task;
        let cooperative = {
            let slot = &mut self.slots[index];
            slot.pid = None;
            let byte = read_coop_byte(slot.coop.take());
            matches!(kind, ExitKind::Code(0)) && byte
        };
        if cooperative {
            self.slots[index].retired = true;
            tracing::info!(pid = %pid, ?task, "worker exited");
            return;
        }
        if self.shutting_down {
            tracing::debug!(pid = %pid, ?task, "worker exited during shutdown");
            return;
        }

        let slot = &mut self.slots[index];
        if slot.started.elapsed() >= STABLE_AFTER {
            slot.consecutive_restarts = 0;
        }
        let delay = backoff_delay(slot.consecutive_restarts);
        slot.consecutive_restarts = slot.consecutive_restarts.saturating_add(1);
        slot.restart_at = Some(Instant::now() + delay);

        let (group, bucket) = self.task_bucket(task);
        group.incr(bucket, "subprocess_restart_count");
        tracing::error!(
            pid = %pid,
            ?task,
            exit = ?kind,
            delay_secs = delay.as_secs(),
            "worker exited unexpectedly; restarting"
        );
    }

    /// Fork every slot whose backoff delay has elapsed.
    fn start_due(&mut self) {
        if self.shutting_down {
            return;
        }
        let now = Instant::now();
        let due: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.pid.is_none()
                    && !slot.retired
                    && slot.restart_at.map_or(false, |at| at <= now)
            })
            .map(|(index, _)| index)
            .collect();
        for index in due {
            if let Err(err) = self.fork_slot(index) {
                tracing::error!(error = %err, "restart failed; retrying");
                self.slots[index].restart_at = Some(Instant::now() + BACKOFF_BASE);
            }
        }
    }

    fn signal_children(&self, signal: Signal) {
        for slot in &self.slots {
            if let Some(pid) = slot.pid {
                let _ = kill(pid, signal);
            }
        }
    }

    fn any_live(&self) -> bool {
        self.slots.iter().any(|slot| slot.pid.is_some())
    }

    /// TERM everything, wait out the grace, KILL the rest, reap, clean up.
    fn shutdown(&mut self, graceful: bool) {
        self.shutting_down = true;
        tracing::info!(graceful, "shutting down");
        if graceful {
            // Release the listening ports right away; workers finish what
            // they already accepted.
            self.sockets.clear();
        }
        for (tx, _) in &self.inparent {
            let _ = tx.send(true);
        }
        self.signal_children(Signal::SIGTERM);

        let deadline = Instant::now() + self.plan.grace;
        while self.any_live() && Instant::now() < deadline {
            self.reap();
            std::thread::sleep(TICK);
        }
        if self.any_live() {
            tracing::warn!("grace period expired; killing remaining workers");
            self.signal_children(Signal::SIGKILL);
            let hard_deadline = Instant::now() + Duration::from_secs(5);
            while self.any_live() && Instant::now() < hard_deadline {
                self.reap();
                std::thread::sleep(TICK);
            }
        }
        for (_, handle) in self.inparent.drain(..) {
            let _ = handle.join();
        }
        for group in self.set.groups() {
            group.clear_start_time();
        }
        self.set.set_server_start_time(0);
    }

    /// Full restart of every worker under the same plan.
    fn restart_all(&mut self) -> Result<()> {
        tracing::info!("restarting all workers");
        self.shutting_down = true;
        self.signal_children(Signal::SIGTERM);
        let deadline = Instant::now() + self.plan.grace;
        while self.any_live() && Instant::now() < deadline {
            self.reap();
            std::thread::sleep(TICK);
        }
        if self.any_live() {
            self.signal_children(Signal::SIGKILL);
            while self.any_live() {
                self.reap();
                std::thread::sleep(TICK);
            }
        }
        for slot in &mut self.slots {
            slot.pid = None;
            slot.coop = None;
            slot.retired = false;
            slot.consecutive_restarts = 0;
            slot.restart_at = None;
        }
        self.shutting_down = false;
        self.fork_all()
    }
}

fn read_coop_byte(coop: Option<std::fs::File>) -> bool {
    let Some(mut file) = coop else {
        return false;
    };
    let mut buf = [0u8; 1];
    matches!(file.read(&mut buf), Ok(n) if n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(5), Duration::from_secs(32));
        assert_eq!(backoff_delay(6), Duration::from_secs(60));
        assert_eq!(backoff_delay(30), Duration::from_secs(60));
    }

    #[test]
    fn test_bound_socket_clone_keeps_local_addr() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let socket = BoundSocket::Tcp(listener);
        match socket.try_clone().unwrap() {
            BoundSocket::Tcp(clone) => assert_eq!(clone.local_addr().unwrap(), addr),
            BoundSocket::Udp(_) => panic!("kind changed"),
        }
    }

    #[test]
    fn test_coop_byte_detection() {
        let (read_end, write_end) = pipe().unwrap();
        // SAFETY: marking the read end non-blocking, as the supervisor does.
        unsafe { libc::fcntl(read_end.as_raw_fd(), libc::F_SETFL, libc::O_NONBLOCK) };
        let read_file = std::fs::File::from(read_end);
        let mut write_file = std::fs::File::from(write_end);
        write_file.write_all(b"x").unwrap();
        assert!(read_coop_byte(Some(read_file)));

        let (read_end, _write_end) = pipe().unwrap();
        unsafe { libc::fcntl(read_end.as_raw_fd(), libc::F_SETFL, libc::O_NONBLOCK) };
        assert!(!read_coop_byte(Some(std::fs::File::from(read_end))));
        assert!(!read_coop_byte(None));
    }
}
