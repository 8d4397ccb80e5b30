//! Parent controller.
//!
//! # Startup order (strict; each step must succeed before the next)
//! ```text
//! 1. load and freeze the LaunchPlan (factory hooks included)
//! 2. pidfile conflict check (signal 0 against any recorded pid)
//! 3. acquire listening sockets while still privileged
//! 4. daemonize; the foreground command records the supervisor pid
//! 5. open the log sink
//! 6. drop privileges (group first, then user)
//! 7. allocate the shared counter region
//! 8. install signal handlers
//! 9. fork workers and daemons, then supervise
//! ```
//!
//! # Design Decisions
//! - Any pre-fork error is fatal and renders as one `[<section>] <message>`
//!   line on stderr; nothing is forked and no pidfile is left behind
//! - SIGHUP restarts every worker under the same frozen plan
//! - `no-daemon` runs every listener in-process in the foreground, skips
//!   daemons and the pidfile

pub mod pidfile;
pub mod privileges;
pub mod signals;
pub mod worker;

pub use worker::{BoundSocket, Supervisor};

use std::os::fd::AsRawFd;
use std::sync::Arc;

use nix::unistd::ForkResult;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::plan::{LaunchPlan, SubKind};
use crate::error::{BrimError, Result};
use crate::handlers::FactoryRegistry;
use crate::net;
use crate::server;
use crate::stats::{epoch_secs, GroupSpec, StatsSet};

/// The counter groups a plan needs: one per sub-instance plus, when any
/// daemons are configured, one group with a bucket per daemon.
pub fn stat_groups(plan: &LaunchPlan) -> Vec<GroupSpec> {
    let mut groups: Vec<GroupSpec> = plan
        .subs
        .iter()
        .map(|sub| GroupSpec {
            name: sub.name.clone(),
            bucket_names: sub.bucket_names(),
            decls: sub.stats.clone(),
        })
        .collect();
    if !plan.daemons.daemons.is_empty() {
        groups.push(GroupSpec {
            name: "daemons".to_string(),
            bucket_names: plan.daemons.bucket_names(),
            decls: plan.daemons.stats.clone(),
        });
    }
    groups
}

/// Bind every configured listener, in sub-instance order.
pub fn acquire_listeners(plan: &LaunchPlan) -> Result<Vec<BoundSocket>> {
    plan.subs
        .iter()
        .map(|sub| match sub.kind {
            SubKind::Wsgi | SubKind::Tcp => {
                net::bind_tcp(&sub.name, &sub.ip, sub.port, sub.backlog, sub.listen_retry)
                    .map(BoundSocket::Tcp)
            }
            SubKind::Udp => net::bind_udp(&sub.name, &sub.ip, sub.port).map(BoundSocket::Udp),
        })
        .collect()
}

/// Install the tracing subscriber with the configured level. `RUST_LOG`
/// overrides the conf file when present.
pub fn init_logging(plan: &LaunchPlan) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(plan.log.level.to_string()));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Point the standard descriptors at /dev/null for a daemonized child.
fn redirect_stdio() -> Result<()> {
    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|err| BrimError::Supervisor(format!("could not open /dev/null: {err}")))?;
    for fd in 0..=2 {
        // SAFETY: devnull is open; dup2 onto the standard descriptors.
        if unsafe { libc::dup2(devnull.as_raw_fd(), fd) } < 0 {
            return Err(BrimError::Supervisor(format!(
                "could not redirect fd {fd}: {}",
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

/// Start the supervisor. In daemon mode the calling process returns as soon
/// as the supervisor child is forked and its pid recorded; the child never
/// returns from here.
pub fn start(plan: LaunchPlan, registry: FactoryRegistry) -> Result<()> {
    let plan = Arc::new(plan);
    let registry = Arc::new(registry);

    if plan.no_daemon {
        init_logging(&plan);
        return run_no_daemon(plan, registry);
    }

    pidfile::check_not_running(&plan.pid_file)?;
    pidfile::ensure_writable(&plan.pid_file)?;
    let sockets = acquire_listeners(&plan)?;

    // SAFETY: still single-threaded; the child takes over as supervisor.
    match unsafe { nix::unistd::fork() }
        .map_err(|err| BrimError::Supervisor(format!("fork failed: {err}")))?
    {
        ForkResult::Parent { child } => {
            pidfile::write(&plan.pid_file, child)?;
            return Ok(());
        }
        ForkResult::Child => {}
    }

    let code = match run_supervisor(Arc::clone(&plan), registry, sockets) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "supervisor failed");
            eprintln!("{err}");
            1
        }
    };
    pidfile::remove(&plan.pid_file);
    std::process::exit(code);
}

fn run_supervisor(
    plan: Arc<LaunchPlan>,
    registry: Arc<FactoryRegistry>,
    sockets: Vec<BoundSocket>,
) -> Result<()> {
    if !plan.output {
        redirect_stdio()?;
    }
    init_logging(&plan);
    privileges::drop_privileges(plan.user.as_deref(), plan.group.as_deref(), plan.umask)?;
    let set = StatsSet::create(stat_groups(&plan))?;
    set.set_server_start_time(epoch_secs());
    Supervisor::new(plan, registry, sockets, set).run()
}

/// Foreground mode: every listener loop runs as a task on one runtime in
/// this process. Ctrl-C or SIGTERM stops everything.
fn run_no_daemon(plan: Arc<LaunchPlan>, registry: Arc<FactoryRegistry>) -> Result<()> {
    let sockets = acquire_listeners(&plan)?;
    let set = StatsSet::create(stat_groups(&plan))?;
    set.set_server_start_time(epoch_secs());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| BrimError::Supervisor(format!("could not build runtime: {err}")))?;
    runtime.block_on(async move {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            let term = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut term) => {
                        term.recv().await;
                    }
                    Err(_) => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term => {}
            }
            let _ = tx.send(true);
        });

        let mut tasks = Vec::new();
        for (index, socket) in sockets.into_iter().enumerate() {
            let plan = Arc::clone(&plan);
            let registry = Arc::clone(&registry);
            let set = set.clone();
            let shutdown = rx.clone();
            tasks.push(tokio::spawn(async move {
                let sub = &plan.subs[index];
                let group = set.group(index);
                group.mark_started(epoch_secs());
                let stats = group.handle(0);
                stats.set("start_time", epoch_secs());
                let result = match (sub.kind, socket) {
                    (SubKind::Wsgi, BoundSocket::Tcp(listener)) => {
                        server::http::serve(
                            sub,
                            listener,
                            stats,
                            set.clone(),
                            &registry,
                            plan.json.clone(),
                            plan.grace,
                            shutdown,
                        )
                        .await
                    }
                    (SubKind::Tcp, BoundSocket::Tcp(listener)) => {
                        server::tcp::serve(
                            sub,
                            listener,
                            stats,
                            set.clone(),
                            &registry,
                            plan.json.clone(),
                            plan.grace,
                            shutdown,
                        )
                        .await
                    }
                    (SubKind::Udp, BoundSocket::Udp(socket)) => {
                        server::udp::serve(
                            sub,
                            socket,
                            stats,
                            set.clone(),
                            &registry,
                            plan.json.clone(),
                            plan.grace,
                            shutdown,
                        )
                        .await
                    }
                    _ => Err(BrimError::Supervisor("listener kind mismatch".to_string())),
                };
                if let Err(err) = result {
                    tracing::error!(section = %sub.name, error = %err, "listener loop failed");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    })
}
