//! Operator command line.
//!
//! One command starts, stops, restarts, and inspects the supervisor. All
//! failures exit non-zero with a single explanatory line on stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nix::sys::signal::Signal;

use crate::config::conf::{read_conf, Conf};
use crate::config::plan::{LaunchPlan, PlanOptions, DEFAULT_PID_FILE};
use crate::error::{BrimError, Result};
use crate::handlers::FactoryRegistry;
use crate::supervisor::{self, pidfile};

/// Conf files read when none are given with `-c`.
const DEFAULT_CONF_FILES: [&str; 2] = ["/etc/brimd.conf", "~/.brimd.conf"];

#[derive(Debug, Parser)]
#[command(
    name = "brimd",
    version,
    about = "Process-supervising launcher for request handlers and daemons"
)]
pub struct Cli {
    /// Conf file to read; may be given more than once, later files
    /// override earlier ones. Defaults to /etc/brimd.conf and ~/.brimd.conf.
    #[arg(short = 'c', long = "conf", value_name = "PATH")]
    pub conf: Vec<PathBuf>,

    /// Pidfile path, overriding the conf file.
    #[arg(short = 'p', long = "pid-file", value_name = "PATH")]
    pub pid_file: Option<PathBuf>,

    /// Keep stdout/stderr attached when daemonized; useful for debugging.
    #[arg(short = 'o', long = "output")]
    pub output: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum Command {
    /// Start the supervisor if it is not already running.
    Start,
    /// Terminate the supervisor: workers get the grace period, then are
    /// killed.
    Stop,
    /// Stop any running supervisor, then start a new one.
    Restart,
    /// Restart every worker of the running supervisor in place.
    Reload,
    /// Gracefully shut down: release the ports immediately, let workers
    /// finish what they already accepted.
    Shutdown,
    /// Report whether the supervisor is running.
    Status,
    /// Run in the foreground with every listener in-process and no
    /// daemons; pidfiles are ignored.
    NoDaemon,
}

/// Execute one CLI invocation; the returned code is the process exit code.
pub fn run(cli: &Cli) -> Result<i32> {
    match cli.command.unwrap_or(Command::NoDaemon) {
        Command::Start => {
            let (plan, registry) = load_plan(cli, false)?;
            supervisor::start(plan, registry)?;
            Ok(0)
        }
        Command::NoDaemon => {
            let (plan, registry) = load_plan(cli, true)?;
            supervisor::start(plan, registry)?;
            Ok(0)
        }
        Command::Stop => {
            let pid_file = resolve_pid_file(cli)?;
            match pidfile::signal_and_wait(&pid_file, Signal::SIGTERM)? {
                Some(pid) => println!("{pid} stopped"),
                None => println!("not running"),
            }
            Ok(0)
        }
        Command::Shutdown => {
            let pid_file = resolve_pid_file(cli)?;
            match pidfile::signal_and_wait(&pid_file, Signal::SIGQUIT)? {
                Some(pid) => println!("{pid} shut down"),
                None => println!("not running"),
            }
            Ok(0)
        }
        Command::Reload => {
            let pid_file = resolve_pid_file(cli)?;
            match pidfile::signal_running(&pid_file, Signal::SIGHUP)? {
                Some(pid) => {
                    println!("{pid} reloading");
                    Ok(0)
                }
                None => Err(BrimError::Pidfile {
                    path: pid_file.display().to_string(),
                    message: "not running".to_string(),
                }),
            }
        }
        Command::Restart => {
            let pid_file = resolve_pid_file(cli)?;
            pidfile::signal_and_wait(&pid_file, Signal::SIGTERM)?;
            let (plan, registry) = load_plan(cli, false)?;
            supervisor::start(plan, registry)?;
            Ok(0)
        }
        Command::Status => {
            let pid_file = resolve_pid_file(cli)?;
            match pidfile::live_pid(&pid_file) {
                Some(pid) => println!("{pid} is running"),
                None => println!("not running"),
            }
            Ok(0)
        }
    }
}

fn read_cli_conf(cli: &Cli) -> Result<Conf> {
    let conf = if cli.conf.is_empty() {
        let defaults: Vec<PathBuf> = DEFAULT_CONF_FILES.iter().map(PathBuf::from).collect();
        read_conf(&defaults)?
    } else {
        read_conf(&cli.conf)?
    };
    Ok(conf)
}

fn load_plan(cli: &Cli, no_daemon: bool) -> Result<(LaunchPlan, FactoryRegistry)> {
    let conf = read_cli_conf(cli)?;
    if conf.files().is_empty() {
        return Err(BrimError::Config("no configuration found".to_string()));
    }
    let registry = FactoryRegistry::with_builtins();
    let plan = LaunchPlan::from_conf(
        &conf,
        &registry,
        &PlanOptions {
            no_daemon,
            pid_file: cli.pid_file.clone(),
            output: cli.output,
        },
    )?;
    Ok((plan, registry))
}

/// The pidfile the signaling verbs should use: the `-p` override, the conf
/// file's `pid_file`, or the default path.
fn resolve_pid_file(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.pid_file {
        return Ok(path.clone());
    }
    let conf = read_cli_conf(cli)?;
    Ok(conf
        .get_path(&["brim"], "pid_file")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses_verbs_and_flags() {
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["brimd", "-c", "/tmp/a.conf", "-o", "start"]);
        assert!(matches!(cli.command, Some(Command::Start)));
        assert!(cli.output);
        assert_eq!(cli.conf, vec![PathBuf::from("/tmp/a.conf")]);

        let cli = Cli::parse_from(["brimd", "no-daemon"]);
        assert!(matches!(cli.command, Some(Command::NoDaemon)));

        let cli = Cli::parse_from(["brimd"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_missing_conf_is_a_single_line_error() {
        let cli = Cli::parse_from(["brimd", "-c", "/nonexistent/brimd.conf", "start"]);
        let err = run(&cli).unwrap_err();
        assert_eq!(err.to_string(), "[conf] no configuration found");
    }

    #[test]
    fn test_status_with_explicit_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("brimd.pid");
        let cli = Cli::parse_from([
            "brimd",
            "-p",
            pid_file.to_str().unwrap(),
            "status",
        ]);
        assert_eq!(run(&cli).unwrap(), 0);
    }
}
