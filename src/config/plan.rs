//! Launch plan: the frozen result of configuration parsing.
//!
//! # Responsibilities
//! - Discover sub-instance sections (`[wsgi]`, `[tcp]`, `[udp]`, their
//!   `#suffix` variants) and the `[daemons]` group
//! - Resolve every handler/daemon factory and run its `parse_conf` /
//!   `stats_conf` hooks before anything is forked
//! - Fix the full set of stat declarations per sub-instance
//! - Validate everything a supervisor start would otherwise discover late
//!
//! # Design Decisions
//! - Fail fast: any factory hook error aborts startup with the hook's
//!   message surfaced unchanged
//! - A `LaunchPlan` is immutable after this module returns it

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::config::conf::Conf;
use crate::error::{BrimError, Result};
use crate::handlers::registry::FactoryRegistry;
use crate::handlers::HandlerConf;
use crate::stats::{StatDecl, StatKind};

/// Status codes tracked with their own counter when not configured.
const DEFAULT_COUNT_STATUS_CODES: &str = "404 408 499 501";

/// Default path of the supervisor pidfile.
pub const DEFAULT_PID_FILE: &str = "/var/run/brimd.pid";

/// The kind of listener a sub-instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKind {
    Wsgi,
    Tcp,
    Udp,
}

impl SubKind {
    /// The family section name this kind is configured under.
    pub fn family(self) -> &'static str {
        match self {
            SubKind::Wsgi => "wsgi",
            SubKind::Tcp => "tcp",
            SubKind::Udp => "udp",
        }
    }
}

/// One configured handler or daemon: its section name, the dotted factory
/// path it was resolved from, and the factory's pre-parsed configuration.
#[derive(Clone)]
pub struct HandlerSpec {
    pub name: String,
    pub call: String,
    pub conf: HandlerConf,
}

impl std::fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("name", &self.name)
            .field("call", &self.call)
            .finish()
    }
}

/// A configured daemon. Exactly one process per spec, no worker fan-out.
pub type DaemonSpec = HandlerSpec;

/// One configured listener with its worker pool and stat declarations.
#[derive(Debug, Clone)]
pub struct SubInstance {
    /// Section name, including any `#suffix`.
    pub name: String,
    pub kind: SubKind,
    /// Bind address; `*` and the empty string mean all interfaces.
    pub ip: String,
    pub port: u16,
    /// Worker process count. Zero means the accept/recv loop runs in the
    /// parent process itself.
    pub workers: usize,
    pub backlog: i32,
    /// Bind attempts tolerated for `EADDRINUSE` during restart.
    pub listen_retry: u32,
    /// Per-request / per-connection I/O timeout.
    pub client_timeout: Duration,
    /// Concurrent tasks allowed per worker.
    pub concurrency: usize,
    /// Largest datagram accepted (UDP only).
    pub max_datagram_size: usize,
    /// Include request headers in the access log (WSGI only).
    pub log_headers: bool,
    /// Status codes tracked with a dedicated counter (WSGI only).
    pub count_status_codes: Vec<u16>,
    /// Ordered handler chain (WSGI only).
    pub apps: Vec<HandlerSpec>,
    /// The single connection/datagram handler (TCP/UDP only).
    pub handler: Option<HandlerSpec>,
    /// Every stat declared for this sub-instance, defaults included.
    pub stats: Vec<StatDecl>,
}

impl SubInstance {
    /// Number of counter buckets this sub-instance needs. A zero-worker
    /// sub-instance still gets one bucket for its in-parent loop.
    pub fn bucket_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Bucket labels for the stats report: worker indexes as strings.
    pub fn bucket_names(&self) -> Vec<String> {
        (0..self.bucket_count()).map(|i| i.to_string()).collect()
    }
}

/// The `[daemons]` group: one bucket per daemon, keyed by daemon name.
#[derive(Debug, Clone, Default)]
pub struct DaemonGroup {
    pub daemons: Vec<DaemonSpec>,
    pub stats: Vec<StatDecl>,
}

impl DaemonGroup {
    pub fn bucket_names(&self) -> Vec<String> {
        self.daemons.iter().map(|d| d.name.clone()).collect()
    }
}

/// Log sink configuration. The transport is a sink with levels; the facility
/// is validated for syslog compatibility but delivery is the subscriber's
/// concern.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub name: String,
    pub level: tracing::Level,
    pub facility: String,
}

/// The injected JSON encode/decode pair, selected by dotted path.
#[derive(Clone)]
pub struct JsonCodec {
    dumps_name: String,
    dumps: fn(&Value) -> String,
    loads: fn(&str) -> std::result::Result<Value, String>,
}

fn dumps_compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn dumps_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn loads_str(text: &str) -> std::result::Result<Value, String> {
    serde_json::from_str(text).map_err(|err| err.to_string())
}

impl JsonCodec {
    /// Resolve the configured dotted paths to concrete functions.
    pub fn resolve(dumps: &str, loads: &str) -> std::result::Result<Self, String> {
        let dumps_fn = match dumps {
            "serde_json.to_string" => dumps_compact as fn(&Value) -> String,
            "serde_json.to_string_pretty" => dumps_pretty,
            other => return Err(format!("could not load function {other:?} for json_dumps")),
        };
        let loads_fn = match loads {
            "serde_json.from_str" => loads_str as fn(&str) -> std::result::Result<Value, String>,
            other => return Err(format!("could not load function {other:?} for json_loads")),
        };
        Ok(Self {
            dumps_name: dumps.to_string(),
            dumps: dumps_fn,
            loads: loads_fn,
        })
    }

    pub fn dumps(&self, value: &Value) -> String {
        (self.dumps)(value)
    }

    pub fn loads(&self, text: &str) -> std::result::Result<Value, String> {
        (self.loads)(text)
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self {
            dumps_name: "serde_json.to_string".to_string(),
            dumps: dumps_compact,
            loads: loads_str,
        }
    }
}

impl std::fmt::Debug for JsonCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec")
            .field("dumps", &self.dumps_name)
            .finish()
    }
}

/// Knobs that come from the command line rather than the conf file.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Foreground mode: every listener runs in-process, daemons and the
    /// pidfile are skipped.
    pub no_daemon: bool,
    /// `-p` override for the pidfile path.
    pub pid_file: Option<PathBuf>,
    /// Keep stdio attached when daemonized.
    pub output: bool,
}

/// Everything the supervisor needs, frozen before the first fork.
#[derive(Debug)]
pub struct LaunchPlan {
    pub user: Option<String>,
    pub group: Option<String>,
    pub umask: u32,
    pub pid_file: PathBuf,
    pub log: LogConfig,
    pub json: JsonCodec,
    /// Seconds children get between SIGTERM and SIGKILL at shutdown.
    pub grace: Duration,
    pub subs: Vec<SubInstance>,
    pub daemons: DaemonGroup,
    pub no_daemon: bool,
    pub output: bool,
}

impl LaunchPlan {
    /// Parse, resolve, and validate the whole configuration.
    pub fn from_conf(
        conf: &Conf,
        registry: &FactoryRegistry,
        options: &PlanOptions,
    ) -> Result<Self> {
        let user = conf.get("brim", "user").map(str::to_string);
        let group = conf.get("brim", "group").map(str::to_string);

        let umask_text = conf.get_str(&["brim"], "umask", "0022");
        let umask = u32::from_str_radix(umask_text.trim_start_matches("0o"), 8)
            .map_err(|_| BrimError::Config(format!("invalid umask value {umask_text:?}")))?;

        let pid_file = options
            .pid_file
            .clone()
            .or_else(|| conf.get_path(&["brim"], "pid_file"))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE));

        let log = parse_log_config(conf, &["brim"])?;
        let json = parse_json_codec(conf, &["brim"])?;

        let grace_secs = conf.get_int(&["brim"], "shutdown_grace", 60)?;
        if grace_secs < 0 {
            return Err(BrimError::Config(format!(
                "invalid [brim] shutdown_grace {grace_secs}"
            )));
        }

        let mut subs = Vec::new();
        let mut section_names: Vec<String> = conf.sections().map(str::to_string).collect();
        section_names.sort();
        for name in &section_names {
            let kind = if name == "wsgi" || name.starts_with("wsgi#") {
                SubKind::Wsgi
            } else if name == "tcp" || name.starts_with("tcp#") {
                SubKind::Tcp
            } else if name == "udp" || name.starts_with("udp#") {
                SubKind::Udp
            } else {
                continue;
            };
            subs.push(parse_sub_instance(conf, registry, name, kind, options)?);
        }

        let daemons = if options.no_daemon {
            DaemonGroup::default()
        } else {
            parse_daemon_group(conf, registry)?
        };

        if subs.is_empty() && daemons.daemons.is_empty() {
            return Err(BrimError::Config("no sub-instances configured".to_string()));
        }

        Ok(Self {
            user,
            group,
            umask,
            pid_file,
            log,
            json,
            grace: Duration::from_secs(grace_secs as u64),
            subs,
            daemons,
            no_daemon: options.no_daemon,
            output: options.output || options.no_daemon,
        })
    }
}

/// Sub-section lookup chain: the section itself, its family, then `[brim]`.
fn lookup_chain<'a>(name: &'a str, family: &'static str) -> Vec<&'a str> {
    if name == family {
        vec![name, "brim"]
    } else {
        vec![name, family, "brim"]
    }
}

fn parse_log_config(conf: &Conf, chain: &[&str]) -> Result<LogConfig> {
    let name = conf.get_str(chain, "log_name", "brim");
    let level_text = conf.get_str(chain, "log_level", "INFO");
    let level = match level_text.to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" | "notice" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" | "critical" => tracing::Level::ERROR,
        _ => {
            return Err(BrimError::Config(format!(
                "invalid [brim] log_level {level_text:?}"
            )))
        }
    };
    let facility_text = conf.get_str(chain, "log_facility", "LOCAL0");
    let facility = facility_text
        .to_ascii_uppercase()
        .trim_start_matches("LOG_")
        .to_string();
    const FACILITIES: &[&str] = &[
        "LOCAL0", "LOCAL1", "LOCAL2", "LOCAL3", "LOCAL4", "LOCAL5", "LOCAL6", "LOCAL7", "DAEMON",
        "USER",
    ];
    if !FACILITIES.contains(&facility.as_str()) {
        return Err(BrimError::Config(format!(
            "invalid [brim] log_facility {facility_text:?}"
        )));
    }
    Ok(LogConfig {
        name,
        level,
        facility,
    })
}

fn parse_json_codec(conf: &Conf, chain: &[&str]) -> Result<JsonCodec> {
    let dumps = conf.get_str(chain, "json_dumps", "serde_json.to_string");
    let loads = conf.get_str(chain, "json_loads", "serde_json.from_str");
    JsonCodec::resolve(&dumps, &loads).map_err(BrimError::Config)
}

fn parse_sub_instance(
    conf: &Conf,
    registry: &FactoryRegistry,
    name: &str,
    kind: SubKind,
    options: &PlanOptions,
) -> Result<SubInstance> {
    let chain = lookup_chain(name, kind.family());

    if conf.get_in(&chain, "certfile").is_some() || conf.get_in(&chain, "keyfile").is_some() {
        return Err(BrimError::Config(format!(
            "[{name}] certfile/keyfile configured but TLS is not supported"
        )));
    }

    let ip = conf.get_str(&chain, "ip", "*");
    let port = conf.get_int(&chain, "port", 80)?;
    let port = u16::try_from(port)
        .map_err(|_| BrimError::Config(format!("invalid [{name}] port {port}")))?;

    let mut workers = if options.no_daemon {
        0
    } else {
        let workers = conf.get_int(&chain, "workers", 1)?;
        usize::try_from(workers)
            .map_err(|_| BrimError::Config(format!("invalid [{name}] workers {workers}")))?
    };
    if kind == SubKind::Udp && workers > 1 {
        // Datagram sockets are not shared between worker processes.
        tracing::warn!(section = %name, workers, "udp workers clamped to 1");
        workers = 1;
    }

    let backlog = conf.get_int(&chain, "backlog", 4096)?;
    let backlog = i32::try_from(backlog)
        .map_err(|_| BrimError::Config(format!("invalid [{name}] backlog {backlog}")))?;

    let listen_retry = conf.get_int(&chain, "listen_retry", 30)?;
    let listen_retry = u32::try_from(listen_retry)
        .map_err(|_| BrimError::Config(format!("invalid [{name}] listen_retry {listen_retry}")))?;

    let client_timeout = conf.get_int(&chain, "client_timeout", 60)?;
    let client_timeout = u64::try_from(client_timeout).map_err(|_| {
        BrimError::Config(format!("invalid [{name}] client_timeout {client_timeout}"))
    })?;

    let concurrency = conf.get_int(&chain, "concurrent_per_worker", 1024)?;
    let concurrency = usize::try_from(concurrency.max(1)).unwrap_or(1024);

    let max_datagram_size = conf.get_int(&chain, "max_datagram_size", 65536)?;
    let max_datagram_size = usize::try_from(max_datagram_size).map_err(|_| {
        BrimError::Config(format!(
            "invalid [{name}] max_datagram_size {max_datagram_size}"
        ))
    })?;

    let mut stats = vec![
        StatDecl::new("start_time", StatKind::timestamp_min()),
        StatDecl::new("subprocess_restart_count", StatKind::Sum),
    ];

    let mut sub = SubInstance {
        name: name.to_string(),
        kind,
        ip,
        port,
        workers,
        backlog,
        listen_retry,
        client_timeout: Duration::from_secs(client_timeout),
        concurrency,
        max_datagram_size,
        log_headers: false,
        count_status_codes: Vec::new(),
        apps: Vec::new(),
        handler: None,
        stats: Vec::new(),
    };

    match kind {
        SubKind::Wsgi => {
            sub.log_headers = conf.get_bool(&chain, "log_headers", false)?;

            let codes_text = conf.get_str(&chain, "count_status_codes", DEFAULT_COUNT_STATUS_CODES);
            let mut codes = Vec::new();
            for token in codes_text.split_whitespace() {
                let code: u16 = token.parse().map_err(|_| {
                    BrimError::Config(format!(
                        "invalid [{name}] count_status_codes {codes_text:?}"
                    ))
                })?;
                codes.push(code);
            }

            push_decl(&mut stats, StatDecl::new("request_count", StatKind::Sum));
            for class in ["2xx", "3xx", "4xx", "5xx"] {
                push_decl(
                    &mut stats,
                    StatDecl::new(format!("status_{class}_count"), StatKind::Sum),
                );
            }
            for code in &codes {
                push_decl(
                    &mut stats,
                    StatDecl::new(format!("status_{code}_count"), StatKind::Sum),
                );
            }
            sub.count_status_codes = codes;

            let apps_text = conf.get_str(&chain, "apps", "");
            for app_name in apps_text.split_whitespace() {
                let call = conf.get(app_name, "call").ok_or_else(|| {
                    BrimError::Config(format!(
                        "app [{app_name}] not configured with a 'call' option"
                    ))
                })?;
                let factory = registry.wsgi(call).ok_or_else(|| {
                    BrimError::Config(format!(
                        "could not load factory {call:?} for app [{app_name}]"
                    ))
                })?;
                let parsed =
                    factory
                        .parse_conf(app_name, conf)
                        .map_err(|err| BrimError::FactoryInit {
                            section: app_name.to_string(),
                            message: err.to_string(),
                        })?;
                for decl in factory.stats_conf(app_name, &parsed) {
                    push_decl(&mut stats, decl);
                }
                sub.apps.push(HandlerSpec {
                    name: app_name.to_string(),
                    call: call.to_string(),
                    conf: parsed,
                });
            }
        }
        SubKind::Tcp => {
            push_decl(&mut stats, StatDecl::new("connection_count", StatKind::Sum));
            let call = conf.get(name, "call").ok_or_else(|| {
                BrimError::Config(format!("[{name}] not configured with a 'call' option"))
            })?;
            let factory = registry.tcp(call).ok_or_else(|| {
                BrimError::Config(format!("could not load factory {call:?} for [{name}]"))
            })?;
            let parsed = factory
                .parse_conf(name, conf)
                .map_err(|err| BrimError::FactoryInit {
                    section: name.to_string(),
                    message: err.to_string(),
                })?;
            for decl in factory.stats_conf(name, &parsed) {
                push_decl(&mut stats, decl);
            }
            sub.handler = Some(HandlerSpec {
                name: name.to_string(),
                call: call.to_string(),
                conf: parsed,
            });
        }
        SubKind::Udp => {
            push_decl(&mut stats, StatDecl::new("datagram_count", StatKind::Sum));
            let call = conf.get(name, "call").ok_or_else(|| {
                BrimError::Config(format!("[{name}] not configured with a 'call' option"))
            })?;
            let factory = registry.udp(call).ok_or_else(|| {
                BrimError::Config(format!("could not load factory {call:?} for [{name}]"))
            })?;
            let parsed = factory
                .parse_conf(name, conf)
                .map_err(|err| BrimError::FactoryInit {
                    section: name.to_string(),
                    message: err.to_string(),
                })?;
            for decl in factory.stats_conf(name, &parsed) {
                push_decl(&mut stats, decl);
            }
            sub.handler = Some(HandlerSpec {
                name: name.to_string(),
                call: call.to_string(),
                conf: parsed,
            });
        }
    }

    sub.stats = stats;
    Ok(sub)
}

fn parse_daemon_group(conf: &Conf, registry: &FactoryRegistry) -> Result<DaemonGroup> {
    let mut group = DaemonGroup::default();
    if !conf.has_section("daemons") {
        return Ok(group);
    }
    let mut stats = vec![
        StatDecl::new("start_time", StatKind::timestamp_min()),
        StatDecl::new("subprocess_restart_count", StatKind::Sum),
    ];
    let names = conf.get_str(&["daemons"], "daemons", "");
    for daemon_name in names.split_whitespace() {
        let call = conf.get(daemon_name, "call").ok_or_else(|| {
            BrimError::Config(format!(
                "daemon [{daemon_name}] not configured with a 'call' option"
            ))
        })?;
        let factory = registry.daemon(call).ok_or_else(|| {
            BrimError::Config(format!(
                "could not load factory {call:?} for daemon [{daemon_name}]"
            ))
        })?;
        let parsed = factory
            .parse_conf(daemon_name, conf)
            .map_err(|err| BrimError::FactoryInit {
                section: daemon_name.to_string(),
                message: err.to_string(),
            })?;
        for decl in factory.stats_conf(daemon_name, &parsed) {
            push_decl(&mut stats, decl);
        }
        group.daemons.push(DaemonSpec {
            name: daemon_name.to_string(),
            call: call.to_string(),
            conf: parsed,
        });
    }
    group.stats = stats;
    Ok(group)
}

/// Add a declaration, replacing any earlier one with the same name. A
/// factory may redeclare a default stat's kind this way.
fn push_decl(decls: &mut Vec<StatDecl>, decl: StatDecl) {
    if let Some(existing) = decls.iter_mut().find(|d| d.name == decl.name) {
        existing.kind = decl.kind;
    } else {
        decls.push(decl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn conf_from(sections: &[(&str, &[(&str, &str)])]) -> Conf {
        let mut store = HashMap::new();
        for (name, opts) in sections {
            let mut map = HashMap::new();
            for (k, v) in *opts {
                map.insert(k.to_string(), v.to_string());
            }
            store.insert(name.to_string(), map);
        }
        Conf::from_store(store)
    }

    fn plan(conf: &Conf) -> Result<LaunchPlan> {
        LaunchPlan::from_conf(
            conf,
            &FactoryRegistry::with_builtins(),
            &PlanOptions {
                no_daemon: false,
                pid_file: Some(PathBuf::from("/tmp/brimd-test.pid")),
                output: false,
            },
        )
    }

    #[test]
    fn test_empty_conf_is_rejected() {
        let err = plan(&conf_from(&[])).unwrap_err();
        assert!(err.to_string().contains("no sub-instances"));
    }

    #[test]
    fn test_wsgi_suffix_sections_become_separate_subs() {
        let conf = conf_from(&[
            ("wsgi", &[("port", "8901")]),
            ("wsgi#alt", &[("port", "8902"), ("workers", "3")]),
        ]);
        let plan = plan(&conf).unwrap();
        assert_eq!(plan.subs.len(), 2);
        assert_eq!(plan.subs[0].name, "wsgi");
        assert_eq!(plan.subs[0].port, 8901);
        assert_eq!(plan.subs[0].workers, 1);
        assert_eq!(plan.subs[1].name, "wsgi#alt");
        assert_eq!(plan.subs[1].port, 8902);
        assert_eq!(plan.subs[1].workers, 3);
    }

    #[test]
    fn test_suffix_falls_back_to_family_then_brim() {
        let conf = conf_from(&[
            ("brim", &[("backlog", "128")]),
            ("wsgi", &[("port", "8901"), ("workers", "2")]),
            ("wsgi#alt", &[("port", "8902")]),
        ]);
        let plan = plan(&conf).unwrap();
        let alt = plan.subs.iter().find(|s| s.name == "wsgi#alt").unwrap();
        assert_eq!(alt.workers, 2);
        assert_eq!(alt.backlog, 128);
    }

    #[test]
    fn test_default_wsgi_stat_declarations() {
        let conf = conf_from(&[("wsgi", &[("port", "8901")])]);
        let plan = plan(&conf).unwrap();
        let names: Vec<&str> = plan.subs[0].stats.iter().map(|d| d.name.as_str()).collect();
        for expected in [
            "start_time",
            "subprocess_restart_count",
            "request_count",
            "status_2xx_count",
            "status_3xx_count",
            "status_4xx_count",
            "status_5xx_count",
            "status_404_count",
            "status_408_count",
            "status_499_count",
            "status_501_count",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_custom_count_status_codes() {
        let conf = conf_from(&[("wsgi", &[("port", "1"), ("count_status_codes", "404 503")])]);
        let plan = plan(&conf).unwrap();
        let names: Vec<&str> = plan.subs[0].stats.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"status_503_count"));
        assert!(!names.contains(&"status_501_count"));

        let bad = conf_from(&[("wsgi", &[("port", "1"), ("count_status_codes", "4xx")])]);
        assert!(plan_err_contains(&bad, "count_status_codes"));
    }

    #[test]
    fn test_udp_workers_clamped_to_one() {
        let conf = conf_from(&[(
            "udp",
            &[
                ("port", "8903"),
                ("workers", "4"),
                ("call", "brim.udp_echo.UdpEcho"),
            ],
        )]);
        let plan = plan(&conf).unwrap();
        assert_eq!(plan.subs[0].workers, 1);
    }

    #[test]
    fn test_tcp_requires_call() {
        let conf = conf_from(&[("tcp", &[("port", "8902")])]);
        assert!(plan_err_contains(&conf, "'call' option"));
    }

    #[test]
    fn test_unknown_factory_is_rejected() {
        let conf = conf_from(&[("tcp", &[("port", "8902"), ("call", "no.such.Factory")])]);
        assert!(plan_err_contains(&conf, "could not load factory"));
    }

    #[test]
    fn test_tls_options_are_rejected() {
        let conf = conf_from(&[("wsgi", &[("port", "1"), ("certfile", "/tmp/cert.pem")])]);
        assert!(plan_err_contains(&conf, "TLS is not supported"));
    }

    #[test]
    fn test_wsgi_apps_declare_their_stats() {
        let conf = conf_from(&[
            ("wsgi", &[("port", "8901"), ("apps", "echo")]),
            ("echo", &[("call", "brim.wsgi_echo.WsgiEcho")]),
        ]);
        let plan = plan(&conf).unwrap();
        assert_eq!(plan.subs[0].apps.len(), 1);
        let names: Vec<&str> = plan.subs[0].stats.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"echo.requests"));
    }

    #[test]
    fn test_daemon_group_buckets_keyed_by_name() {
        let conf = conf_from(&[
            ("wsgi", &[("port", "8901")]),
            ("daemons", &[("daemons", "ticker")]),
            (
                "ticker",
                &[("call", "brim.sample_daemon.SampleDaemon"), ("interval", "5")],
            ),
        ]);
        let plan = plan(&conf).unwrap();
        assert_eq!(plan.daemons.bucket_names(), vec!["ticker".to_string()]);
        let names: Vec<&str> = plan
            .daemons
            .stats
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert!(names.contains(&"iterations"));
        assert!(names.contains(&"last_run"));
    }

    #[test]
    fn test_no_daemon_forces_inproc_and_skips_daemons() {
        let conf = conf_from(&[
            ("wsgi", &[("port", "8901"), ("workers", "4")]),
            ("daemons", &[("daemons", "ticker")]),
            ("ticker", &[("call", "brim.sample_daemon.SampleDaemon")]),
        ]);
        let plan = LaunchPlan::from_conf(
            &conf,
            &FactoryRegistry::with_builtins(),
            &PlanOptions {
                no_daemon: true,
                pid_file: None,
                output: false,
            },
        )
        .unwrap();
        assert_eq!(plan.subs[0].workers, 0);
        assert!(plan.daemons.daemons.is_empty());
        assert!(plan.output);
    }

    #[test]
    fn test_invalid_umask_and_log_level() {
        let conf = conf_from(&[("wsgi", &[("port", "1")]), ("brim", &[("umask", "zz")])]);
        assert!(plan_err_contains(&conf, "umask"));

        let conf = conf_from(&[("wsgi", &[("port", "1")]), ("brim", &[("log_level", "LOUD")])]);
        assert!(plan_err_contains(&conf, "log_level"));
    }

    fn plan_err_contains(conf: &Conf, needle: &str) -> bool {
        match plan(conf) {
            Err(err) => err.to_string().contains(needle),
            Ok(_) => false,
        }
    }
}
