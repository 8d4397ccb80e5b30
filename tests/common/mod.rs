//! Shared fixtures for the integration tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use brimd::config::conf::{read_conf, Conf};
use brimd::config::plan::{JsonCodec, LaunchPlan, PlanOptions};
use brimd::handlers::{FactoryRegistry, RequestContext};
use brimd::stats::{Stats, StatsSet};
use brimd::supervisor::stat_groups;

/// Write a conf file into the tempdir and parse it.
pub fn conf_file(dir: &tempfile::TempDir, contents: &str) -> Conf {
    let path = dir.path().join("brimd.conf");
    std::fs::write(&path, contents).unwrap();
    read_conf(&[path]).unwrap()
}

/// Build a frozen plan (with the built-in factories) from conf text.
pub fn plan_from(dir: &tempfile::TempDir, contents: &str) -> (Arc<LaunchPlan>, Arc<FactoryRegistry>) {
    let conf = conf_file(dir, contents);
    let registry = FactoryRegistry::with_builtins();
    let plan = LaunchPlan::from_conf(
        &conf,
        &registry,
        &PlanOptions {
            no_daemon: false,
            pid_file: Some(PathBuf::from(dir.path().join("brimd.pid"))),
            output: true,
        },
    )
    .unwrap();
    (Arc::new(plan), Arc::new(registry))
}

/// The counter surface a plan would get at startup.
pub fn stats_for(plan: &LaunchPlan) -> StatsSet {
    StatsSet::create(stat_groups(plan)).unwrap()
}

/// A request context bound to worker 0 of the first sub-instance.
#[allow(dead_code)]
pub fn request_context(set: &StatsSet, stats: Stats) -> RequestContext {
    RequestContext {
        txn: "test-txn".to_string(),
        start: Instant::now(),
        peer: "127.0.0.1:9999".parse::<SocketAddr>().unwrap(),
        stats,
        stats_set: set.clone(),
        json: JsonCodec::default(),
        log_info: Vec::new(),
    }
}
