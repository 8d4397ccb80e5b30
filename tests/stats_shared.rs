//! Cross-process behavior of the shared counter surface.

mod common;

use brimd::stats::{aggregate, GroupSpec, StatDecl, StatKind, StatsSet};
use nix::sys::wait::waitpid;
use nix::unistd::ForkResult;

fn two_worker_set() -> StatsSet {
    StatsSet::create(vec![GroupSpec {
        name: "wsgi".to_string(),
        bucket_names: vec!["0".to_string(), "1".to_string()],
        decls: vec![
            StatDecl::new("requests", StatKind::Sum),
            StatDecl::new("last_called", StatKind::Max),
        ],
    }])
    .unwrap()
}

#[test]
fn test_incr_is_atomic_across_processes() {
    let set = two_worker_set();
    let group = set.group(0);

    // SAFETY: the child touches only the shared region and then _exits
    // without returning into the test harness.
    match unsafe { nix::unistd::fork() }.unwrap() {
        ForkResult::Child => {
            let stats = group.handle(1);
            for _ in 0..500 {
                stats.incr("requests");
            }
            stats.set("last_called", 90);
            unsafe { libc::_exit(0) };
        }
        ForkResult::Parent { child } => {
            let stats = group.handle(0);
            for _ in 0..500 {
                stats.incr("requests");
            }
            stats.set("last_called", 50);
            waitpid(child, None).unwrap();

            // The child's writes are visible here: same physical pages.
            assert_eq!(group.get(1, "requests"), 500);
            let body = aggregate::group_to_json(&group);
            assert_eq!(body["requests"], 1000);
            assert_eq!(body["last_called"], 90);
            assert_eq!(body["0"]["requests"], 500);
            assert_eq!(body["1"]["requests"], 500);
        }
    }
}

#[test]
fn test_snapshot_shape_for_a_real_plan() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, _registry) = common::plan_from(
        &dir,
        "[wsgi]\n\
         port = 8901\n\
         workers = 2\n\
         apps = echo\n\
         \n\
         [echo]\n\
         call = brim.wsgi_echo.WsgiEcho\n",
    );
    let set = common::stats_for(&plan);
    set.set_server_start_time(1000);
    let group = set.group(0);
    group.mark_started(1000);
    group.handle(0).set("start_time", 1000);
    group.handle(0).incr("request_count");
    group.handle(0).incr("echo.requests");
    group.handle(1).set("start_time", 1005);

    let report = aggregate::snapshot(&set);
    assert_eq!(report["start_time"], 1000);
    assert_eq!(report["wsgi"]["start_time"], 1000);
    assert_eq!(report["wsgi"]["request_count"], 1);
    assert_eq!(report["wsgi"]["echo.requests"], 1);
    assert_eq!(report["wsgi"]["0"]["start_time"], 1000);
    assert_eq!(report["wsgi"]["1"]["start_time"], 1005);
}

#[test]
fn test_overall_start_time_survives_worker_restart() {
    let set = two_worker_set();
    let group = set.group(0);
    group.mark_started(100);

    // A worker restart re-marks the group and overwrites its own slot; the
    // overall value must stay at the first start.
    group.mark_started(250);
    assert_eq!(group.overall_start_time(), 100);

    // Values written before the restart survive: slots are keyed by
    // bucket, not by process.
    group.handle(0).set("requests", 7);
    let fresh = set.group(0).handle(0);
    assert_eq!(fresh.get("requests"), 7);
}
