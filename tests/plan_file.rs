//! Conf file to LaunchPlan, end to end.

mod common;

use brimd::config::plan::SubKind;

#[test]
fn test_multi_listener_plan() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, _registry) = common::plan_from(
        &dir,
        "[brim]\n\
         log_level = DEBUG\n\
         shutdown_grace = 5\n\
         \n\
         [wsgi]\n\
         port = 8901\n\
         workers = 2\n\
         apps = echo stats\n\
         \n\
         [wsgi#alt]\n\
         port = 8902\n\
         apps = echo\n\
         \n\
         [tcp]\n\
         port = 8903\n\
         call = brim.tcp_echo.TcpEcho\n\
         \n\
         [udp]\n\
         port = 8904\n\
         call = brim.udp_echo.UdpEcho\n\
         \n\
         [echo]\n\
         call = brim.wsgi_echo.WsgiEcho\n\
         \n\
         [stats]\n\
         call = brim.wsgi_stats.WsgiStats\n\
         path = /status\n\
         \n\
         [daemons]\n\
         daemons = ticker\n\
         \n\
         [ticker]\n\
         call = brim.sample_daemon.SampleDaemon\n\
         interval = 1\n",
    );

    assert_eq!(plan.subs.len(), 4);
    let wsgi = plan.subs.iter().find(|s| s.name == "wsgi").unwrap();
    assert_eq!(wsgi.kind, SubKind::Wsgi);
    assert_eq!(wsgi.port, 8901);
    assert_eq!(wsgi.workers, 2);
    assert_eq!(wsgi.apps.len(), 2);
    assert_eq!(wsgi.apps[0].name, "echo");
    assert_eq!(wsgi.apps[1].name, "stats");

    let alt = plan.subs.iter().find(|s| s.name == "wsgi#alt").unwrap();
    assert_eq!(alt.port, 8902);
    // No workers set on the suffix section and none on the family: default.
    assert_eq!(alt.workers, 1);

    let tcp = plan.subs.iter().find(|s| s.name == "tcp").unwrap();
    assert_eq!(tcp.kind, SubKind::Tcp);
    assert!(tcp.handler.is_some());

    let udp = plan.subs.iter().find(|s| s.name == "udp").unwrap();
    assert_eq!(udp.kind, SubKind::Udp);
    assert_eq!(udp.workers, 1);

    assert_eq!(plan.daemons.daemons.len(), 1);
    assert_eq!(plan.daemons.daemons[0].name, "ticker");
    assert_eq!(plan.grace.as_secs(), 5);
}

#[test]
fn test_stat_groups_cover_subs_and_daemons() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, _registry) = common::plan_from(
        &dir,
        "[wsgi]\n\
         port = 8901\n\
         workers = 3\n\
         \n\
         [daemons]\n\
         daemons = ticker\n\
         \n\
         [ticker]\n\
         call = brim.sample_daemon.SampleDaemon\n",
    );
    let set = common::stats_for(&plan);
    assert_eq!(set.group_count(), 2);

    let wsgi = set.group_by_name("wsgi").unwrap();
    assert_eq!(wsgi.bucket_count(), 3);
    assert_eq!(wsgi.bucket_names(), ["0", "1", "2"]);

    let daemons = set.group_by_name("daemons").unwrap();
    assert_eq!(daemons.bucket_names(), ["ticker"]);
}

#[test]
fn test_factory_hook_failure_aborts_plan() {
    let dir = tempfile::tempdir().unwrap();
    let conf = common::conf_file(
        &dir,
        "[wsgi]\n\
         port = 8901\n\
         apps = echo\n\
         \n\
         [echo]\n\
         call = brim.wsgi_echo.WsgiEcho\n\
         max_echo = not-a-number\n",
    );
    let registry = brimd::handlers::FactoryRegistry::with_builtins();
    let err = brimd::config::plan::LaunchPlan::from_conf(
        &conf,
        &registry,
        &brimd::config::plan::PlanOptions::default(),
    )
    .unwrap_err();
    // The factory's own message comes through, tagged with its section.
    let message = err.to_string();
    assert!(message.starts_with("[echo]"), "{message}");
    assert!(message.contains("max_echo"), "{message}");
}
