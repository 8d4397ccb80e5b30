//! The sample handlers against their invocation contracts.

mod common;

use bytes::Bytes;
use http::{Request, StatusCode};

fn echo_plan(
    dir: &tempfile::TempDir,
) -> (
    std::sync::Arc<brimd::config::plan::LaunchPlan>,
    std::sync::Arc<brimd::handlers::FactoryRegistry>,
) {
    common::plan_from(
        dir,
        "[wsgi]\n\
         port = 8901\n\
         apps = echo stats\n\
         \n\
         [echo]\n\
         call = brim.wsgi_echo.WsgiEcho\n\
         max_echo = 16\n\
         \n\
         [stats]\n\
         call = brim.wsgi_stats.WsgiStats\n",
    )
}

#[tokio::test]
async fn test_echo_serves_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, registry) = echo_plan(&dir);
    let set = common::stats_for(&plan);
    let chain = brimd::server::http::build_chain(&plan.subs[0], &registry).unwrap();
    let mut ctx = common::request_context(&set, set.group(0).handle(0));

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Bytes::from_static(b"Just a test."))
        .unwrap();
    let response = chain.call(&mut ctx, req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"Just a test.");
    assert_eq!(set.group(0).get(0, "echo.requests"), 1);
}

#[tokio::test]
async fn test_echo_truncates_to_max_echo() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, registry) = echo_plan(&dir);
    let set = common::stats_for(&plan);
    let chain = brimd::server::http::build_chain(&plan.subs[0], &registry).unwrap();
    let mut ctx = common::request_context(&set, set.group(0).handle(0));

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Bytes::from(vec![b'a'; 64]))
        .unwrap();
    let response = chain.call(&mut ctx, req).await.unwrap();
    assert_eq!(response.body().len(), 16);
}

#[tokio::test]
async fn test_unclaimed_path_falls_through_to_404() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, registry) = echo_plan(&dir);
    let set = common::stats_for(&plan);
    let chain = brimd::server::http::build_chain(&plan.subs[0], &registry).unwrap();
    let mut ctx = common::request_context(&set, set.group(0).handle(0));

    let req = Request::builder()
        .method("GET")
        .uri("/elsewhere")
        .body(Bytes::new())
        .unwrap();
    let response = chain.call(&mut ctx, req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    // Forwarded requests do not count as served by the echo app.
    assert_eq!(set.group(0).get(0, "echo.requests"), 0);
}

#[tokio::test]
async fn test_stats_reporter_renders_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, registry) = echo_plan(&dir);
    let set = common::stats_for(&plan);
    set.set_server_start_time(1234);
    let group = set.group(0);
    group.mark_started(1234);
    group.handle(0).incr("request_count");

    let chain = brimd::server::http::build_chain(&plan.subs[0], &registry).unwrap();
    let mut ctx = common::request_context(&set, group.handle(0));

    let req = Request::builder()
        .method("GET")
        .uri("/stats")
        .body(Bytes::new())
        .unwrap();
    let response = chain.call(&mut ctx, req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value =
        serde_json::from_slice(response.body().as_ref()).unwrap();
    assert_eq!(body["start_time"], 1234);
    assert_eq!(body["wsgi"]["start_time"], 1234);
    assert_eq!(body["wsgi"]["request_count"], 1);
}

#[tokio::test]
async fn test_stats_reporter_rejects_writes_and_supports_jsonp() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, registry) = echo_plan(&dir);
    let set = common::stats_for(&plan);
    let chain = brimd::server::http::build_chain(&plan.subs[0], &registry).unwrap();
    let mut ctx = common::request_context(&set, set.group(0).handle(0));

    let req = Request::builder()
        .method("POST")
        .uri("/stats")
        .body(Bytes::new())
        .unwrap();
    let response = chain.call(&mut ctx, req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

    let req = Request::builder()
        .method("GET")
        .uri("/stats?jsonp=cb")
        .body(Bytes::new())
        .unwrap();
    let response = chain.call(&mut ctx, req).await.unwrap();
    let body = String::from_utf8_lossy(response.body().as_ref()).to_string();
    assert!(body.starts_with("cb("), "{body}");
    assert!(body.ends_with(')'), "{body}");

    let req = Request::builder()
        .method("HEAD")
        .uri("/stats")
        .body(Bytes::new())
        .unwrap();
    let response = chain.call(&mut ctx, req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());
}
