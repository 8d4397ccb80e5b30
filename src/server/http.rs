//! WSGI-style request dispatch inside a worker.
//!
//! # Responsibilities
//! - Serve HTTP/1.1 on the inherited listener via hyper
//! - Build the configured handler chain, terminated by the built-in 404
//! - Inject the per-request context (txn id, stats handle, json codec,
//!   extra log tokens) into every invocation
//! - Account `request_count` and the status counters, and emit the access
//!   log line, for every request — including synthesized 408/499/500s
//!
//! # Design Decisions
//! - The status accounted is the status actually produced on the wire; a
//!   request future dropped before completion accounts a client disconnect

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::config::plan::{JsonCodec, SubInstance};
use crate::error::{BrimError, Result};
use crate::handlers::{
    text_response, FactoryRegistry, HandlerResult, RequestContext, WsgiHandler,
};
use crate::stats::{epoch_secs, BucketStats, Stats, StatsSet};

/// The status code accounted for requests the client abandoned.
const CLIENT_DISCONNECT: u16 = 499;

/// Entry point for a forked worker: shutdown arrives as SIGTERM.
#[allow(clippy::too_many_arguments)]
pub fn run_worker(
    sub: &SubInstance,
    listener: std::net::TcpListener,
    group: &BucketStats,
    worker_index: usize,
    set: &StatsSet,
    registry: &FactoryRegistry,
    json: &JsonCodec,
    grace: std::time::Duration,
) -> Result<()> {
    let stats = group.handle(worker_index);
    stats.set("start_time", epoch_secs());
    let runtime = super::worker_runtime()?;
    runtime.block_on(async {
        let shutdown = super::term_watch();
        serve(
            sub,
            listener,
            stats,
            set.clone(),
            registry,
            json.clone(),
            grace,
            shutdown,
        )
        .await
    })
}

/// Entry point for a zero-worker sub-instance running inside the parent:
/// the supervisor flips the shutdown flag itself.
#[allow(clippy::too_many_arguments)]
pub fn run_inparent(
    sub: &SubInstance,
    listener: std::net::TcpListener,
    group: &BucketStats,
    set: &StatsSet,
    registry: &FactoryRegistry,
    json: &JsonCodec,
    grace: std::time::Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let stats = group.handle(0);
    stats.set("start_time", epoch_secs());
    let runtime = super::worker_runtime()?;
    runtime.block_on(serve(
        sub,
        listener,
        stats,
        set.clone(),
        registry,
        json.clone(),
        grace,
        shutdown,
    ))
}

/// Accept loop: one task per connection, gated by the concurrency permit.
#[allow(clippy::too_many_arguments)]
pub async fn serve(
    sub: &SubInstance,
    listener: std::net::TcpListener,
    stats: Stats,
    set: StatsSet,
    registry: &FactoryRegistry,
    json: JsonCodec,
    grace: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)
        .map_err(|err| BrimError::Supervisor(format!("listener handoff failed: {err}")))?;
    let chain = build_chain(sub, registry)?;
    let shared = Arc::new(WsgiShared {
        sub: sub.clone(),
        chain,
        stats,
        set,
        json,
    });
    let semaphore = Arc::new(Semaphore::new(sub.concurrency));

    loop {
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let service = service_fn(move |req| {
                            handle_request(Arc::clone(&shared), peer, req)
                        });
                        let connection = hyper::server::conn::http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service);
                        if let Err(err) = connection.await {
                            tracing::debug!(peer = %peer, error = %err, "connection closed");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(section = %shared.sub.name, error = %err, "accept failed");
                    drop(permit);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }

    // Stop accepting, then let in-flight requests finish within the grace.
    drop(listener);
    super::drain(semaphore, sub.concurrency, grace).await;
    Ok(())
}

/// Construct the handler chain back to front, ending at the built-in 404.
pub fn build_chain(sub: &SubInstance, registry: &FactoryRegistry) -> Result<Arc<dyn WsgiHandler>> {
    let mut chain: Arc<dyn WsgiHandler> = Arc::new(NotFound);
    for spec in sub.apps.iter().rev() {
        let factory = registry.wsgi(&spec.call).ok_or_else(|| {
            BrimError::HandlerRuntime(format!(
                "factory {:?} for app [{}] disappeared after plan freeze",
                spec.call, spec.name
            ))
        })?;
        chain = factory
            .build(&spec.name, &spec.conf, chain)
            .map_err(|err| BrimError::HandlerRuntime(err.to_string()))?;
    }
    Ok(chain)
}

struct WsgiShared {
    sub: SubInstance,
    chain: Arc<dyn WsgiHandler>,
    stats: Stats,
    set: StatsSet,
    json: JsonCodec,
}

async fn handle_request(
    shared: Arc<WsgiShared>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let txn = req
        .headers()
        .get("x-txn")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let logged_headers = shared.sub.log_headers.then(|| format_headers(req.headers()));

    // Accounts a client disconnect if hyper drops us before the response.
    let guard = DisconnectGuard::new(shared.stats.clone(), txn.clone(), peer);

    let (parts, body) = req.into_parts();
    // A body read error means the client went away mid-request; the
    // handlers see whatever arrived.
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let bytes_in = body.len() as u64;

    let mut ctx = RequestContext {
        txn: txn.clone(),
        start,
        peer,
        stats: shared.stats.clone(),
        stats_set: shared.set.clone(),
        json: shared.json.clone(),
        log_info: Vec::new(),
    };

    let outcome = tokio::time::timeout(
        shared.sub.client_timeout,
        shared.chain.call(&mut ctx, Request::from_parts(parts, body)),
    )
    .await;
    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::error!(txn = %txn, error = %err, "unhandled handler error");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
        }
        Err(_) => text_response(StatusCode::REQUEST_TIMEOUT, "408 Request Timeout"),
    };
    guard.disarm();

    let status = response.status().as_u16();
    let bytes_out = response.body().len() as u64;
    account(&shared.stats, status);
    log_request(
        &ctx,
        &method,
        &uri,
        status,
        bytes_in,
        bytes_out,
        logged_headers,
    );
    Ok(response.map(Full::new))
}

/// The terminal chain link: nothing upstream claimed the request.
struct NotFound;

#[async_trait::async_trait]
impl WsgiHandler for NotFound {
    async fn call(&self, _ctx: &mut RequestContext, _req: Request<Bytes>) -> HandlerResult {
        Ok(text_response(StatusCode::NOT_FOUND, "404 Not Found"))
    }
}

/// Bumps `request_count` and the status counters for one response. Counters
/// for untracked codes are undeclared names, so those writes fall away.
fn account(stats: &Stats, status: u16) {
    stats.incr("request_count");
    stats.incr(&format!("status_{status}_count"));
    match status / 100 {
        2 => stats.incr("status_2xx_count"),
        3 => stats.incr("status_3xx_count"),
        4 => stats.incr("status_4xx_count"),
        5 => stats.incr("status_5xx_count"),
        _ => {}
    }
}

fn log_request(
    ctx: &RequestContext,
    method: &Method,
    uri: &Uri,
    status: u16,
    bytes_in: u64,
    bytes_out: u64,
    headers: Option<String>,
) {
    let info = ctx
        .log_info
        .iter()
        .map(|token| log_quote(token))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(
        target: "brimd::access",
        txn = %ctx.txn,
        client = %ctx.peer,
        method = %method,
        path = %uri,
        status,
        bytes_in,
        bytes_out,
        duration_ms = ctx.start.elapsed().as_millis() as u64,
        info = %info,
        headers = headers.as_deref().unwrap_or(""),
    );
}

fn format_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value.to_str().unwrap_or("-")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Percent-encode anything outside the printable ASCII range, plus `%`
/// itself, so a log line stays one line.
fn log_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte < b'!' || byte == b'%' || byte > b'~' {
            out.push_str(&format!("%{byte:02X}"));
        } else {
            out.push(byte as char);
        }
    }
    out
}

/// Accounts a 499 if the request future is dropped before a response was
/// produced, which is how hyper reports a client that went away.
struct DisconnectGuard {
    stats: Stats,
    txn: String,
    peer: SocketAddr,
    armed: bool,
}

impl DisconnectGuard {
    fn new(stats: Stats, txn: String, peer: SocketAddr) -> Self {
        Self {
            stats,
            txn,
            peer,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            account(&self.stats, CLIENT_DISCONNECT);
            tracing::info!(
                target: "brimd::access",
                txn = %self.txn,
                client = %self.peer,
                status = CLIENT_DISCONNECT,
                "client disconnected before response"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{GroupSpec, StatDecl, StatKind, StatsSet};

    fn wsgi_stats_set() -> StatsSet {
        StatsSet::create(vec![GroupSpec {
            name: "wsgi".to_string(),
            bucket_names: vec!["0".to_string()],
            decls: vec![
                StatDecl::new("request_count", StatKind::Sum),
                StatDecl::new("status_2xx_count", StatKind::Sum),
                StatDecl::new("status_4xx_count", StatKind::Sum),
                StatDecl::new("status_404_count", StatKind::Sum),
                StatDecl::new("status_499_count", StatKind::Sum),
            ],
        }])
        .unwrap()
    }

    #[test]
    fn test_account_tracks_class_and_tracked_codes() {
        let set = wsgi_stats_set();
        let stats = set.group(0).handle(0);
        account(&stats, 200);
        account(&stats, 404);
        account(&stats, 418);
        assert_eq!(stats.get("request_count"), 3);
        assert_eq!(stats.get("status_2xx_count"), 1);
        assert_eq!(stats.get("status_4xx_count"), 2);
        assert_eq!(stats.get("status_404_count"), 1);
        // 418 is not tracked individually; the write fell away.
        assert_eq!(stats.get("status_418_count"), 0);
    }

    #[test]
    fn test_disconnect_guard_accounts_when_dropped() {
        let set = wsgi_stats_set();
        let stats = set.group(0).handle(0);
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        drop(DisconnectGuard::new(stats.clone(), "t".to_string(), peer));
        assert_eq!(stats.get("status_499_count"), 1);
        assert_eq!(stats.get("request_count"), 1);

        let guard = DisconnectGuard::new(stats.clone(), "t".to_string(), peer);
        guard.disarm();
        assert_eq!(stats.get("status_499_count"), 1);
    }

    #[test]
    fn test_log_quote_escapes_unprintable() {
        assert_eq!(log_quote("plain"), "plain");
        assert_eq!(log_quote("two words"), "two%20words");
        assert_eq!(log_quote("100%"), "100%25");
    }
}
