//! Handler and daemon capability interfaces.
//!
//! # Responsibilities
//! - Define the four invocation contracts: WSGI-style request handlers,
//!   TCP connection handlers, UDP datagram handlers, and daemons
//! - Define the factory interfaces with their optional pre-fork hooks
//!   (`parse_conf`, `stats_conf`)
//! - Carry the per-request context injected into every WSGI call
//!
//! # Design Decisions
//! - Factories run their hooks in the parent, before any fork; a hook error
//!   is the only supported way for user code to abort startup
//! - A constructed handler must not fail startup; runtime errors are logged
//!   and accounted, and the worker keeps serving

pub mod registry;
pub mod sample_daemon;
pub mod tcp_echo;
pub mod udp_echo;
pub mod wsgi_echo;
pub mod wsgi_stats;

pub use registry::FactoryRegistry;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};

use crate::config::conf::Conf;
use crate::config::plan::JsonCodec;
use crate::stats::{StatDecl, Stats, StatsSet};

/// Opaque pre-parsed configuration a factory hands from its `parse_conf`
/// hook (run in the parent) to its `build` call (run in each worker).
pub type HandlerConf = Arc<dyn Any + Send + Sync>;

/// Error raised by handler and daemon code. Inside a worker these are
/// logged and accounted; from a `parse_conf` hook they abort startup.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of one WSGI-style request invocation.
pub type HandlerResult = std::result::Result<Response<Bytes>, HandlerError>;

/// Per-request values injected into every WSGI handler call.
pub struct RequestContext {
    /// Unique request id: the incoming `x-txn` header or a fresh 128-bit
    /// random value rendered as hex.
    pub txn: String,
    /// When the request started.
    pub start: Instant,
    /// The client address.
    pub peer: SocketAddr,
    /// Write handle for this worker's counter bucket.
    pub stats: Stats,
    /// The whole counter surface, for reporting handlers.
    pub stats_set: StatsSet,
    /// The configured JSON encode/decode pair.
    pub json: JsonCodec,
    /// Append-only extra tokens for the access log line.
    pub log_info: Vec<String>,
}

/// Handle on the sub-instance a TCP/UDP handler or daemon runs under.
#[derive(Clone)]
pub struct SubHandle {
    /// The sub-instance's section name.
    pub name: String,
    pub json: JsonCodec,
    pub stats_set: StatsSet,
}

/// One link in a WSGI handler chain. A link either serves the request or
/// forwards it to the next link it was constructed with.
#[async_trait]
pub trait WsgiHandler: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext, req: Request<Bytes>) -> HandlerResult;
}

/// Per-connection TCP handler. The handler owns the accepted socket and is
/// responsible for closing it on every exit path (dropping it does).
#[async_trait]
pub trait TcpHandler: Send + Sync {
    async fn handle(
        &self,
        sub: &SubHandle,
        stats: Stats,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> std::result::Result<(), HandlerError>;
}

/// Per-datagram UDP handler. The socket is shared with the recv loop and
/// must not be closed by the handler.
#[async_trait]
pub trait UdpHandler: Send + Sync {
    async fn handle(
        &self,
        sub: &SubHandle,
        stats: Stats,
        socket: Arc<UdpSocket>,
        datagram: Bytes,
        peer: SocketAddr,
    ) -> std::result::Result<(), HandlerError>;
}

/// A long-lived service body. Invoked once per process and expected to run
/// until the parent signals shutdown; returning early gets the process
/// restarted with backoff.
#[async_trait]
pub trait Daemon: Send + Sync {
    async fn run(&self, sub: &SubHandle, stats: Stats) -> std::result::Result<(), HandlerError>;
}

/// Factory for WSGI chain links.
pub trait WsgiFactory: Send + Sync {
    /// Translate the overall configuration into this handler's own. Runs in
    /// the parent; an error aborts startup with this message.
    fn parse_conf(&self, _name: &str, conf: &Conf) -> std::result::Result<HandlerConf, HandlerError> {
        Ok(Arc::new(conf.clone()))
    }

    /// The stats this handler wants allocated in its sub-instance.
    fn stats_conf(&self, _name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        Vec::new()
    }

    /// Construct the handler. Runs in each worker, after fork.
    fn build(
        &self,
        name: &str,
        conf: &HandlerConf,
        next: Arc<dyn WsgiHandler>,
    ) -> std::result::Result<Arc<dyn WsgiHandler>, HandlerError>;
}

/// Factory for TCP connection handlers.
pub trait TcpFactory: Send + Sync {
    fn parse_conf(&self, _name: &str, conf: &Conf) -> std::result::Result<HandlerConf, HandlerError> {
        Ok(Arc::new(conf.clone()))
    }

    fn stats_conf(&self, _name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        Vec::new()
    }

    fn build(
        &self,
        name: &str,
        conf: &HandlerConf,
    ) -> std::result::Result<Arc<dyn TcpHandler>, HandlerError>;
}

/// Factory for UDP datagram handlers.
pub trait UdpFactory: Send + Sync {
    fn parse_conf(&self, _name: &str, conf: &Conf) -> std::result::Result<HandlerConf, HandlerError> {
        Ok(Arc::new(conf.clone()))
    }

    fn stats_conf(&self, _name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        Vec::new()
    }

    fn build(
        &self,
        name: &str,
        conf: &HandlerConf,
    ) -> std::result::Result<Arc<dyn UdpHandler>, HandlerError>;
}

/// Factory for daemons.
pub trait DaemonFactory: Send + Sync {
    fn parse_conf(&self, _name: &str, conf: &Conf) -> std::result::Result<HandlerConf, HandlerError> {
        Ok(Arc::new(conf.clone()))
    }

    fn stats_conf(&self, _name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        Vec::new()
    }

    fn build(
        &self,
        name: &str,
        conf: &HandlerConf,
    ) -> std::result::Result<Arc<dyn Daemon>, HandlerError>;
}

/// A plain-text response with the usual headers set.
pub fn text_response(status: StatusCode, body: &str) -> Response<Bytes> {
    let body = format!("{body}\n");
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Bytes::from(body))
        .unwrap_or_else(|_| Response::new(Bytes::new()))
}

/// Downcast a factory's own `parse_conf` output back to its concrete type.
pub(crate) fn downcast_conf<T: Send + Sync + 'static>(
    name: &str,
    conf: &HandlerConf,
) -> std::result::Result<Arc<T>, HandlerError> {
    Arc::clone(conf)
        .downcast::<T>()
        .map_err(|_| HandlerError::new(format!("[{name}] received a foreign parsed configuration")))
}
