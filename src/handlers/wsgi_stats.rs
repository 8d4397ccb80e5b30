//! Reports the launcher's stats as a JSON response.
//!
//! The report contains the server start time plus, per sub-instance, the
//! overall folded stats and the per-worker (or per-daemon) children. A
//! `jsonp` or `callback` query variable wraps the body for JSONP use.
//!
//! ```ini
//! [wsgi_stats]
//! call = brim.wsgi_stats.WsgiStats
//! # path = <path>
//! #   The request path to match and serve. Setting this to a hard to
//! #   guess value is a basic access restriction. Default: /stats
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};

use crate::config::conf::Conf;
use crate::handlers::{
    downcast_conf, HandlerConf, HandlerError, HandlerResult, RequestContext, WsgiFactory,
    WsgiHandler,
};
use crate::stats::aggregate;

struct StatsConf {
    path: String,
}

pub struct WsgiStatsFactory;

impl WsgiFactory for WsgiStatsFactory {
    fn parse_conf(&self, name: &str, conf: &Conf) -> Result<HandlerConf, HandlerError> {
        Ok(Arc::new(StatsConf {
            path: conf.get_str(&[name], "path", "/stats"),
        }))
    }

    fn build(
        &self,
        name: &str,
        conf: &HandlerConf,
        next: Arc<dyn WsgiHandler>,
    ) -> Result<Arc<dyn WsgiHandler>, HandlerError> {
        let conf = downcast_conf::<StatsConf>(name, conf)?;
        Ok(Arc::new(WsgiStats { conf, next }))
    }
}

pub struct WsgiStats {
    conf: Arc<StatsConf>,
    next: Arc<dyn WsgiHandler>,
}

#[async_trait]
impl WsgiHandler for WsgiStats {
    async fn call(&self, ctx: &mut RequestContext, req: Request<Bytes>) -> HandlerResult {
        if req.uri().path() != self.conf.path {
            return self.next.call(ctx, req).await;
        }
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Ok(Response::builder()
                .status(StatusCode::NOT_IMPLEMENTED)
                .header(header::CONTENT_LENGTH, 0)
                .body(Bytes::new())
                .unwrap_or_else(|_| Response::new(Bytes::new())));
        }

        let report = aggregate::snapshot(&ctx.stats_set);
        let callback = req
            .uri()
            .query()
            .and_then(|q| query_value(q, "jsonp").or_else(|| query_value(q, "callback")));
        let (body, content_type) = match callback {
            Some(callback) => (
                format!("{}({})", callback, ctx.json.dumps(&report)),
                "application/javascript",
            ),
            None => (ctx.json.dumps(&report) + "\n", "application/json"),
        };

        let head_only = req.method() == Method::HEAD;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::CONTENT_TYPE, content_type)
            .body(if head_only {
                Bytes::new()
            } else {
                Bytes::from(body)
            })
            .unwrap_or_else(|_| Response::new(Bytes::new())))
    }
}

fn query_value(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}
