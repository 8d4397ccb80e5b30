//! A simple request handler that echoes the request body back.
//!
//! A good starting point for other handlers. Configuration options:
//!
//! ```ini
//! [wsgi_echo]
//! call = brim.wsgi_echo.WsgiEcho
//! # path = <path>
//! #   The request path to match and serve; any other path is passed on to
//! #   the next handler in the chain. Default: /echo
//! # max_echo = <bytes>
//! #   The most bytes to echo; anything beyond is ignored. Default: 65536
//! ```
//!
//! Declares the stat `<name>.requests` (sum).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Request, Response, StatusCode};

use crate::config::conf::Conf;
use crate::handlers::{
    downcast_conf, HandlerConf, HandlerError, HandlerResult, RequestContext, WsgiFactory,
    WsgiHandler,
};
use crate::stats::{StatDecl, StatKind};

struct EchoConf {
    path: String,
    max_echo: usize,
}

pub struct WsgiEchoFactory;

impl WsgiFactory for WsgiEchoFactory {
    fn parse_conf(&self, name: &str, conf: &Conf) -> Result<HandlerConf, HandlerError> {
        let max_echo = conf
            .get_int(&[name], "max_echo", 65536)
            .map_err(|err| HandlerError::new(err.to_string()))?;
        let max_echo = usize::try_from(max_echo)
            .map_err(|_| HandlerError::new(format!("invalid [{name}] max_echo {max_echo}")))?;
        Ok(Arc::new(EchoConf {
            path: conf.get_str(&[name], "path", "/echo"),
            max_echo,
        }))
    }

    fn stats_conf(&self, name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        vec![StatDecl::new(format!("{name}.requests"), StatKind::Sum)]
    }

    fn build(
        &self,
        name: &str,
        conf: &HandlerConf,
        next: Arc<dyn WsgiHandler>,
    ) -> Result<Arc<dyn WsgiHandler>, HandlerError> {
        let conf = downcast_conf::<EchoConf>(name, conf)?;
        Ok(Arc::new(WsgiEcho {
            name: name.to_string(),
            conf,
            next,
        }))
    }
}

pub struct WsgiEcho {
    name: String,
    conf: Arc<EchoConf>,
    next: Arc<dyn WsgiHandler>,
}

#[async_trait]
impl WsgiHandler for WsgiEcho {
    async fn call(&self, ctx: &mut RequestContext, req: Request<Bytes>) -> HandlerResult {
        if req.uri().path() != self.conf.path {
            return self.next.call(ctx, req).await;
        }
        ctx.stats.incr(&format!("{}.requests", self.name));
        let mut body = req.into_body();
        body.truncate(self.conf.max_echo);
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, body.len())
            .body(body)
            .unwrap_or_else(|_| Response::new(Bytes::new())))
    }
}
