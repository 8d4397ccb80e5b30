//! A connection handler that echoes incoming data back to the client.
//!
//! ```ini
//! [tcp]
//! call = brim.tcp_echo.TcpEcho
//! # chunk_read = <bytes>
//! #   The most to read from the client at once. Default: 65536
//! ```
//!
//! Declares the stat `byte_count` (sum).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::conf::Conf;
use crate::handlers::{
    downcast_conf, HandlerConf, HandlerError, SubHandle, TcpFactory, TcpHandler,
};
use crate::stats::{StatDecl, StatKind, Stats};

struct EchoConf {
    chunk_read: usize,
}

pub struct TcpEchoFactory;

impl TcpFactory for TcpEchoFactory {
    fn parse_conf(&self, name: &str, conf: &Conf) -> Result<HandlerConf, HandlerError> {
        let chunk_read = conf
            .get_int(&[name], "chunk_read", 65536)
            .map_err(|err| HandlerError::new(err.to_string()))?;
        let chunk_read = usize::try_from(chunk_read.max(1))
            .map_err(|_| HandlerError::new(format!("invalid [{name}] chunk_read {chunk_read}")))?;
        Ok(Arc::new(EchoConf { chunk_read }))
    }

    fn stats_conf(&self, _name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        vec![StatDecl::new("byte_count", StatKind::Sum)]
    }

    fn build(&self, name: &str, conf: &HandlerConf) -> Result<Arc<dyn TcpHandler>, HandlerError> {
        let conf = downcast_conf::<EchoConf>(name, conf)?;
        Ok(Arc::new(TcpEcho { conf }))
    }
}

pub struct TcpEcho {
    conf: Arc<EchoConf>,
}

#[async_trait]
impl TcpHandler for TcpEcho {
    async fn handle(
        &self,
        sub: &SubHandle,
        stats: Stats,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), HandlerError> {
        let mut buf = vec![0u8; self.conf.chunk_read];
        let result = loop {
            match stream.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    stats.add("byte_count", n as u64);
                    if let Err(err) = stream.write_all(&buf[..n]).await {
                        break Err(HandlerError::new(err.to_string()));
                    }
                }
                Err(err) => break Err(HandlerError::new(err.to_string())),
            }
        };
        tracing::info!(section = %sub.name, peer = %peer, "served connection");
        result
        // The stream drops here, closing the socket on every exit path.
    }
}
