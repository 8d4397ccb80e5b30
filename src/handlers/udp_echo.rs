//! A datagram handler that echoes each datagram back to its sender.
//!
//! ```ini
//! [udp]
//! call = brim.udp_echo.UdpEcho
//! ```
//!
//! Declares the stat `byte_count` (sum).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::handlers::{HandlerConf, HandlerError, SubHandle, UdpFactory, UdpHandler};
use crate::stats::{StatDecl, StatKind, Stats};

pub struct UdpEchoFactory;

impl UdpFactory for UdpEchoFactory {
    fn stats_conf(&self, _name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        vec![StatDecl::new("byte_count", StatKind::Sum)]
    }

    fn build(&self, _name: &str, _conf: &HandlerConf) -> Result<Arc<dyn UdpHandler>, HandlerError> {
        Ok(Arc::new(UdpEcho))
    }
}

pub struct UdpEcho;

#[async_trait]
impl UdpHandler for UdpEcho {
    async fn handle(
        &self,
        sub: &SubHandle,
        stats: Stats,
        socket: Arc<UdpSocket>,
        datagram: Bytes,
        peer: SocketAddr,
    ) -> Result<(), HandlerError> {
        stats.add("byte_count", datagram.len() as u64);
        let result = socket
            .send_to(&datagram, peer)
            .await
            .map(|_| ())
            .map_err(|err| HandlerError::new(err.to_string()));
        tracing::info!(
            section = %sub.name,
            peer = %peer,
            bytes = datagram.len(),
            "served datagram"
        );
        result
    }
}
