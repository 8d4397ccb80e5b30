//! Factory resolution.
//!
//! Configuration refers to handlers and daemons by dotted path strings
//! (`call = brim.wsgi_echo.WsgiEcho`). The registry maps those strings to
//! factory values; resolution happens once, at plan build, so a bad path is
//! a startup error rather than a worker crash.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handlers::{
    sample_daemon::SampleDaemonFactory, tcp_echo::TcpEchoFactory, udp_echo::UdpEchoFactory,
    wsgi_echo::WsgiEchoFactory, wsgi_stats::WsgiStatsFactory, DaemonFactory, TcpFactory,
    UdpFactory, WsgiFactory,
};

/// Maps dotted factory paths to factory values.
#[derive(Default)]
pub struct FactoryRegistry {
    wsgi: HashMap<String, Arc<dyn WsgiFactory>>,
    tcp: HashMap<String, Arc<dyn TcpFactory>>,
    udp: HashMap<String, Arc<dyn UdpFactory>>,
    daemon: HashMap<String, Arc<dyn DaemonFactory>>,
}

impl FactoryRegistry {
    /// An empty registry. Embedders register their own factories on top.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in sample handler registered under its
    /// canonical path.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_wsgi("brim.wsgi_echo.WsgiEcho", Arc::new(WsgiEchoFactory));
        registry.register_wsgi("brim.wsgi_stats.WsgiStats", Arc::new(WsgiStatsFactory));
        registry.register_tcp("brim.tcp_echo.TcpEcho", Arc::new(TcpEchoFactory));
        registry.register_udp("brim.udp_echo.UdpEcho", Arc::new(UdpEchoFactory));
        registry.register_daemon(
            "brim.sample_daemon.SampleDaemon",
            Arc::new(SampleDaemonFactory),
        );
        registry
    }

    pub fn register_wsgi(&mut self, call: impl Into<String>, factory: Arc<dyn WsgiFactory>) {
        self.wsgi.insert(call.into(), factory);
    }

    pub fn register_tcp(&mut self, call: impl Into<String>, factory: Arc<dyn TcpFactory>) {
        self.tcp.insert(call.into(), factory);
    }

    pub fn register_udp(&mut self, call: impl Into<String>, factory: Arc<dyn UdpFactory>) {
        self.udp.insert(call.into(), factory);
    }

    pub fn register_daemon(&mut self, call: impl Into<String>, factory: Arc<dyn DaemonFactory>) {
        self.daemon.insert(call.into(), factory);
    }

    pub fn wsgi(&self, call: &str) -> Option<Arc<dyn WsgiFactory>> {
        self.wsgi.get(call).cloned()
    }

    pub fn tcp(&self, call: &str) -> Option<Arc<dyn TcpFactory>> {
        self.tcp.get(call).cloned()
    }

    pub fn udp(&self, call: &str) -> Option<Arc<dyn UdpFactory>> {
        self.udp.get(call).cloned()
    }

    pub fn daemon(&self, call: &str) -> Option<Arc<dyn DaemonFactory>> {
        self.daemon.get(call).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_resolve_by_canonical_path() {
        let registry = FactoryRegistry::with_builtins();
        assert!(registry.wsgi("brim.wsgi_echo.WsgiEcho").is_some());
        assert!(registry.wsgi("brim.wsgi_stats.WsgiStats").is_some());
        assert!(registry.tcp("brim.tcp_echo.TcpEcho").is_some());
        assert!(registry.udp("brim.udp_echo.UdpEcho").is_some());
        assert!(registry.daemon("brim.sample_daemon.SampleDaemon").is_some());
    }

    #[test]
    fn test_unknown_paths_do_not_resolve() {
        let registry = FactoryRegistry::with_builtins();
        assert!(registry.wsgi("brim.tcp_echo.TcpEcho").is_none());
        assert!(registry.tcp("no.such.Factory").is_none());
    }
}
