//! A daemon that logs a status line every so often.
//!
//! A good starting point for other daemons.
//!
//! ```ini
//! [sample_daemon]
//! call = brim.sample_daemon.SampleDaemon
//! # interval = <seconds>
//! #   Seconds between status lines. Default: 60
//! ```
//!
//! Declares `iterations` and `last_run`, both daemon-only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::conf::Conf;
use crate::handlers::{downcast_conf, Daemon, DaemonFactory, HandlerConf, HandlerError, SubHandle};
use crate::stats::{epoch_secs, StatDecl, StatKind, Stats};

struct SampleConf {
    interval: Duration,
}

pub struct SampleDaemonFactory;

impl DaemonFactory for SampleDaemonFactory {
    fn parse_conf(&self, name: &str, conf: &Conf) -> Result<HandlerConf, HandlerError> {
        let interval = conf
            .get_int(&[name], "interval", 60)
            .map_err(|err| HandlerError::new(err.to_string()))?;
        let interval = u64::try_from(interval.max(1))
            .map_err(|_| HandlerError::new(format!("invalid [{name}] interval {interval}")))?;
        Ok(Arc::new(SampleConf {
            interval: Duration::from_secs(interval),
        }))
    }

    fn stats_conf(&self, _name: &str, _conf: &HandlerConf) -> Vec<StatDecl> {
        vec![
            StatDecl::new("iterations", StatKind::Worker),
            StatDecl::new("last_run", StatKind::Worker),
        ]
    }

    fn build(&self, name: &str, conf: &HandlerConf) -> Result<Arc<dyn Daemon>, HandlerError> {
        let conf = downcast_conf::<SampleConf>(name, conf)?;
        Ok(Arc::new(SampleDaemon {
            name: name.to_string(),
            conf,
        }))
    }
}

pub struct SampleDaemon {
    name: String,
    conf: Arc<SampleConf>,
}

#[async_trait]
impl Daemon for SampleDaemon {
    async fn run(&self, _sub: &SubHandle, stats: Stats) -> Result<(), HandlerError> {
        let mut iteration: u64 = 0;
        loop {
            iteration += 1;
            tracing::info!(daemon = %self.name, iteration, "sample daemon status");
            stats.set("last_run", epoch_secs());
            stats.set("iterations", iteration);
            tokio::time::sleep(self.conf.interval).await;
        }
    }
}
