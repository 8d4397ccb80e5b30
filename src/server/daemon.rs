//! Daemon invocation inside its own process.

use crate::config::plan::{DaemonSpec, JsonCodec};
use crate::error::{BrimError, Result};
use crate::handlers::{FactoryRegistry, SubHandle};
use crate::stats::{epoch_secs, BucketStats, StatsSet};

/// Construct the daemon and invoke it once. `Ok(())` means the parent asked
/// for shutdown; a daemon body that returns on its own is an error so the
/// supervisor restarts it with backoff.
pub fn run_daemon(
    spec: &DaemonSpec,
    group: &BucketStats,
    daemon_index: usize,
    set: &StatsSet,
    registry: &FactoryRegistry,
    json: &JsonCodec,
) -> Result<()> {
    let stats = group.handle(daemon_index);
    stats.set("start_time", epoch_secs());

    let factory = registry.daemon(&spec.call).ok_or_else(|| {
        BrimError::HandlerRuntime(format!(
            "factory {:?} for daemon [{}] disappeared after plan freeze",
            spec.call, spec.name
        ))
    })?;
    let daemon = factory
        .build(&spec.name, &spec.conf)
        .map_err(|err| BrimError::HandlerRuntime(err.to_string()))?;
    let handle = SubHandle {
        name: spec.name.clone(),
        json: json.clone(),
        stats_set: set.clone(),
    };

    let runtime = super::worker_runtime()?;
    runtime.block_on(async move {
        let mut shutdown = super::term_watch();
        tokio::select! {
            result = daemon.run(&handle, stats.clone()) => match result {
                Ok(()) => Err(BrimError::HandlerRuntime(format!(
                    "daemon [{}] returned",
                    handle.name
                ))),
                Err(err) => Err(BrimError::HandlerRuntime(format!(
                    "daemon [{}] failed: {err}",
                    handle.name
                ))),
            },
            _ = shutdown.changed() => Ok(()),
        }
    })
}
