//! TCP accept loop inside a worker.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};

use crate::config::plan::{JsonCodec, SubInstance};
use crate::error::{BrimError, Result};
use crate::handlers::{FactoryRegistry, SubHandle, TcpHandler};
use crate::stats::{epoch_secs, BucketStats, Stats, StatsSet};

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

/// Entry point for a zero-worker sub-instance running inside the parent.
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

/// One task per accepted connection. The handler owns the socket.
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
    let handler = build_handler(sub, registry)?;
    let handle = SubHandle {
        name: sub.name.clone(),
        json,
        stats_set: set,
    };
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
                    stats.incr("connection_count");
                    let handler = Arc::clone(&handler);
                    let handle = handle.clone();
                    let stats = stats.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(err) = handler.handle(&handle, stats, stream, peer).await {
                            tracing::error!(
                                section = %handle.name,
                                peer = %peer,
                                error = %err,
                                "connection handler error"
                            );
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(section = %sub.name, error = %err, "accept failed");
                    drop(permit);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }

    drop(listener);
    super::drain(semaphore, sub.concurrency, grace).await;
    Ok(())
}

fn build_handler(sub: &SubInstance, registry: &FactoryRegistry) -> Result<Arc<dyn TcpHandler>> {
    let spec = sub.handler.as_ref().ok_or_else(|| {
        BrimError::HandlerRuntime(format!("[{}] has no connection handler", sub.name))
    })?;
    let factory = registry.tcp(&spec.call).ok_or_else(|| {
        BrimError::HandlerRuntime(format!(
            "factory {:?} for [{}] disappeared after plan freeze",
            spec.call, spec.name
        ))
    })?;
    factory
        .build(&spec.name, &spec.conf)
        .map_err(|err| BrimError::HandlerRuntime(err.to_string()))
}
