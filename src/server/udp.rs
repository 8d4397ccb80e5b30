//! UDP recv loop inside a worker.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Semaphore};

use crate::config::plan::{JsonCodec, SubInstance};
use crate::error::{BrimError, Result};
use crate::handlers::{FactoryRegistry, SubHandle, UdpHandler};
use crate::stats::{epoch_secs, BucketStats, Stats, StatsSet};

/// Entry point for a forked worker: shutdown arrives as SIGTERM.
#[allow(clippy::too_many_arguments)]
pub fn run_worker(
    sub: &SubInstance,
    socket: std::net::UdpSocket,
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
            socket,
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
    socket: std::net::UdpSocket,
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
        socket,
        stats,
        set.clone(),
        registry,
        json.clone(),
        grace,
        shutdown,
    ))
}

/// One task per datagram. The socket stays shared; handlers reply through
/// it but must not close it.
#[allow(clippy::too_many_arguments)]
pub async fn serve(
    sub: &SubInstance,
    socket: std::net::UdpSocket,
    stats: Stats,
    set: StatsSet,
    registry: &FactoryRegistry,
    json: JsonCodec,
    grace: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let socket = Arc::new(
        UdpSocket::from_std(socket)
            .map_err(|err| BrimError::Supervisor(format!("socket handoff failed: {err}")))?,
    );
    let handler = build_handler(sub, registry)?;
    let handle = SubHandle {
        name: sub.name.clone(),
        json,
        stats_set: set,
    };
    let semaphore = Arc::new(Semaphore::new(sub.concurrency));
    let mut buf = vec![0u8; sub.max_datagram_size];

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
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    stats.incr("datagram_count");
                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    let handler = Arc::clone(&handler);
                    let handle = handle.clone();
                    let stats = stats.clone();
                    let socket = Arc::clone(&socket);
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(err) =
                            handler.handle(&handle, stats, socket, datagram, peer).await
                        {
                            tracing::error!(
                                section = %handle.name,
                                peer = %peer,
                                error = %err,
                                "datagram handler error"
                            );
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(section = %sub.name, error = %err, "recv failed");
                    drop(permit);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }

    super::drain(semaphore, sub.concurrency, grace).await;
    Ok(())
}

fn build_handler(sub: &SubInstance, registry: &FactoryRegistry) -> Result<Arc<dyn UdpHandler>> {
    let spec = sub.handler.as_ref().ok_or_else(|| {
        BrimError::HandlerRuntime(format!("[{}] has no datagram handler", sub.name))
    })?;
    let factory = registry.udp(&spec.call).ok_or_else(|| {
        BrimError::HandlerRuntime(format!(
            "factory {:?} for [{}] disappeared after plan freeze",
            spec.call, spec.name
        ))
    })?;
    factory
        .build(&spec.name, &spec.conf)
        .map_err(|err| BrimError::HandlerRuntime(err.to_string()))
}
