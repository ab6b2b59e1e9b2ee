//! Heartbeat ingestion.
//!
//! The heartbeat pipeline hands decoded store statistics to this task over a channel, and the
//! task feeds them to the limiter in arrival order.

use std::sync::Arc;

use anyhow::Result;
use futures::stream::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use crate::limiter::StoreLimiter;
use crate::models::StoreStats;

/// A controller draining store heartbeats into the limiter.
pub struct StatsCollector {
    /// The limiter fed by this collector.
    limiter: Arc<StoreLimiter>,
    /// A channel of inbound store heartbeats.
    stats_rx: ReceiverStream<StoreStats>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl StatsCollector {
    /// Create a new instance.
    pub fn new(limiter: Arc<StoreLimiter>, stats_rx: mpsc::Receiver<StoreStats>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            limiter,
            stats_rx: ReceiverStream::new(stats_rx),
            shutdown_rx: BroadcastStream::new(shutdown_rx),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is signalled or every sender has been dropped.
    async fn run(mut self) -> Result<()> {
        tracing::debug!("store stats collector has started");
        let mut collected = 0u64;
        loop {
            tokio::select! {
                stats_opt = self.stats_rx.next() => match stats_opt {
                    Some(stats) => {
                        self.limiter.collect(&stats);
                        collected += 1;
                    }
                    None => break,
                },
                _ = self.shutdown_rx.next() => break,
            }
        }
        tracing::debug!(collected, "store stats collector has shutdown");
        Ok(())
    }
}
