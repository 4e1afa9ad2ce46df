//! Client-side telemetry pipeline: periodic samplers feeding a local
//! buffer, and a send scheduler fanning snapshots through a bounded
//! queue into a fixed worker pool.

pub mod buffer;
pub mod collector;
pub mod sender;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::model::MetricRecord;

pub use buffer::LocalBuffer;
pub use collector::Collector;
pub use sender::Sender;

/// Transport-level cap on batch size.
pub const BATCH_LIMIT: usize = 100;

/// Seam between the worker pool and the network, so the pool can be
/// exercised against a recording transport in tests.
pub trait Transport: Send + Sync + 'static {
    fn send_batch(
        &self,
        batch: Vec<MetricRecord>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl Transport for Sender {
    async fn send_batch(&self, batch: Vec<MetricRecord>) -> anyhow::Result<()> {
        Sender::send_batch(self, &batch).await
    }
}

/// Starts `count` workers draining `rx`. Workers exit once the channel
/// closes and every remaining record has been flushed.
pub fn spawn_workers<T: Transport>(
    transport: Arc<T>,
    rx: mpsc::Receiver<MetricRecord>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count)
        .map(|_| tokio::spawn(worker(transport.clone(), rx.clone())))
        .collect()
}

/// One pool member. Holds the shared receiver while accumulating a
/// batch and releases it before transmitting, so the queue keeps
/// draining during network I/O but a partially built batch is never
/// interleaved with another worker's.
async fn worker<T: Transport>(transport: Arc<T>, rx: Arc<Mutex<mpsc::Receiver<MetricRecord>>>) {
    loop {
        let mut batch = Vec::new();
        let closed = {
            let mut rx = rx.lock().await;
            loop {
                match rx.recv().await {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= BATCH_LIMIT {
                            break false;
                        }
                    }
                    None => break true,
                }
            }
        };

        if !batch.is_empty() {
            if let Err(err) = transport.send_batch(batch).await {
                // No agent-side retry: the next cycle re-surfaces
                // current gauge values. Dropped counter deltas are lost.
                tracing::warn!(error = %err, "dropping batch after failed delivery");
            }
        }

        if closed {
            return;
        }
    }
}

/// The whole client-side pipeline wired together.
pub struct Agent {
    cfg: AgentConfig,
    buffer: Arc<LocalBuffer>,
    collector: Arc<Collector>,
    sender: Arc<Sender>,
}

impl Agent {
    pub fn new(cfg: AgentConfig) -> anyhow::Result<Self> {
        let buffer = Arc::new(LocalBuffer::new());
        let collector = Arc::new(Collector::new(buffer.clone()));
        let sender = Arc::new(Sender::new(&cfg)?);
        Ok(Self {
            cfg,
            buffer,
            collector,
            sender,
        })
    }

    /// Runs until `cancel` fires, then drains: the send scheduler stops
    /// and closes the queue, workers flush partial batches, and this
    /// future resolves only after every worker has exited.
    pub async fn run(self, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel(self.cfg.rate_limit.max(1));
        let workers = spawn_workers(self.sender.clone(), rx, self.cfg.rate_limit.max(1));

        let runtime_sampler = {
            let collector = self.collector.clone();
            let cancel = cancel.clone();
            let period = self.cfg.poll_interval;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => collector.collect_runtime(),
                    }
                }
            })
        };

        let host_sampler = {
            let collector = self.collector.clone();
            let cancel = cancel.clone();
            let period = self.cfg.poll_interval;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => collector.collect_host(),
                    }
                }
            })
        };

        let scheduler = {
            let buffer = self.buffer.clone();
            let collector = self.collector.clone();
            let cancel = cancel.clone();
            let period = self.cfg.report_interval;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                'produce: loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'produce,
                        _ = tick.tick() => {
                            for record in buffer.get_all().into_values() {
                                tokio::select! {
                                    _ = cancel.cancelled() => break 'produce,
                                    sent = tx.send(record) => {
                                        if sent.is_err() {
                                            break 'produce;
                                        }
                                    }
                                }
                            }
                            // Unconditional: a failed delivery still
                            // resets, so those poll ticks are lost.
                            collector.reset_poll_count();
                        }
                    }
                }
                // Dropping `tx` closes the queue; workers drain and exit.
            })
        };

        let _ = tokio::join!(runtime_sampler, host_sampler, scheduler);
        for handle in workers {
            let _ = handle.await;
        }
        tracing::info!("agent stopped");
    }
}
