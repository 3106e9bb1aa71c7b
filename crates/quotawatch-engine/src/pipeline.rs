//! Debounced invalidation workers.
//!
//! Mutators call [`Signal::notify`], which never blocks: the channel holds
//! at most one pending signal and further ones are dropped. The worker
//! wakes on a signal, waits out a fixed quiet window while discarding
//! whatever else arrives, then runs one rebuild. Under continuous mutation
//! it therefore rebuilds about once per window. Independently, the worker
//! rebuilds on a periodic refresh cadence.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Boxed future returned by a rebuild callback.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Recompute-and-publish action run by a worker.
pub type RebuildFn = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// Non-blocking sender half of a capacity-1 invalidation channel.
#[derive(Clone, Debug)]
pub struct Signal {
    tx: mpsc::Sender<()>,
}

impl Signal {
    /// Mark the aggregator dirty. A signal already pending is sufficient.
    pub fn notify(&self) {
        if let Err(mpsc::error::TrySendError::Closed(())) = self.tx.try_send(()) {
            trace!("invalidation worker gone; signal dropped");
        }
    }
}

/// One debounce worker for one aggregator kind.
pub struct InvalidationPipeline {
    kind: &'static str,
    signals: mpsc::Receiver<()>,
    quiet_period: Duration,
    refresh_interval: Duration,
    rebuild: RebuildFn,
}

impl InvalidationPipeline {
    /// Create a worker and the signal handle that feeds it.
    pub fn new(
        kind: &'static str,
        quiet_period: Duration,
        refresh_interval: Duration,
        rebuild: RebuildFn,
    ) -> (Signal, Self) {
        let (tx, signals) = mpsc::channel(1);
        let pipeline = Self {
            kind,
            signals,
            quiet_period,
            refresh_interval,
            rebuild,
        };
        (Signal { tx }, pipeline)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Run until shutdown is signalled or every [`Signal`] is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            kind = self.kind,
            quiet_ms = self.quiet_period.as_millis() as u64,
            refresh_secs = self.refresh_interval.as_secs(),
            "invalidation worker started"
        );

        let mut refresh =
            tokio::time::interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                signal = self.signals.recv() => {
                    if signal.is_none() {
                        debug!(kind = self.kind, "all signal senders dropped");
                        break;
                    }
                    if !self.wait_quiet(&mut shutdown).await {
                        break;
                    }
                    trace!(kind = self.kind, "debounced rebuild");
                    (self.rebuild)().await;
                    refresh.reset();
                }
                _ = refresh.tick() => {
                    trace!(kind = self.kind, "periodic rebuild");
                    (self.rebuild)().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(kind = self.kind, "invalidation worker stopped");
    }

    /// Sleep out one fixed quiet window, discarding signals. Returns
    /// `false` if shutdown arrived first.
    async fn wait_quiet(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let window = tokio::time::sleep(self.quiet_period);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => return true,
                signal = self.signals.recv() => {
                    if signal.is_none() {
                        (&mut window).await;
                        return true;
                    }
                }
                _ = shutdown.changed() => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_rebuild() -> (RebuildFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let rebuild: RebuildFn = Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (rebuild, count)
    }

    #[tokio::test]
    async fn burst_of_signals_yields_one_rebuild() {
        let (rebuild, count) = counting_rebuild();
        let (signal, pipeline) = InvalidationPipeline::new(
            "test",
            Duration::from_millis(150),
            Duration::from_secs(3600),
            rebuild,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(shutdown_rx));

        for _ in 0..100 {
            signal.notify();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..100 {
            signal.notify();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn separated_bursts_rebuild_separately() {
        let (rebuild, count) = counting_rebuild();
        let (signal, pipeline) = InvalidationPipeline::new(
            "test",
            Duration::from_millis(50),
            Duration::from_secs(3600),
            rebuild,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(shutdown_rx));

        signal.notify();
        tokio::time::sleep(Duration::from_millis(250)).await;
        signal.notify();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn periodic_refresh_runs_without_signals() {
        let (rebuild, count) = counting_rebuild();
        let (_signal, pipeline) = InvalidationPipeline::new(
            "test",
            Duration::from_millis(10),
            Duration::from_millis(60),
            rebuild,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(shutdown_rx));

        // First tick is one full interval after start.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn worker_exits_when_signals_dropped() {
        let (rebuild, count) = counting_rebuild();
        let (signal, pipeline) = InvalidationPipeline::new(
            "test",
            Duration::from_millis(10),
            Duration::from_secs(3600),
            rebuild,
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(shutdown_rx));

        drop(signal);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop")
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn notify_never_blocks_when_full() {
        let (rebuild, _) = counting_rebuild();
        let (signal, _pipeline) =
            InvalidationPipeline::new("test", Duration::from_millis(1), Duration::from_secs(1), rebuild);
        for _ in 0..1_000 {
            signal.notify();
        }
    }
}
