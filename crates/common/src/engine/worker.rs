//! Mailbox worker that owns a [`SyncEngine`].
//!
//! Every engine operation is sent to one task over a flume channel and runs
//! there to completion before the next job starts, so submits and drains
//! never interleave. [`EngineHandle`] is the sending side and can be cloned
//! freely.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};

use super::{DrainOutcome, EngineError, SubmitOutcome, SyncEngine};
use crate::connectivity::Subscription;
use crate::queue::QueueEntry;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Jobs processed by the engine worker
#[derive(Debug)]
pub enum Job {
    Submit {
        url: String,
        data: Value,
        images: Vec<String>,
        reply: Reply<SubmitOutcome>,
    },
    /// Drain the queue. Triggered drains carry no reply channel.
    Drain { reply: Option<Reply<DrainOutcome>> },
    /// Re-read the queue into the pending mirror
    Refresh,
    Purge { reply: Reply<usize> },
}

/// Receiving side of the mailbox, handed to [`run_worker`].
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

/// Cloneable front door to the engine worker.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: flume::Sender<Job>,
    engine: Arc<SyncEngine>,
}

impl EngineHandle {
    /// Create a handle and the receiver its worker should consume.
    pub fn new(engine: Arc<SyncEngine>) -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx, engine }, JobReceiver { rx })
    }

    /// Create a handle and spawn its worker on the current runtime.
    ///
    /// With `sync_interval` set the worker also drains on that period.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        sync_interval: Option<Duration>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (handle, receiver) = Self::new(engine.clone());
        let task = tokio::spawn(run_worker(engine, receiver, sync_interval));
        (handle, task)
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// The engine's pending mirror.
    pub fn pending_items(&self) -> Vec<QueueEntry> {
        self.engine.pending_items()
    }

    fn dispatch(&self, job: Job) -> Result<(), EngineError> {
        self.tx.send(job).map_err(|_| EngineError::WorkerStopped)
    }

    pub async fn submit(
        &self,
        url: impl Into<String>,
        data: Value,
        images: Vec<String>,
    ) -> Result<SubmitOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Job::Submit {
            url: url.into(),
            data,
            images,
            reply,
        })?;
        rx.await.map_err(|_| EngineError::WorkerStopped)?
    }

    /// Drain and wait for the outcome.
    pub async fn drain(&self) -> Result<DrainOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Job::Drain { reply: Some(reply) })?;
        rx.await.map_err(|_| EngineError::WorkerStopped)?
    }

    /// Queue a drain without waiting for it.
    pub fn request_drain(&self) -> Result<(), EngineError> {
        self.dispatch(Job::Drain { reply: None })
    }

    pub fn request_refresh(&self) -> Result<(), EngineError> {
        self.dispatch(Job::Refresh)
    }

    pub async fn purge(&self) -> Result<usize, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Job::Purge { reply })?;
        rx.await.map_err(|_| EngineError::WorkerStopped)?
    }

    /// Request a drain every time connectivity comes back.
    pub fn watch_connectivity(&self) -> Subscription {
        let handle = self.clone();
        self.engine.connectivity().on_reconnect(move || {
            tracing::info!("connectivity restored, requesting drain");
            if let Err(e) = handle.request_drain() {
                tracing::warn!(error = %e, "could not request drain");
            }
        })
    }
}

/// Process jobs until every [`EngineHandle`] is dropped.
pub async fn run_worker(
    engine: Arc<SyncEngine>,
    receiver: JobReceiver,
    sync_interval: Option<Duration>,
) {
    tracing::info!(backend = engine.queue().backend(), "starting engine worker");

    if let Err(e) = engine.refresh().await {
        tracing::warn!(error = %e, "initial queue refresh failed");
    }

    let mut stream = receiver.rx.into_stream();
    let mut ticker = sync_interval.map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            job = stream.next() => {
                match job {
                    Some(job) => handle_job(&engine, job).await,
                    None => break,
                }
            }
            _ = tick(&mut ticker) => {
                tracing::debug!("periodic drain");
                log_drain(engine.drain().await);
            }
        }
    }

    tracing::info!("engine worker stopped");
}

/// Resolves on the next tick, or never without an interval.
async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn handle_job(engine: &SyncEngine, job: Job) {
    match job {
        Job::Submit {
            url,
            data,
            images,
            reply,
        } => {
            let result = engine.submit(&url, data, images).await;
            let _ = reply.send(result);
        }
        Job::Drain { reply: Some(reply) } => {
            let _ = reply.send(engine.drain().await);
        }
        Job::Drain { reply: None } => {
            log_drain(engine.drain().await);
        }
        Job::Refresh => {
            if let Err(e) = engine.refresh().await {
                tracing::warn!(error = %e, "queue refresh failed");
            }
        }
        Job::Purge { reply } => {
            let _ = reply.send(engine.purge().await);
        }
    }
}

fn log_drain(result: Result<DrainOutcome, EngineError>) {
    match result {
        Ok(DrainOutcome::Completed(report)) if report.halted_at.is_some() => {
            tracing::warn!(
                delivered = report.delivered,
                remaining = report.remaining,
                error = report.error.as_deref().unwrap_or_default(),
                "drain stopped early"
            );
        }
        Ok(DrainOutcome::Completed(report)) => {
            tracing::info!(delivered = report.delivered, "drain completed");
        }
        Ok(DrainOutcome::Skipped(reason)) => {
            tracing::debug!(%reason, "drain skipped");
        }
        Err(e) => {
            tracing::error!(error = %e, "drain failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use crate::connectivity::ConnectivityMonitor;
    use crate::delivery::{Delivery, DeliveryError, DeliveryRequest};
    use crate::engine::EngineConfig;
    use crate::kv::KvStore;
    use crate::queue::{KvQueue, MutationQueue, NewEntry};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Recorder(flume::Sender<DeliveryRequest>);

    #[async_trait]
    impl Delivery for Recorder {
        async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
            let _ = self.0.send(request.clone());
            Ok(())
        }
    }

    async fn setup(online: bool) -> (EngineHandle, flume::Receiver<DeliveryRequest>) {
        let (tx, rx) = flume::unbounded();
        let engine = SyncEngine::new(
            Arc::new(KvQueue::new(KvStore::in_memory().await.unwrap())),
            BlobStore::new_ephemeral(),
            Arc::new(Recorder(tx)),
            ConnectivityMonitor::new(online),
            EngineConfig::default(),
        );
        let (handle, _task) = EngineHandle::spawn(Arc::new(engine), None);
        (handle, rx)
    }

    #[tokio::test]
    async fn test_handle_submit_and_drain() {
        let (handle, delivered) = setup(false).await;

        for n in 0..3 {
            let outcome = handle
                .submit("items", serde_json::json!({ "n": n }), vec![])
                .await
                .unwrap();
            assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        }
        assert_eq!(handle.pending_items().len(), 3);

        handle.engine().connectivity().set_online(true);
        match handle.drain().await.unwrap() {
            DrainOutcome::Completed(report) => assert_eq!(report.delivered, 3),
            other => panic!("unexpected outcome {:?}", other),
        }

        let ns: Vec<_> = delivered.drain().map(|r| r.payload["n"].clone()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
        assert!(handle.pending_items().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_triggers_drain() {
        let (handle, delivered) = setup(false).await;
        let _sub = handle.watch_connectivity();

        handle
            .submit("items", serde_json::json!({ "n": 7 }), vec![])
            .await
            .unwrap();
        handle.engine().connectivity().set_online(true);

        let request = tokio::time::timeout(Duration::from_secs(5), delivered.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.payload["n"], 7);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_outside_writes() {
        let (handle, _delivered) = setup(false).await;

        // Written straight to the queue, bypassing the engine
        handle
            .engine()
            .queue()
            .push(NewEntry {
                target: "items".to_string(),
                payload: serde_json::json!({ "n": 1 }),
                images: vec![],
            })
            .await
            .unwrap();
        assert!(handle.pending_items().is_empty());

        handle.request_refresh().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.pending_items().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.pending_items()[0].payload["n"], 1);
    }

    #[tokio::test]
    async fn test_dropped_worker_reports_stopped() {
        let (handle, _delivered) = setup(false).await;
        let (orphan, receiver) = EngineHandle::new(handle.engine().clone());
        drop(receiver);

        assert!(matches!(
            orphan.drain().await,
            Err(EngineError::WorkerStopped)
        ));
    }
}
