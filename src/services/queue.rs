// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process bounded work queue for detection jobs.
//!
//! The webhook handler archives the raw event, hands it to an [`EventQueue`],
//! and answers immediately; a small worker pool drains the queue and runs
//! the detection pipeline. [`InlineQueue`] runs the pipeline synchronously
//! inside `dispatch` and exists for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::models::RawEvent;
use crate::services::pipeline::EventPipeline;

/// How long the HTTP handler may block on a saturated queue.
const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

/// Errors from handing an event to the queue. The raw event is already
/// archived at this point, so a failed dispatch loses nothing permanently.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full")]
    Full,

    #[error("Queue is shut down")]
    Closed,
}

/// Dispatch seam between ingestion and detection.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn dispatch(&self, event: RawEvent) -> Result<(), QueueError>;
}

/// Production queue: bounded mpsc channel drained by a worker pool.
pub struct BoundedQueue {
    tx: mpsc::Sender<RawEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl BoundedQueue {
    /// Spawn `worker_count` detection workers over a channel of `capacity`.
    pub fn start(pipeline: Arc<EventPipeline>, capacity: usize, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|worker| {
                let pipeline = Arc::clone(&pipeline);
                let rx = Arc::clone(&rx);
                tokio::spawn(worker_loop(worker, pipeline, rx))
            })
            .collect();

        tracing::info!(capacity, worker_count, "Event queue started");
        Self { tx, workers }
    }

    /// Drop the sender and wait for the workers to drain what is queued.
    pub async fn shutdown(self) {
        drop(self.tx);
        futures_util::future::join_all(self.workers).await;
    }
}

#[async_trait]
impl EventQueue for BoundedQueue {
    async fn dispatch(&self, event: RawEvent) -> Result<(), QueueError> {
        self.tx
            .send_timeout(event, ENQUEUE_TIMEOUT)
            .await
            .map_err(|err| match err {
                mpsc::error::SendTimeoutError::Timeout(_) => QueueError::Full,
                mpsc::error::SendTimeoutError::Closed(_) => QueueError::Closed,
            })
    }
}

async fn worker_loop(
    worker: usize,
    pipeline: Arc<EventPipeline>,
    rx: Arc<Mutex<mpsc::Receiver<RawEvent>>>,
) {
    tracing::debug!(worker, "Detection worker started");
    loop {
        // Hold the receiver lock only while waiting, not while processing.
        let event = { rx.lock().await.recv().await };
        let Some(event) = event else {
            break;
        };
        run_pipeline(&pipeline, event).await;
    }
    tracing::debug!(worker, "Detection worker stopped");
}

/// Run the pipeline for one event, logging failures with enough context to
/// replay the archived raw event by hand.
async fn run_pipeline(pipeline: &EventPipeline, event: RawEvent) {
    let tenant_id = event.tenant_id;
    let event_id = event.id;
    let device_id = event.device_id.clone();
    let event_type = event.event_type;

    if let Err(err) = pipeline.process(event).await {
        tracing::error!(
            tenant_id,
            event_id,
            device_id = %device_id,
            event_type = ?event_type,
            error = %err,
            "Event processing failed"
        );
    }
}

/// Test queue: runs detection synchronously inside `dispatch`.
pub struct InlineQueue {
    pipeline: Arc<EventPipeline>,
}

impl InlineQueue {
    pub fn new(pipeline: Arc<EventPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl EventQueue for InlineQueue {
    async fn dispatch(&self, event: RawEvent) -> Result<(), QueueError> {
        // Same contract as the worker: a pipeline failure is logged, never
        // surfaced to the dispatching handler.
        run_pipeline(&self.pipeline, event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use crate::store::{MemoryStore, Store};

    async fn pipeline_with_store() -> (Arc<dyn Store>, Arc<EventPipeline>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(EventPipeline::new(Arc::clone(&store), 150.0));
        (store, pipeline)
    }

    async fn archived_event(store: &Arc<dyn Store>, tenant_id: i64, device: &str) -> RawEvent {
        store
            .create_raw_event(
                tenant_id,
                device,
                EventType::Position,
                serde_json::json!({ "deviceId": device, "type": "position" }),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_workers_drain_queue_on_shutdown() {
        let (store, pipeline) = pipeline_with_store().await;
        let tenant = store.create_tenant("acme", "key-1", true).await.unwrap();
        let queue = BoundedQueue::start(pipeline, 8, 2);

        let mut ids = Vec::new();
        for i in 0..5 {
            let event = archived_event(&store, tenant.id, &format!("90{i}")).await;
            ids.push(event.id);
            queue.dispatch(event).await.unwrap();
        }
        queue.shutdown().await;

        for id in ids {
            let event = store.get_raw_event(tenant.id, id).await.unwrap().unwrap();
            assert!(event.processed_at.is_some(), "event {id} not processed");
        }
    }

    #[tokio::test]
    async fn test_dispatch_reports_saturation() {
        let (store, pipeline) = pipeline_with_store().await;
        let tenant = store.create_tenant("acme", "key-1", true).await.unwrap();
        // No workers: nothing ever drains the single slot.
        let queue = BoundedQueue::start(pipeline, 1, 0);

        let first = archived_event(&store, tenant.id, "901").await;
        queue.dispatch(first).await.unwrap();

        let second = archived_event(&store, tenant.id, "902").await;
        let err = queue.dispatch(second).await.unwrap_err();
        assert!(matches!(err, QueueError::Full));
    }

    #[tokio::test]
    async fn test_inline_queue_processes_synchronously() {
        let (store, pipeline) = pipeline_with_store().await;
        let tenant = store.create_tenant("acme", "key-1", true).await.unwrap();
        let queue = InlineQueue::new(pipeline);

        let event = archived_event(&store, tenant.id, "903").await;
        let id = event.id;
        queue.dispatch(event).await.unwrap();

        let event = store.get_raw_event(tenant.id, id).await.unwrap().unwrap();
        assert!(event.processed_at.is_some());
    }
}
