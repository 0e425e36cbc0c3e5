//! The public face of webhook delivery.

use crate::{
    error::Error,
    job::{now_ms, Job},
    queue::JobQueue,
    sink::SinkConfig,
    worker::{Worker, WorkerConfig, WorkerState},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{
    atomic::Ordering,
    Arc,
};
use tokio::task::JoinHandle;
use whatsgate_model::EventKind;

/// Receipt for an accepted job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Enqueued {
    /// Id of the job that was queued.
    pub id: String,
}

/// Snapshot of the delivery pipeline for operators.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub is_processing: bool,
}

/// Webhook delivery engine: accepts jobs, owns the worker, and exposes the
/// operator surface over the queue.
///
/// Cheap to clone; all clones share the worker flags and the queue.
#[derive(Clone)]
pub struct Engine {
    queue: JobQueue,
    sink: Option<SinkConfig>,
    config: WorkerConfig,
    state: Arc<WorkerState>,
}

impl Engine {
    /// Create an engine with the default worker tunables. `sink: None`
    /// disables delivery: enqueueing refuses and no worker can be started.
    pub fn new(queue: JobQueue, sink: Option<SinkConfig>) -> Self {
        Self::with_config(queue, sink, WorkerConfig::default())
    }

    /// Create an engine with explicit worker tunables.
    pub fn with_config(queue: JobQueue, sink: Option<SinkConfig>, config: WorkerConfig) -> Self {
        Self {
            queue,
            sink,
            config,
            state: Arc::new(WorkerState::default()),
        }
    }

    /// Whether a sink URL is configured.
    pub fn sink_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// Queue an event of a session for delivery.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::NoSink`] error type when delivery is
    /// disabled, and [`ErrorType::Queue`] when the backing queue refuses
    /// the push.
    ///
    /// [`ErrorType::NoSink`]: crate::error::ErrorType::NoSink
    /// [`ErrorType::Queue`]: crate::error::ErrorType::Queue
    pub async fn enqueue(
        &self,
        session_id: &str,
        kind: EventKind,
        payload: Value,
    ) -> Result<Enqueued, Error> {
        if self.sink.is_none() {
            return Err(Error::no_sink());
        }

        let job = Job::new(session_id, kind, payload, now_ms());
        let id = job.id.clone();

        self.queue.push(&job).await?;

        Ok(Enqueued { id })
    }

    /// Snapshot queue depths and worker activity.
    pub async fn stats(&self) -> Result<EngineStats, Error> {
        let depths = self.queue.depths().await?;

        Ok(EngineStats {
            pending: depths.pending,
            processing: depths.processing,
            failed: depths.failed,
            is_processing: self.state.busy.load(Ordering::Acquire),
        })
    }

    /// Move up to `limit` dead-lettered jobs back onto the queue with a
    /// fresh delivery history. Returns how many were moved.
    pub async fn retry_failed(&self, limit: usize) -> Result<usize, Error> {
        self.queue.retry_failed(limit).await
    }

    /// Start the single delivery worker.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::NoSink`] error type when delivery is
    /// disabled, and [`ErrorType::Http`] when the HTTP client cannot be
    /// built.
    ///
    /// [`ErrorType::NoSink`]: crate::error::ErrorType::NoSink
    /// [`ErrorType::Http`]: crate::error::ErrorType::Http
    pub fn start_worker(&self) -> Result<JoinHandle<()>, Error> {
        let Some(sink) = self.sink.clone() else {
            return Err(Error::no_sink());
        };

        let worker = Worker::new(
            self.queue.clone(),
            sink,
            self.config.clone(),
            Arc::clone(&self.state),
        )?;

        self.state.running.store(true, Ordering::Release);

        Ok(tokio::spawn(worker.run()))
    }

    /// Ask the worker to stop after its current batch.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
    }
}
