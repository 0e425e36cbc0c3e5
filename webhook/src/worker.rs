//! The delivery worker.
//!
//! Exactly one worker runs per process. On startup it re-queues whatever a
//! previous run left in-flight, then each tick drains a small batch off
//! the queue, POSTs every job in parallel, and acknowledges or retries per
//! result. Failed jobs climb an exponential retry ladder and land on the
//! dead-letter list once it is exhausted.

use crate::{
    error::Error,
    job::now_ms,
    queue::{JobQueue, TakenJob},
    sink::SinkConfig,
};
use futures_util::future;
use serde::Serialize;
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Jobs moved in-flight per tick.
pub const BATCH_SIZE: usize = 10;

/// Failed attempts before a job is dead-lettered.
pub const MAX_RETRIES: u32 = 3;

/// Base delay of the retry ladder.
pub const RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Hard timeout on each delivery request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep when the queue is empty.
pub const IDLE_SLEEP: Duration = Duration::from_millis(1000);

/// Tunables of the delivery worker. The defaults are the operational
/// values; tests shrink the delays.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub idle_sleep: Duration,
}

impl WorkerConfig {
    /// Delay before re-attempting a job that has failed `attempts` times:
    /// the base delay doubled per prior failure.
    pub(crate) fn retry_delay_for(&self, attempts: u32) -> Duration {
        self.retry_delay * 2_u32.saturating_pow(attempts.saturating_sub(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            request_timeout: REQUEST_TIMEOUT,
            idle_sleep: IDLE_SLEEP,
        }
    }
}

/// Shared flags between the engine and its worker.
#[derive(Debug, Default)]
pub(crate) struct WorkerState {
    /// The worker loop keeps running while set.
    pub running: AtomicBool,
    /// A batch is currently being delivered.
    pub busy: AtomicBool,
}

/// The body POSTed to the sink.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryBody<'a> {
    session_id: &'a str,
    event: &'a str,
    payload: &'a Value,
    ts: u64,
}

/// The single delivery consumer.
pub(crate) struct Worker {
    queue: JobQueue,
    sink: SinkConfig,
    config: WorkerConfig,
    http: reqwest::Client,
    state: Arc<WorkerState>,
}

impl Worker {
    pub(crate) fn new(
        queue: JobQueue,
        sink: SinkConfig,
        config: WorkerConfig,
        state: Arc<WorkerState>,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(Error::http)?;

        Ok(Self {
            queue,
            sink,
            config,
            http,
            state,
        })
    }

    /// Run until [`WorkerState::running`] is cleared. The current batch is
    /// always finished before exiting so no job stays in-flight longer
    /// than one tick.
    pub(crate) async fn run(self) {
        tracing::debug!(sink = %self.sink.url, "webhook worker started");

        // Whatever a previous run left in-flight goes back on the queue
        // before the first dequeue.
        match self.queue.reclaim_processing().await {
            Ok(0) => {}
            Ok(reclaimed) => {
                tracing::info!(reclaimed, "re-queued in-flight jobs from a previous run");
            }
            Err(source) => {
                tracing::warn!("reclaiming in-flight jobs failed: {source}");
            }
        }

        while self.state.running.load(Ordering::Acquire) {
            let batch = match self.queue.take(self.config.batch_size).await {
                Ok(batch) => batch,
                Err(source) => {
                    tracing::warn!("taking jobs off the queue failed: {source}");
                    tokio::time::sleep(self.config.idle_sleep).await;

                    continue;
                }
            };

            if batch.is_empty() {
                tokio::time::sleep(self.config.idle_sleep).await;

                continue;
            }

            self.state.busy.store(true, Ordering::Release);

            future::join_all(batch.into_iter().map(|taken| self.deliver(taken))).await;

            self.state.busy.store(false, Ordering::Release);
        }

        tracing::debug!("webhook worker stopped");
    }

    /// Deliver one job and settle it according to the outcome.
    async fn deliver(&self, taken: TakenJob) {
        let body = DeliveryBody {
            session_id: &taken.job.session_id,
            event: &taken.job.event,
            payload: &taken.job.payload,
            ts: taken.job.ts,
        };

        let mut request = self.http.post(&self.sink.url).json(&body);

        if let Some(authorization) = self.sink.auth.authorization() {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                if let Err(source) = self.queue.ack(&taken).await {
                    tracing::warn!(
                        job_id = %taken.job.id,
                        "acknowledging delivered job failed: {source}",
                    );
                }
            }
            Ok(response) => {
                self.settle_failure(taken, format!("sink returned {}", response.status()))
                    .await;
            }
            Err(source) => {
                self.settle_failure(taken, format!("delivery failed: {source}")).await;
            }
        }
    }

    /// Schedule a retry for a failed job or dead-letter it.
    ///
    /// The raw entry stays parked in-flight until its successor is safely
    /// queued, so a crash at any point here is recovered by the startup
    /// reclaim instead of losing the job.
    async fn settle_failure(&self, taken: TakenJob, error: String) {
        let TakenJob { raw, mut job } = taken;
        job.record_failure(error, now_ms());

        if job.attempts < self.config.max_retries {
            let delay = self.config.retry_delay_for(job.attempts);

            tracing::debug!(
                job_id = %job.id,
                attempts = job.attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling webhook retry",
            );

            let queue = self.queue.clone();

            tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                if let Err(source) = queue.requeue(&job).await {
                    tracing::warn!(job_id = %job.id, "requeueing job failed: {source}");

                    return;
                }

                if let Err(source) = queue.remove_processing(&raw).await {
                    tracing::warn!(
                        job_id = %job.id,
                        "removing retried job from in-flight failed: {source}",
                    );
                }
            });
        } else {
            tracing::warn!(
                job_id = %job.id,
                session_id = %job.session_id,
                event = %job.event,
                attempts = job.attempts,
                "retries exhausted, dead-lettering job",
            );

            if let Err(source) = self.queue.bury(&job).await {
                tracing::warn!(job_id = %job.id, "dead-lettering job failed: {source}");

                return;
            }

            if let Err(source) = self.queue.remove_processing(&raw).await {
                tracing::warn!(
                    job_id = %job.id,
                    "removing dead-lettered job from in-flight failed: {source}",
                );
            }
        }
    }
}
