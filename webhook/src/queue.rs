//! The durable delivery queue.
//!
//! Three lists back the pipeline: pending jobs, in-flight jobs, and the
//! dead-letter list. A job moves from pending to in-flight with one atomic
//! `LMOVE`, so a crash between dequeue and delivery leaves the job parked
//! in `webhook:processing` instead of losing it; the worker drains that
//! list back onto the queue with [`JobQueue::reclaim_processing`] when it
//! starts, before its first dequeue.
//!
//! A process-local list backend with the same semantics exists for tests
//! and local development via [`JobQueue::in_memory`].

use crate::{error::Error, job::Job};
use redis::{aio::ConnectionManager, AsyncCommands, Direction};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

/// Pending jobs; head is the newest push, the tail is dequeued.
pub const QUEUE_KEY: &str = "webhook:queue";
/// Jobs currently being delivered.
pub const PROCESSING_KEY: &str = "webhook:processing";
/// Jobs that exhausted the retry ladder.
pub const FAILED_KEY: &str = "webhook:failed";

/// A job taken off the queue, paired with its raw list entry so it can be
/// acknowledged with an exact `LREM`.
#[derive(Clone, Debug)]
pub struct TakenJob {
    pub raw: String,
    pub job: Job,
}

/// Depths of the three lists.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct QueueDepths {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(MemoryLists),
}

/// Process-local stand-in for the three lists.
#[derive(Clone, Default)]
struct MemoryLists(Arc<Mutex<HashMap<&'static str, VecDeque<String>>>>);

impl MemoryLists {
    fn lock(&self) -> MutexGuard<'_, HashMap<&'static str, VecDeque<String>>> {
        self.0.lock().expect("webhook lists poisoned")
    }
}

/// Handle to the delivery queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    backend: Backend,
}

impl JobQueue {
    /// Create a queue over an established Redis connection.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            backend: Backend::Redis(conn),
        }
    }

    /// Create a queue over process-local lists, for tests and local
    /// development.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryLists::default()),
        }
    }

    /// Push a job onto the head of the pending list.
    pub async fn push(&self, job: &Job) -> Result<(), Error> {
        let raw = serde_json::to_string(job).map_err(Error::serializing)?;

        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();

                conn.lpush(QUEUE_KEY, raw).await.map_err(Error::queue)
            }
            Backend::Memory(lists) => {
                lists.lock().entry(QUEUE_KEY).or_default().push_front(raw);

                Ok(())
            }
        }
    }

    /// Atomically move one entry from the tail of the pending list to the
    /// head of the in-flight list.
    async fn move_to_processing(&self) -> Result<Option<String>, Error> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();

                conn.lmove(QUEUE_KEY, PROCESSING_KEY, Direction::Right, Direction::Left)
                    .await
                    .map_err(Error::queue)
            }
            Backend::Memory(lists) => {
                let mut lists = lists.lock();

                let Some(raw) = lists.entry(QUEUE_KEY).or_default().pop_back() else {
                    return Ok(None);
                };

                lists
                    .entry(PROCESSING_KEY)
                    .or_default()
                    .push_front(raw.clone());

                Ok(Some(raw))
            }
        }
    }

    /// Move up to `max` jobs from the tail of the pending list into the
    /// in-flight list.
    ///
    /// Entries that no longer parse as jobs are moved straight to the
    /// dead-letter list rather than wedging the worker.
    pub async fn take(&self, max: usize) -> Result<Vec<TakenJob>, Error> {
        let mut taken = Vec::new();

        while taken.len() < max {
            let Some(raw) = self.move_to_processing().await? else {
                break;
            };

            match serde_json::from_str(&raw) {
                Ok(job) => taken.push(TakenJob { raw, job }),
                Err(source) => {
                    tracing::warn!("dead-lettering unparseable queue entry: {source}");

                    if self.remove_processing(&raw).await? > 0 {
                        self.push_failed_raw(raw).await?;
                    }
                }
            }
        }

        Ok(taken)
    }

    /// Remove a delivered job from the in-flight list.
    pub async fn ack(&self, taken: &TakenJob) -> Result<(), Error> {
        self.remove_processing(&taken.raw).await?;

        Ok(())
    }

    /// Remove one occurrence of a raw entry from the in-flight list.
    pub async fn remove_processing(&self, raw: &str) -> Result<u64, Error> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();

                conn.lrem(PROCESSING_KEY, 1, raw).await.map_err(Error::queue)
            }
            Backend::Memory(lists) => {
                let mut lists = lists.lock();
                let list = lists.entry(PROCESSING_KEY).or_default();

                match list.iter().position(|entry| entry == raw) {
                    Some(index) => {
                        list.remove(index);

                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
        }
    }

    /// Push a job back onto the head of the pending list for another
    /// delivery attempt.
    pub async fn requeue(&self, job: &Job) -> Result<(), Error> {
        self.push(job).await
    }

    /// Park a job on the dead-letter list.
    pub async fn bury(&self, job: &Job) -> Result<(), Error> {
        let raw = serde_json::to_string(job).map_err(Error::serializing)?;

        self.push_failed_raw(raw).await
    }

    async fn push_failed_raw(&self, raw: String) -> Result<(), Error> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();

                conn.rpush(FAILED_KEY, raw).await.map_err(Error::queue)
            }
            Backend::Memory(lists) => {
                lists.lock().entry(FAILED_KEY).or_default().push_back(raw);

                Ok(())
            }
        }
    }

    /// Atomically move one entry from the head of the in-flight list back
    /// to the tail of the pending list, where it is dequeued next.
    async fn reclaim_one(&self) -> Result<Option<String>, Error> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();

                conn.lmove(PROCESSING_KEY, QUEUE_KEY, Direction::Left, Direction::Right)
                    .await
                    .map_err(Error::queue)
            }
            Backend::Memory(lists) => {
                let mut lists = lists.lock();

                let Some(raw) = lists.entry(PROCESSING_KEY).or_default().pop_front() else {
                    return Ok(None);
                };

                lists.entry(QUEUE_KEY).or_default().push_back(raw.clone());

                Ok(Some(raw))
            }
        }
    }

    /// Return every stranded in-flight entry to the pending list, oldest
    /// dequeued first. Returns how many were moved.
    ///
    /// There is exactly one consumer per process, so anything still
    /// in-flight when a worker starts was abandoned by a previous run.
    /// Only call while no worker is consuming; the worker does, once, at
    /// startup. Re-queued entries may already have been delivered once,
    /// which at-least-once semantics permit.
    pub async fn reclaim_processing(&self) -> Result<u64, Error> {
        let mut reclaimed = 0;

        while self.reclaim_one().await?.is_some() {
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Pop the oldest entry off the dead-letter list.
    async fn pop_failed(&self) -> Result<Option<String>, Error> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();

                conn.lpop(FAILED_KEY, None).await.map_err(Error::queue)
            }
            Backend::Memory(lists) => {
                Ok(lists.lock().entry(FAILED_KEY).or_default().pop_front())
            }
        }
    }

    /// Current depths of the three lists.
    pub async fn depths(&self) -> Result<QueueDepths, Error> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();

                let (pending, processing, failed): (u64, u64, u64) = redis::pipe()
                    .llen(QUEUE_KEY)
                    .llen(PROCESSING_KEY)
                    .llen(FAILED_KEY)
                    .query_async(&mut conn)
                    .await
                    .map_err(Error::queue)?;

                Ok(QueueDepths {
                    pending,
                    processing,
                    failed,
                })
            }
            Backend::Memory(lists) => {
                let lists = lists.lock();
                let len = |key| lists.get(key).map_or(0, |list| list.len() as u64);

                Ok(QueueDepths {
                    pending: len(QUEUE_KEY),
                    processing: len(PROCESSING_KEY),
                    failed: len(FAILED_KEY),
                })
            }
        }
    }

    /// Move up to `limit` jobs from the dead-letter list back onto the head
    /// of the pending list, with their delivery history reset. Returns how
    /// many were moved.
    pub async fn retry_failed(&self, limit: usize) -> Result<usize, Error> {
        let mut moved = 0;

        while moved < limit {
            let Some(raw) = self.pop_failed().await? else {
                break;
            };

            let mut job: Job = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(source) => {
                    tracing::warn!("dropping unparseable dead-letter entry: {source}");

                    continue;
                }
            };

            job.reset();
            self.push(&job).await?;

            moved += 1;
        }

        Ok(moved)
    }
}
