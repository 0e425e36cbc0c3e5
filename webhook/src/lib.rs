//! # whatsgate-webhook
//!
//! Reliable forwarding of session events to a configured HTTP sink.
//!
//! Jobs are pushed onto a durable Redis-list queue, a single worker per
//! process drains them in small parallel batches, failures climb an
//! exponential retry ladder, and exhausted jobs land on a dead-letter list
//! operators can inspect and replay. Delivery is at-least-once; sinks
//! deduplicate on `{sessionId, event, ts}` plus the message id when one is
//! present.
//!
//! The [`Filter`] decides what gets queued at all: an allow/deny set over
//! event kinds, and address-class rules for individual messages.

#![deny(
    clippy::all,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]

mod engine;
mod error;
mod filter;
mod job;
mod queue;
mod sink;
mod worker;

pub use self::{
    engine::{Engine, EngineStats, Enqueued},
    error::{Error, ErrorType},
    filter::Filter,
    job::{Job, MAX_ERRORS},
    queue::{JobQueue, QueueDepths, FAILED_KEY, PROCESSING_KEY, QUEUE_KEY},
    sink::{SinkAuth, SinkConfig},
    worker::{WorkerConfig, BATCH_SIZE, IDLE_SLEEP, MAX_RETRIES, REQUEST_TIMEOUT, RETRY_DELAY},
};
