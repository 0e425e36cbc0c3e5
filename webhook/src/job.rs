//! The unit of webhook delivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use whatsgate_model::EventKind;

/// Ceiling on the per-job error audit trail; the oldest entries fall off.
pub const MAX_ERRORS: usize = 8;

/// A record enqueued for delivery to the sink.
///
/// `attempts` starts at zero and is incremented by every failed delivery;
/// `errors` keeps a bounded trail of what went wrong.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Locally-unique job id.
    pub id: String,
    pub session_id: String,
    /// Wire name of the event being delivered.
    pub event: String,
    pub payload: Value,
    /// When the job was enqueued, in ms since the epoch.
    pub ts: u64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Job {
    /// Create a fresh job for an event of a session.
    pub fn new(session_id: &str, kind: EventKind, payload: Value, ts: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            event: kind.name().to_owned(),
            payload,
            ts,
            attempts: 0,
            last_attempt: None,
            errors: Vec::new(),
        }
    }

    /// Record a failed delivery attempt.
    pub fn record_failure(&mut self, error: String, now: u64) {
        self.attempts += 1;
        self.last_attempt = Some(now);
        self.errors.push(error);

        if self.errors.len() > MAX_ERRORS {
            let excess = self.errors.len() - MAX_ERRORS;
            self.errors.drain(..excess);
        }
    }

    /// Reset the delivery history so the job can go through the ladder
    /// again. Used when moving jobs out of the dead-letter queue.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
        self.errors.clear();
    }
}

/// Milliseconds since the epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{Job, MAX_ERRORS};
    use serde_json::json;
    use whatsgate_model::EventKind;

    #[test]
    fn wire_shape() {
        let job = Job::new("alpha", EventKind::MessagesUpsert, json!({ "messages": [] }), 1700000000000);
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!("alpha", value["sessionId"]);
        assert_eq!("messages.upsert", value["event"]);
        assert_eq!(0, value["attempts"]);
        assert!(value.get("lastAttempt").is_none());
        assert!(value.get("errors").is_none());

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(job, back);
    }

    #[test]
    fn record_failure_tracks_attempts() {
        let mut job = Job::new("alpha", EventKind::Call, json!({}), 0);

        job.record_failure("sink returned 500".to_owned(), 10);
        job.record_failure("sink returned 500".to_owned(), 20);

        assert_eq!(2, job.attempts);
        assert_eq!(Some(20), job.last_attempt);
        assert_eq!(2, job.errors.len());
    }

    #[test]
    fn error_trail_is_bounded() {
        let mut job = Job::new("alpha", EventKind::Call, json!({}), 0);

        for n in 0..MAX_ERRORS + 3 {
            job.record_failure(format!("failure {n}"), n as u64);
        }

        assert_eq!(MAX_ERRORS, job.errors.len());
        assert_eq!("failure 3", job.errors[0]);
    }

    #[test]
    fn reset_clears_history() {
        let mut job = Job::new("alpha", EventKind::Call, json!({}), 0);
        job.record_failure("boom".to_owned(), 1);

        job.reset();

        assert_eq!(0, job.attempts);
        assert_eq!(None, job.last_attempt);
        assert!(job.errors.is_empty());
    }
}
