//! Where admitted events go.
//!
//! The supervisor hands filtered events to an [`EventSink`]; in production
//! that is the webhook [`Engine`]. Delivery failures are absorbed here —
//! the producing session never sees them.

use async_trait::async_trait;
use serde_json::Value;
use whatsgate_model::EventKind;
use whatsgate_webhook::{Engine, ErrorType as WebhookErrorType};

/// Consumer of admitted session events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hand an event to the delivery pipeline.
    async fn publish(&self, session_id: &str, kind: EventKind, payload: Value);
}

#[async_trait]
impl EventSink for Engine {
    async fn publish(&self, session_id: &str, kind: EventKind, payload: Value) {
        if let Err(source) = self.enqueue(session_id, kind, payload).await {
            match source.kind() {
                // Delivery disabled by configuration; nothing to do.
                WebhookErrorType::NoSink => {}
                _ => tracing::warn!(
                    session_id,
                    event = kind.name(),
                    "enqueueing webhook failed: {source}",
                ),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::EventSink;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use whatsgate_model::EventKind;

    /// Sink that records everything published to it.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<(String, EventKind, Value)>>,
    }

    impl RecordingSink {
        pub(crate) fn kinds(&self) -> Vec<EventKind> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(_, kind, _)| *kind)
                .collect()
        }

        pub(crate) fn payloads_of(&self, kind: EventKind) -> Vec<Value> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, k, _)| *k == kind)
                .map(|(_, _, payload)| payload.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, session_id: &str, kind: EventKind, payload: Value) {
            self.events
                .lock()
                .unwrap()
                .push((session_id.to_owned(), kind, payload));
        }
    }
}
