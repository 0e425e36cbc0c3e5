//! Delivery eligibility rules.
//!
//! Two layers: event kinds pass through an allow/deny flag set, and
//! individual messages are dropped by the address class of their chat. A
//! `messages.upsert` batch whose messages are all dropped is suppressed
//! entirely.

use whatsgate_model::{
    event::EventKind,
    message::{Message, MessageBatch},
    EventTypeFlags,
};

/// Decides which events and messages are forwarded to the sink.
#[derive(Clone, Debug)]
pub struct Filter {
    /// Drop messages from broadcast lists and the status feed.
    pub skip_status: bool,
    /// Drop messages from group chats.
    pub skip_groups: bool,
    /// Drop messages from broadcast channels.
    pub skip_channels: bool,
    /// Reserved; blocked-contact filtering is not implemented here.
    pub skip_blocked: bool,
    /// When non-empty, only these kinds are delivered.
    pub allowed: EventTypeFlags,
    /// These kinds are never delivered, regardless of `allowed`.
    pub denied: EventTypeFlags,
}

impl Filter {
    /// Whether an event of this kind is eligible for delivery.
    ///
    /// The credential-persistence notification is internal and never
    /// eligible.
    pub fn should_send_event(&self, kind: EventKind) -> bool {
        if kind == EventKind::CredsUpdate {
            return false;
        }

        let flag = EventTypeFlags::from(kind);

        if self.denied.contains(flag) {
            return false;
        }

        if !self.allowed.is_empty() {
            return self.allowed.contains(flag);
        }

        true
    }

    /// Whether a single message is eligible for delivery.
    pub fn should_send_message(&self, message: &Message) -> bool {
        let jid = &message.key.remote_jid;

        if jid.as_str().is_empty() {
            return false;
        }

        if self.skip_status && jid.is_broadcast() {
            return false;
        }

        if self.skip_groups && jid.is_group() {
            return false;
        }

        if self.skip_channels && jid.is_newsletter() {
            return false;
        }

        true
    }

    /// Apply the message rules to an upsert batch.
    ///
    /// Returns `None` when every message was dropped; such a batch must not
    /// be delivered at all.
    pub fn filter_batch(&self, batch: &MessageBatch) -> Option<MessageBatch> {
        let messages: Vec<Message> = batch
            .messages
            .iter()
            .filter(|message| self.should_send_message(message))
            .cloned()
            .collect();

        (!messages.is_empty()).then(|| MessageBatch {
            messages,
            kind: batch.kind,
        })
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            skip_status: true,
            skip_groups: false,
            skip_channels: true,
            skip_blocked: false,
            allowed: EventTypeFlags::empty(),
            denied: EventTypeFlags::empty(),
        }
    }
}
