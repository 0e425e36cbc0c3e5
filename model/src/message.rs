//! Typed payloads for the protocol events the gateway inspects.
//!
//! Only the fields the gateway itself reads are modeled; everything else is
//! carried opaquely as [`serde_json::Value`] and forwarded to the sink
//! untouched.

use crate::jid::Jid;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a message within a chat.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Address of the chat the message belongs to.
    pub remote_jid: Jid,
    /// Whether the message was sent by this session.
    #[serde(default)]
    pub from_me: bool,
    /// Message id, unique within the chat.
    pub id: String,
    /// Author address in group chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}

/// A message as delivered by the transport.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub key: MessageKey,
    /// Display name the author advertises.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    /// Message content, opaque to the gateway.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub message: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

/// How an upsert batch was produced.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertType {
    /// Live messages that should notify the user.
    Notify,
    /// Messages appended while catching up on history.
    Append,
}

/// A batch of new messages from a `messages.upsert` event.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MessageBatch {
    pub messages: Vec<Message>,
    #[serde(rename = "type")]
    pub kind: UpsertType,
}

/// A contact known to the session.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Jid,
    /// Name from the address book, when synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Name the contact advertises about themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
}

impl Contact {
    /// Best display name available for the contact.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.notify.as_deref())
    }
}

/// A participant of a group chat.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipant {
    pub id: Jid,
    /// `"admin"` or `"superadmin"` when privileged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
}

/// Metadata of a group chat.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub id: Jid,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Jid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<GroupParticipant>,
}

/// Connection lifecycle notification from the transport.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
    /// Pairing string when the session must be linked from a device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_login: Option<bool>,
}

/// Socket-level connection state.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Details of the disconnect that accompanied a `close` update.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
