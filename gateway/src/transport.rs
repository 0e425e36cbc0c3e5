//! The seam between the supervisor and the chat-protocol library.
//!
//! The wire protocol is somebody else's problem: a [`Connector`] builds a
//! [`Transport`] plus a stream of typed [`TransportEvent`]s, and the
//! supervisor exclusively owns both. The transport never calls back into
//! the supervisor; everything it has to say arrives over the event stream.

use crate::config::TransportConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tokio::sync::mpsc::UnboundedReceiver;
use whatsgate_model::{Event, Jid};
use whatsgate_store::AuthState;

pub mod dev;

/// Socket readiness as reported by the transport.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WsState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl WsState {
    /// The wire name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl TryFrom<u8> for WsState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            3 => Self::Closed,
            other => return Err(other),
        })
    }
}

impl Display for WsState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// What a transport can tell its supervisor.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A protocol event from the taxonomy, including `connection.update`.
    Protocol(Event),
    /// The identity document changed and must be persisted before the
    /// session may be considered open. Never forwarded to sinks.
    CredsUpdate(Value),
    /// Answer to a transport-level ping.
    Pong,
}

/// A transport operation failed.
#[derive(Debug)]
pub struct TransportError {
    kind: TransportErrorType,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl TransportError {
    /// Create an error with the given type and no source.
    pub const fn new(kind: TransportErrorType) -> Self {
        Self { kind, source: None }
    }

    /// Create an error with the given type and source.
    pub fn with_source(
        kind: TransportErrorType,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &TransportErrorType {
        &self.kind
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            TransportErrorType::Closed => f.write_str("the transport connection is closed"),
            TransportErrorType::NotWritable => f.write_str("the transport is not writable"),
            TransportErrorType::Establishing => {
                f.write_str("establishing the transport connection failed")
            }
            TransportErrorType::Protocol => f.write_str("the protocol refused the operation"),
            TransportErrorType::Unsupported => {
                f.write_str("the transport does not support this operation")
            }
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`TransportError`] that occurred.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum TransportErrorType {
    /// The connection is closed.
    Closed,
    /// The socket cannot take writes right now.
    NotWritable,
    /// Establishing the connection failed.
    Establishing,
    /// The remote end refused the operation.
    Protocol,
    /// The operation is not supported by this transport.
    Unsupported,
}

/// A live protocol connection owned by one supervisor.
///
/// Methods take `&mut self`: per-session state is confined to the
/// supervisor task, so no transport is ever driven from two tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the socket can take writes.
    fn is_writable(&self) -> bool;

    /// Current socket readiness.
    fn ws_state(&self) -> WsState;

    /// Queue a transport-level ping; the pong arrives as
    /// [`TransportEvent::Pong`].
    fn ping(&mut self) -> Result<(), TransportError>;

    /// Abruptly terminate the connection. The event stream ends or a close
    /// update is emitted, which drives the normal close handling.
    fn force_close(&mut self);

    /// Send a text message, returning the protocol's message descriptor.
    async fn send_text(&mut self, to: &Jid, text: &str) -> Result<Value, TransportError>;

    /// Cheap protocol round-trip used by the health prober.
    async fn send_presence(&mut self) -> Result<(), TransportError>;

    /// Request a pairing code for the given E.164 number (digits only).
    async fn request_pairing_code(&mut self, number: &str) -> Result<String, TransportError>;

    /// Tell the remote end to unlink this device. Best-effort.
    async fn logout(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully, resolving once closed.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A transport plus the event stream the supervisor consumes.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: UnboundedReceiver<TransportEvent>,
}

/// Builds transports for sessions. Implemented by the protocol integration;
/// the in-tree [`dev::DevConnector`] is a loopback stand-in.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection for the session using its persisted identity.
    async fn connect(
        &self,
        session_id: &str,
        auth: &AuthState,
        config: &TransportConfig,
    ) -> Result<Connection, TransportError>;
}
