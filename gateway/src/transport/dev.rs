//! Loopback transport for development and tests.
//!
//! The dev connector speaks no real protocol: it pairs instantly, answers
//! pings, and echoes sent messages back as inbound upserts, so the whole
//! gateway (supervision, persistence, webhook fan-out) can be exercised
//! end-to-end without a chat-network account. A real protocol integration
//! replaces this with its own [`Connector`].

use super::{
    Connection, Connector, Transport, TransportError, TransportErrorType, TransportEvent, WsState,
};
use crate::{config::TransportConfig, session::now_ms};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc::{self, UnboundedSender};
use whatsgate_model::{
    message::{ConnectionState, ConnectionUpdate, Message, MessageBatch, MessageKey, UpsertType},
    DisconnectReason, Event, Jid,
};
use whatsgate_store::AuthState;

/// Builds [`DevTransport`]s.
#[derive(Clone, Debug)]
pub struct DevConnector {
    /// How long the fake pairing takes after the QR is emitted.
    pair_delay: Duration,
}

impl DevConnector {
    /// Create a connector with the default pairing delay.
    pub fn new() -> Self {
        Self {
            pair_delay: Duration::from_millis(250),
        }
    }

    /// Create a connector that pairs after the given delay.
    pub fn with_pair_delay(pair_delay: Duration) -> Self {
        Self { pair_delay }
    }
}

impl Default for DevConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for DevConnector {
    async fn connect(
        &self,
        session_id: &str,
        auth: &AuthState,
        _config: &TransportConfig,
    ) -> Result<Connection, TransportError> {
        let (tx, events) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(WsState::Connecting as u8));

        let paired = auth.creds.is_valid();
        let me = auth
            .creds
            .me_id()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{session_id}@s.whatsapp.net"));

        let script_tx = tx.clone();
        let script_state = Arc::clone(&state);
        let session = session_id.to_owned();
        let pair_delay = self.pair_delay;

        tokio::spawn(async move {
            let _ = script_tx.send(TransportEvent::Protocol(Event::ConnectionUpdate(
                ConnectionUpdate {
                    connection: Some(ConnectionState::Connecting),
                    ..ConnectionUpdate::default()
                },
            )));

            if !paired {
                let qr = format!("2@{session}-{}", now_ms());

                let _ = script_tx.send(TransportEvent::Protocol(Event::ConnectionUpdate(
                    ConnectionUpdate {
                        qr: Some(qr),
                        ..ConnectionUpdate::default()
                    },
                )));

                tokio::time::sleep(pair_delay).await;

                let _ = script_tx.send(TransportEvent::CredsUpdate(json!({
                    "me": { "id": me },
                    "registered": true,
                    "platform": "dev",
                })));
            }

            script_state.store(WsState::Open as u8, Ordering::Release);

            let _ = script_tx.send(TransportEvent::Protocol(Event::ConnectionUpdate(
                ConnectionUpdate {
                    connection: Some(ConnectionState::Open),
                    is_new_login: Some(!paired),
                    ..ConnectionUpdate::default()
                },
            )));
        });

        Ok(Connection {
            transport: Box::new(DevTransport {
                tx: Some(tx),
                state,
                sent: 0,
            }),
            events,
        })
    }
}

/// The loopback transport built by [`DevConnector`].
pub struct DevTransport {
    tx: Option<UnboundedSender<TransportEvent>>,
    state: Arc<AtomicU8>,
    sent: u64,
}

impl DevTransport {
    fn sender(&self) -> Result<&UnboundedSender<TransportEvent>, TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::new(TransportErrorType::Closed))
    }

    fn emit_close(&self, reason: DisconnectReason) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(TransportEvent::Protocol(Event::ConnectionUpdate(
                ConnectionUpdate {
                    connection: Some(ConnectionState::Close),
                    last_disconnect: Some(whatsgate_model::message::LastDisconnect {
                        status_code: reason.code(),
                        message: None,
                    }),
                    ..ConnectionUpdate::default()
                },
            )));
        }
    }
}

#[async_trait]
impl Transport for DevTransport {
    fn is_writable(&self) -> bool {
        self.tx.is_some() && self.ws_state() == WsState::Open
    }

    fn ws_state(&self) -> WsState {
        WsState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(WsState::Closed)
    }

    fn ping(&mut self) -> Result<(), TransportError> {
        self.sender()?
            .send(TransportEvent::Pong)
            .map_err(|_| TransportError::new(TransportErrorType::Closed))
    }

    fn force_close(&mut self) {
        self.state.store(WsState::Closed as u8, Ordering::Release);
        // Dropping the sender ends the event stream, which the supervisor
        // treats as a lost connection.
        self.tx = None;
    }

    async fn send_text(&mut self, to: &Jid, text: &str) -> Result<Value, TransportError> {
        if !self.is_writable() {
            return Err(TransportError::new(TransportErrorType::NotWritable));
        }

        self.sent += 1;

        let id = format!("3EB0DEV{:012X}", self.sent);
        let key = MessageKey {
            remote_jid: to.clone(),
            from_me: true,
            id,
            participant: None,
        };

        let echo = Message {
            key: key.clone(),
            push_name: None,
            message: json!({ "conversation": text }),
            message_timestamp: Some(now_ms() / 1000),
            status: None,
        };

        let _ = self
            .sender()?
            .send(TransportEvent::Protocol(Event::MessagesUpsert(MessageBatch {
                messages: vec![echo],
                kind: UpsertType::Notify,
            })));

        serde_json::to_value(&key)
            .map_err(|source| TransportError::with_source(TransportErrorType::Protocol, source))
    }

    async fn send_presence(&mut self) -> Result<(), TransportError> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(TransportError::new(TransportErrorType::NotWritable))
        }
    }

    async fn request_pairing_code(&mut self, number: &str) -> Result<String, TransportError> {
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(TransportError::new(TransportErrorType::Protocol));
        }

        let code: String = number
            .chars()
            .rev()
            .chain("00000000".chars())
            .take(8)
            .collect();

        Ok(code)
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        self.emit_close(DisconnectReason::LoggedOut);
        self.state.store(WsState::Closed as u8, Ordering::Release);
        self.tx = None;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.emit_close(DisconnectReason::ConnectionClosed);
        self.state.store(WsState::Closed as u8, Ordering::Release);
        self.tx = None;

        Ok(())
    }
}
