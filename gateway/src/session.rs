//! Shared observable state of one session.
//!
//! The supervisor task is the only writer of anything mutable here; HTTP
//! handlers and the registry read a stable reference. Fields are atomics
//! so readers never block the supervisor.

use crate::{cache::SessionCaches, status::SessionStatus, transport::WsState};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering},
        Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Milliseconds since the epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A pairing string and when it was generated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QrState {
    pub qr: String,
    pub generated_at: u64,
}

/// State of one session that outlives any single transport.
#[derive(Debug)]
pub struct SessionShared {
    id: Box<str>,
    status: AtomicU8,
    ws_state: AtomicU8,
    connected_at: AtomicU64,
    last_activity: AtomicU64,
    reconnect_attempts: AtomicU32,
    credentials_valid: AtomicBool,
    last_qr: Mutex<Option<QrState>>,
    caches: SessionCaches,
}

impl SessionShared {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.into(),
            status: AtomicU8::new(SessionStatus::Init as u8),
            ws_state: AtomicU8::new(WsState::Closed as u8),
            connected_at: AtomicU64::new(0),
            last_activity: AtomicU64::new(now_ms()),
            reconnect_attempts: AtomicU32::new(0),
            credentials_valid: AtomicBool::new(false),
            last_qr: Mutex::new(None),
            caches: SessionCaches::new(),
        }
    }

    /// The session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Status as last recorded by the supervisor.
    pub fn status(&self) -> SessionStatus {
        SessionStatus::try_from(self.status.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Socket readiness as last observed.
    pub fn ws_state(&self) -> WsState {
        WsState::try_from(self.ws_state.load(Ordering::Relaxed)).unwrap_or(WsState::Closed)
    }

    pub(crate) fn set_ws_state(&self, state: WsState) {
        self.ws_state.store(state as u8, Ordering::Release);
    }

    /// When the session last reached `open`, ms since the epoch.
    pub fn connected_at(&self) -> Option<u64> {
        match self.connected_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    pub(crate) fn set_connected_at(&self, at: u64) {
        self.connected_at.store(at, Ordering::Release);
    }

    /// When protocol traffic was last observed, ms since the epoch.
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub(crate) fn touch_activity(&self, at: u64) {
        self.last_activity.store(at, Ordering::Release);
    }

    /// Reconnect attempts in the current disconnect streak.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Release);
    }

    /// Whether the identity document names an authenticated address.
    pub fn credentials_valid(&self) -> bool {
        self.credentials_valid.load(Ordering::Relaxed)
    }

    pub(crate) fn set_credentials_valid(&self, valid: bool) {
        self.credentials_valid.store(valid, Ordering::Release);
    }

    /// The current pairing string, if one is outstanding.
    pub fn qr(&self) -> Option<QrState> {
        self.last_qr.lock().expect("qr poisoned").clone()
    }

    pub(crate) fn set_qr(&self, qr: String, generated_at: u64) {
        self.last_qr
            .lock()
            .expect("qr poisoned")
            .replace(QrState { qr, generated_at });
    }

    pub(crate) fn clear_qr(&self) {
        self.last_qr.lock().expect("qr poisoned").take();
    }

    /// The session's TTL caches.
    pub fn caches(&self) -> &SessionCaches {
        &self.caches
    }

    /// Whether the session is live and authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.credentials_valid() && self.status() == SessionStatus::Open
    }

    /// One row of `list()` output.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.to_string(),
            status: self.status(),
            is_authenticated: self.is_authenticated(),
            has_qr: self.qr().is_some(),
            credentials_valid: self.credentials_valid(),
            reconnect_attempts: self.reconnect_attempts(),
        }
    }

    /// The consistent status view callers get, reconciling recorded status,
    /// credentials, and socket readiness.
    pub fn status_view(&self) -> StatusView {
        let status = self.status();
        let ws_state = self.ws_state();

        let actual_status = if !self.credentials_valid()
            && matches!(status, SessionStatus::Open | SessionStatus::Close)
        {
            SessionStatus::InvalidCredentials
        } else if status == SessionStatus::Open && ws_state != WsState::Open {
            SessionStatus::ConnectionLost
        } else {
            status
        };

        StatusView {
            actual_status,
            is_authenticated: self.is_authenticated(),
            credentials_valid: self.credentials_valid(),
            ws_state,
            transport_status: status,
        }
    }
}

/// Summary row returned by list operations.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub status: SessionStatus,
    pub is_authenticated: bool,
    pub has_qr: bool,
    pub credentials_valid: bool,
    pub reconnect_attempts: u32,
}

/// Reconciled status of a session as reported to callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub actual_status: SessionStatus,
    pub is_authenticated: bool,
    pub credentials_valid: bool,
    pub ws_state: WsState,
    /// Status as recorded by the state machine, before reconciliation.
    pub transport_status: SessionStatus,
}
