//! The per-session supervisor.
//!
//! One task owns one session: its transport, its state machine, its
//! liveness probing, and its reconnect schedule. Transport events and
//! caller commands arrive over channels and are handled serially, so no
//! session state is ever touched from two tasks.
//!
//! Transport failures never escape this task; they become state
//! transitions and, where policy allows, reconnect attempts.

use crate::{
    config::SupervisorConfig,
    emit::EventSink,
    error::Error,
    keepalive::{KeepaliveTracker, KeepaliveVerdict},
    session::{now_ms, SessionShared},
    status::SessionStatus,
    transport::{Connection, Connector, Transport, TransportEvent, WsState},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
    time::{Instant as TokioInstant, MissedTickBehavior},
};
use tracing::Instrument;
use whatsgate_model::{
    buffer,
    event::{QrUpdate, SessionConnected, SessionDisconnected},
    message::{ConnectionState, ConnectionUpdate, LastDisconnect},
    DisconnectReason, Event, Jid, ReconnectDecision,
};
use whatsgate_store::{AuthState, AuthStore};
use whatsgate_webhook::Filter;

/// How long a graceful transport close may take before it is abandoned.
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between tearing a transport down and building its successor.
const RESTART_PAUSE: Duration = Duration::from_millis(500);

/// Commands a supervisor takes from the registry.
pub(crate) enum Command {
    Restart,
    Logout {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    SendText {
        to: Jid,
        text: String,
        reply: oneshot::Sender<Result<Value, Error>>,
    },
    SendPresence {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    PairingCode {
        number: String,
        reply: oneshot::Sender<Result<String, Error>>,
    },
    Shutdown,
}

/// Everything the registry keeps per running supervisor.
pub(crate) struct SupervisorHandle {
    pub shared: Arc<SessionShared>,
    pub commands: UnboundedSender<Command>,
    pub task: JoinHandle<()>,
}

/// What the select loop produced this iteration.
enum Input {
    Command(Option<Command>),
    Event(Option<TransportEvent>),
    PingTick,
    HealthTick,
    ReconnectDue,
}

pub(crate) struct Supervisor {
    shared: Arc<SessionShared>,
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    store: AuthStore,
    sink: Arc<dyn EventSink>,
    filter: Filter,
    commands: UnboundedReceiver<Command>,
    transport: Option<Box<dyn Transport>>,
    events: Option<UnboundedReceiver<TransportEvent>>,
    auth: Option<AuthState>,
    keepalive: KeepaliveTracker,
    /// Credentials changed but have not been persisted yet.
    creds_dirty: bool,
    reconnect_at: Option<TokioInstant>,
    /// Logged out; never reconnect without an explicit restart.
    terminal: bool,
}

impl Supervisor {
    /// Start a supervisor task for the session.
    pub(crate) fn spawn(
        id: &str,
        config: SupervisorConfig,
        connector: Arc<dyn Connector>,
        store: AuthStore,
        sink: Arc<dyn EventSink>,
        filter: Filter,
    ) -> SupervisorHandle {
        let shared = Arc::new(SessionShared::new(id));
        let (tx, rx) = mpsc::unbounded_channel();

        let keepalive = KeepaliveTracker::new(config.pong_timeout, config.max_missed_pongs);

        let supervisor = Self {
            shared: Arc::clone(&shared),
            config,
            connector,
            store,
            sink,
            filter,
            commands: rx,
            transport: None,
            events: None,
            auth: None,
            keepalive,
            creds_dirty: false,
            reconnect_at: None,
            terminal: false,
        };

        let span = tracing::info_span!("session", id = %shared.id());
        let task = tokio::spawn(supervisor.run().instrument(span));

        SupervisorHandle {
            shared,
            commands: tx,
            task,
        }
    }

    async fn run(mut self) {
        self.open_transport().await;

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut health = tokio::time::interval(self.config.health_check_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let open = self.shared.status() == SessionStatus::Open;
            let reconnect_at = self.reconnect_at;

            let input = {
                let commands = &mut self.commands;
                let events = self.events.as_mut();

                tokio::select! {
                    biased;

                    command = commands.recv() => Input::Command(command),
                    event = next_event(events) => Input::Event(event),
                    _ = ping.tick(), if open => Input::PingTick,
                    _ = health.tick(), if open => Input::HealthTick,
                    _ = sleep_until_due(reconnect_at) => Input::ReconnectDue,
                }
            };

            match input {
                // The registry dropped the handle; nothing can reach this
                // session anymore.
                Input::Command(None) => {
                    self.teardown_transport().await;

                    break;
                }
                Input::Command(Some(command)) => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Input::Event(None) => self.handle_stream_end().await,
                Input::Event(Some(event)) => {
                    self.handle_event(event).await;

                    if let Some(transport) = &self.transport {
                        self.shared.set_ws_state(transport.ws_state());
                    }
                }
                Input::PingTick => self.keepalive_tick(),
                Input::HealthTick => self.health_tick().await,
                Input::ReconnectDue => {
                    self.reconnect_at = None;
                    self.restart().await;
                }
            }
        }

        tracing::debug!("supervisor exited");
    }

    /// Build a fresh transport, loading persisted credentials first when
    /// this session has none in memory yet.
    async fn open_transport(&mut self) {
        if self.auth.is_none() {
            match self.store.load(self.shared.id()).await {
                Ok(auth) => {
                    self.shared.set_credentials_valid(auth.creds.is_valid());
                    self.auth = Some(auth);
                }
                Err(source) => {
                    tracing::warn!("loading credentials failed: {source}");
                    self.shared.set_status(SessionStatus::Close);
                    self.schedule_reconnect();

                    return;
                }
            }
        }

        let Some(auth) = &self.auth else {
            return;
        };

        self.shared.set_status(SessionStatus::Init);

        match self
            .connector
            .connect(self.shared.id(), auth, &self.config.transport)
            .await
        {
            Ok(Connection { transport, events }) => {
                self.shared.set_ws_state(transport.ws_state());
                self.transport = Some(transport);
                self.events = Some(events);
            }
            Err(source) => {
                tracing::warn!("establishing transport failed: {source}");
                self.shared.set_status(SessionStatus::Close);
                self.schedule_reconnect();
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> std::ops::ControlFlow<()> {
        match command {
            Command::Restart => {
                // An explicit restart revives even logged-out sessions.
                self.terminal = false;
                self.shared.reset_reconnect_attempts();
                self.restart().await;

                std::ops::ControlFlow::Continue(())
            }
            Command::Logout { reply } => {
                let result = self.logout().await;
                let _ = reply.send(result);

                std::ops::ControlFlow::Break(())
            }
            Command::SendText { to, text, reply } => {
                let _ = reply.send(self.send_text(&to, &text).await);

                std::ops::ControlFlow::Continue(())
            }
            Command::SendPresence { reply } => {
                let _ = reply.send(self.send_presence().await);

                std::ops::ControlFlow::Continue(())
            }
            Command::PairingCode { number, reply } => {
                let _ = reply.send(self.request_pairing_code(&number).await);

                std::ops::ControlFlow::Continue(())
            }
            Command::Shutdown => {
                self.teardown_transport().await;

                std::ops::ControlFlow::Break(())
            }
        }
    }

    async fn send_text(&mut self, to: &Jid, text: &str) -> Result<Value, Error> {
        if !self.shared.credentials_valid() {
            return Err(Error::credentials_invalid());
        }

        let transport = self
            .transport
            .as_mut()
            .ok_or_else(Error::transport_unavailable)?;

        let descriptor = transport
            .send_text(to, text)
            .await
            .map_err(Error::transport)?;

        self.shared.touch_activity(now_ms());

        Ok(descriptor)
    }

    async fn send_presence(&mut self) -> Result<(), Error> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(Error::transport_unavailable)?;

        transport.send_presence().await.map_err(Error::transport)?;
        self.shared.touch_activity(now_ms());

        Ok(())
    }

    async fn request_pairing_code(&mut self, number: &str) -> Result<String, Error> {
        let digits: String = number.chars().filter(char::is_ascii_digit).collect();

        let transport = self
            .transport
            .as_mut()
            .ok_or_else(Error::transport_unavailable)?;

        transport
            .request_pairing_code(&digits)
            .await
            .map_err(Error::transport)
    }

    /// Tear the current transport down and bring up a successor with the
    /// same identity.
    async fn restart(&mut self) {
        self.reconnect_at = None;
        self.keepalive.reset();
        self.teardown_transport().await;

        tokio::time::sleep(RESTART_PAUSE).await;

        self.open_transport().await;
    }

    /// Close the transport gracefully, waiting only so long.
    async fn teardown_transport(&mut self) {
        self.events = None;

        if let Some(mut transport) = self.transport.take() {
            if tokio::time::timeout(GRACEFUL_CLOSE_TIMEOUT, transport.close())
                .await
                .is_err()
            {
                tracing::debug!("graceful close timed out, abandoning transport");
            }
        }

        self.shared.set_ws_state(WsState::Closed);
    }

    /// Deauthenticate, erase persisted keys, and stop supervising.
    async fn logout(&mut self) -> Result<(), Error> {
        self.reconnect_at = None;
        self.terminal = true;
        self.events = None;

        if let Some(mut transport) = self.transport.take() {
            if let Err(source) = transport.logout().await {
                tracing::warn!("transport deauth failed: {source}");
            }
        }

        self.shared.set_status(SessionStatus::Close);
        self.shared.set_ws_state(WsState::Closed);
        self.shared.clear_qr();
        self.shared.set_credentials_valid(false);

        let removed = self
            .store
            .erase_session(self.shared.id())
            .await
            .map_err(Error::store)?;

        tracing::info!(removed_keys = removed, "session logged out");

        Ok(())
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Pong => {
                self.keepalive.record_pong(std::time::Instant::now());
                self.shared.touch_activity(now_ms());
            }
            TransportEvent::CredsUpdate(patch) => self.handle_creds_update(patch).await,
            TransportEvent::Protocol(event) => self.handle_protocol_event(event).await,
        }
    }

    async fn handle_creds_update(&mut self, patch: Value) {
        if let Some(auth) = &mut self.auth {
            auth.creds.merge(patch);
            self.shared.set_credentials_valid(auth.creds.is_valid());
        }

        self.creds_dirty = true;
        self.persist_creds().await;
    }

    async fn persist_creds(&mut self) {
        let Some(auth) = &self.auth else {
            return;
        };

        match self.store.save_creds(self.shared.id(), &auth.creds).await {
            Ok(()) => self.creds_dirty = false,
            Err(source) => {
                tracing::warn!("persisting credentials failed: {source}");
            }
        }
    }

    async fn handle_protocol_event(&mut self, event: Event) {
        self.shared.touch_activity(now_ms());

        let caches = self.shared.caches();

        match &event {
            Event::MessagesUpsert(batch) => {
                for message in &batch.messages {
                    caches.observe_message(message);
                }
            }
            Event::ContactsUpsert(contacts) | Event::ContactsUpdate(contacts) => {
                caches.observe_contacts(contacts);
            }
            Event::GroupsUpsert(groups) | Event::GroupsUpdate(groups) => {
                caches.observe_groups(groups);
            }
            _ => {}
        }

        let connection_update = match &event {
            Event::ConnectionUpdate(update) => Some(update.clone()),
            _ => None,
        };

        self.forward(event).await;

        if let Some(update) = connection_update {
            self.handle_connection_update(update).await;
        }
    }

    /// Run the state machine over a `connection.update`.
    async fn handle_connection_update(&mut self, update: ConnectionUpdate) {
        if let Some(qr) = update.qr {
            self.handle_qr(qr).await;
        }

        match update.connection {
            Some(ConnectionState::Connecting) => {
                self.shared.set_status(SessionStatus::Connecting);
            }
            Some(ConnectionState::Open) => self.handle_open().await,
            Some(ConnectionState::Close) => self.handle_close(update.last_disconnect).await,
            None => {}
        }
    }

    async fn handle_qr(&mut self, qr: String) {
        self.shared.set_status(SessionStatus::Connecting);

        let generated_at = now_ms();
        self.shared.set_qr(qr.clone(), generated_at);

        tracing::info!("new pairing string issued");

        if self.config.show_qr {
            println!("{qr}");
        }

        let expires_at = generated_at + self.config.qr_expiry.as_millis() as u64;

        self.forward(Event::QrUpdated(QrUpdate {
            qr,
            generated_at,
            expires_at,
        }))
        .await;
    }

    async fn handle_open(&mut self) {
        // Never record an open the store has not seen: resurrecting this
        // session later depends on the persisted identity.
        if self.creds_dirty {
            self.persist_creds().await;

            if self.creds_dirty {
                tracing::error!("credentials unpersisted, refusing to mark session open");

                if let Some(transport) = &mut self.transport {
                    transport.force_close();
                }

                return;
            }
        }

        let now = now_ms();

        self.shared.clear_qr();
        self.shared.set_connected_at(now);
        self.shared.touch_activity(now);
        self.shared.reset_reconnect_attempts();
        self.keepalive.reset();
        self.terminal = false;
        self.reconnect_at = None;

        let me = self
            .auth
            .as_ref()
            .and_then(|auth| auth.creds.me_id())
            .map(Jid::new);

        self.shared.set_status(SessionStatus::Open);

        tracing::info!(me = me.as_ref().map(|jid| jid.as_str()), "session connected");

        self.forward(Event::SessionConnected(SessionConnected {
            me,
            connected_at: now,
        }))
        .await;
    }

    async fn handle_close(&mut self, last_disconnect: Option<LastDisconnect>) {
        let code = last_disconnect.as_ref().map(|d| d.status_code);
        let reason = code.map(DisconnectReason::from);
        let is_logged_out = reason.is_some_and(DisconnectReason::is_logged_out);

        self.shared.set_status(SessionStatus::Close);
        self.shared.clear_qr();

        tracing::info!(code, "transport closed");

        self.forward(Event::SessionDisconnected(SessionDisconnected {
            code,
            reason: last_disconnect.and_then(|d| d.message),
            is_logged_out,
        }))
        .await;

        match reason.map_or(ReconnectDecision::Backoff, DisconnectReason::decision) {
            ReconnectDecision::Terminal => {
                tracing::warn!("session logged out; reconnection disabled");

                self.terminal = true;
                self.teardown_transport().await;
            }
            ReconnectDecision::Immediate => self.restart().await,
            ReconnectDecision::Backoff => self.schedule_reconnect(),
        }
    }

    /// The event stream ended without a close notification.
    async fn handle_stream_end(&mut self) {
        self.events = None;
        self.transport = None;
        self.shared.set_ws_state(WsState::Closed);

        if self.terminal {
            return;
        }

        self.shared.set_status(SessionStatus::ConnectionLost);
        self.shared.clear_qr();

        tracing::warn!("transport event stream ended unexpectedly");

        self.forward(Event::SessionDisconnected(SessionDisconnected {
            code: Some(DisconnectReason::ConnectionLost.code()),
            reason: Some("connection lost".to_owned()),
            is_logged_out: false,
        }))
        .await;

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.terminal || !self.config.auto_reconnect {
            return;
        }

        let attempt = self.shared.increment_reconnect_attempts();

        if attempt > self.config.max_reconnect_attempts {
            tracing::error!(
                attempts = attempt - 1,
                "reconnect attempts exhausted, giving up on this session",
            );
            self.shared.set_status(SessionStatus::Close);

            return;
        }

        let delay = self.config.reconnect_delay(attempt);

        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect",
        );

        self.reconnect_at = Some(TokioInstant::now() + delay);
    }

    fn keepalive_tick(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        if !transport.is_writable() {
            return;
        }

        if let Err(source) = transport.ping() {
            tracing::warn!("sending keep-alive ping failed: {source}");
        }

        match self.keepalive.tick(std::time::Instant::now()) {
            KeepaliveVerdict::Healthy => {}
            KeepaliveVerdict::Missed(missed) => {
                tracing::debug!(missed, "keep-alive ping went unanswered");
            }
            KeepaliveVerdict::Dead => {
                tracing::warn!("connection unresponsive, forcing close");
                transport.force_close();
            }
        }
    }

    async fn health_tick(&mut self) {
        let now = now_ms();
        let idle = now.saturating_sub(self.shared.last_activity());

        if idle > self.config.max_idle_time.as_millis() as u64 {
            let Some(transport) = self.transport.as_mut() else {
                return;
            };

            tracing::debug!(idle_ms = idle, "session idle, probing transport");

            match transport.send_presence().await {
                Ok(()) => self.shared.touch_activity(now_ms()),
                Err(source) => {
                    tracing::warn!("idle probe failed, forcing close: {source}");
                    transport.force_close();
                }
            }

            return;
        }

        // Repair a recorded `open` that no longer has a writable socket.
        if self.shared.status() == SessionStatus::Open
            && !self
                .transport
                .as_ref()
                .is_some_and(|transport| transport.is_writable())
        {
            tracing::warn!("transport not writable while open, recording close");
            self.shared.set_status(SessionStatus::Close);
        }
    }

    /// Queue an admitted event for delivery.
    async fn forward(&self, event: Event) {
        let kind = event.kind();

        if !self.filter.should_send_event(kind) {
            return;
        }

        let payload = if let Event::MessagesUpsert(batch) = &event {
            match self.filter.filter_batch(batch) {
                Some(filtered) => serde_json::to_value(&filtered).unwrap_or(Value::Null),
                // Everything in the batch was filtered out; suppress it.
                None => return,
            }
        } else {
            event.payload()
        };

        self.sink
            .publish(self.shared.id(), kind, buffer::encoded(payload))
            .await;
    }
}

/// Receive the next transport event, or park forever when there is no
/// stream to read.
async fn next_event(
    events: Option<&mut UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Sleep until the scheduled instant, or park forever without one.
async fn sleep_until_due(due: Option<TokioInstant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, Supervisor, SupervisorHandle};
    use crate::{
        config::{SupervisorConfig, TransportConfig},
        emit::testing::RecordingSink,
        error::ErrorType,
        status::SessionStatus,
        transport::{
            Connection, Connector, Transport, TransportError, TransportErrorType,
            TransportEvent, WsState,
        },
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, AtomicU32, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };
    use tokio::sync::{
        mpsc::{self, UnboundedSender},
        oneshot,
    };
    use whatsgate_model::{
        message::{ConnectionState, ConnectionUpdate, LastDisconnect},
        Event, EventKind, Jid,
    };
    use whatsgate_store::{AuthStore, Creds};
    use whatsgate_webhook::Filter;

    #[derive(Clone)]
    enum Step {
        Emit(TransportEvent),
        /// Close the event stream right away.
        End,
    }

    fn connecting() -> Step {
        Step::Emit(TransportEvent::Protocol(Event::ConnectionUpdate(
            ConnectionUpdate {
                connection: Some(ConnectionState::Connecting),
                ..ConnectionUpdate::default()
            },
        )))
    }

    fn open() -> Step {
        Step::Emit(TransportEvent::Protocol(Event::ConnectionUpdate(
            ConnectionUpdate {
                connection: Some(ConnectionState::Open),
                ..ConnectionUpdate::default()
            },
        )))
    }

    fn qr(value: &str) -> Step {
        Step::Emit(TransportEvent::Protocol(Event::ConnectionUpdate(
            ConnectionUpdate {
                qr: Some(value.to_owned()),
                ..ConnectionUpdate::default()
            },
        )))
    }

    fn creds(me: &str) -> Step {
        Step::Emit(TransportEvent::CredsUpdate(json!({ "me": { "id": me } })))
    }

    fn close(code: u16) -> Step {
        Step::Emit(TransportEvent::Protocol(Event::ConnectionUpdate(
            ConnectionUpdate {
                connection: Some(ConnectionState::Close),
                last_disconnect: Some(LastDisconnect {
                    status_code: code,
                    message: None,
                }),
                ..ConnectionUpdate::default()
            },
        )))
    }

    /// Replays one script per connection attempt, falling back to a
    /// default script once the queue is drained.
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Vec<Step>>>,
        default_script: Mutex<Option<Vec<Step>>>,
        connects: AtomicU32,
        pings: Arc<AtomicU32>,
        presences: Arc<AtomicU32>,
        presence_ok: AtomicBool,
        auto_pong: AtomicBool,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Vec<Step>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                default_script: Mutex::new(None),
                connects: AtomicU32::new(0),
                pings: Arc::new(AtomicU32::new(0)),
                presences: Arc::new(AtomicU32::new(0)),
                presence_ok: AtomicBool::new(true),
                auto_pong: AtomicBool::new(true),
            }
        }

        fn with_default(self, script: Vec<Step>) -> Self {
            *self.default_script.lock().unwrap() = Some(script);

            self
        }

        fn connects(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            _session_id: &str,
            _auth: &whatsgate_store::AuthState,
            _config: &TransportConfig,
        ) -> Result<Connection, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);

            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .or_else(|| self.default_script.lock().unwrap().clone())
                .unwrap_or_default();

            let (tx, events) = mpsc::unbounded_channel();
            let mut ended = false;

            for step in script {
                match step {
                    Step::Emit(event) => {
                        let _ = tx.send(event);
                    }
                    Step::End => ended = true,
                }
            }

            Ok(Connection {
                transport: Box::new(ScriptedTransport {
                    tx: (!ended).then_some(tx),
                    pings: Arc::clone(&self.pings),
                    presences: Arc::clone(&self.presences),
                    presence_ok: self.presence_ok.load(Ordering::SeqCst),
                    auto_pong: self.auto_pong.load(Ordering::SeqCst),
                }),
                events,
            })
        }
    }

    struct ScriptedTransport {
        tx: Option<UnboundedSender<TransportEvent>>,
        pings: Arc<AtomicU32>,
        presences: Arc<AtomicU32>,
        presence_ok: bool,
        auto_pong: bool,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn is_writable(&self) -> bool {
            self.tx.is_some()
        }

        fn ws_state(&self) -> WsState {
            if self.tx.is_some() {
                WsState::Open
            } else {
                WsState::Closed
            }
        }

        fn ping(&mut self) -> Result<(), TransportError> {
            self.pings.fetch_add(1, Ordering::SeqCst);

            if self.auto_pong {
                if let Some(tx) = &self.tx {
                    let _ = tx.send(TransportEvent::Pong);
                }
            }

            Ok(())
        }

        fn force_close(&mut self) {
            self.tx = None;
        }

        async fn send_text(&mut self, to: &Jid, _text: &str) -> Result<Value, TransportError> {
            if self.tx.is_none() {
                return Err(TransportError::new(TransportErrorType::NotWritable));
            }

            Ok(json!({ "remoteJid": to.as_str(), "fromMe": true, "id": "TESTID" }))
        }

        async fn send_presence(&mut self) -> Result<(), TransportError> {
            self.presences.fetch_add(1, Ordering::SeqCst);

            if self.presence_ok {
                Ok(())
            } else {
                Err(TransportError::new(TransportErrorType::NotWritable))
            }
        }

        async fn request_pairing_code(&mut self, number: &str) -> Result<String, TransportError> {
            Ok(format!("CODE{number}"))
        }

        async fn logout(&mut self) -> Result<(), TransportError> {
            self.tx = None;

            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.tx = None;

            Ok(())
        }
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            // Liveness probing is exercised by dedicated tests.
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_millis(5),
            max_missed_pongs: 2,
            health_check_interval: Duration::from_secs(10),
            max_idle_time: Duration::from_secs(3600),
            auto_reconnect: true,
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_millis(10),
            reconnect_max_delay: Duration::from_millis(50),
            qr_expiry: Duration::from_millis(60000),
            show_qr: false,
            transport: TransportConfig::default(),
        }
    }

    fn spawn(
        connector: Arc<ScriptedConnector>,
        store: AuthStore,
        config: SupervisorConfig,
        sink: Arc<RecordingSink>,
    ) -> SupervisorHandle {
        Supervisor::spawn(
            "alpha",
            config,
            connector as Arc<_>,
            store,
            sink as Arc<_>,
            Filter::default(),
        )
    }

    async fn seeded_store() -> AuthStore {
        let store = AuthStore::in_memory();

        store
            .save_creds(
                "alpha",
                &Creds::from_value(json!({ "me": { "id": "alpha@s.whatsapp.net" } })),
            )
            .await
            .unwrap();

        store
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        panic!("condition never met");
    }

    #[tokio::test]
    async fn pairing_flow_reaches_open() {
        let store = AuthStore::in_memory();
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            connecting(),
            qr("2@pair-me"),
            creds("alpha@s.whatsapp.net"),
            open(),
        ]]));

        let handle = spawn(
            Arc::clone(&connector),
            store.clone(),
            fast_config(),
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::Open).await;

        // The pairing string was cleared on open and the counter is fresh.
        assert_eq!(None, handle.shared.qr());
        assert_eq!(0, handle.shared.reconnect_attempts());
        assert!(handle.shared.credentials_valid());
        assert!(handle.shared.is_authenticated());

        // Credentials were persisted before open was recorded.
        let persisted = store.load("alpha").await.unwrap();
        assert!(persisted.creds.is_valid());

        let kinds = sink.kinds();
        assert!(kinds.contains(&EventKind::QrUpdated));
        assert!(kinds.contains(&EventKind::SessionConnected));
        assert!(kinds.contains(&EventKind::ConnectionUpdate));
        assert!(!kinds.contains(&EventKind::CredsUpdate));

        let qr_payload = &sink.payloads_of(EventKind::QrUpdated)[0];
        assert_eq!("2@pair-me", qr_payload["qr"]);
        assert_eq!(
            qr_payload["generatedAt"].as_u64().unwrap() + 60000,
            qr_payload["expiresAt"].as_u64().unwrap()
        );
    }

    #[tokio::test]
    async fn logged_out_close_is_terminal() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            connecting(),
            open(),
            close(401),
        ]]));

        let handle = spawn(
            Arc::clone(&connector),
            store,
            fast_config(),
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::Close).await;

        // Far longer than the backoff ladder would wait; no reconnect may
        // happen.
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(1, connector.connects());
        assert_eq!(SessionStatus::Close, handle.shared.status());

        let disconnects = sink.payloads_of(EventKind::SessionDisconnected);
        assert_eq!(json!(true), disconnects[0]["isLoggedOut"]);
        assert_eq!(json!(401), disconnects[0]["code"]);
    }

    #[tokio::test]
    async fn connection_lost_reconnects_with_backoff() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![connecting(), open(), close(408)],
            vec![connecting(), open()],
        ]));

        let handle = spawn(
            Arc::clone(&connector),
            store,
            fast_config(),
            Arc::clone(&sink),
        );

        wait_for(|| connector.connects() == 2 && handle.shared.status() == SessionStatus::Open)
            .await;

        // A successful open resets the streak.
        assert_eq!(0, handle.shared.reconnect_attempts());
        assert!(sink.payloads_of(EventKind::SessionConnected).len() >= 2);

        let disconnects = sink.payloads_of(EventKind::SessionDisconnected);
        assert_eq!(json!(false), disconnects[0]["isLoggedOut"]);
    }

    #[tokio::test]
    async fn restart_required_restarts_without_counting() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![connecting(), close(515)],
            vec![connecting(), open()],
        ]));

        let handle = spawn(
            Arc::clone(&connector),
            store,
            fast_config(),
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::Open).await;

        assert_eq!(2, connector.connects());
        assert_eq!(0, handle.shared.reconnect_attempts());
    }

    #[tokio::test]
    async fn gives_up_after_max_reconnect_attempts() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(
            ScriptedConnector::new(vec![]).with_default(vec![connecting(), close(408)]),
        );

        let mut config = fast_config();
        config.max_reconnect_attempts = 1;

        let handle = spawn(
            Arc::clone(&connector),
            store,
            config,
            Arc::clone(&sink),
        );

        wait_for(|| connector.connects() == 2).await;
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(2, connector.connects());
        assert_eq!(SessionStatus::Close, handle.shared.status());
    }

    #[tokio::test]
    async fn stream_end_marks_connection_lost() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            connecting(),
            open(),
            Step::End,
        ]]));

        let mut config = fast_config();
        config.auto_reconnect = false;

        let handle = spawn(
            Arc::clone(&connector),
            store,
            config,
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::ConnectionLost).await;

        assert_eq!(1, connector.connects());

        let disconnects = sink.payloads_of(EventKind::SessionDisconnected);
        assert_eq!(json!(408), disconnects[0]["code"]);
    }

    #[tokio::test]
    async fn unanswered_pings_force_a_close() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![connecting(), open()]]));
        connector.auto_pong.store(false, Ordering::SeqCst);

        let mut config = fast_config();
        config.ping_interval = Duration::from_millis(15);
        config.pong_timeout = Duration::from_millis(5);
        config.max_missed_pongs = 2;
        config.auto_reconnect = false;

        let handle = spawn(
            Arc::clone(&connector),
            store,
            config,
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::ConnectionLost).await;

        assert!(connector.pings.load(Ordering::SeqCst) >= 2);
        assert_eq!(1, connector.connects());
    }

    #[tokio::test]
    async fn answered_pings_keep_the_session_open() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![connecting(), open()]]));

        let mut config = fast_config();
        config.ping_interval = Duration::from_millis(15);
        config.pong_timeout = Duration::from_millis(60);
        config.auto_reconnect = false;

        let handle = spawn(
            Arc::clone(&connector),
            store,
            config,
            Arc::clone(&sink),
        );

        wait_for(|| connector.pings.load(Ordering::SeqCst) >= 3).await;

        assert_eq!(SessionStatus::Open, handle.shared.status());
    }

    #[tokio::test]
    async fn idle_session_is_probed_and_activity_advances() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![connecting(), open()]]));

        let mut config = fast_config();
        config.health_check_interval = Duration::from_millis(25);
        config.max_idle_time = Duration::from_millis(30);

        let handle = spawn(
            Arc::clone(&connector),
            store,
            config,
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::Open).await;
        let before = handle.shared.last_activity();

        wait_for(|| connector.presences.load(Ordering::SeqCst) >= 1).await;
        wait_for(|| handle.shared.last_activity() > before).await;

        assert_eq!(SessionStatus::Open, handle.shared.status());
    }

    #[tokio::test]
    async fn failing_idle_probe_tears_the_session_down() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![connecting(), open()]]));
        connector.presence_ok.store(false, Ordering::SeqCst);

        let mut config = fast_config();
        config.health_check_interval = Duration::from_millis(25);
        config.max_idle_time = Duration::from_millis(30);
        config.auto_reconnect = false;

        let handle = spawn(
            Arc::clone(&connector),
            store,
            config,
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::ConnectionLost).await;

        assert!(connector.presences.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn send_text_refuses_without_credentials() {
        let store = AuthStore::in_memory();
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![connecting()]]));

        let handle = spawn(
            Arc::clone(&connector),
            store,
            fast_config(),
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::Connecting).await;

        let (reply, result) = oneshot::channel();
        handle
            .commands
            .send(Command::SendText {
                to: Jid::normalize("12025550100"),
                text: "hello".to_owned(),
                reply,
            })
            .unwrap();

        let error = result.await.unwrap().unwrap_err();
        assert!(matches!(error.kind(), ErrorType::CredentialsInvalid));
    }

    #[tokio::test]
    async fn pairing_code_strips_formatting() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![connecting(), open()]]));

        let handle = spawn(
            Arc::clone(&connector),
            store,
            fast_config(),
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::Open).await;

        let (reply, result) = oneshot::channel();
        handle
            .commands
            .send(Command::PairingCode {
                number: "+49 170 0000001".to_owned(),
                reply,
            })
            .unwrap();

        assert_eq!("CODE491700000001", result.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn logout_erases_persisted_state() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![connecting(), open()]]));

        let handle = spawn(
            Arc::clone(&connector),
            store.clone(),
            fast_config(),
            Arc::clone(&sink),
        );

        wait_for(|| handle.shared.status() == SessionStatus::Open).await;

        let (reply, result) = oneshot::channel();
        handle.commands.send(Command::Logout { reply }).unwrap();

        result.await.unwrap().unwrap();

        assert!(store.discover_sessions().await.unwrap().is_empty());
        assert_eq!(SessionStatus::Close, handle.shared.status());
    }

    #[tokio::test]
    async fn filtered_batches_are_suppressed() {
        let store = seeded_store().await;
        let sink = Arc::new(RecordingSink::default());

        let group_only_batch = TransportEvent::Protocol(Event::MessagesUpsert(
            serde_json::from_value(json!({
                "type": "notify",
                "messages": [
                    { "key": { "remoteJid": "1234-5678@g.us", "id": "A" } },
                    { "key": { "remoteJid": "status@broadcast", "id": "B" } },
                ],
            }))
            .unwrap(),
        ));

        let mixed_batch = TransportEvent::Protocol(Event::MessagesUpsert(
            serde_json::from_value(json!({
                "type": "notify",
                "messages": [
                    { "key": { "remoteJid": "1234-5678@g.us", "id": "C" } },
                    { "key": { "remoteJid": "12025550100@s.whatsapp.net", "id": "D" } },
                ],
            }))
            .unwrap(),
        ));

        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            connecting(),
            open(),
            Step::Emit(group_only_batch),
            Step::Emit(mixed_batch),
        ]]));

        let handle = Supervisor::spawn(
            "alpha",
            fast_config(),
            Arc::clone(&connector) as Arc<_>,
            store,
            Arc::clone(&sink) as Arc<_>,
            Filter {
                skip_groups: true,
                skip_status: true,
                ..Filter::default()
            },
        );

        wait_for(|| handle.shared.status() == SessionStatus::Open).await;
        wait_for(|| !sink.payloads_of(EventKind::MessagesUpsert).is_empty()).await;

        let upserts = sink.payloads_of(EventKind::MessagesUpsert);

        // The all-filtered batch produced nothing at all; the mixed batch
        // was delivered with only its surviving message.
        assert_eq!(1, upserts.len());
        assert_eq!(1, upserts[0]["messages"].as_array().unwrap().len());
        assert_eq!(
            "12025550100@s.whatsapp.net",
            upserts[0]["messages"][0]["key"]["remoteJid"]
        );

        // Both messages that arrived for the user chat were cached.
        assert!(handle.shared.caches().messages.get(&"D".to_owned()).is_some());
    }
}
