//! The in-memory session registry.
//!
//! One registry per process owns every running supervisor. HTTP handlers
//! and the bootstrap path go through it; nothing else holds supervisor
//! handles. Lookups return a stable [`SessionShared`] reference, while all
//! mutation travels over the supervisor's command channel.

use crate::{
    config::SupervisorConfig,
    emit::EventSink,
    error::Error,
    session::{SessionShared, SessionSummary, StatusView},
    supervisor::{Command, Supervisor, SupervisorHandle},
    transport::Connector,
};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use whatsgate_model::Jid;
use whatsgate_store::AuthStore;
use whatsgate_webhook::Filter;

/// Whether an id satisfies `[A-Za-z0-9_-]{1,128}`.
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-')
}

struct RegistryRef {
    sessions: DashMap<String, SupervisorHandle>,
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    store: AuthStore,
    sink: Arc<dyn EventSink>,
    filter: Filter,
}

/// Registry of running sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryRef>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(
        config: SupervisorConfig,
        connector: Arc<dyn Connector>,
        store: AuthStore,
        sink: Arc<dyn EventSink>,
        filter: Filter,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryRef {
                sessions: DashMap::new(),
                config,
                connector,
                store,
                sink,
                filter,
            }),
        }
    }

    /// Idempotently get or start the session with the given id.
    pub fn ensure(&self, id: &str) -> Result<Arc<SessionShared>, Error> {
        if !valid_session_id(id) {
            return Err(Error::invalid_session_id(id));
        }

        let entry = self
            .inner
            .sessions
            .entry(id.to_owned())
            .or_insert_with(|| {
                tracing::info!(session_id = id, "starting session supervisor");

                Supervisor::spawn(
                    id,
                    self.inner.config.clone(),
                    Arc::clone(&self.inner.connector),
                    self.inner.store.clone(),
                    Arc::clone(&self.inner.sink),
                    self.inner.filter.clone(),
                )
            });

        Ok(Arc::clone(&entry.shared))
    }

    /// Look a session up without creating it.
    pub fn get(&self, id: &str) -> Option<Arc<SessionShared>> {
        self.inner
            .sessions
            .get(id)
            .map(|handle| Arc::clone(&handle.shared))
    }

    /// Reconciled status of a session.
    pub fn status_view(&self, id: &str) -> Option<StatusView> {
        self.get(id).map(|shared| shared.status_view())
    }

    /// Summaries of every session, sorted by id.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.shared.summary())
            .collect();

        summaries.sort_by(|a, b| a.id.cmp(&b.id));

        summaries
    }

    /// How many sessions are registered.
    pub fn count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Tear the session's transport down and bring up a fresh one with the
    /// same identity.
    pub fn restart(&self, id: &str) -> Result<(), Error> {
        self.sender(id)?
            .send(Command::Restart)
            .map_err(|_| Error::supervisor_gone())
    }

    /// Deauthenticate the session, erase its persisted keys, and drop it
    /// from the registry.
    pub async fn logout(&self, id: &str) -> Result<(), Error> {
        let sender = self.sender(id)?;
        let (reply, result) = oneshot::channel();

        sender
            .send(Command::Logout { reply })
            .map_err(|_| Error::supervisor_gone())?;

        let outcome = result.await.map_err(|_| Error::supervisor_gone())?;

        // The supervisor has exited either way; the handle is now dead.
        self.inner.sessions.remove(id);

        outcome
    }

    /// Send a text message through the session.
    pub async fn send_text(&self, id: &str, to: Jid, text: String) -> Result<Value, Error> {
        let sender = self.sender(id)?;
        let (reply, result) = oneshot::channel();

        sender
            .send(Command::SendText { to, text, reply })
            .map_err(|_| Error::supervisor_gone())?;

        result.await.map_err(|_| Error::supervisor_gone())?
    }

    /// Issue a presence round-trip through the session.
    pub async fn send_presence(&self, id: &str) -> Result<(), Error> {
        let sender = self.sender(id)?;
        let (reply, result) = oneshot::channel();

        sender
            .send(Command::SendPresence { reply })
            .map_err(|_| Error::supervisor_gone())?;

        result.await.map_err(|_| Error::supervisor_gone())?
    }

    /// Request a pairing code for the given phone number.
    pub async fn request_pairing_code(&self, id: &str, number: String) -> Result<String, Error> {
        let sender = self.sender(id)?;
        let (reply, result) = oneshot::channel();

        sender
            .send(Command::PairingCode { number, reply })
            .map_err(|_| Error::supervisor_gone())?;

        result.await.map_err(|_| Error::supervisor_gone())?
    }

    /// Stop every supervisor, waiting for each to wind down. Used during
    /// process shutdown.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for id in ids {
            let Some((_, handle)) = self.inner.sessions.remove(&id) else {
                continue;
            };

            let _ = handle.commands.send(Command::Shutdown);

            if handle.task.await.is_err() {
                tracing::warn!(session_id = %id, "supervisor task panicked during shutdown");
            }
        }
    }

    fn sender(&self, id: &str) -> Result<UnboundedSender<Command>, Error> {
        self.inner
            .sessions
            .get(id)
            .map(|handle| handle.commands.clone())
            .ok_or_else(|| Error::session_not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::{valid_session_id, SessionRegistry};
    use crate::{
        config::SupervisorConfig,
        emit::testing::RecordingSink,
        error::ErrorType,
        status::SessionStatus,
        transport::dev::DevConnector,
    };
    use std::{sync::Arc, time::Duration};
    use whatsgate_model::Jid;
    use whatsgate_store::AuthStore;
    use whatsgate_webhook::Filter;

    fn registry(store: AuthStore) -> (SessionRegistry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(DevConnector::with_pair_delay(Duration::from_millis(10)));

        (
            SessionRegistry::new(
                SupervisorConfig::default(),
                connector,
                store,
                Arc::clone(&sink) as Arc<_>,
                Filter::default(),
            ),
            sink,
        )
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

    #[test]
    fn id_validation() {
        assert!(valid_session_id("alpha"));
        assert!(valid_session_id("tenant_9-x"));
        assert!(valid_session_id(&"a".repeat(128)));

        assert!(!valid_session_id(""));
        assert!(!valid_session_id(&"a".repeat(129)));
        assert!(!valid_session_id("has space"));
        assert!(!valid_session_id("wa:alpha"));
        assert!(!valid_session_id("émoji"));
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let (registry, _sink) = registry(AuthStore::in_memory());

        let first = registry.ensure("alpha").unwrap();
        let second = registry.ensure("alpha").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, registry.count());
    }

    #[tokio::test]
    async fn ensure_rejects_bad_ids() {
        let (registry, _sink) = registry(AuthStore::in_memory());

        let error = registry.ensure("not valid!").unwrap_err();

        assert!(matches!(error.kind(), ErrorType::InvalidSessionId { .. }));
        assert_eq!(0, registry.count());
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let (registry, _sink) = registry(AuthStore::in_memory());

        assert!(registry.get("ghost").is_none());
        assert!(registry.status_view("ghost").is_none());

        let error = registry.logout("ghost").await.unwrap_err();
        assert!(matches!(error.kind(), ErrorType::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn pairs_and_logs_out_through_the_dev_transport() {
        let store = AuthStore::in_memory();
        let (registry, _sink) = registry(store.clone());

        let shared = registry.ensure("alpha").unwrap();

        wait_for(|| shared.status() == SessionStatus::Open).await;
        assert!(shared.credentials_valid());
        assert!(!store.discover_sessions().await.unwrap().is_empty());

        registry.logout("alpha").await.unwrap();

        assert!(registry.get("alpha").is_none());
        assert!(store.discover_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_text_round_trips_once_open() {
        let (registry, _sink) = registry(AuthStore::in_memory());
        let shared = registry.ensure("alpha").unwrap();

        wait_for(|| shared.status() == SessionStatus::Open).await;

        let descriptor = registry
            .send_text("alpha", Jid::normalize("12025550100"), "hello".to_owned())
            .await
            .unwrap();

        assert_eq!("12025550100@s.whatsapp.net", descriptor["remoteJid"]);
    }

    #[tokio::test]
    async fn send_text_refuses_unpaired_sessions() {
        let sink = Arc::new(RecordingSink::default());
        // Long pairing delay keeps the session unauthenticated.
        let connector = Arc::new(DevConnector::with_pair_delay(Duration::from_secs(60)));
        let registry = SessionRegistry::new(
            SupervisorConfig::default(),
            connector,
            AuthStore::in_memory(),
            sink as Arc<_>,
            Filter::default(),
        );

        let shared = registry.ensure("alpha").unwrap();
        wait_for(|| shared.qr().is_some()).await;

        let error = registry
            .send_text("alpha", Jid::normalize("12025550100"), "hello".to_owned())
            .await
            .unwrap_err();

        assert!(matches!(error.kind(), ErrorType::CredentialsInvalid));
    }

    #[tokio::test]
    async fn shutdown_drains_every_session() {
        let (registry, _sink) = registry(AuthStore::in_memory());

        let a = registry.ensure("alpha").unwrap();
        let b = registry.ensure("beta").unwrap();

        wait_for(|| {
            a.status() == SessionStatus::Open && b.status() == SessionStatus::Open
        })
        .await;

        registry.shutdown_all().await;

        assert_eq!(0, registry.count());
    }
}
