//! Per-tab session state kept consistent across tabs through the shared
//! [`LocalStore`].
//!
//! A tab owns its in-memory view (identity, token, history). Auth keys live in
//! the shared store; each write there is broadcast and other tabs rebuild their
//! session from one read of the store. Every session change bumps an epoch so
//! a history load that finishes after a logout or re-login is dropped.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::local_store::{LocalStore, AUTH_TOKEN_KEY, HISTORY_KEY, USER_DATA_KEY};
use crate::model::{Identity, Reservation, ReservationFilter};
use crate::wire::parse_records;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
}

#[derive(Default)]
struct SessionState {
    session: Option<Session>,
    /// Newest first, always the current identity's.
    history: Vec<Reservation>,
    epoch: u64,
}

impl SessionState {
    fn replace(&mut self, session: Option<Session>) {
        self.session = session;
        self.history.clear();
        self.epoch += 1;
    }
}

/// Where a history load may come from, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistorySource {
    Backend,
    Cache,
}

const HISTORY_SOURCES: [HistorySource; 2] = [HistorySource::Backend, HistorySource::Cache];

pub struct Tab {
    id: Ulid,
    store: Arc<LocalStore>,
    backend: Arc<dyn Backend>,
    state: RwLock<SessionState>,
}

impl Tab {
    pub fn new(store: Arc<LocalStore>, backend: Arc<dyn Backend>) -> Self {
        Self {
            id: Ulid::new(),
            store,
            backend,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Open a tab and adopt whatever session the store already holds.
    pub async fn open(store: Arc<LocalStore>, backend: Arc<dyn Backend>) -> Arc<Self> {
        let tab = Arc::new(Self::new(store, backend));
        tab.sync_from_store().await;
        tab
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.state.read().await.session.clone()
    }

    pub async fn history(&self) -> Vec<Reservation> {
        self.state.read().await.history.clone()
    }

    // ── Login / logout ───────────────────────────────────────────

    pub async fn login(&self, username: &str, secret: &str) -> Result<Session> {
        let login = self.backend.login(username, secret).await?;
        let session = Session {
            identity: login.identity,
            token: login.token,
        };
        self.persist_session(&session)?;
        self.state.write().await.replace(Some(session.clone()));
        tracing::info!(tab = %self.id, user = %session.identity.id, "session started");
        self.refresh_history().await;
        Ok(session)
    }

    /// End the session everywhere. The backend call is best effort; the
    /// cached history is kept.
    pub async fn logout(&self) {
        let session = self.state.read().await.session.clone();
        if let Some(session) = &session
            && let Err(e) = self.backend.logout(&session.token).await
        {
            tracing::warn!(tab = %self.id, "backend logout failed: {e}");
        }
        self.clear_auth_keys();
        self.state.write().await.replace(None);
        tracing::info!(tab = %self.id, "session ended");
    }

    /// Drop the session after the backend rejected its token.
    pub async fn invalidate(&self) {
        let had_session = self.state.read().await.session.is_some();
        self.clear_auth_keys();
        self.state.write().await.replace(None);
        if had_session {
            tracing::warn!(tab = %self.id, "session invalidated by backend");
        }
    }

    pub async fn refresh_token(&self) -> Result<Session> {
        let current = self
            .current_session()
            .await
            .ok_or_else(|| Error::Unauthorized("no active session".into()))?;
        let login = match self.backend.refresh(&current.token).await {
            Ok(login) => login,
            Err(e) => {
                if e.is_unauthorized() {
                    self.invalidate().await;
                }
                return Err(e);
            }
        };
        let session = Session {
            identity: login.identity,
            token: login.token,
        };
        self.persist_session(&session)?;
        let mut state = self.state.write().await;
        // Same identity: keep the loaded history.
        if state.session.as_ref().map(|s| &s.identity) == Some(&session.identity) {
            state.session = Some(session.clone());
        } else {
            state.replace(Some(session.clone()));
        }
        Ok(session)
    }

    /// Writes user data first; the token write is what other tabs react to.
    fn persist_session(&self, session: &Session) -> Result<()> {
        let user = serde_json::to_string(&session.identity)
            .map_err(|e| Error::Store(format!("cannot encode user data: {e}")))?;
        self.store.set(self.id, USER_DATA_KEY, user);
        self.store.set(self.id, AUTH_TOKEN_KEY, session.token.clone());
        Ok(())
    }

    fn clear_auth_keys(&self) {
        self.store.remove(self.id, AUTH_TOKEN_KEY);
        self.store.remove(self.id, USER_DATA_KEY);
    }

    // ── History ──────────────────────────────────────────────────

    /// Reload history: backend first, then the local cache, else empty.
    /// A result that arrives after the session changed is discarded.
    pub async fn refresh_history(&self) -> Vec<Reservation> {
        let (epoch, session) = {
            let state = self.state.read().await;
            (state.epoch, state.session.clone())
        };
        let Some(session) = session else {
            return Vec::new();
        };

        let mut loaded = None;
        for source in HISTORY_SOURCES {
            match self.load_history(source, &session).await {
                Ok(history) => {
                    tracing::debug!(tab = %self.id, ?source, records = history.len(), "history loaded");
                    loaded = Some(history);
                    break;
                }
                Err(e) if e.is_unauthorized() => {
                    self.invalidate().await;
                    return Vec::new();
                }
                Err(e) => tracing::warn!(tab = %self.id, ?source, "history source failed: {e}"),
            }
        }
        let mut history = loaded.unwrap_or_default();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        if self.apply_history(epoch, history.clone()).await {
            history
        } else {
            tracing::debug!(tab = %self.id, "discarding stale history load");
            self.history().await
        }
    }

    async fn load_history(&self, source: HistorySource, session: &Session) -> Result<Vec<Reservation>> {
        match source {
            HistorySource::Backend => {
                let filter = ReservationFilter::for_requester(session.identity.id.clone());
                let fresh = self.backend.reservations(&session.token, &filter).await?;
                self.write_cache(&session.identity, &fresh);
                Ok(fresh)
            }
            HistorySource::Cache => {
                let raw = self
                    .store
                    .get(HISTORY_KEY)
                    .ok_or_else(|| Error::NotFound("no cached history".into()))?;
                Ok(parse_records(&raw)
                    .unwrap_or_else(|e| {
                        tracing::warn!(tab = %self.id, "cached history unreadable: {e}");
                        Vec::new()
                    })
                    .into_iter()
                    .filter(|r| r.requester.id == session.identity.id)
                    .collect())
            }
        }
    }

    /// Install `history` if the session has not changed since `epoch`.
    async fn apply_history(&self, epoch: u64, history: Vec<Reservation>) -> bool {
        let mut state = self.state.write().await;
        if state.epoch != epoch {
            return false;
        }
        state.history = history;
        true
    }

    /// Replace this identity's records in the shared cache, keeping other users'.
    fn write_cache(&self, identity: &Identity, records: &[Reservation]) {
        let mut cached: Vec<Reservation> = self
            .store
            .get(HISTORY_KEY)
            .and_then(|raw| parse_records(&raw).ok())
            .unwrap_or_default();
        cached.retain(|r| r.requester.id != identity.id);
        cached.extend(records.iter().cloned());
        match serde_json::to_string(&cached) {
            Ok(json) => self.store.set(self.id, HISTORY_KEY, json),
            Err(e) => tracing::warn!(tab = %self.id, "cannot encode history cache: {e}"),
        }
    }

    /// Put a freshly created reservation at the top of history and the cache.
    pub async fn record_created(&self, reservation: &Reservation) {
        let mut state = self.state.write().await;
        let Some(session) = &state.session else { return };
        if session.identity.id != reservation.requester.id {
            return;
        }
        let identity = session.identity.clone();
        state.history.retain(|r| r.id != reservation.id);
        state.history.insert(0, reservation.clone());
        let history = state.history.clone();
        drop(state);
        self.write_cache(&identity, &history);
    }

    // ── Cross-tab sync ───────────────────────────────────────────

    /// Rebuild the session from one read of the shared store.
    pub async fn sync_from_store(&self) {
        let token = self.store.get(AUTH_TOKEN_KEY);
        let user = self.store.get(USER_DATA_KEY);
        let stored = match (token, user) {
            (Some(token), Some(user)) => match serde_json::from_str::<Identity>(&user) {
                Ok(identity) => Some(Session { identity, token }),
                Err(e) => {
                    tracing::warn!(tab = %self.id, "stored user data unreadable: {e}");
                    None
                }
            },
            _ => None,
        };

        let identity_changed = {
            let mut state = self.state.write().await;
            if state.session == stored {
                return;
            }
            let same_identity = state.session.as_ref().map(|s| &s.identity) == stored.as_ref().map(|s| &s.identity);
            if same_identity {
                state.session = stored.clone();
            } else {
                state.replace(stored.clone());
            }
            !same_identity
        };
        tracing::debug!(tab = %self.id, signed_in = stored.is_some(), "session synced from store");
        if identity_changed && stored.is_some() {
            self.refresh_history().await;
        }
    }

    /// Follow auth changes made by other tabs until the store goes away.
    ///
    /// Only the token key is followed. User data is written before the token
    /// and removed after it, so a token change marks a complete session.
    pub fn watch(self: Arc<Self>) -> JoinHandle<()> {
        let mut token_rx = self.store.subscribe(AUTH_TOKEN_KEY);
        tokio::spawn(async move {
            loop {
                match token_rx.recv().await {
                    Ok(change) if change.origin == self.id => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => self.sync_from_store().await,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(tab = %self.id, "session watcher stopped");
        })
    }
}
