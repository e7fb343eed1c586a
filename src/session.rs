//! Reactive store for the signed-in user.

use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{AuthApi, AuthEvent, Credentials, User};
use crate::cache::QueryClient;
use crate::error::Result;

/// Who the backend thinks we are
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
  /// Not resolved yet
  Unknown,
  Authenticated(User),
  Anonymous,
}

impl SessionState {
  fn from_user(user: Option<User>) -> Self {
    match user {
      Some(user) => SessionState::Authenticated(user),
      None => SessionState::Anonymous,
    }
  }

  pub fn user(&self) -> Option<&User> {
    match self {
      SessionState::Authenticated(user) => Some(user),
      _ => None,
    }
  }

  pub fn is_authenticated(&self) -> bool {
    matches!(self, SessionState::Authenticated(_))
  }
}

/// Registration of the store's session-change listener.
///
/// Dropping it deregisters the listener.
pub struct Subscription {
  handle: JoinHandle<()>,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

/// Current-user state plus login/register/logout.
///
/// Every transition, caller-initiated or announced by the backend,
/// invalidates the session-scoped entries of the shared [`QueryClient`].
pub struct SessionStore {
  inner: Arc<StoreInner>,
  _subscription: Subscription,
}

struct StoreInner {
  auth: Arc<dyn AuthApi>,
  cache: QueryClient,
  state: watch::Sender<SessionState>,
}

impl StoreInner {
  fn transition(&self, next: SessionState) {
    let previous = self.state.send_replace(next.clone());
    match (&previous, &next) {
      (SessionState::Authenticated(a), SessionState::Authenticated(b)) if a.id == b.id => {
        debug!(user = %b.id, "session renewed")
      }
      (_, SessionState::Authenticated(user)) => info!(user = %user.id, "signed in"),
      (_, SessionState::Anonymous) => info!("signed out"),
      (_, SessionState::Unknown) => {}
    }
    self.cache.invalidate_session_scoped();
  }
}

impl SessionStore {
  /// Build the store and register its listener. The state stays `Unknown`
  /// until [`SessionStore::resolve`] runs.
  pub fn new(auth: Arc<dyn AuthApi>, cache: QueryClient) -> Self {
    let (state, _) = watch::channel(SessionState::Unknown);
    let events = auth.subscribe();
    let inner = Arc::new(StoreInner { auth, cache, state });

    let handle = tokio::spawn(listen(Arc::downgrade(&inner), events));

    Self {
      inner,
      _subscription: Subscription { handle },
    }
  }

  /// Build the store and resolve the existing session.
  pub async fn start(auth: Arc<dyn AuthApi>, cache: QueryClient) -> Result<Self> {
    let store = Self::new(auth, cache);
    store.resolve().await?;
    Ok(store)
  }

  /// Ask the backend for its current session and move out of `Unknown`.
  pub async fn resolve(&self) -> Result<SessionState> {
    let session = self.inner.auth.get_session().await?;
    let next = SessionState::from_user(session.map(|s| s.user));
    self.inner.transition(next.clone());
    Ok(next)
  }

  pub async fn login(&self, credentials: &Credentials) -> Result<User> {
    let session = self.inner.auth.sign_in(credentials).await?;
    self
      .inner
      .transition(SessionState::Authenticated(session.user.clone()));
    Ok(session.user)
  }

  pub async fn register(&self, credentials: &Credentials) -> Result<User> {
    let sign_up = self.inner.auth.sign_up(credentials).await?;
    self
      .inner
      .transition(SessionState::Authenticated(sign_up.user.clone()));
    Ok(sign_up.user)
  }

  pub async fn logout(&self) -> Result<()> {
    self.inner.auth.sign_out().await?;
    self.inner.transition(SessionState::Anonymous);
    Ok(())
  }

  /// Renew the access token for the current user.
  pub async fn refresh(&self) -> Result<User> {
    let session = self.inner.auth.refresh_session().await?;
    self
      .inner
      .transition(SessionState::Authenticated(session.user.clone()));
    Ok(session.user)
  }

  pub fn state(&self) -> SessionState {
    self.inner.state.borrow().clone()
  }

  pub fn user(&self) -> Option<User> {
    self.inner.state.borrow().user().cloned()
  }

  /// Receiver that wakes on every transition.
  pub fn watch(&self) -> watch::Receiver<SessionState> {
    self.inner.state.subscribe()
  }

  /// Tear the store down, deregistering its listener.
  pub fn shutdown(self) {}
}

async fn listen(store: Weak<StoreInner>, mut events: broadcast::Receiver<AuthEvent>) {
  loop {
    match events.recv().await {
      Ok(event) => {
        let Some(store) = store.upgrade() else {
          break;
        };
        debug!(change = ?event.change, "session change notification");
        store.transition(SessionState::from_user(event.session.map(|s| s.user)));
      }
      Err(broadcast::error::RecvError::Lagged(missed)) => {
        let Some(store) = store.upgrade() else {
          break;
        };
        warn!(missed, "missed session notifications; resyncing");
        match store.auth.get_session().await {
          Ok(session) => store.transition(SessionState::from_user(session.map(|s| s.user))),
          Err(e) => warn!(error = %e, "session resync failed"),
        }
      }
      Err(broadcast::error::RecvError::Closed) => break,
    }
  }
  debug!("session listener stopped");
}
