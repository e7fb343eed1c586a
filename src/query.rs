//! Query state as seen by consumers.
//!
//! Inspired by TanStack Query: every cache entry is in one of four states,
//! and consumers either take a [`QuerySnapshot`] (`{data, is_loading, error}`)
//! or hold a [`QueryObserver`] that wakes up whenever the entry changes.
//!
//! # Example
//!
//! ```ignore
//! let mut foos = client.observe(&QueryKey::all("foo"));
//!
//! loop {
//!   let snapshot = foos.snapshot();
//!   if let Some(rows) = &snapshot.data {
//!     render(rows);
//!   }
//!   foos.changed().await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use crate::backend::Row;
use crate::cache::QueryKey;
use crate::error::{Error, QueryError, Result};

/// Rows of one fetch, shared by every subscriber
pub type Records = Arc<Vec<Row>>;

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(QueryError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  /// Success or error: a fetch has finished for this entry
  pub fn is_settled(&self) -> bool {
    self.is_success() || self.is_error()
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&QueryError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryState<U> {
    match self {
      QueryState::Idle => QueryState::Idle,
      QueryState::Loading => QueryState::Loading,
      QueryState::Success(data) => QueryState::Success(f(data)),
      QueryState::Error(e) => QueryState::Error(e),
    }
  }
}

/// A cache entry: state of the last fetch plus staleness bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub state: QueryState<Records>,
  /// When the last fetch settled
  pub fetched_at: Option<DateTime<Utc>>,
  /// Set by invalidation; the next read refetches
  pub stale: bool,
}

impl Default for CacheEntry {
  fn default() -> Self {
    Self {
      state: QueryState::Idle,
      fetched_at: None,
      stale: false,
    }
  }
}

impl CacheEntry {
  /// Whether a read should start a new fetch for this entry.
  pub(crate) fn needs_fetch(&self, stale_time: std::time::Duration) -> bool {
    match &self.state {
      QueryState::Idle => true,
      QueryState::Loading => false,
      QueryState::Success(_) => self.stale || self.is_expired(stale_time),
      // Errors stay until something invalidates or refetches the key
      QueryState::Error(_) => self.stale,
    }
  }

  fn is_expired(&self, stale_time: std::time::Duration) -> bool {
    match (self.fetched_at, chrono::Duration::from_std(stale_time)) {
      (Some(at), Ok(stale_time)) => Utc::now() - at >= stale_time,
      _ => true,
    }
  }

  pub fn snapshot(&self) -> QuerySnapshot {
    QuerySnapshot {
      data: self.state.data().cloned(),
      is_loading: self.state.is_loading(),
      error: self.state.error().cloned(),
      is_stale: self.stale,
      fetched_at: self.fetched_at,
    }
  }
}

/// Plain `{data, is_loading, error}` view of an entry for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
  pub data: Option<Records>,
  pub is_loading: bool,
  pub error: Option<QueryError>,
  pub is_stale: bool,
  pub fetched_at: Option<DateTime<Utc>>,
}

/// Live view of one cache entry.
///
/// Dropping the observer only drops its receiver; fetches it started keep
/// running and settle into the shared cache, never into the observer.
pub struct QueryObserver {
  key: QueryKey,
  rx: watch::Receiver<CacheEntry>,
}

impl QueryObserver {
  pub(crate) fn new(key: QueryKey, rx: watch::Receiver<CacheEntry>) -> Self {
    Self { key, rx }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn snapshot(&self) -> QuerySnapshot {
    self.rx.borrow().snapshot()
  }

  /// Wait for the entry to change, then return its new snapshot.
  pub async fn changed(&mut self) -> Result<QuerySnapshot> {
    self.rx.changed().await.map_err(|_| Error::Cancelled)?;
    Ok(self.rx.borrow_and_update().snapshot())
  }

  /// Wait until the entry holds a settled result and return it.
  pub async fn settled(&mut self) -> Result<Records> {
    let entry = self
      .rx
      .wait_for(|entry| entry.state.is_settled())
      .await
      .map_err(|_| Error::Cancelled)?;

    match &entry.state {
      QueryState::Success(records) => Ok(records.clone()),
      QueryState::Error(e) => Err(e.clone().into()),
      QueryState::Idle | QueryState::Loading => Err(Error::Cancelled),
    }
  }
}

impl std::fmt::Debug for QueryObserver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("entry", &*self.rx.borrow())
      .finish()
  }
}
