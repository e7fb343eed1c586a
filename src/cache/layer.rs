//! Process-wide query cache in front of the backend's table API.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::key::QueryKey;
use crate::backend::{Filter, Row, TableApi};
use crate::config::CacheConfig;
use crate::error::{QueryError, Result};
use crate::query::{CacheEntry, QueryObserver, QuerySnapshot, QueryState, Records};

/// Shared cache of table reads.
///
/// Build one per backend at startup and hand out clones; every clone sees
/// the same entries. Reads share a single in-flight fetch per key, and
/// writes invalidate every entry of the resource they touched.
///
/// Reads spawn their fetch onto the current Tokio runtime.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

struct Inner {
  backend: Arc<dyn TableApi>,
  entries: Mutex<HashMap<QueryKey, Slot>>,
  stale_time: Duration,
  session_scoped: RwLock<BTreeSet<String>>,
  /// Source of fetch generations; never reused, even across `clear`
  generations: AtomicU64,
}

struct Slot {
  tx: watch::Sender<CacheEntry>,
  /// Generation of the latest fetch; only that fetch may settle the entry
  generation: u64,
  in_flight: bool,
}

impl Slot {
  fn new() -> Self {
    let (tx, _) = watch::channel(CacheEntry::default());
    Self {
      tx,
      generation: 0,
      in_flight: false,
    }
  }

  fn begin_fetch(&mut self, generation: u64) -> u64 {
    self.generation = generation;
    self.in_flight = true;
    self.tx.send_modify(|entry| entry.state = QueryState::Loading);
    generation
  }

  /// Someone is waiting on this entry, so invalidation refetches right away.
  fn is_active(&self) -> bool {
    self.in_flight || self.tx.receiver_count() > 0
  }
}

impl QueryClient {
  pub fn new(backend: Arc<dyn TableApi>, config: &CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        backend,
        entries: Mutex::new(HashMap::new()),
        stale_time: config.stale_time,
        session_scoped: RwLock::new(
          config
            .session_scoped
            .iter()
            .map(|r| r.to_lowercase())
            .collect(),
        ),
        generations: AtomicU64::new(0),
      }),
    }
  }

  /// Current state of `key`. Starts a fetch when the entry is missing or stale.
  pub fn read(&self, key: &QueryKey) -> QuerySnapshot {
    Inner::ensure_fetch(&self.inner, key, Trigger::IfStale)
      .borrow()
      .snapshot()
  }

  /// Subscribe to `key`. Starts a fetch when the entry is missing or stale.
  pub fn observe(&self, key: &QueryKey) -> QueryObserver {
    let rx = Inner::ensure_fetch(&self.inner, key, Trigger::IfStale);
    QueryObserver::new(key.clone(), rx)
  }

  /// Rows for `key`, fetching if needed. Joins a fetch already in flight.
  ///
  /// A cached error is retried, since the caller is explicitly asking for rows.
  pub async fn fetch(&self, key: &QueryKey) -> Result<Records> {
    let rx = Inner::ensure_fetch(&self.inner, key, Trigger::IfStaleOrFailed);
    QueryObserver::new(key.clone(), rx).settled().await
  }

  /// Start a new fetch for `key` even if the cached rows are fresh.
  pub fn refetch(&self, key: &QueryKey) -> QueryObserver {
    let rx = Inner::ensure_fetch(&self.inner, key, Trigger::Always);
    QueryObserver::new(key.clone(), rx)
  }

  /// Entry for `key` without triggering a fetch.
  pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
    self
      .inner
      .entries()
      .get(key)
      .map(|slot| slot.tx.borrow().clone())
  }

  /// Insert `rows` into `resource`, then invalidate it.
  ///
  /// Returns the rows as the backend stored them. The cache is never
  /// patched with them; the next read refetches.
  pub async fn insert(&self, resource: &str, rows: Vec<Value>) -> Result<Vec<Row>> {
    let stored = self.inner.backend.insert(resource, rows).await?;
    self.invalidate(resource);
    Ok(stored)
  }

  /// Insert a single record.
  pub async fn write(&self, resource: &str, record: Value) -> Result<()> {
    self.insert(resource, vec![record]).await.map(|_| ())
  }

  /// Patch rows of `resource` matching `filters`, then invalidate it.
  pub async fn update(&self, resource: &str, filters: &[Filter], patch: Value) -> Result<Vec<Row>> {
    let updated = self.inner.backend.update(resource, filters, patch).await?;
    self.invalidate(resource);
    Ok(updated)
  }

  /// Mark every entry of `resource` stale.
  pub fn invalidate(&self, resource: &str) {
    Inner::invalidate_where(&self.inner, |key| key.belongs_to(resource));
  }

  /// Mark every entry whose visibility depends on the signed-in identity stale.
  pub fn invalidate_session_scoped(&self) {
    let scoped = self
      .inner
      .session_scoped
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    Inner::invalidate_where(&self.inner, |key| {
      scoped.contains(&key.resource().to_lowercase())
    });
  }

  /// Declare `resource` as depending on the signed-in identity.
  pub fn mark_session_scoped(&self, resource: &str) {
    self
      .inner
      .session_scoped
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(resource.to_lowercase());
  }

  pub fn is_session_scoped(&self, resource: &str) -> bool {
    self
      .inner
      .session_scoped
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .contains(&resource.to_lowercase())
  }

  /// Drop every entry. Observers see their entry close; fetches in flight
  /// are discarded when they land.
  pub fn clear(&self) {
    self.inner.entries().clear();
  }
}

/// When `ensure_fetch` starts a new fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
  /// Missing or stale entry, and nothing in flight
  IfStale,
  /// As `IfStale`, and also a settled error
  IfStaleOrFailed,
  /// Always, superseding any fetch in flight
  Always,
}

impl Inner {
  fn next_generation(&self) -> u64 {
    self.generations.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn ensure_fetch(this: &Arc<Inner>, key: &QueryKey, trigger: Trigger) -> watch::Receiver<CacheEntry> {
    let mut entries = this.entries();
    let slot = entries.entry(key.clone()).or_insert_with(Slot::new);
    let rx = slot.tx.subscribe();

    // Decided under the lock so concurrent callers agree on one fetch
    let start = match trigger {
      Trigger::Always => true,
      _ if slot.in_flight => false,
      Trigger::IfStale => slot.tx.borrow().needs_fetch(this.stale_time),
      Trigger::IfStaleOrFailed => {
        let entry = slot.tx.borrow();
        entry.state.is_error() || entry.needs_fetch(this.stale_time)
      }
    };
    if start {
      let generation = slot.begin_fetch(this.next_generation());
      drop(entries);
      Self::spawn_fetch(this, key.clone(), generation);
    }

    rx
  }

  fn invalidate_where(this: &Arc<Inner>, matches: impl Fn(&QueryKey) -> bool) {
    let mut refetch = Vec::new();
    {
      let mut entries = this.entries();
      for (key, slot) in entries.iter_mut().filter(|(key, _)| matches(*key)) {
        slot.tx.send_modify(|entry| entry.stale = true);
        let active = slot.is_active();
        if active {
          refetch.push((key.clone(), slot.begin_fetch(this.next_generation())));
        }
        debug!(%key, active, "invalidated");
      }
    }

    for (key, generation) in refetch {
      Self::spawn_fetch(this, key, generation);
    }
  }

  fn spawn_fetch(this: &Arc<Inner>, key: QueryKey, generation: u64) {
    let weak = Arc::downgrade(this);
    let backend = this.backend.clone();

    debug!(%key, generation, "fetch started");
    tokio::spawn(async move {
      let result = backend.select(key.resource(), key.filters()).await;

      // The client may be gone by now; nothing left to update
      let Some(inner) = weak.upgrade() else {
        debug!(%key, generation, "client dropped; discarding response");
        return;
      };
      inner.settle(&key, generation, result);
    });
  }

  fn settle(&self, key: &QueryKey, generation: u64, result: Result<Vec<Row>>) {
    let mut entries = self.entries();
    let Some(slot) = entries.get_mut(key) else {
      debug!(%key, generation, "entry cleared; discarding response");
      return;
    };
    if slot.generation != generation {
      debug!(%key, generation, latest = slot.generation, "superseded; discarding response");
      return;
    }

    slot.in_flight = false;
    let state = match result {
      Ok(rows) => {
        debug!(%key, rows = rows.len(), "fetch finished");
        QueryState::Success(Arc::new(rows))
      }
      Err(e) => {
        debug!(%key, error = %e, "fetch failed");
        QueryState::Error(QueryError::from(&e))
      }
    };
    slot.tx.send_replace(CacheEntry {
      state,
      fetched_at: Some(Utc::now()),
      stale: false,
    });
  }
}
