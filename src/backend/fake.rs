//! In-memory backend for unit tests: counts calls, fails on request and can
//! hold selects in flight.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Semaphore};

use super::types::{AuthChange, AuthEvent, Credentials, Filter, FilterOp, Row, Session, SignUp, User};
use super::{AuthApi, TableApi};
use crate::error::{Error, Result};

pub struct FakeBackend {
  tables: Mutex<HashMap<String, Vec<Value>>>,
  selects: Mutex<HashMap<String, usize>>,
  table_error: Mutex<Option<String>>,
  auth_error: Mutex<Option<String>>,
  gate: Mutex<Option<Arc<Semaphore>>>,
  session: Mutex<Option<Session>>,
  session_reads: Mutex<usize>,
  events: broadcast::Sender<AuthEvent>,
}

impl FakeBackend {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      tables: Mutex::new(HashMap::new()),
      selects: Mutex::new(HashMap::new()),
      table_error: Mutex::new(None),
      auth_error: Mutex::new(None),
      gate: Mutex::new(None),
      session: Mutex::new(None),
      session_reads: Mutex::new(0),
      events,
    }
  }

  pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
    self.tables.lock().unwrap().insert(table.to_string(), rows);
    self
  }

  pub fn with_session(self, session: Session) -> Self {
    *self.session.lock().unwrap() = Some(session);
    self
  }

  pub fn rows(&self, table: &str) -> Vec<Value> {
    self
      .tables
      .lock()
      .unwrap()
      .get(table)
      .cloned()
      .unwrap_or_default()
  }

  pub fn select_calls(&self, table: &str) -> usize {
    self.selects.lock().unwrap().get(table).copied().unwrap_or(0)
  }

  /// The next table call fails with `message`.
  pub fn fail_next(&self, message: &str) {
    *self.table_error.lock().unwrap() = Some(message.to_string());
  }

  /// The next auth call fails with `message`.
  pub fn fail_auth(&self, message: &str) {
    *self.auth_error.lock().unwrap() = Some(message.to_string());
  }

  /// Park every select until a permit is added to the returned semaphore.
  /// Each select uses up one permit.
  pub fn hold_selects(&self) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    *self.gate.lock().unwrap() = Some(gate.clone());
    gate
  }

  /// Simulate a notification the backend raises on its own.
  pub fn emit(&self, change: AuthChange, session: Option<Session>) {
    *self.session.lock().unwrap() = session.clone();
    let _ = self.events.send(AuthEvent { change, session });
  }

  /// How many times `get_session` was called.
  pub fn session_reads(&self) -> usize {
    *self.session_reads.lock().unwrap()
  }

  pub fn listeners(&self) -> usize {
    self.events.receiver_count()
  }

  fn take_table_error(&self) -> Result<()> {
    match self.table_error.lock().unwrap().take() {
      Some(message) => Err(Error::backend(message)),
      None => Ok(()),
    }
  }

  fn take_auth_error(&self) -> Result<()> {
    match self.auth_error.lock().unwrap().take() {
      Some(message) => Err(Error::backend(message)),
      None => Ok(()),
    }
  }

  fn sign_in_as(&self, email: &str) -> Session {
    let session = session_for(email);
    self.emit(AuthChange::SignedIn, Some(session.clone()));
    session
  }
}

pub fn session_for(email: &str) -> Session {
  Session {
    access_token: format!("token-{}", email),
    refresh_token: format!("refresh-{}", email),
    expires_at: None,
    user: User {
      id: format!("id-{}", email),
      email: Some(email.to_string()),
      user_metadata: Value::Null,
    },
  }
}

fn matches(row: &Value, filter: &Filter) -> bool {
  let Some(field) = row.get(&filter.column) else {
    return false;
  };
  let field = match field {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  };
  match filter.op {
    FilterOp::Eq => field == filter.value,
    FilterOp::Neq => field != filter.value,
    _ => unimplemented!("fake backend only filters on eq/neq"),
  }
}

#[async_trait]
impl TableApi for FakeBackend {
  async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>> {
    *self
      .selects
      .lock()
      .unwrap()
      .entry(table.to_string())
      .or_default() += 1;

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.acquire().await.unwrap().forget();
    }

    self.take_table_error()?;
    Ok(
      self
        .rows(table)
        .into_iter()
        .filter(|row| filters.iter().all(|f| matches(row, f)))
        .collect(),
    )
  }

  async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Row>> {
    self.take_table_error()?;
    let mut tables = self.tables.lock().unwrap();
    let stored = tables.entry(table.to_string()).or_default();
    let mut inserted = Vec::new();
    for mut row in rows {
      if let Value::Object(map) = &mut row {
        map
          .entry("id")
          .or_insert_with(|| json!(stored.len() as i64 + 1));
      }
      stored.push(row.clone());
      inserted.push(row);
    }
    Ok(inserted)
  }

  async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Row>> {
    self.take_table_error()?;
    let mut tables = self.tables.lock().unwrap();
    let mut updated = Vec::new();
    for row in tables.entry(table.to_string()).or_default().iter_mut() {
      if !filters.iter().all(|f| matches(row, f)) {
        continue;
      }
      if let (Value::Object(target), Value::Object(changes)) = (&mut *row, &patch) {
        for (k, v) in changes {
          target.insert(k.clone(), v.clone());
        }
      }
      updated.push(row.clone());
    }
    Ok(updated)
  }
}

#[async_trait]
impl AuthApi for FakeBackend {
  async fn get_session(&self) -> Result<Option<Session>> {
    *self.session_reads.lock().unwrap() += 1;
    self.take_auth_error()?;
    Ok(self.session.lock().unwrap().clone())
  }

  async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
    self.take_auth_error()?;
    Ok(self.sign_in_as(&credentials.email))
  }

  async fn sign_up(&self, credentials: &Credentials) -> Result<SignUp> {
    self.take_auth_error()?;
    let session = self.sign_in_as(&credentials.email);
    Ok(SignUp {
      user: session.user.clone(),
      session: Some(session),
    })
  }

  async fn sign_out(&self) -> Result<()> {
    self.take_auth_error()?;
    self.emit(AuthChange::SignedOut, None);
    Ok(())
  }

  async fn refresh_session(&self) -> Result<Session> {
    self.take_auth_error()?;
    let current = self
      .session
      .lock()
      .unwrap()
      .clone()
      .ok_or_else(|| Error::backend("Auth session missing!"))?;
    let refreshed = Session {
      access_token: format!("{}-refreshed", current.access_token),
      ..current
    };
    self.emit(AuthChange::TokenRefreshed, Some(refreshed.clone()));
    Ok(refreshed)
  }

  fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
    self.events.subscribe()
  }
}
