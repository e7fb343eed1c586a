//! Boundary to the hosted backend: table operations and authentication.
//!
//! The cache and session layers only talk to the traits in this module, so
//! they can run against [`RestBackend`] in production and an in-memory fake
//! in tests.

mod api_types;
mod persist;
mod rest;
mod types;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

pub use persist::SessionFile;
pub use rest::RestBackend;
pub use types::{AuthChange, AuthEvent, Credentials, Filter, FilterOp, Row, Session, SignUp, User};

/// Table operations per named resource.
#[async_trait]
pub trait TableApi: Send + Sync {
  /// Select all rows of `table` matching every filter (all rows if empty).
  async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>>;

  /// Insert rows, returning what the backend stored.
  async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Row>>;

  /// Patch every row matching the filters, returning the updated rows.
  async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Row>>;
}

/// Authentication operations plus the session-change channel.
#[async_trait]
pub trait AuthApi: Send + Sync {
  /// Session the backend client currently holds, if any.
  async fn get_session(&self) -> Result<Option<Session>>;

  async fn sign_in(&self, credentials: &Credentials) -> Result<Session>;

  async fn sign_up(&self, credentials: &Credentials) -> Result<SignUp>;

  async fn sign_out(&self) -> Result<()>;

  /// Exchange the refresh token for a new session.
  async fn refresh_session(&self) -> Result<Session>;

  /// Register a listener for session changes. Dropping the receiver deregisters it.
  fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
