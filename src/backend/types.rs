use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single row as returned by the backend
pub type Row = Value;

/// Authenticated principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub email: Option<String>,
  #[serde(default)]
  pub user_metadata: Value,
}

/// Backend session: identity plus the tokens the backend client manages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: Option<DateTime<Utc>>,
  pub user: User,
}

impl Session {
  pub fn is_expired(&self) -> bool {
    self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
  }
}

/// Email/password credentials for sign-in and sign-up
#[derive(Clone, Serialize)]
pub struct Credentials {
  pub email: String,
  pub password: String,
}

impl Credentials {
  pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      email: email.into(),
      password: password.into(),
    }
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("email", &self.email)
      .field("password", &"<redacted>")
      .finish()
  }
}

/// Outcome of a sign-up. The backend may require confirmation before it
/// issues a session.
#[derive(Debug, Clone)]
pub struct SignUp {
  pub user: User,
  pub session: Option<Session>,
}

/// Kind of session change announced by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChange {
  SignedIn,
  SignedOut,
  TokenRefreshed,
}

/// Session-change notification
#[derive(Debug, Clone)]
pub struct AuthEvent {
  pub change: AuthChange,
  pub session: Option<Session>,
}

/// Filter operator for a filtered select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterOp {
  Eq,
  Neq,
  Gt,
  Gte,
  Lt,
  Lte,
  Like,
  Ilike,
  Is,
}

impl FilterOp {
  pub fn as_str(&self) -> &'static str {
    match self {
      FilterOp::Eq => "eq",
      FilterOp::Neq => "neq",
      FilterOp::Gt => "gt",
      FilterOp::Gte => "gte",
      FilterOp::Lt => "lt",
      FilterOp::Lte => "lte",
      FilterOp::Like => "like",
      FilterOp::Ilike => "ilike",
      FilterOp::Is => "is",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    Some(match s {
      "eq" => FilterOp::Eq,
      "neq" => FilterOp::Neq,
      "gt" => FilterOp::Gt,
      "gte" => FilterOp::Gte,
      "lt" => FilterOp::Lt,
      "lte" => FilterOp::Lte,
      "like" => FilterOp::Like,
      "ilike" => FilterOp::Ilike,
      "is" => FilterOp::Is,
      _ => return None,
    })
  }
}

/// `column op value` condition on a select or update
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Filter {
  pub column: String,
  pub op: FilterOp,
  pub value: String,
}

impl Filter {
  pub fn new(column: impl Into<String>, op: FilterOp, value: impl ToString) -> Self {
    Self {
      column: column.into(),
      op,
      value: value.to_string(),
    }
  }

  pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
    Self::new(column, FilterOp::Eq, value)
  }

  /// Query string pair, e.g. `("foo_id", "eq.1")`
  pub fn to_query_pair(&self) -> (String, String) {
    (
      self.column.clone(),
      format!("{}.{}", self.op.as_str(), self.value),
    )
  }

  /// Parse `column=op.value`, the same shape the REST surface uses.
  pub fn parse(input: &str) -> Option<Self> {
    let (column, rest) = input.split_once('=')?;
    let (op, value) = rest.split_once('.')?;
    let column = column.trim();
    if column.is_empty() {
      return None;
    }
    Some(Self::new(column, FilterOp::parse(op.trim())?, value))
  }
}

impl fmt::Display for Filter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
  }
}
