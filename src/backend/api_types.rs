//! Serde-deserializable types matching the backend's REST and auth responses.
//!
//! These types are separate from the domain types in `types.rs` so wire
//! quirks (optional fields, relative expiry) stay out of the rest of the crate.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::types::{Session, SignUp, User};
use crate::error::Error;

// ============================================================================
// Errors
// ============================================================================

/// Error object returned by either surface.
///
/// The table API uses `message`/`code`; the auth API uses some mix of
/// `msg`, `error_description`, `error` and `error_code` depending on the
/// endpoint and version.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub message: Option<String>,
  pub msg: Option<String>,
  pub error_description: Option<String>,
  pub error: Option<String>,
  pub code: Option<Value>,
  pub error_code: Option<String>,
}

impl ApiErrorBody {
  pub fn into_error(self, status: StatusCode) -> Error {
    let code = self.error_code.or_else(|| match self.code {
      Some(Value::String(s)) => Some(s),
      Some(Value::Number(n)) => Some(n.to_string()),
      _ => None,
    });
    let message = self
      .message
      .or(self.msg)
      .or(self.error_description)
      .or(self.error)
      .unwrap_or_else(|| {
        status
          .canonical_reason()
          .map(String::from)
          .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
      });

    Error::Backend {
      message,
      code,
      status: Some(status),
    }
  }
}

/// Build an error from a non-success response body that may not be JSON.
pub fn error_from_body(status: StatusCode, body: &str) -> Error {
  match serde_json::from_str::<ApiErrorBody>(body) {
    Ok(parsed) => parsed.into_error(status),
    Err(_) if !body.trim().is_empty() => Error::Backend {
      message: body.trim().to_string(),
      code: None,
      status: Some(status),
    },
    Err(_) => ApiErrorBody::default().into_error(status),
  }
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: String,
  pub email: Option<String>,
  #[serde(default)]
  pub user_metadata: Value,
}

impl From<ApiUser> for User {
  fn from(api: ApiUser) -> Self {
    Self {
      id: api.id,
      email: api.email,
      user_metadata: api.user_metadata,
    }
  }
}

/// Token grant response (`/token`), also the confirmed-signup shape
#[derive(Debug, Deserialize)]
pub struct ApiSession {
  pub access_token: String,
  pub refresh_token: String,
  /// Seconds until expiry
  pub expires_in: Option<i64>,
  /// Unix timestamp of expiry
  pub expires_at: Option<i64>,
  pub user: ApiUser,
}

impl ApiSession {
  pub fn into_session(self, now: DateTime<Utc>) -> Session {
    let expires_at = self
      .expires_at
      .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
      .or_else(|| self.expires_in.map(|secs| now + Duration::seconds(secs)));

    Session {
      access_token: self.access_token,
      refresh_token: self.refresh_token,
      expires_at,
      user: self.user.into(),
    }
  }
}

/// `/signup` answers with a session when auto-confirm is on, or with the
/// bare user when the address still needs confirming.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiSignUp {
  Session(ApiSession),
  User(ApiUser),
}

impl ApiSignUp {
  pub fn into_sign_up(self, now: DateTime<Utc>) -> SignUp {
    match self {
      ApiSignUp::Session(api) => {
        let session = api.into_session(now);
        SignUp {
          user: session.user.clone(),
          session: Some(session),
        }
      }
      ApiSignUp::User(user) => SignUp {
        user: user.into(),
        session: None,
      },
    }
  }
}
