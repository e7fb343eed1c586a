use reqwest::StatusCode;
use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError)]
pub enum Error {
  /// The backend answered with an error object. Displays as the backend's message.
  #[error("{message}")]
  Backend {
    message: String,
    code: Option<String>,
    status: Option<StatusCode>,
  },

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("HTTP request error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("JSON error: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("URL parse error: {0}")]
  InvalidUrl(#[from] url::ParseError),

  #[error("Query was cancelled")]
  Cancelled,
}

impl Error {
  pub fn backend(message: impl Into<String>) -> Self {
    Error::Backend {
      message: message.into(),
      code: None,
      status: None,
    }
  }

  pub fn config(message: impl Into<String>) -> Self {
    Error::Config(message.into())
  }
}

/// Cloneable error carried inside cache entries so every subscriber of a
/// shared fetch receives the same failure.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct QueryError {
  pub message: String,
  pub code: Option<String>,
}

impl From<&Error> for QueryError {
  fn from(err: &Error) -> Self {
    match err {
      Error::Backend { message, code, .. } => QueryError {
        message: message.clone(),
        code: code.clone(),
      },
      other => QueryError {
        message: other.to_string(),
        code: None,
      },
    }
  }
}

impl From<QueryError> for Error {
  fn from(err: QueryError) -> Self {
    Error::Backend {
      message: err.message,
      code: err.code,
      status: None,
    }
  }
}
