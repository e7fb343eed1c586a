use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use super::api_types::{error_from_body, ApiSession, ApiSignUp};
use super::persist::SessionFile;
use super::types::{AuthChange, AuthEvent, Credentials, Filter, Row, Session, SignUp};
use super::{AuthApi, TableApi};
use crate::config::BackendConfig;
use crate::error::{Error, Result};

const EVENT_CAPACITY: usize = 16;

/// HTTP client for the hosted backend.
///
/// Clones share the HTTP connection pool, the current session and the
/// session-change channel.
#[derive(Clone)]
pub struct RestBackend {
  http: reqwest::Client,
  base: Url,
  api_key: String,
  session: Arc<RwLock<Option<Session>>>,
  events: broadcast::Sender<AuthEvent>,
  session_file: Option<SessionFile>,
}

impl RestBackend {
  pub fn new(config: &BackendConfig) -> Result<Self> {
    let mut headers = HeaderMap::new();
    headers.insert(
      "apikey",
      HeaderValue::from_str(&config.api_key)
        .map_err(|_| Error::config("Backend API key is not a valid header value"))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(config.request_timeout)
      .build()?;

    // Url::join drops the last path segment unless the base ends with '/'
    let mut base = config.url.clone();
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    Ok(Self {
      http,
      base,
      api_key: config.api_key.clone(),
      session: Arc::new(RwLock::new(None)),
      events,
      session_file: None,
    })
  }

  /// Keep the session in `file` and resume whatever it already holds.
  pub fn with_session_file(mut self, file: SessionFile) -> Self {
    if let Some(session) = file.load() {
      debug!(user = %session.user.id, path = %file.path().display(), "resumed stored session");
      *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }
    self.session_file = Some(file);
    self
  }

  fn current(&self) -> Option<Session> {
    self
      .session
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn bearer(&self) -> String {
    match self.current() {
      Some(session) => session.access_token,
      None => self.api_key.clone(),
    }
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
    let url = self.base.join(path)?;
    Ok(
      self
        .http
        .request(method, url)
        .header(AUTHORIZATION, format!("Bearer {}", self.bearer())),
    )
  }

  /// Store (or drop) the session and tell subscribers about it.
  fn set_session(&self, session: Option<Session>, change: AuthChange) {
    *self.session.write().unwrap_or_else(PoisonError::into_inner) = session.clone();

    if let Some(file) = &self.session_file {
      let stored = match &session {
        Some(s) => file.save(s),
        None => file.clear(),
      };
      if let Err(e) = stored {
        warn!(error = %e, "failed to update stored session");
      }
    }

    debug!(?change, "session changed");
    // No receivers is fine
    let _ = self.events.send(AuthEvent { change, session });
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
    let body = self.send_raw(request).await?;
    Ok(serde_json::from_str(&body)?)
  }

  async fn send_raw(&self, request: RequestBuilder) -> Result<String> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
      return Err(error_from_body(status, &body));
    }
    Ok(body)
  }

  fn table_path(table: &str) -> String {
    format!("rest/v1/{}", table)
  }

  fn filter_pairs(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_query_pair).collect()
  }
}

#[async_trait]
impl TableApi for RestBackend {
  async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>> {
    debug!(table, filters = filters.len(), "select");
    let request = self
      .request(Method::GET, &Self::table_path(table))?
      .query(&[("select", "*")])
      .query(&Self::filter_pairs(filters));

    self.send(request).await
  }

  async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Row>> {
    debug!(table, rows = rows.len(), "insert");
    let request = self
      .request(Method::POST, &Self::table_path(table))?
      .header("Prefer", "return=representation")
      .json(&rows);

    self.send(request).await
  }

  async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Row>> {
    if filters.is_empty() {
      // The REST surface refuses unfiltered updates; fail before the round trip
      return Err(Error::backend("UPDATE requires a WHERE clause"));
    }
    debug!(table, filters = filters.len(), "update");
    let request = self
      .request(Method::PATCH, &Self::table_path(table))?
      .query(&Self::filter_pairs(filters))
      .header("Prefer", "return=representation")
      .json(&patch);

    self.send(request).await
  }
}

#[async_trait]
impl AuthApi for RestBackend {
  async fn get_session(&self) -> Result<Option<Session>> {
    let Some(session) = self.current() else {
      return Ok(None);
    };
    if !session.is_expired() {
      return Ok(Some(session));
    }

    match self.refresh_session().await {
      Ok(session) => Ok(Some(session)),
      Err(Error::Backend { message, .. }) => {
        warn!(%message, "stored session could not be refreshed; signing out locally");
        self.set_session(None, AuthChange::SignedOut);
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
    let request = self
      .request(Method::POST, "auth/v1/token")?
      .query(&[("grant_type", "password")])
      .json(credentials);

    let api: ApiSession = self.send(request).await?;
    let session = api.into_session(Utc::now());
    self.set_session(Some(session.clone()), AuthChange::SignedIn);
    Ok(session)
  }

  async fn sign_up(&self, credentials: &Credentials) -> Result<SignUp> {
    let request = self
      .request(Method::POST, "auth/v1/signup")?
      .json(credentials);

    let api: ApiSignUp = self.send(request).await?;
    let sign_up = api.into_sign_up(Utc::now());
    if let Some(session) = &sign_up.session {
      self.set_session(Some(session.clone()), AuthChange::SignedIn);
    }
    Ok(sign_up)
  }

  async fn sign_out(&self) -> Result<()> {
    if self.current().is_some() {
      let request = self.request(Method::POST, "auth/v1/logout")?;
      self.send_raw(request).await?;
    }
    self.set_session(None, AuthChange::SignedOut);
    Ok(())
  }

  async fn refresh_session(&self) -> Result<Session> {
    let current = self
      .current()
      .ok_or_else(|| Error::backend("Auth session missing!"))?;

    let request = self
      .request(Method::POST, "auth/v1/token")?
      .query(&[("grant_type", "refresh_token")])
      .json(&json!({ "refresh_token": current.refresh_token }));

    let api: ApiSession = self.send(request).await?;
    let session = api.into_session(Utc::now());
    self.set_session(Some(session.clone()), AuthChange::TokenRefreshed);
    Ok(session)
  }

  fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
    self.events.subscribe()
  }
}
