use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tablesync::backend::{AuthApi, AuthChange, Credentials, RestBackend, Session, SessionFile, User};
use tablesync::config::FileConfig;
use tablesync::{Config, Error, QueryClient, QueryKey, SessionState, SessionStore};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
  let uri = server.uri();
  Config::from_parts(FileConfig::default(), move |name| match name {
    "TABLESYNC_URL" => Some(uri.clone()),
    "TABLESYNC_API_KEY" => Some("abc".to_string()),
    _ => None,
  })
  .expect("valid config")
}

fn setup(server: &MockServer) -> (Arc<RestBackend>, QueryClient) {
  let config = config_for(server);
  let backend = Arc::new(RestBackend::new(&config.backend).expect("backend"));
  let cache = QueryClient::new(backend.clone(), &config.cache);
  (backend, cache)
}

fn stored_session(expires_at: Option<DateTime<Utc>>) -> Session {
  Session {
    access_token: "stored-token".to_string(),
    refresh_token: "stored-refresh".to_string(),
    expires_at,
    user: User {
      id: "user-1".to_string(),
      email: Some("a@b.test".to_string()),
      user_metadata: serde_json::Value::Null,
    },
  }
}

/// Backend resuming from `file`, plus a cache over it.
fn setup_with_file(server: &MockServer, file: SessionFile) -> (Arc<RestBackend>, QueryClient) {
  let config = config_for(server);
  let backend = RestBackend::new(&config.backend)
    .expect("backend")
    .with_session_file(file);
  let backend = Arc::new(backend);
  let cache = QueryClient::new(backend.clone(), &config.cache);
  (backend, cache)
}

fn token_response(email: &str) -> serde_json::Value {
  json!({
    "access_token": "user-token",
    "token_type": "bearer",
    "expires_in": 3600,
    "refresh_token": "refresh-token",
    "user": {"id": "user-1", "email": email}
  })
}

#[tokio::test]
async fn read_returns_backend_rows() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/foo"))
    .and(query_param("select", "*"))
    .and(header("apikey", "abc"))
    .and(header("authorization", "Bearer abc"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "a"}])))
    .expect(1)
    .mount(&server)
    .await;

  let (_, cache) = setup(&server);
  let key = QueryKey::all("foo");
  cache.fetch(&key).await.unwrap();

  let snapshot = cache.read(&key);
  assert_eq!(
    snapshot.data.as_deref(),
    Some(&vec![json!({"id": 1, "title": "a"})])
  );
  assert!(!snapshot.is_loading);
  assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn concurrent_reads_issue_one_request() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/foo"))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(json!([{"id": 1, "title": "a"}]))
        .set_delay(Duration::from_millis(100)),
    )
    .expect(1)
    .mount(&server)
    .await;

  let (_, cache) = setup(&server);
  let key = QueryKey::all("foo");
  let (a, b) = futures::future::join(cache.fetch(&key), cache.fetch(&key)).await;

  assert_eq!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn filtered_read_sends_filter() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/bar"))
    .and(query_param("foo_id", "eq.1"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3, "foo_id": 1}])))
    .expect(1)
    .mount(&server)
    .await;

  let (_, cache) = setup(&server);
  let key = QueryKey::filtered("bar", vec![tablesync::backend::Filter::eq("foo_id", 1)]);
  assert_eq!(cache.fetch(&key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn successful_write_forces_refetch() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/foo"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "a"}])))
    .expect(2)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/rest/v1/foo"))
    .and(header("prefer", "return=representation"))
    .and(body_json(json!([{"title": "b"}])))
    .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": 2, "title": "b"}])))
    .expect(1)
    .mount(&server)
    .await;

  let (_, cache) = setup(&server);
  let key = QueryKey::all("foo");
  cache.fetch(&key).await.unwrap();

  cache.write("foo", json!({"title": "b"})).await.unwrap();
  assert!(cache.peek(&key).unwrap().stale);

  cache.fetch(&key).await.unwrap();
}

#[tokio::test]
async fn failed_write_rejects_with_backend_message() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/bar"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "foo_id": 1}])))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/rest/v1/bar"))
    .respond_with(ResponseTemplate::new(409).set_body_json(json!({
      "code": "23503",
      "details": "Key (foo_id)=(99) is not present in table \"foo\".",
      "hint": null,
      "message": "fk violation"
    })))
    .mount(&server)
    .await;

  let (_, cache) = setup(&server);
  let key = QueryKey::all("bar");
  cache.fetch(&key).await.unwrap();
  let before = cache.peek(&key).unwrap();

  let err = cache.write("bar", json!({"foo_id": 99})).await.unwrap_err();
  assert_eq!(err.to_string(), "fk violation");
  assert!(matches!(err, Error::Backend { ref code, .. } if code.as_deref() == Some("23503")));

  assert_eq!(cache.peek(&key).unwrap(), before);
}

#[tokio::test]
async fn failed_read_keeps_entry_free_of_data() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/foo"))
    .respond_with(
      ResponseTemplate::new(401).set_body_json(json!({"message": "JWT expired", "code": "PGRST301"})),
    )
    .mount(&server)
    .await;

  let (_, cache) = setup(&server);
  let key = QueryKey::all("foo");

  let err = cache.fetch(&key).await.unwrap_err();
  assert_eq!(err.to_string(), "JWT expired");

  let snapshot = cache.read(&key);
  assert!(snapshot.data.is_none());
  assert_eq!(snapshot.error.unwrap().message, "JWT expired");
}

#[tokio::test]
async fn login_uses_user_token_and_invalidates_user_entries() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .and(query_param("grant_type", "password"))
    .and(body_json(json!({"email": "a@b.test", "password": "secret"})))
    .respond_with(ResponseTemplate::new(200).set_body_json(token_response("a@b.test")))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/user"))
    .and(header("authorization", "Bearer abc"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/user"))
    .and(header("authorization", "Bearer user-token"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "user-1"}])))
    .expect(1)
    .mount(&server)
    .await;

  let (backend, cache) = setup(&server);
  let store = SessionStore::start(backend, cache.clone()).await.unwrap();
  assert_eq!(store.state(), SessionState::Anonymous);

  let key = QueryKey::all("user");
  assert!(cache.fetch(&key).await.unwrap().is_empty());

  let user = store
    .login(&Credentials::new("a@b.test", "secret"))
    .await
    .unwrap();
  assert_eq!(user.email.as_deref(), Some("a@b.test"));
  assert!(store.state().is_authenticated());

  // Let the listener see the backend's own notification before reading
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert_eq!(cache.fetch(&key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn login_failure_propagates_message() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .respond_with(ResponseTemplate::new(400).set_body_json(json!({
      "error": "invalid_grant",
      "error_description": "Invalid login credentials"
    })))
    .mount(&server)
    .await;

  let (backend, cache) = setup(&server);
  let store = SessionStore::start(backend, cache).await.unwrap();

  let err = store
    .login(&Credentials::new("a@b.test", "wrong"))
    .await
    .unwrap_err();
  assert_eq!(err.to_string(), "Invalid login credentials");
  assert_eq!(store.state(), SessionState::Anonymous);
}

#[tokio::test]
async fn logout_clears_session() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .respond_with(ResponseTemplate::new(200).set_body_json(token_response("a@b.test")))
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/auth/v1/logout"))
    .and(header("authorization", "Bearer user-token"))
    .respond_with(ResponseTemplate::new(204))
    .expect(1)
    .mount(&server)
    .await;

  let (backend, cache) = setup(&server);
  let store = SessionStore::start(backend, cache).await.unwrap();
  store
    .login(&Credentials::new("a@b.test", "secret"))
    .await
    .unwrap();

  store.logout().await.unwrap();
  assert_eq!(store.state(), SessionState::Anonymous);
}

#[tokio::test]
async fn register_without_confirmation_returns_user() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/auth/v1/signup"))
    .respond_with(
      ResponseTemplate::new(200).set_body_json(json!({"id": "user-9", "email": "new@b.test"})),
    )
    .expect(1)
    .mount(&server)
    .await;

  let (backend, cache) = setup(&server);
  let store = SessionStore::start(backend, cache).await.unwrap();

  let user = store
    .register(&Credentials::new("new@b.test", "secret"))
    .await
    .unwrap();
  assert_eq!(user.id, "user-9");
  assert!(store.state().is_authenticated());
}

#[tokio::test]
async fn stored_session_is_resumed() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/foo"))
    .and(header("authorization", "Bearer stored-token"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
    .expect(1)
    .mount(&server)
    .await;

  let dir = tempfile::tempdir().unwrap();
  let file = SessionFile::new(dir.path().join("session.json"));
  file.save(&stored_session(None)).unwrap();

  let (backend, cache) = setup_with_file(&server, file);
  let store = SessionStore::start(backend, cache.clone()).await.unwrap();

  assert_eq!(store.user().map(|u| u.id), Some("user-1".to_string()));
  cache.fetch(&QueryKey::all("foo")).await.unwrap();
}

#[tokio::test]
async fn expired_stored_session_is_refreshed() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .and(query_param("grant_type", "refresh_token"))
    .and(body_json(json!({"refresh_token": "stored-refresh"})))
    .respond_with(ResponseTemplate::new(200).set_body_json(token_response("a@b.test")))
    .expect(1)
    .mount(&server)
    .await;

  let dir = tempfile::tempdir().unwrap();
  let file = SessionFile::new(dir.path().join("session.json"));
  file.save(&stored_session(Some(Utc::now() - chrono::Duration::hours(1)))).unwrap();

  let (backend, cache) = setup_with_file(&server, file.clone());
  let store = SessionStore::start(backend, cache).await.unwrap();

  assert_eq!(store.user().map(|u| u.id), Some("user-1".to_string()));
  assert_eq!(file.load().map(|s| s.access_token), Some("user-token".to_string()));
}

#[tokio::test]
async fn rejected_refresh_signs_out_locally() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .and(query_param("grant_type", "refresh_token"))
    .respond_with(ResponseTemplate::new(400).set_body_json(json!({
      "error": "invalid_grant",
      "error_description": "Invalid Refresh Token: Refresh Token Not Found"
    })))
    .expect(1)
    .mount(&server)
    .await;

  let dir = tempfile::tempdir().unwrap();
  let file = SessionFile::new(dir.path().join("session.json"));
  file.save(&stored_session(Some(Utc::now() - chrono::Duration::hours(1)))).unwrap();

  let (backend, cache) = setup_with_file(&server, file.clone());
  let mut events = backend.subscribe();
  let store = SessionStore::start(backend, cache).await.unwrap();

  assert_eq!(store.state(), SessionState::Anonymous);
  let event = events.recv().await.unwrap();
  assert_eq!(event.change, AuthChange::SignedOut);
  assert!(event.session.is_none());
  assert_eq!(file.load(), None);
}
