use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tablesync::backend::{RestBackend, SessionFile};
use tablesync::resources::{Bar, Foo, NewBar, NewFoo};
use tablesync::{Config, QueryClient, QueryKey, QuerySnapshot, SessionState, SessionStore, Table};
use tracing::info;

use crate::commands::{self, Command};

/// Wires the backend, the shared cache and the session store together.
pub struct App {
  cache: QueryClient,
  session: SessionStore,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let mut backend = RestBackend::new(&config.backend)?;
    if config.persist_session {
      backend = backend.with_session_file(SessionFile::open_default()?);
    }
    let backend = Arc::new(backend);

    let cache = QueryClient::new(backend.clone(), &config.cache);
    let session = SessionStore::start(backend, cache.clone()).await?;
    info!(url = %config.backend.url, state = ?session.state(), "backend ready");

    Ok(Self { cache, session })
  }

  pub async fn run(self, command: Command) -> Result<()> {
    match command {
      Command::Read { resource, filters } => {
        let rows = self.cache.fetch(&QueryKey::filtered(resource, filters)).await?;
        print_json(&Value::Array(rows.to_vec()))?;
      }
      Command::Insert { resource, record } => {
        let rows = match record {
          Value::Array(rows) => rows,
          record => vec![record],
        };
        let stored = self.cache.insert(&resource, rows).await?;
        print_json(&Value::Array(stored))?;
      }
      Command::Update {
        resource,
        filters,
        patch,
      } => {
        let updated = self.cache.update(&resource, &filters, patch).await?;
        print_json(&Value::Array(updated))?;
      }
      Command::Watch {
        resource,
        filters,
        interval,
      } => {
        self
          .watch(QueryKey::filtered(resource, filters), interval)
          .await?;
      }
      Command::Foos => {
        for foo in Table::<Foo>::new(&self.cache).fetch().await? {
          println!("{:>6}  {}", foo.id, foo.title);
        }
      }
      Command::AddFoo { title } => {
        let stored = Table::<Foo>::new(&self.cache)
          .insert(&NewFoo { title })
          .await?;
        print_json(&serde_json::to_value(stored)?)?;
      }
      Command::AddBar { foo_id } => {
        let stored = Table::<Bar>::new(&self.cache)
          .insert(&NewBar { foo_id })
          .await?;
        print_json(&serde_json::to_value(stored)?)?;
      }
      Command::Login { email } => {
        let user = self.session.login(&commands::credentials(&email)?).await?;
        println!("Signed in as {}", user.email.as_deref().unwrap_or(&user.id));
      }
      Command::Register { email } => {
        let user = self
          .session
          .register(&commands::credentials(&email)?)
          .await?;
        println!("Registered {}", user.email.as_deref().unwrap_or(&user.id));
      }
      Command::Logout => {
        self.session.logout().await?;
        println!("Signed out");
      }
      Command::Refresh => {
        let user = self.session.refresh().await?;
        println!("Session renewed for {}", user.email.as_deref().unwrap_or(&user.id));
      }
      Command::Session => println!("{}", describe(&self.session.state())),
    }

    self.session.shutdown();
    Ok(())
  }

  /// Print `key` on every change until Ctrl-C, refetching every `interval` seconds.
  async fn watch(&self, key: QueryKey, interval: u64) -> Result<()> {
    let mut observer = self.cache.observe(&key);
    let mut session = self.session.watch();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    // First tick fires immediately
    ticker.tick().await;

    print_snapshot(observer.key(), &observer.snapshot())?;
    loop {
      tokio::select! {
        changed = observer.changed() => print_snapshot(observer.key(), &changed?)?,
        _ = ticker.tick() => {
          observer = self.cache.refetch(&key);
        }
        Ok(()) = session.changed() => {
          eprintln!("-- {}", describe(&session.borrow_and_update()));
        }
        _ = tokio::signal::ctrl_c() => break,
      }
    }
    Ok(())
  }
}

fn describe(state: &SessionState) -> String {
  match state {
    SessionState::Unknown => "Session unknown".to_string(),
    SessionState::Anonymous => "Not signed in".to_string(),
    SessionState::Authenticated(user) => {
      format!("Signed in as {}", user.email.as_deref().unwrap_or(&user.id))
    }
  }
}

fn print_snapshot(key: &QueryKey, snapshot: &QuerySnapshot) -> Result<()> {
  if snapshot.is_loading {
    eprintln!("-- {}: loading", key);
    return Ok(());
  }
  if let Some(error) = &snapshot.error {
    eprintln!("-- {}: {}", key, error);
    return Ok(());
  }
  match &snapshot.data {
    Some(rows) => print_json(&Value::Array(rows.to_vec())),
    None => Ok(()),
  }
}

fn print_json(value: &Value) -> Result<()> {
  let text = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}
