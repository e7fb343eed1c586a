use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Environment variables holding the backend endpoint, in lookup order.
pub const URL_VARS: &[&str] = &["TABLESYNC_URL", "SUPABASE_URL"];
/// Environment variables holding the backend API key, in lookup order.
pub const API_KEY_VARS: &[&str] = &["TABLESYNC_API_KEY", "SUPABASE_ANON_KEY"];

/// Resource that always depends on the signed-in identity.
pub const USER_RESOURCE: &str = "user";

#[derive(Debug, Clone)]
pub struct Config {
  pub backend: BackendConfig,
  pub cache: CacheConfig,
  /// Whether the backend client keeps the session in the data directory
  pub persist_session: bool,
  /// Default log filter when RUST_LOG is not set
  pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
  pub url: Url,
  pub api_key: String,
  pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// How long a successful fetch is served without refetching
  pub stale_time: Duration,
  /// Resources whose visibility depends on the signed-in identity (lowercase)
  pub session_scoped: BTreeSet<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      session_scoped: BTreeSet::from([USER_RESOURCE.to_string()]),
    }
  }
}

/// Non-secret settings read from the optional YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
  pub stale_time_secs: Option<u64>,
  pub request_timeout_secs: Option<u64>,
  pub persist_session: Option<bool>,
  pub log_level: Option<String>,
  pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
  pub name: String,
  #[serde(default)]
  pub session_scoped: bool,
}

impl Config {
  /// Load configuration.
  ///
  /// The endpoint URL and API key always come from the environment. Other
  /// settings come from the first YAML file found in:
  /// 1. Explicit path if provided
  /// 2. ./tablesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tablesync/config.yaml
  ///
  /// A missing file is fine; a missing explicit file is not.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => Some(p.to_path_buf()),
      Some(p) => {
        return Err(Error::config(format!(
          "Config file not found: {}",
          p.display()
        )))
      }
      None => Self::find_config_file(),
    };

    let file = match path {
      Some(p) => Self::read_file(&p)?,
      None => FileConfig::default(),
    };

    Self::from_parts(file, |name| std::env::var(name).ok())
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tablesync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tablesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn read_file(path: &Path) -> Result<FileConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    serde_yaml::from_str(&contents).map_err(|e| {
      Error::config(format!(
        "Failed to parse config file {}: {}",
        path.display(),
        e
      ))
    })
  }

  /// Build a config from file settings and an environment lookup.
  pub fn from_parts<F>(file: FileConfig, env: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let raw_url = lookup(&env, URL_VARS).ok_or_else(|| {
      Error::config(format!(
        "Backend URL not found. Set {} environment variable.",
        URL_VARS.join(" or ")
      ))
    })?;
    let url = parse_endpoint(&raw_url)?;

    let api_key = lookup(&env, API_KEY_VARS).ok_or_else(|| {
      Error::config(format!(
        "Backend API key not found. Set {} environment variable.",
        API_KEY_VARS.join(" or ")
      ))
    })?;

    let mut cache = CacheConfig::default();
    if let Some(secs) = file.stale_time_secs {
      cache.stale_time = Duration::from_secs(secs);
    }
    cache.session_scoped.extend(
      file
        .resources
        .iter()
        .filter(|r| r.session_scoped)
        .map(|r| r.name.to_lowercase()),
    );

    Ok(Self {
      backend: BackendConfig {
        url,
        api_key,
        request_timeout: Duration::from_secs(file.request_timeout_secs.unwrap_or(30)),
      },
      cache,
      persist_session: file.persist_session.unwrap_or(true),
      log_level: file.log_level.unwrap_or_else(|| "info".to_string()),
    })
  }
}

fn lookup<F>(env: &F, names: &[&str]) -> Option<String>
where
  F: Fn(&str) -> Option<String>,
{
  names
    .iter()
    .filter_map(|name| env(name))
    .map(|v| v.trim().to_string())
    .find(|v| !v.is_empty())
}

fn parse_endpoint(raw: &str) -> Result<Url> {
  let url = Url::parse(raw)
    .map_err(|e| Error::config(format!("Invalid backend URL '{}': {}", raw, e)))?;

  match url.scheme() {
    "http" | "https" => {}
    other => {
      return Err(Error::config(format!(
        "Invalid backend URL '{}': unsupported scheme '{}'",
        raw, other
      )))
    }
  }
  if url.host_str().is_none() {
    return Err(Error::config(format!(
      "Invalid backend URL '{}': missing host",
      raw
    )));
  }

  Ok(url)
}
