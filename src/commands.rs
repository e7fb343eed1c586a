//! Command-line subcommands and their argument parsing.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tablesync::backend::{Credentials, Filter};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Fetch every row of a resource
  Read {
    resource: String,
    /// Filter as column=op.value (e.g. foo_id=eq.1); repeatable
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<Filter>,
  },
  /// Insert a JSON object (or array of objects) into a resource
  Insert {
    resource: String,
    #[arg(value_parser = parse_json)]
    record: Value,
  },
  /// Patch rows of a resource matching the filters
  Update {
    resource: String,
    #[arg(short, long = "filter", value_parser = parse_filter, required = true)]
    filters: Vec<Filter>,
    #[arg(value_parser = parse_json)]
    patch: Value,
  },
  /// Print a resource and reprint it whenever it changes
  Watch {
    resource: String,
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<Filter>,
    /// Seconds between refetches
    #[arg(short, long, default_value_t = 30)]
    interval: u64,
  },
  /// List rows of the `foo` table
  Foos,
  /// Add a row to the `foo` table
  AddFoo {
    #[arg(short, long)]
    title: String,
  },
  /// Add a row to the `bar` table
  AddBar {
    #[arg(short, long)]
    foo_id: i64,
  },
  /// Sign in with email and password
  Login {
    #[arg(short, long)]
    email: String,
  },
  /// Create an account with email and password
  Register {
    #[arg(short, long)]
    email: String,
  },
  /// Sign out
  Logout,
  /// Renew the access token
  Refresh,
  /// Show who is signed in
  Session,
}

fn parse_filter(input: &str) -> Result<Filter, String> {
  Filter::parse(input).ok_or_else(|| format!("expected column=op.value, got '{}'", input))
}

fn parse_json(input: &str) -> Result<Value, String> {
  let value: Value = serde_json::from_str(input).map_err(|e| format!("invalid JSON: {}", e))?;
  match value {
    Value::Object(_) | Value::Array(_) => Ok(value),
    _ => Err("expected a JSON object or array".to_string()),
  }
}

/// Build credentials, taking the password from the environment.
///
/// Checks TABLESYNC_PASSWORD.
pub fn credentials(email: &str) -> Result<Credentials> {
  let password = std::env::var("TABLESYNC_PASSWORD")
    .map_err(|_| eyre!("Password not found. Set TABLESYNC_PASSWORD environment variable."))?;
  Ok(Credentials::new(email, password))
}
