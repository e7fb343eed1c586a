//! Core trait for typed resources.

use serde::{de::DeserializeOwned, Serialize};

/// A named remote collection with a known record schema.
///
/// Implementors map one table to a Rust type; the table name doubles as the
/// cache key for every query on it.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Payload accepted by an insert (usually the record minus generated columns)
  type Insert: Serialize + Send + Sync;

  /// Table name, also the cache key (e.g., "foo", "bar")
  fn resource_name() -> &'static str;

  /// Numeric identifier of this record
  fn id(&self) -> i64;

  /// Whether rows visible in this table depend on the signed-in identity.
  fn session_scoped() -> bool {
    false
  }
}
