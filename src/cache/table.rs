use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

use super::key::QueryKey;
use super::layer::QueryClient;
use super::traits::Resource;
use crate::backend::{Filter, Row};
use crate::error::{Error, QueryError, Result};
use crate::query::{QueryObserver, QueryState};

/// Typed handle on one resource of a [`QueryClient`].
///
/// Rows are decoded into `R` on the way out, so a row that does not match
/// the schema surfaces as an error instead of reaching the caller. The
/// underlying cache is the shared untyped one.
pub struct Table<R> {
  client: QueryClient,
  _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> Table<R> {
  pub fn new(client: &QueryClient) -> Self {
    if R::session_scoped() {
      client.mark_session_scoped(R::resource_name());
    }
    Self {
      client: client.clone(),
      _resource: PhantomData,
    }
  }

  pub fn key() -> QueryKey {
    QueryKey::all(R::resource_name())
  }

  /// Current state of the whole table, decoded. Starts a fetch when needed.
  pub fn read(&self) -> QueryState<Vec<R>> {
    let snapshot = self.client.read(&Self::key());
    match (snapshot.data, snapshot.error) {
      (Some(records), _) => match decode::<R>(&records) {
        Ok(rows) => QueryState::Success(rows),
        Err(e) => QueryState::Error(QueryError::from(&e)),
      },
      (None, Some(error)) => QueryState::Error(error),
      (None, None) if snapshot.is_loading => QueryState::Loading,
      (None, None) => QueryState::Idle,
    }
  }

  pub fn observe(&self) -> QueryObserver {
    self.client.observe(&Self::key())
  }

  /// Every row of the table.
  pub async fn fetch(&self) -> Result<Vec<R>> {
    decode(&self.client.fetch(&Self::key()).await?)
  }

  /// Rows matching every filter.
  pub async fn fetch_where(&self, filters: Vec<Filter>) -> Result<Vec<R>> {
    let key = QueryKey::filtered(R::resource_name(), filters);
    decode(&self.client.fetch(&key).await?)
  }

  /// The record with `id`, if the table has one.
  pub async fn get(&self, id: i64) -> Result<Option<R>> {
    let rows = self.fetch_where(vec![Filter::eq("id", id)]).await?;
    Ok(rows.into_iter().find(|row| row.id() == id))
  }

  /// Insert a record and return it as stored.
  pub async fn insert(&self, record: &R::Insert) -> Result<Vec<R>> {
    let value = serde_json::to_value(record)?;
    let stored = self
      .client
      .insert(R::resource_name(), vec![value])
      .await?;
    decode(&stored)
  }

  /// Patch the row with `id`.
  pub async fn update<P: Serialize>(&self, id: i64, patch: &P) -> Result<Vec<R>> {
    let patch: Value = serde_json::to_value(patch)?;
    let updated = self
      .client
      .update(R::resource_name(), &[Filter::eq("id", id)], patch)
      .await?;
    decode(&updated)
  }

  pub fn invalidate(&self) {
    self.client.invalidate(R::resource_name());
  }
}

impl<R> Clone for Table<R> {
  fn clone(&self) -> Self {
    Self {
      client: self.client.clone(),
      _resource: PhantomData,
    }
  }
}

fn decode<R: Resource>(rows: &[Row]) -> Result<Vec<R>> {
  rows
    .iter()
    .map(|row| serde_json::from_value::<R>(row.clone()).map_err(Error::from))
    .collect()
}
