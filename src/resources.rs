//! Resources known at compile time.

use serde::{Deserialize, Serialize};

use crate::cache::Resource;

/// Row of table `foo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Foo {
  pub id: i64,
  pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewFoo {
  pub title: String,
}

/// Row of table `bar`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
  pub id: i64,
  /// References `Foo::id`
  pub foo_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewBar {
  pub foo_id: i64,
}

impl Resource for Foo {
  type Insert = NewFoo;

  fn resource_name() -> &'static str {
    "foo"
  }

  fn id(&self) -> i64 {
    self.id
  }
}

impl Resource for Bar {
  type Insert = NewBar;

  fn resource_name() -> &'static str {
    "bar"
  }

  fn id(&self) -> i64 {
    self.id
  }
}
