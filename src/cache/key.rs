use std::fmt;

use crate::backend::Filter;

/// Cache key: a resource name plus the filters of the select.
///
/// Filters are kept sorted so the same conditions given in a different order
/// share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  resource: String,
  filters: Vec<Filter>,
}

impl QueryKey {
  /// Every row of `resource`
  pub fn all(resource: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      filters: Vec::new(),
    }
  }

  /// Rows of `resource` matching every filter
  pub fn filtered(resource: impl Into<String>, mut filters: Vec<Filter>) -> Self {
    filters.sort();
    filters.dedup();
    Self {
      resource: resource.into(),
      filters,
    }
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn filters(&self) -> &[Filter] {
    &self.filters
  }

  /// Invalidating a resource reaches every key of that resource.
  pub fn belongs_to(&self, resource: &str) -> bool {
    self.resource == resource
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.resource)?;
    for (i, filter) in self.filters.iter().enumerate() {
      write!(f, "{}{}", if i == 0 { "?" } else { "&" }, filter)?;
    }
    Ok(())
  }
}
