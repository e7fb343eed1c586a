//! Client-side cache for remote tables.
//!
//! This module provides the resource cache that sits between consumers and
//! the backend's table API:
//! - One entry per query key (resource name plus optional filters)
//! - A single in-flight fetch per key, shared by every reader
//! - Invalidate-and-refetch after writes; cached rows are never patched
//! - Typed access to known resources through [`Table`]

mod key;
mod layer;
mod table;
mod traits;

pub use key::QueryKey;
pub use layer::QueryClient;
pub use table::Table;
pub use traits::Resource;
