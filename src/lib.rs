//! Client-side data access for a hosted backend: a shared query cache over
//! its tables and a reactive session store over its auth service.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod query;
pub mod resources;
pub mod session;

pub use cache::{QueryClient, QueryKey, Resource, Table};
pub use config::Config;
pub use error::{Error, QueryError, Result};
pub use query::{QueryObserver, QuerySnapshot, QueryState};
pub use session::{SessionState, SessionStore};
