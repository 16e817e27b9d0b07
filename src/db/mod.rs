//! Database module.
//!
//! Provides SQLite storage with embedded migrations and the repository traits
//! the monitoring engine depends on.

mod models;
mod repo;
mod store;

pub use models::*;
pub use repo::*;
pub use store::*;
