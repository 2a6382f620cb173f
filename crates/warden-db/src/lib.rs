//! Warden Database — SurrealDB connection management, schema migrations,
//! the ownership graph store and the identity repositories.
//!
//! All repositories are generic over the SurrealDB [`Connection`], so the
//! server runs against a remote instance while tests use the in-memory
//! engine.
//!
//! [`Connection`]: surrealdb::Connection

mod connection;
mod error;
mod locks;
pub mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use schema::{run_migrations, schema_v1};
