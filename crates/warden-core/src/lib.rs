//! Warden core: domain models, store traits, the permission level
//! lattice and UUID assignment shared by every other crate.

pub mod context;
pub mod error;
pub mod ids;
pub mod models;
pub mod repository;

pub use context::{Identity, RequestContext};
pub use error::{WardenError, WardenResult};
pub use ids::ClusterId;
