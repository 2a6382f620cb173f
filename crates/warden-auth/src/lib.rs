//! Warden Auth — token extraction and formats, token issuing, identity
//! resolution and default-owner computation.

pub mod config;
pub mod error;
pub mod owner;
pub mod resolver;
pub mod service;
pub mod token;

pub use config::AuthConfig;
pub use error::AuthError;
pub use owner::default_owner_for;
pub use resolver::IdentityResolver;
pub use service::{IssueToken, IssuedToken, TokenService};
pub use token::{TokenFormat, TokenSources};
