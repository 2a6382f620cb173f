//! SurrealDB repository and graph store implementations.

mod api_client;
mod authorization;
mod graph;
mod user;

pub use api_client::SurrealApiClientRepository;
pub use authorization::SurrealAuthorizationRepository;
pub use graph::SurrealGraphStore;
pub use user::SurrealUserRepository;
