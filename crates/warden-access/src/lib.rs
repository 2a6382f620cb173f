//! Warden Access — permission reachability over the ownership graph,
//! trash-aware visibility filtering and write authorization.
//!
//! [`AccessEngine`] answers "may this user act on this object at this
//! level" and "what can this user see" by breadth-first traversal from the
//! user over ownership edges and permission links. [`TrashFilter`] applies
//! trashed state, inherited through the owner chain, on top of the result.
//! [`AccessGuard`] turns those answers into checks on graph writes.

pub mod cache;
pub mod config;
pub mod engine;
pub mod guard;
pub mod trash;

pub use config::AccessConfig;
pub use engine::{AccessEngine, Reach, TrashPolicy, TraversalOutcome};
pub use guard::AccessGuard;
pub use trash::{TrashFilter, TrashState};
