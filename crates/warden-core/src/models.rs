//! Domain models for Warden.
//!
//! These are the core types shared across all crates.

pub mod api_client;
pub mod authorization;
pub mod link;
pub mod permission;
pub mod resource;
pub mod user;
