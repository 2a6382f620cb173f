//! Repository and store trait definitions for data access abstraction.
//!
//! All operations are async. Implementations live in `warden-db`; the
//! identity and access crates are generic over these traits.

use chrono::{DateTime, Utc};

use crate::error::WardenResult;
use crate::models::{
    api_client::{ApiClient, CreateApiClient},
    authorization::{ApiClientAuthorization, CreateAuthorization},
    link::{CreateLink, CreateMembership, Link, Membership},
    resource::{CreateResource, Resource, TrashUpdate},
    user::{CreateUser, UpdateUser, User},
};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    /// Create the user record and its ownership edge atomically.
    fn create(&self, input: CreateUser) -> impl Future<Output = WardenResult<User>> + Send;
    fn get_by_uuid(&self, uuid: &str) -> impl Future<Output = WardenResult<User>> + Send;
    fn get_by_email(&self, email: &str) -> impl Future<Output = WardenResult<User>> + Send;
    fn update(
        &self,
        uuid: &str,
        input: UpdateUser,
    ) -> impl Future<Output = WardenResult<User>> + Send;
}

pub trait ApiClientRepository: Send + Sync {
    fn create(
        &self,
        input: CreateApiClient,
    ) -> impl Future<Output = WardenResult<ApiClient>> + Send;
    fn get_by_uuid(&self, uuid: &str) -> impl Future<Output = WardenResult<ApiClient>> + Send;
}

pub trait AuthorizationRepository: Send + Sync {
    fn create(
        &self,
        input: CreateAuthorization,
    ) -> impl Future<Output = WardenResult<ApiClientAuthorization>> + Send;
    fn get_by_uuid(
        &self,
        uuid: &str,
    ) -> impl Future<Output = WardenResult<ApiClientAuthorization>> + Send;
    /// Exact lookup by the stored secret digest. Expiry is not checked here.
    fn get_by_token_hash(
        &self,
        token_hash: &str,
    ) -> impl Future<Output = WardenResult<ApiClientAuthorization>> + Send;
    /// Record that the authorization was used at `at` from `ip_address`.
    fn touch(
        &self,
        uuid: &str,
        at: DateTime<Utc>,
        ip_address: Option<String>,
    ) -> impl Future<Output = WardenResult<()>> + Send;
    /// Soft-invalidate by moving the expiry to `at`.
    fn expire(&self, uuid: &str, at: DateTime<Utc>)
    -> impl Future<Output = WardenResult<()>> + Send;
    /// Soft-invalidate every still-valid authorization of a user.
    fn expire_all_for_user(
        &self,
        user_uuid: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = WardenResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Ownership graph
// ---------------------------------------------------------------------------

/// The ownership edges (`resource -> owner`) and explicit links
/// (`tail -> head`) that reachability walks.
///
/// Writes are atomic per call and serialized per affected object. Every
/// write advances [`GraphStore::revision`] when it starts and again when it
/// ends, which readers use to detect that a traversal straddled a write and
/// to invalidate cached results.
pub trait GraphStore: Send + Sync {
    /// Create a resource. The owner chain must lead to a user without
    /// cycles, otherwise the write is rejected as an integrity error. A
    /// preassigned UUID must carry the kind's infix. Links are created with
    /// [`GraphStore::create_link`] instead.
    fn create_resource(
        &self,
        input: CreateResource,
    ) -> impl Future<Output = WardenResult<Resource>> + Send;
    fn get_resource(&self, uuid: &str) -> impl Future<Output = WardenResult<Resource>> + Send;
    /// Batch fetch; unknown UUIDs are skipped.
    fn get_resources(
        &self,
        uuids: &[String],
    ) -> impl Future<Output = WardenResult<Vec<Resource>>> + Send;
    fn owner_of(&self, uuid: &str) -> impl Future<Output = WardenResult<String>> + Send;
    /// Resources whose owner is `owner_uuid`.
    fn children_of(
        &self,
        owner_uuid: &str,
    ) -> impl Future<Output = WardenResult<Vec<Resource>>> + Send;
    /// Owner chain of a resource, nearest first, excluding the resource.
    /// Stops at a self-owned root or after `max_depth` steps.
    fn ancestors_of(
        &self,
        uuid: &str,
        max_depth: usize,
    ) -> impl Future<Output = WardenResult<Vec<Resource>>> + Send;
    fn all_resource_uuids(&self) -> impl Future<Output = WardenResult<Vec<String>>> + Send;
    /// Move a resource to a new owner, subject to the same checks as create.
    fn change_owner(
        &self,
        uuid: &str,
        new_owner_uuid: &str,
    ) -> impl Future<Output = WardenResult<Resource>> + Send;
    /// Links cannot be trashed, only deleted.
    fn update_trash(
        &self,
        uuid: &str,
        update: TrashUpdate,
    ) -> impl Future<Output = WardenResult<Resource>> + Send;

    /// Create a link. Tail and head must exist and the owner must be able to
    /// own objects. The link is itself a resource of kind `Link` under that
    /// owner until it is deleted.
    fn create_link(&self, input: CreateLink) -> impl Future<Output = WardenResult<Link>> + Send;
    fn get_link(&self, uuid: &str) -> impl Future<Output = WardenResult<Link>> + Send;
    fn delete_link(&self, uuid: &str) -> impl Future<Output = WardenResult<()>> + Send;
    /// Links of class `permission` whose tail is `uuid` (unordered).
    fn permission_links_from(
        &self,
        uuid: &str,
    ) -> impl Future<Output = WardenResult<Vec<Link>>> + Send;
    /// Links of class `permission` whose head is `uuid` (unordered).
    fn permission_links_to(
        &self,
        uuid: &str,
    ) -> impl Future<Output = WardenResult<Vec<Link>>> + Send;

    /// Write both membership links in one transaction.
    fn add_membership(
        &self,
        input: CreateMembership,
    ) -> impl Future<Output = WardenResult<Membership>> + Send;
    /// Remove both membership links in one transaction.
    fn remove_membership(
        &self,
        user_uuid: &str,
        group_uuid: &str,
    ) -> impl Future<Output = WardenResult<()>> + Send;

    /// Current graph revision, or `None` while any write is in flight.
    /// Two equal readings with no `None` in between bracket a window in
    /// which the graph did not change.
    fn revision(&self) -> Option<u64>;
}
