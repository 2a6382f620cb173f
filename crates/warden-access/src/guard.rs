//! Write authorization on top of the reachability engine.
//!
//! Every graph write made on behalf of a request goes through
//! [`AccessGuard`], which checks the levels the write needs and then
//! delegates to the graph store. A denied write fails with
//! [`WardenError::NotFound`] naming the object that could not be reached,
//! exactly as if it did not exist.
//!
//! Before any of that, the request's token scopes must allow the write as
//! the equivalent object API call, e.g. `POST /arvados/v1/collections`.
//! A write the scopes do not cover fails with [`WardenError::Forbidden`].

use tracing::info;
use warden_auth::default_owner_for;
use warden_core::RequestContext;
use warden_core::error::{WardenError, WardenResult};
use warden_core::models::link::{
    CreateLink, CreateMembership, Link, Membership, PERMISSION_LINK_CLASS,
};
use warden_core::models::permission::PermissionLevel;
use warden_core::models::resource::{CreateResource, Resource, ResourceKind, TrashUpdate};
use warden_core::repository::{GraphStore, UserRepository};

use crate::engine::{AccessEngine, TrashPolicy};

pub struct AccessGuard<'a, G: GraphStore, U: UserRepository> {
    engine: &'a AccessEngine<G, U>,
}

impl<'a, G: GraphStore, U: UserRepository> AccessGuard<'a, G, U> {
    pub fn new(engine: &'a AccessEngine<G, U>) -> Self {
        Self { engine }
    }

    /// Create a resource owned by the named owner, or by the request's
    /// default owner when none is named. Requires an active user with
    /// `write` on the owner.
    pub async fn create_resource(
        &self,
        ctx: &RequestContext,
        mut input: CreateResource,
    ) -> WardenResult<Resource> {
        require_scope(ctx, "POST", &input.kind.api_path())?;

        // 1. Only active, authenticated users create.
        let identity = ctx.identity().ok_or(WardenError::Unauthenticated)?;
        if !identity.user.is_active {
            return Err(WardenError::Forbidden {
                reason: format!("user {} is inactive", identity.user.uuid),
            });
        }

        // 2. Fill in the owner.
        if input.owner_uuid.is_none() {
            input.owner_uuid = default_owner_for(ctx).map(str::to_string);
        }
        let owner_uuid = input
            .owner_uuid
            .clone()
            .ok_or_else(|| WardenError::Internal("no owner for new resource".into()))?;

        // 3. The creator must be able to write into the owner.
        self.require(ctx, &owner_uuid, PermissionLevel::Write, TrashPolicy::Exclude)
            .await?;

        let resource = self.engine.graph().create_resource(input).await?;
        info!(
            uuid = %resource.uuid,
            owner = %resource.owner_uuid,
            user = %identity.user.uuid,
            "Resource created"
        );
        Ok(resource)
    }

    /// Check that the request's user may modify `uuid`'s attributes.
    pub async fn authorize_update(&self, ctx: &RequestContext, uuid: &str) -> WardenResult<()> {
        require_scope(ctx, "PATCH", &object_path(uuid)?)?;
        self.require(ctx, uuid, PermissionLevel::Write, TrashPolicy::Exclude)
            .await
    }

    /// Move `uuid` under `new_owner_uuid`. Requires `write` on the object,
    /// on its current owner and on the new owner.
    pub async fn change_owner(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        new_owner_uuid: &str,
    ) -> WardenResult<Resource> {
        require_scope(ctx, "PATCH", &object_path(uuid)?)?;
        self.require(ctx, uuid, PermissionLevel::Write, TrashPolicy::Exclude)
            .await?;
        let current_owner = self.engine.graph().owner_of(uuid).await?;
        if current_owner != uuid {
            self.require(ctx, &current_owner, PermissionLevel::Write, TrashPolicy::Exclude)
                .await?;
        }
        self.require(ctx, new_owner_uuid, PermissionLevel::Write, TrashPolicy::Exclude)
            .await?;

        let resource = self.engine.graph().change_owner(uuid, new_owner_uuid).await?;
        info!(uuid = %uuid, from = %current_owner, to = %new_owner_uuid, "Owner changed");
        Ok(resource)
    }

    /// Trash, untrash or schedule trash. Requires `manage`, checked with
    /// trashed objects included so that trashed objects can be restored.
    pub async fn set_trash(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        update: TrashUpdate,
    ) -> WardenResult<Resource> {
        let action = if update.is_trashed == Some(false) {
            "untrash"
        } else {
            "trash"
        };
        require_scope(ctx, "POST", &format!("{}/{action}", object_path(uuid)?))?;
        self.require(ctx, uuid, PermissionLevel::Manage, TrashPolicy::Include)
            .await?;
        self.engine.graph().update_trash(uuid, update).await
    }

    /// A grant needs `manage` on the head. Any other link, favorites
    /// included, needs `read` on the head and `write` on the tail. Either
    /// way the creator must be able to write into the link's owner.
    pub async fn create_link(&self, ctx: &RequestContext, input: CreateLink) -> WardenResult<Link> {
        require_scope(ctx, "POST", &ResourceKind::Link.api_path())?;
        if grants_access(&input.link_class, &input.name) {
            self.require(ctx, &input.head_uuid, PermissionLevel::Manage, TrashPolicy::Exclude)
                .await?;
        } else {
            self.require(ctx, &input.head_uuid, PermissionLevel::Read, TrashPolicy::Exclude)
                .await?;
            self.require(ctx, &input.tail_uuid, PermissionLevel::Write, TrashPolicy::Exclude)
                .await?;
        }
        self.require(ctx, &input.owner_uuid, PermissionLevel::Write, TrashPolicy::Exclude)
            .await?;

        self.engine.graph().create_link(input).await
    }

    /// A grant can be removed by whoever manages its head. Any link can be
    /// removed by whoever can write to its owner.
    pub async fn delete_link(&self, ctx: &RequestContext, uuid: &str) -> WardenResult<()> {
        require_scope(ctx, "DELETE", &object_path(uuid)?)?;
        let link = self.engine.graph().get_link(uuid).await?;

        let manages_head = link.grant().is_some()
            && self
                .allowed(ctx, &link.head_uuid, PermissionLevel::Manage, TrashPolicy::Include)
                .await?;
        if !manages_head
            && !self
                .allowed(ctx, &link.owner_uuid, PermissionLevel::Write, TrashPolicy::Include)
                .await?
        {
            return Err(WardenError::not_found("link", uuid));
        }

        self.engine.graph().delete_link(uuid).await?;
        info!(uuid = %uuid, user = ?ctx.user_uuid(), "Link deleted");
        Ok(())
    }

    /// Add a user to a group. Requires `manage` on the group.
    pub async fn add_membership(
        &self,
        ctx: &RequestContext,
        input: CreateMembership,
    ) -> WardenResult<Membership> {
        require_scope(ctx, "POST", &ResourceKind::Link.api_path())?;
        self.require(ctx, &input.group_uuid, PermissionLevel::Manage, TrashPolicy::Exclude)
            .await?;
        self.require(ctx, &input.owner_uuid, PermissionLevel::Write, TrashPolicy::Exclude)
            .await?;
        self.engine.graph().add_membership(input).await
    }

    pub async fn remove_membership(
        &self,
        ctx: &RequestContext,
        user_uuid: &str,
        group_uuid: &str,
    ) -> WardenResult<()> {
        require_scope(ctx, "DELETE", &ResourceKind::Link.api_path())?;
        self.require(ctx, group_uuid, PermissionLevel::Manage, TrashPolicy::Include)
            .await?;
        self.engine
            .graph()
            .remove_membership(user_uuid, group_uuid)
            .await
    }

    async fn require(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        level: PermissionLevel,
        policy: TrashPolicy,
    ) -> WardenResult<()> {
        self.engine.check_with(ctx, uuid, level, policy).await
    }

    async fn allowed(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        level: PermissionLevel,
        policy: TrashPolicy,
    ) -> WardenResult<bool> {
        match ctx.user_uuid() {
            Some(user_uuid) => {
                self.engine
                    .can_access_with(user_uuid, uuid, level, ctx.received_at(), policy)
                    .await
            }
            None => Ok(false),
        }
    }
}

/// Anonymous requests carry no token; the access checks turn them away.
fn require_scope(ctx: &RequestContext, method: &str, path: &str) -> WardenResult<()> {
    if ctx.identity().is_some_and(|identity| !identity.allows(method, path)) {
        return Err(WardenError::Forbidden {
            reason: format!("token scopes do not allow {method} {path}"),
        });
    }
    Ok(())
}

/// API path of an existing object, from the kind its UUID names.
fn object_path(uuid: &str) -> WardenResult<String> {
    ResourceKind::from_uuid(uuid)
        .map(|kind| format!("{}/{uuid}", kind.api_path()))
        .ok_or_else(|| WardenError::not_found("object", uuid))
}

fn grants_access(link_class: &str, name: &str) -> bool {
    link_class == PERMISSION_LINK_CLASS && PermissionLevel::from_link_name(name).is_some()
}
