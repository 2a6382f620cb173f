//! SurrealDB implementation of [`GraphStore`].
//!
//! Resources live in the `resource` table with their owner edge stored
//! inline as `owner_uuid`; links live in `link`. Both are keyed by UUID.
//! A link is also an owned object, so every link has a `resource` row of
//! kind `Link` written and removed in the same transaction as the link.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use warden_core::error::{WardenError, WardenResult};
use warden_core::ids::{self, ClusterId};
use warden_core::models::link::{
    CreateLink, CreateMembership, Link, Membership, PERMISSION_LINK_CLASS,
};
use warden_core::models::permission::PermissionLevel;
use warden_core::models::resource::{
    CreateResource, GroupClass, Resource, ResourceKind, TrashUpdate,
};
use warden_core::repository::GraphStore;

use crate::error::DbError;
use crate::locks::GraphLocks;

/// Longest owner chain accepted on write.
const MAX_OWNER_DEPTH: usize = 64;

#[derive(Debug, SurrealValue)]
struct ResourceRow {
    record_id: String,
    kind: String,
    owner_uuid: String,
    name: String,
    group_class: Option<String>,
    is_trashed: bool,
    trash_at: Option<DateTime<Utc>>,
    delete_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl ResourceRow {
    fn try_into_resource(self) -> Result<Resource, DbError> {
        let kind = ResourceKind::parse(&self.kind).ok_or_else(|| DbError::Corrupt {
            table: "resource",
            reason: format!("unknown kind {}", self.kind),
        })?;
        let group_class = self
            .group_class
            .as_deref()
            .map(|class| {
                GroupClass::parse(class).ok_or_else(|| DbError::Corrupt {
                    table: "resource",
                    reason: format!("unknown group class {class}"),
                })
            })
            .transpose()?;

        Ok(Resource {
            uuid: self.record_id,
            kind,
            owner_uuid: self.owner_uuid,
            name: self.name,
            group_class,
            is_trashed: self.is_trashed,
            trash_at: self.trash_at,
            delete_at: self.delete_at,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct LinkRow {
    record_id: String,
    owner_uuid: String,
    tail_uuid: String,
    head_uuid: String,
    link_class: String,
    name: String,
    properties: serde_json::Value,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<LinkRow> for Link {
    fn from(row: LinkRow) -> Self {
        Link {
            uuid: row.record_id,
            owner_uuid: row.owner_uuid,
            tail_uuid: row.tail_uuid,
            head_uuid: row.head_uuid,
            link_class: row.link_class,
            name: row.name,
            properties: row.properties,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

fn query_error(e: surrealdb::Error) -> DbError {
    DbError::Query(e.to_string())
}

/// Removes every permission link between `$user` and `$group`, both rows of
/// each. Must run inside a transaction.
const DELETE_PAIR_LINKS: &str = "\
    LET $stale = (SELECT VALUE meta::id(id) FROM link WHERE link_class = $class AND \
      ((tail_uuid = $user AND head_uuid = $group) OR \
       (tail_uuid = $group AND head_uuid = $user))); \
    DELETE resource WHERE meta::id(id) IN $stale; \
    DELETE link WHERE meta::id(id) IN $stale;";

/// Creates link `$<name>` and its resource row. Must run inside a
/// transaction.
fn create_link_rows(name: &str, tail: &str, head: &str, link_name: &str) -> String {
    format!(
        "CREATE type::record('link', ${name}) SET \
           owner_uuid = $owner, tail_uuid = ${tail}, head_uuid = ${head}, \
           link_class = $class, name = ${link_name}, properties = $properties; \
         CREATE type::record('resource', ${name}) SET \
           kind = 'Link', owner_uuid = $owner, name = ${link_name}, is_trashed = false;"
    )
}

/// SurrealDB-backed ownership graph.
///
/// Clones share the same lock table and revision counter, so every handle
/// onto one database must be cloned from a single store.
#[derive(Clone)]
pub struct SurrealGraphStore<C: Connection> {
    db: Surreal<C>,
    cluster: ClusterId,
    locks: Arc<GraphLocks>,
}

impl<C: Connection> SurrealGraphStore<C> {
    pub fn new(db: Surreal<C>, cluster: ClusterId) -> Self {
        Self {
            db,
            cluster,
            locks: Arc::new(GraphLocks::default()),
        }
    }

    pub fn cluster(&self) -> &ClusterId {
        &self.cluster
    }

    /// Release lock-table entries for rows nobody is writing.
    pub fn prune_locks(&self) {
        self.locks.rows.prune();
    }

    pub(crate) fn db(&self) -> &Surreal<C> {
        &self.db
    }

    pub(crate) fn locks(&self) -> &GraphLocks {
        &self.locks
    }

    pub(crate) async fn fetch_resource(&self, uuid: &str) -> Result<Option<Resource>, DbError> {
        let mut result = self
            .db
            .query("SELECT meta::id(id) AS record_id, * FROM type::record('resource', $uuid)")
            .bind(("uuid", uuid.to_string()))
            .await?;
        let rows: Vec<ResourceRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(ResourceRow::try_into_resource)
            .transpose()
    }

    async fn fetch_link(&self, uuid: &str) -> Result<Option<Link>, DbError> {
        let mut result = self
            .db
            .query("SELECT meta::id(id) AS record_id, * FROM type::record('link', $uuid)")
            .bind(("uuid", uuid.to_string()))
            .await?;
        let rows: Vec<LinkRow> = result.take(0)?;
        Ok(rows.into_iter().next().map(Link::from))
    }

    async fn require_resource(&self, uuid: &str, role: &str) -> Result<Resource, DbError> {
        self.fetch_resource(uuid)
            .await?
            .ok_or_else(|| DbError::Integrity(format!("{role} {uuid} does not exist")))
    }

    /// Verify that making `owner_uuid` the owner of `uuid` keeps the
    /// ownership graph a forest rooted at self-owned users.
    pub(crate) async fn check_owner_chain(
        &self,
        uuid: &str,
        kind: ResourceKind,
        owner_uuid: &str,
    ) -> Result<(), DbError> {
        if owner_uuid == uuid {
            if kind == ResourceKind::User {
                return Ok(());
            }
            return Err(DbError::Integrity(format!("{kind} {uuid} cannot own itself")));
        }

        let mut current = self.require_resource(owner_uuid, "owner").await?;
        if !current.kind.can_own() {
            return Err(DbError::Integrity(format!(
                "{} {owner_uuid} cannot own other objects",
                current.kind
            )));
        }

        for _ in 0..MAX_OWNER_DEPTH {
            if current.owner_uuid == current.uuid {
                return Ok(());
            }
            if current.owner_uuid == uuid {
                return Err(DbError::Integrity(format!(
                    "owner {owner_uuid} is owned by {uuid}; the change would create a cycle"
                )));
            }
            current = self.require_resource(&current.owner_uuid, "owner").await?;
        }

        Err(DbError::Integrity(format!(
            "owner chain of {owner_uuid} exceeds {MAX_OWNER_DEPTH} levels"
        )))
    }

    async fn links_where(&self, column: &'static str, uuid: &str) -> Result<Vec<Link>, DbError> {
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM link \
             WHERE {column} = $uuid AND link_class = $class"
        );
        let mut result = self
            .db
            .query(query)
            .bind(("uuid", uuid.to_string()))
            .bind(("class", PERMISSION_LINK_CLASS.to_string()))
            .await?;
        let rows: Vec<LinkRow> = result.take(0)?;
        Ok(rows.into_iter().map(Link::from).collect())
    }
}

impl<C: Connection> GraphStore for SurrealGraphStore<C> {
    async fn create_resource(&self, mut input: CreateResource) -> WardenResult<Resource> {
        let uuid = ids::assign_uuid_to(&self.cluster, &mut input)
            .ok_or_else(|| WardenError::Internal("resource without uuid slot".into()))?;
        if !ids::is_valid_uuid(&uuid) {
            return Err(WardenError::Validation {
                message: format!("malformed uuid {uuid}"),
            });
        }
        if input.kind == ResourceKind::Link {
            return Err(WardenError::Validation {
                message: "links are created through create_link".into(),
            });
        }
        if !input.kind.matches_uuid(&uuid) {
            return Err(WardenError::Validation {
                message: format!("uuid {uuid} is not a {} uuid", input.kind),
            });
        }
        let owner_uuid = input.owner_uuid.clone().ok_or_else(|| WardenError::Validation {
            message: "owner_uuid is required".into(),
        })?;

        let _row = self.locks.rows.lock(&uuid).await;
        if self.fetch_resource(&uuid).await?.is_some() {
            return Err(WardenError::AlreadyExists {
                entity: format!("resource {uuid}"),
            });
        }
        self.check_owner_chain(&uuid, input.kind, &owner_uuid)
            .await?;

        let _write = self.locks.writes.begin();
        let mut result = self
            .db
            .query(
                "CREATE type::record('resource', $uuid) SET \
                 kind = $kind, owner_uuid = $owner_uuid, name = $name, \
                 group_class = $group_class, is_trashed = false, \
                 trash_at = $trash_at, delete_at = $delete_at \
                 RETURN NONE; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('resource', $uuid);",
            )
            .bind(("uuid", uuid.clone()))
            .bind(("kind", input.kind.class_name().to_string()))
            .bind(("owner_uuid", owner_uuid))
            .bind(("name", input.name))
            .bind((
                "group_class",
                input.group_class.map(|c| c.as_str().to_string()),
            ))
            .bind(("trash_at", input.trash_at))
            .bind(("delete_at", input.delete_at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(query_error)?;

        let rows: Vec<ResourceRow> = result.take(1).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("resource", uuid.clone()))?;
        debug!(uuid = %uuid, kind = %input.kind, "Resource created");
        Ok(row.try_into_resource()?)
    }

    async fn get_resource(&self, uuid: &str) -> WardenResult<Resource> {
        self.fetch_resource(uuid)
            .await?
            .ok_or_else(|| WardenError::not_found("resource", uuid))
    }

    async fn get_resources(&self, uuids: &[String]) -> WardenResult<Vec<Resource>> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM resource \
                 WHERE meta::id(id) IN $uuids",
            )
            .bind(("uuids", uuids.to_vec()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<ResourceRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(ResourceRow::try_into_resource)
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn owner_of(&self, uuid: &str) -> WardenResult<String> {
        Ok(self.get_resource(uuid).await?.owner_uuid)
    }

    async fn children_of(&self, owner_uuid: &str) -> WardenResult<Vec<Resource>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM resource \
                 WHERE owner_uuid = $owner AND meta::id(id) != $owner",
            )
            .bind(("owner", owner_uuid.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<ResourceRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(ResourceRow::try_into_resource)
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn ancestors_of(&self, uuid: &str, max_depth: usize) -> WardenResult<Vec<Resource>> {
        let mut ancestors = Vec::new();
        let mut current = self.get_resource(uuid).await?;

        for _ in 0..max_depth {
            if current.owner_uuid == current.uuid {
                break;
            }
            let Some(owner) = self.fetch_resource(&current.owner_uuid).await? else {
                break;
            };
            ancestors.push(owner.clone());
            current = owner;
        }

        Ok(ancestors)
    }

    async fn all_resource_uuids(&self) -> WardenResult<Vec<String>> {
        let mut result = self
            .db
            .query("SELECT VALUE meta::id(id) FROM resource")
            .await
            .map_err(DbError::from)?;
        let uuids: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(uuids)
    }

    async fn change_owner(&self, uuid: &str, new_owner_uuid: &str) -> WardenResult<Resource> {
        let _ownership = self.locks.ownership().await;
        let _row = self.locks.rows.lock(uuid).await;

        let resource = self.get_resource(uuid).await?;
        if resource.owner_uuid == new_owner_uuid {
            return Ok(resource);
        }
        self.check_owner_chain(uuid, resource.kind, new_owner_uuid)
            .await?;

        // A link's owner is kept on both of its rows.
        let link_update = if resource.kind == ResourceKind::Link {
            "UPDATE type::record('link', $uuid) SET \
             owner_uuid = $owner_uuid, modified_at = time::now();"
        } else {
            ""
        };
        let query = format!(
            "BEGIN TRANSACTION; \
             UPDATE type::record('resource', $uuid) SET \
             owner_uuid = $owner_uuid, modified_at = time::now(); \
             {link_update} \
             COMMIT TRANSACTION;"
        );

        let _write = self.locks.writes.begin();
        self.db
            .query(query)
            .bind(("uuid", uuid.to_string()))
            .bind(("owner_uuid", new_owner_uuid.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(query_error)?;

        let moved = self
            .fetch_resource(uuid)
            .await?
            .ok_or_else(|| DbError::not_found("resource", uuid))?;
        debug!(uuid, from = %resource.owner_uuid, to = new_owner_uuid, "Owner changed");
        Ok(moved)
    }

    async fn update_trash(&self, uuid: &str, update: TrashUpdate) -> WardenResult<Resource> {
        let _row = self.locks.rows.lock(uuid).await;
        // Checked before the write so a rejected update does not bump the
        // revision.
        if self.get_resource(uuid).await?.kind == ResourceKind::Link {
            return Err(WardenError::Validation {
                message: format!("link {uuid} cannot be trashed; delete it instead"),
            });
        }

        let mut sets = Vec::new();
        if update.is_trashed.is_some() {
            sets.push("is_trashed = $is_trashed");
        }
        if update.trash_at.is_some() {
            sets.push("trash_at = $trash_at");
        }
        if update.delete_at.is_some() {
            sets.push("delete_at = $delete_at");
        }
        sets.push("modified_at = time::now()");

        let query = format!(
            "UPDATE type::record('resource', $uuid) SET {} RETURN NONE; \
             SELECT meta::id(id) AS record_id, * FROM type::record('resource', $uuid);",
            sets.join(", ")
        );

        let mut builder = self.db.query(query).bind(("uuid", uuid.to_string()));
        if let Some(is_trashed) = update.is_trashed {
            builder = builder.bind(("is_trashed", is_trashed));
        }
        if let Some(trash_at) = update.trash_at {
            builder = builder.bind(("trash_at", trash_at));
        }
        if let Some(delete_at) = update.delete_at {
            builder = builder.bind(("delete_at", delete_at));
        }

        let _write = self.locks.writes.begin();
        let mut result = builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(query_error)?;

        let rows: Vec<ResourceRow> = result.take(1).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("resource", uuid))?;
        Ok(row.try_into_resource()?)
    }

    async fn create_link(&self, mut input: CreateLink) -> WardenResult<Link> {
        let uuid = ids::assign_uuid_to(&self.cluster, &mut input)
            .ok_or_else(|| WardenError::Internal("link without uuid slot".into()))?;
        if input.link_class.is_empty() || input.name.is_empty() {
            return Err(WardenError::Validation {
                message: "link_class and name are required".into(),
            });
        }
        if !ResourceKind::Link.matches_uuid(&uuid) {
            return Err(WardenError::Validation {
                message: format!("uuid {uuid} is not a link uuid"),
            });
        }

        let _rows = self
            .locks
            .rows
            .lock_all(&[
                uuid.as_str(),
                input.tail_uuid.as_str(),
                input.head_uuid.as_str(),
            ])
            .await;
        if self.fetch_resource(&uuid).await?.is_some() {
            return Err(WardenError::AlreadyExists {
                entity: format!("link {uuid}"),
            });
        }
        self.require_resource(&input.tail_uuid, "tail").await?;
        self.require_resource(&input.head_uuid, "head").await?;
        self.check_owner_chain(&uuid, ResourceKind::Link, &input.owner_uuid)
            .await?;

        let properties = input
            .properties
            .unwrap_or(serde_json::Value::Object(Default::default()));
        let query = format!(
            "BEGIN TRANSACTION; {} COMMIT TRANSACTION;",
            create_link_rows("uuid", "tail", "head", "name")
        );

        let _write = self.locks.writes.begin();
        self.db
            .query(query)
            .bind(("uuid", uuid.clone()))
            .bind(("owner", input.owner_uuid))
            .bind(("tail", input.tail_uuid))
            .bind(("head", input.head_uuid))
            .bind(("class", input.link_class))
            .bind(("name", input.name))
            .bind(("properties", properties))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(query_error)?;

        Ok(self
            .fetch_link(&uuid)
            .await?
            .ok_or_else(|| DbError::not_found("link", uuid))?)
    }

    async fn get_link(&self, uuid: &str) -> WardenResult<Link> {
        self.fetch_link(uuid)
            .await?
            .ok_or_else(|| WardenError::not_found("link", uuid))
    }

    async fn delete_link(&self, uuid: &str) -> WardenResult<()> {
        let _row = self.locks.rows.lock(uuid).await;
        if self.fetch_link(uuid).await?.is_none() {
            return Err(WardenError::not_found("link", uuid));
        }

        let _write = self.locks.writes.begin();
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE type::record('link', $uuid); \
                 DELETE type::record('resource', $uuid); \
                 COMMIT TRANSACTION;",
            )
            .bind(("uuid", uuid.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(query_error)?;

        debug!(uuid, "Link deleted");
        Ok(())
    }

    async fn permission_links_from(&self, uuid: &str) -> WardenResult<Vec<Link>> {
        Ok(self.links_where("tail_uuid", uuid).await?)
    }

    async fn permission_links_to(&self, uuid: &str) -> WardenResult<Vec<Link>> {
        Ok(self.links_where("head_uuid", uuid).await?)
    }

    async fn add_membership(&self, input: CreateMembership) -> WardenResult<Membership> {
        let _rows = self
            .locks
            .rows
            .lock_all(&[input.user_uuid.as_str(), input.group_uuid.as_str()])
            .await;

        let user = self.require_resource(&input.user_uuid, "member").await?;
        let group = self.require_resource(&input.group_uuid, "group").await?;
        if user.kind != ResourceKind::User || group.kind != ResourceKind::Group {
            return Err(WardenError::Validation {
                message: format!(
                    "membership needs a user and a group, got {} and {}",
                    user.kind, group.kind
                ),
            });
        }

        let forward = ids::assign_uuid(&self.cluster, ResourceKind::Link.class_name());
        let reverse = ids::assign_uuid(&self.cluster, ResourceKind::Link.class_name());
        self.check_owner_chain(&forward, ResourceKind::Link, &input.owner_uuid)
            .await?;

        // Any direct permission links between the pair are replaced, so
        // re-adding a membership changes its level instead of stacking.
        let query = format!(
            "BEGIN TRANSACTION; {DELETE_PAIR_LINKS} {} {} COMMIT TRANSACTION;",
            create_link_rows("forward", "user", "group", "level"),
            create_link_rows("reverse", "group", "user", "read"),
        );
        let _write = self.locks.writes.begin();
        self.db
            .query(query)
            .bind(("class", PERMISSION_LINK_CLASS.to_string()))
            .bind(("owner", input.owner_uuid))
            .bind(("user", input.user_uuid.clone()))
            .bind(("group", input.group_uuid.clone()))
            .bind(("forward", forward.clone()))
            .bind(("reverse", reverse.clone()))
            .bind(("level", input.level.link_name().to_string()))
            .bind(("read", PermissionLevel::Read.link_name().to_string()))
            .bind(("properties", serde_json::json!({})))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(query_error)?;

        debug!(
            user = %input.user_uuid,
            group = %input.group_uuid,
            level = %input.level,
            "Membership added"
        );
        Ok(Membership {
            user_uuid: input.user_uuid,
            group_uuid: input.group_uuid,
            level: input.level,
            user_to_group_link_uuid: forward,
            group_to_user_link_uuid: reverse,
        })
    }

    async fn remove_membership(&self, user_uuid: &str, group_uuid: &str) -> WardenResult<()> {
        let _rows = self.locks.rows.lock_all(&[user_uuid, group_uuid]).await;

        let _write = self.locks.writes.begin();
        self.db
            .query(format!(
                "BEGIN TRANSACTION; {DELETE_PAIR_LINKS} COMMIT TRANSACTION;"
            ))
            .bind(("class", PERMISSION_LINK_CLASS.to_string()))
            .bind(("user", user_uuid.to_string()))
            .bind(("group", group_uuid.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(query_error)?;

        debug!(user = user_uuid, group = group_uuid, "Membership removed");
        Ok(())
    }

    fn revision(&self) -> Option<u64> {
        self.locks.writes.revision()
    }
}
