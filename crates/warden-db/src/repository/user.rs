//! SurrealDB implementation of [`UserRepository`].
//!
//! A user is two rows: the `user` row with the account attributes and a
//! `resource` row of kind `User` carrying its ownership edge. Both are
//! written in one transaction through the graph store's locks, so the
//! graph never sees a user without an owner.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use warden_core::error::{WardenError, WardenResult};
use warden_core::ids;
use warden_core::models::resource::ResourceKind;
use warden_core::models::user::{CreateUser, UpdateUser, User};
use warden_core::repository::UserRepository;

use super::graph::SurrealGraphStore;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct UserRow {
    record_id: String,
    email: String,
    username: Option<String>,
    is_active: bool,
    is_admin: bool,
    default_owner_uuid: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            uuid: row.record_id,
            email: row.email,
            username: row.username,
            is_active: row.is_active,
            is_admin: row.is_admin,
            default_owner_uuid: row.default_owner_uuid,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

/// SurrealDB implementation of the User repository.
#[derive(Clone)]
pub struct SurrealUserRepository<C: Connection> {
    db: Surreal<C>,
    graph: SurrealGraphStore<C>,
}

impl<C: Connection> SurrealUserRepository<C> {
    /// Users share the graph store's locks and revision counter.
    pub fn new(graph: SurrealGraphStore<C>) -> Self {
        Self {
            db: graph.db().clone(),
            graph,
        }
    }

    /// Create the self-owned system user if it does not exist yet.
    pub async fn ensure_system_user(&self) -> WardenResult<User> {
        let uuid = ids::system_user_uuid(self.graph.cluster());
        match self.get_by_uuid(&uuid).await {
            Ok(user) => return Ok(user),
            Err(WardenError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        info!(uuid = %uuid, "Bootstrapping system user");
        self.create(CreateUser {
            uuid: Some(uuid.clone()),
            owner_uuid: Some(uuid),
            email: format!("root@{}", self.graph.cluster()),
            username: Some("root".into()),
            is_active: true,
            is_admin: true,
            default_owner_uuid: None,
        })
        .await
    }

    async fn fetch(&self, clause: &str, key: &'static str, value: &str) -> WardenResult<User> {
        let query = format!("SELECT meta::id(id) AS record_id, * FROM {clause}");
        let mut result = self
            .db
            .query(query)
            .bind((key, value.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(User::from)
            .ok_or_else(|| WardenError::not_found("user", value))
    }
}

impl<C: Connection> UserRepository for SurrealUserRepository<C> {
    async fn create(&self, mut input: CreateUser) -> WardenResult<User> {
        let cluster = self.graph.cluster().clone();
        let uuid = ids::assign_uuid_to(&cluster, &mut input)
            .ok_or_else(|| WardenError::Internal("user without uuid slot".into()))?;
        if !ids::is_valid_uuid(&uuid) {
            return Err(WardenError::Validation {
                message: format!("malformed uuid {uuid}"),
            });
        }
        let owner_uuid = input
            .owner_uuid
            .clone()
            .unwrap_or_else(|| ids::system_user_uuid(&cluster));

        let locks = self.graph.locks();
        let _row = locks.rows.lock(&uuid).await;
        if self.graph.fetch_resource(&uuid).await?.is_some() {
            return Err(WardenError::AlreadyExists {
                entity: format!("user {uuid}"),
            });
        }
        self.graph
            .check_owner_chain(&uuid, ResourceKind::User, &owner_uuid)
            .await?;

        let name = input.username.clone().unwrap_or_else(|| input.email.clone());

        let _write = locks.writes.begin();
        let mut result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE type::record('resource', $uuid) SET \
                   kind = 'User', owner_uuid = $owner_uuid, name = $name, \
                   is_trashed = false RETURN NONE; \
                 CREATE type::record('user', $uuid) SET \
                   email = $email, username = $username, \
                   is_active = $is_active, is_admin = $is_admin, \
                   default_owner_uuid = $default_owner_uuid RETURN NONE; \
                 COMMIT TRANSACTION; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('user', $uuid);",
            )
            .bind(("uuid", uuid.clone()))
            .bind(("owner_uuid", owner_uuid))
            .bind(("name", name))
            .bind(("email", input.email))
            .bind(("username", input.username))
            .bind(("is_active", input.is_active))
            .bind(("is_admin", input.is_admin))
            .bind(("default_owner_uuid", input.default_owner_uuid))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let last = result.num_statements() - 1;
        let rows: Vec<UserRow> = result.take(last).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(User::from)
            .ok_or_else(|| WardenError::not_found("user", uuid))
    }

    async fn get_by_uuid(&self, uuid: &str) -> WardenResult<User> {
        self.fetch("type::record('user', $uuid)", "uuid", uuid).await
    }

    async fn get_by_email(&self, email: &str) -> WardenResult<User> {
        self.fetch("user WHERE email = $email", "email", email).await
    }

    async fn update(&self, uuid: &str, input: UpdateUser) -> WardenResult<User> {
        let _row = self.graph.locks().rows.lock(uuid).await;
        self.get_by_uuid(uuid).await?;

        let mut sets = Vec::new();
        if input.email.is_some() {
            sets.push("email = $email");
        }
        if input.username.is_some() {
            sets.push("username = $username");
        }
        if input.is_active.is_some() {
            sets.push("is_active = $is_active");
        }
        if input.is_admin.is_some() {
            sets.push("is_admin = $is_admin");
        }
        if input.default_owner_uuid.is_some() {
            sets.push("default_owner_uuid = $default_owner_uuid");
        }
        sets.push("modified_at = time::now()");

        let query = format!(
            "UPDATE type::record('user', $uuid) SET {} RETURN NONE; \
             SELECT meta::id(id) AS record_id, * FROM type::record('user', $uuid);",
            sets.join(", ")
        );

        let mut builder = self.db.query(query).bind(("uuid", uuid.to_string()));
        if let Some(email) = input.email {
            builder = builder.bind(("email", email));
        }
        if let Some(username) = input.username {
            builder = builder.bind(("username", username));
        }
        if let Some(is_active) = input.is_active {
            builder = builder.bind(("is_active", is_active));
        }
        if let Some(is_admin) = input.is_admin {
            builder = builder.bind(("is_admin", is_admin));
        }
        if let Some(default_owner_uuid) = input.default_owner_uuid {
            // Some(None) clears the field.
            builder = builder.bind(("default_owner_uuid", default_owner_uuid));
        }

        let mut result = builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<UserRow> = result.take(1).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(User::from)
            .ok_or_else(|| WardenError::not_found("user", uuid))
    }
}
