//! SurrealDB implementation of [`AuthorizationRepository`].
//!
//! Authorizations are never deleted. Revocation and expiry both work by
//! moving `expires_at`, which the identity resolver checks on every use.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use warden_core::error::{WardenError, WardenResult};
use warden_core::ids::{self, ClusterId};
use warden_core::models::authorization::{ApiClientAuthorization, CreateAuthorization};
use warden_core::repository::AuthorizationRepository;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct AuthorizationRow {
    record_id: String,
    user_uuid: String,
    api_client_uuid: Option<String>,
    token_hash: String,
    scopes: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
    default_owner_uuid: Option<String>,
    created_by_ip_address: Option<String>,
    last_used_at: Option<DateTime<Utc>>,
    last_used_by_ip_address: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuthorizationRow> for ApiClientAuthorization {
    fn from(row: AuthorizationRow) -> Self {
        ApiClientAuthorization {
            uuid: row.record_id,
            user_uuid: row.user_uuid,
            api_client_uuid: row.api_client_uuid,
            token_hash: row.token_hash,
            scopes: row.scopes,
            expires_at: row.expires_at,
            default_owner_uuid: row.default_owner_uuid,
            created_by_ip_address: row.created_by_ip_address,
            last_used_at: row.last_used_at,
            last_used_by_ip_address: row.last_used_by_ip_address,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

#[derive(Clone)]
pub struct SurrealAuthorizationRepository<C: Connection> {
    db: Surreal<C>,
    cluster: ClusterId,
}

impl<C: Connection> SurrealAuthorizationRepository<C> {
    pub fn new(db: Surreal<C>, cluster: ClusterId) -> Self {
        Self { db, cluster }
    }

    async fn fetch_one(
        &self,
        clause: &str,
        key: &'static str,
        value: &str,
        label: &str,
    ) -> WardenResult<ApiClientAuthorization> {
        let query = format!("SELECT meta::id(id) AS record_id, * FROM {clause}");
        let mut result = self
            .db
            .query(query)
            .bind((key, value.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<AuthorizationRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(ApiClientAuthorization::from)
            .ok_or_else(|| WardenError::not_found("api_client_authorization", label))
    }
}

impl<C: Connection> AuthorizationRepository for SurrealAuthorizationRepository<C> {
    async fn create(&self, mut input: CreateAuthorization) -> WardenResult<ApiClientAuthorization> {
        let uuid = ids::assign_uuid_to(&self.cluster, &mut input)
            .ok_or_else(|| WardenError::Internal("authorization without uuid slot".into()))?;

        let mut result = self
            .db
            .query(
                "CREATE type::record('api_client_authorization', $uuid) SET \
                 user_uuid = $user_uuid, api_client_uuid = $api_client_uuid, \
                 token_hash = $token_hash, scopes = $scopes, \
                 expires_at = $expires_at, \
                 default_owner_uuid = $default_owner_uuid, \
                 created_by_ip_address = $created_by_ip_address \
                 RETURN NONE; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('api_client_authorization', $uuid);",
            )
            .bind(("uuid", uuid.clone()))
            .bind(("user_uuid", input.user_uuid))
            .bind(("api_client_uuid", input.api_client_uuid))
            .bind(("token_hash", input.token_hash))
            .bind(("scopes", input.scopes))
            .bind(("expires_at", input.expires_at))
            .bind(("default_owner_uuid", input.default_owner_uuid))
            .bind(("created_by_ip_address", input.created_by_ip_address))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<AuthorizationRow> = result.take(1).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(ApiClientAuthorization::from)
            .ok_or_else(|| WardenError::not_found("api_client_authorization", uuid))
    }

    async fn get_by_uuid(&self, uuid: &str) -> WardenResult<ApiClientAuthorization> {
        self.fetch_one(
            "type::record('api_client_authorization', $uuid)",
            "uuid",
            uuid,
            uuid,
        )
        .await
    }

    async fn get_by_token_hash(&self, token_hash: &str) -> WardenResult<ApiClientAuthorization> {
        // The hash never appears in error messages.
        self.fetch_one(
            "api_client_authorization WHERE token_hash = $token_hash",
            "token_hash",
            token_hash,
            "<token>",
        )
        .await
    }

    async fn touch(
        &self,
        uuid: &str,
        at: DateTime<Utc>,
        ip_address: Option<String>,
    ) -> WardenResult<()> {
        self.db
            .query(
                "UPDATE type::record('api_client_authorization', $uuid) SET \
                 last_used_at = $at, last_used_by_ip_address = $ip \
                 RETURN NONE",
            )
            .bind(("uuid", uuid.to_string()))
            .bind(("at", at))
            .bind(("ip", ip_address))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    async fn expire(&self, uuid: &str, at: DateTime<Utc>) -> WardenResult<()> {
        let current = self.get_by_uuid(uuid).await?;
        if !current.is_valid_at(at) {
            return Ok(());
        }

        self.db
            .query(
                "UPDATE type::record('api_client_authorization', $uuid) SET \
                 expires_at = $at RETURN NONE",
            )
            .bind(("uuid", uuid.to_string()))
            .bind(("at", at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    async fn expire_all_for_user(&self, user_uuid: &str, at: DateTime<Utc>) -> WardenResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM api_client_authorization \
                 WHERE user_uuid = $user_uuid AND \
                   (expires_at = NONE OR expires_at > $at) GROUP ALL; \
                 UPDATE api_client_authorization SET expires_at = $at \
                 WHERE user_uuid = $user_uuid AND \
                   (expires_at = NONE OR expires_at > $at) RETURN NONE;",
            )
            .bind(("user_uuid", user_uuid.to_string()))
            .bind(("at", at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(count_rows.first().map(|r| r.total).unwrap_or(0))
    }
}
