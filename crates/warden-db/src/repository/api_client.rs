//! SurrealDB implementation of [`ApiClientRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use warden_core::error::{WardenError, WardenResult};
use warden_core::ids::{self, ClusterId};
use warden_core::models::api_client::{ApiClient, CreateApiClient};
use warden_core::repository::ApiClientRepository;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct ApiClientRow {
    record_id: String,
    name: String,
    url_prefix: String,
    is_trusted: bool,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<ApiClientRow> for ApiClient {
    fn from(row: ApiClientRow) -> Self {
        ApiClient {
            uuid: row.record_id,
            name: row.name,
            url_prefix: row.url_prefix,
            is_trusted: row.is_trusted,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

#[derive(Clone)]
pub struct SurrealApiClientRepository<C: Connection> {
    db: Surreal<C>,
    cluster: ClusterId,
}

impl<C: Connection> SurrealApiClientRepository<C> {
    pub fn new(db: Surreal<C>, cluster: ClusterId) -> Self {
        Self { db, cluster }
    }
}

impl<C: Connection> ApiClientRepository for SurrealApiClientRepository<C> {
    async fn create(&self, mut input: CreateApiClient) -> WardenResult<ApiClient> {
        let uuid = ids::assign_uuid_to(&self.cluster, &mut input)
            .ok_or_else(|| WardenError::Internal("api client without uuid slot".into()))?;

        let mut result = self
            .db
            .query(
                "CREATE type::record('api_client', $uuid) SET \
                 name = $name, url_prefix = $url_prefix, \
                 is_trusted = $is_trusted RETURN NONE; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('api_client', $uuid);",
            )
            .bind(("uuid", uuid.clone()))
            .bind(("name", input.name))
            .bind(("url_prefix", input.url_prefix))
            .bind(("is_trusted", input.is_trusted))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ApiClientRow> = result.take(1).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(ApiClient::from)
            .ok_or_else(|| WardenError::not_found("api_client", uuid))
    }

    async fn get_by_uuid(&self, uuid: &str) -> WardenResult<ApiClient> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('api_client', $uuid)",
            )
            .bind(("uuid", uuid.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ApiClientRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(ApiClient::from)
            .ok_or_else(|| WardenError::not_found("api_client", uuid))
    }
}
