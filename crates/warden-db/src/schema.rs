//! Schema definitions and migration runner for SurrealDB.
//!
//! Record ids are the Arvados-style UUID strings, so `meta::id(id)` yields
//! the UUID directly. Enums are stored as strings with ASSERT constraints.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "ownership_graph",
    sql: SCHEMA_V1,
}];

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Resources: every ownable object, users and links included. owner_uuid
-- is the ownership edge.
-- =======================================================================
DEFINE TABLE resource SCHEMAFULL;
DEFINE FIELD kind ON TABLE resource TYPE string \
    ASSERT $value IN ['User', 'Group', 'Collection', 'ContainerRequest', \
    'Container', 'Workflow', 'Link'];
DEFINE FIELD owner_uuid ON TABLE resource TYPE string;
DEFINE FIELD name ON TABLE resource TYPE string;
DEFINE FIELD group_class ON TABLE resource TYPE option<string> \
    ASSERT $value = NONE OR $value IN ['project', 'role', 'filter'];
DEFINE FIELD is_trashed ON TABLE resource TYPE bool DEFAULT false;
DEFINE FIELD trash_at ON TABLE resource TYPE option<datetime>;
DEFINE FIELD delete_at ON TABLE resource TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE resource TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD modified_at ON TABLE resource TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_resource_owner ON TABLE resource COLUMNS owner_uuid;

-- =======================================================================
-- Links: tail -> head edges with a class and a name. Each link also has
-- a resource row of kind Link holding its ownership edge.
-- =======================================================================
DEFINE TABLE link SCHEMAFULL;
DEFINE FIELD owner_uuid ON TABLE link TYPE string;
DEFINE FIELD tail_uuid ON TABLE link TYPE string;
DEFINE FIELD head_uuid ON TABLE link TYPE string;
DEFINE FIELD link_class ON TABLE link TYPE string;
DEFINE FIELD name ON TABLE link TYPE string;
DEFINE FIELD properties ON TABLE link TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD created_at ON TABLE link TYPE datetime DEFAULT time::now();
DEFINE FIELD modified_at ON TABLE link TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_link_tail ON TABLE link COLUMNS tail_uuid, link_class;
DEFINE INDEX idx_link_head ON TABLE link COLUMNS head_uuid, link_class;

-- =======================================================================
-- Users: user-specific attributes; ownership lives in resource
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD email ON TABLE user TYPE string;
DEFINE FIELD username ON TABLE user TYPE option<string>;
DEFINE FIELD is_active ON TABLE user TYPE bool DEFAULT true;
DEFINE FIELD is_admin ON TABLE user TYPE bool DEFAULT false;
DEFINE FIELD default_owner_uuid ON TABLE user TYPE option<string>;
DEFINE FIELD created_at ON TABLE user TYPE datetime DEFAULT time::now();
DEFINE FIELD modified_at ON TABLE user TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_user_email ON TABLE user COLUMNS email UNIQUE;

-- =======================================================================
-- API clients
-- =======================================================================
DEFINE TABLE api_client SCHEMAFULL;
DEFINE FIELD name ON TABLE api_client TYPE string;
DEFINE FIELD url_prefix ON TABLE api_client TYPE string;
DEFINE FIELD is_trusted ON TABLE api_client TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE api_client TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD modified_at ON TABLE api_client TYPE datetime \
    DEFAULT time::now();

-- =======================================================================
-- API client authorizations (tokens). Only the SHA-256 digest of the
-- secret is stored.
-- =======================================================================
DEFINE TABLE api_client_authorization SCHEMAFULL;
DEFINE FIELD user_uuid ON TABLE api_client_authorization TYPE string;
DEFINE FIELD api_client_uuid ON TABLE api_client_authorization \
    TYPE option<string>;
DEFINE FIELD token_hash ON TABLE api_client_authorization TYPE string;
DEFINE FIELD scopes ON TABLE api_client_authorization TYPE array<string> \
    DEFAULT ['all'];
DEFINE FIELD expires_at ON TABLE api_client_authorization \
    TYPE option<datetime>;
DEFINE FIELD default_owner_uuid ON TABLE api_client_authorization \
    TYPE option<string>;
DEFINE FIELD created_by_ip_address ON TABLE api_client_authorization \
    TYPE option<string>;
DEFINE FIELD last_used_at ON TABLE api_client_authorization \
    TYPE option<datetime>;
DEFINE FIELD last_used_by_ip_address ON TABLE api_client_authorization \
    TYPE option<string>;
DEFINE FIELD created_at ON TABLE api_client_authorization TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_authorization_token_hash ON TABLE api_client_authorization \
    COLUMNS token_hash UNIQUE;
DEFINE INDEX idx_authorization_user ON TABLE api_client_authorization \
    COLUMNS user_uuid;
";

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "Migration v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

        info!(version = migration.version, "Migration applied");
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
