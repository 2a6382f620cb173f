//! SurrealDB connection management.

use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::{info, warn};

use crate::error::DbError;
use crate::schema::run_migrations;

/// Where the graph store lives and how hard to try reaching it at startup.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// WebSocket address (e.g., `127.0.0.1:8000`).
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials.
    pub username: String,
    pub password: String,
    /// Connection attempts before giving up; at least one is always made.
    pub connect_attempts: u32,
    /// Pause between attempts, doubled after each failure.
    pub retry_delay: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "warden".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
            connect_attempts: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Owns the connection shared by every repository and the graph store.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Sign in as root and select the configured namespace and database,
    /// retrying with backoff while the server is unreachable.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let attempts = config.connect_attempts.max(1);
        let mut delay = config.retry_delay;
        let mut attempt = 1;
        loop {
            match Self::open(config).await {
                Ok(db) => {
                    info!(attempt, "Connected to SurrealDB");
                    return Ok(Self { db });
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "SurrealDB unreachable"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn open(config: &DbConfig) -> Result<Surreal<Client>, surrealdb::Error> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to SurrealDB"
        );
        let db = Surreal::new::<Ws>(&config.url).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;
        Ok(db)
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), DbError> {
        run_migrations(&self.db).await
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}
