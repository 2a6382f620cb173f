//! Warden Server — connects to SurrealDB, applies migrations, bootstraps
//! the system user and holds the identity and access services.

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden_access::{AccessConfig, AccessEngine};
use warden_auth::{AuthConfig, IdentityResolver};
use warden_core::{ClusterId, WardenError};
use warden_db::repository::{
    SurrealApiClientRepository, SurrealAuthorizationRepository, SurrealGraphStore,
    SurrealUserRepository,
};
use warden_db::{DbConfig, DbError, DbManager};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Ownership and permission service")]
struct Args {
    /// SurrealDB WebSocket address.
    #[arg(long, env = "WARDEN_DB_URL", default_value = "127.0.0.1:8000")]
    db_url: String,
    #[arg(long, env = "WARDEN_DB_NAMESPACE", default_value = "warden")]
    db_namespace: String,
    #[arg(long, env = "WARDEN_DB_DATABASE", default_value = "main")]
    db_database: String,
    #[arg(long, env = "WARDEN_DB_USERNAME", default_value = "root")]
    db_username: String,
    #[arg(long, env = "WARDEN_DB_PASSWORD", default_value = "root", hide_env_values = true)]
    db_password: String,
    #[arg(long, env = "WARDEN_DB_CONNECT_ATTEMPTS", default_value_t = 5)]
    db_connect_attempts: u32,
    #[arg(long, env = "WARDEN_DB_RETRY_MS", default_value_t = 500)]
    db_retry_ms: u64,

    /// Five-character prefix of every UUID this cluster mints.
    #[arg(long, env = "WARDEN_CLUSTER", default_value = "zzzzz")]
    cluster: String,
    /// Token that acts as the system user. Unset disables it.
    #[arg(long, env = "WARDEN_SYSTEM_ROOT_TOKEN", hide_env_values = true)]
    system_root_token: Option<String>,
    /// Lifetime of issued tokens; tokens never expire when unset.
    #[arg(long, env = "WARDEN_TOKEN_LIFETIME_SECS")]
    token_lifetime_secs: Option<u64>,
    /// Skip `last_used_at` bookkeeping on token resolution.
    #[arg(long, env = "WARDEN_NO_USAGE_TRACKING")]
    no_usage_tracking: bool,

    /// Node expansions allowed per reachability traversal.
    #[arg(long, env = "WARDEN_MAX_NODES", default_value_t = 100_000)]
    max_nodes: usize,
    #[arg(long, env = "WARDEN_TRAVERSAL_TIMEOUT_MS", default_value_t = 5_000)]
    traversal_timeout_ms: u64,
    #[arg(long, env = "WARDEN_SNAPSHOT_RETRIES", default_value_t = 3)]
    snapshot_retries: u32,
    #[arg(long, env = "WARDEN_CACHE_CAPACITY", default_value_t = 10_000)]
    cache_capacity: usize,
    #[arg(long, env = "WARDEN_NO_CACHE")]
    no_cache: bool,

    /// How often unused row-lock entries are dropped.
    #[arg(long, env = "WARDEN_LOCK_PRUNE_SECS", default_value_t = 60)]
    lock_prune_secs: u64,
}

impl Args {
    fn db_config(&self) -> DbConfig {
        DbConfig {
            url: self.db_url.clone(),
            namespace: self.db_namespace.clone(),
            database: self.db_database.clone(),
            username: self.db_username.clone(),
            password: self.db_password.clone(),
            connect_attempts: self.db_connect_attempts,
            retry_delay: Duration::from_millis(self.db_retry_ms),
        }
    }

    fn auth_config(&self, cluster: ClusterId) -> AuthConfig {
        AuthConfig {
            cluster,
            system_root_token: self.system_root_token.clone(),
            token_lifetime_secs: self.token_lifetime_secs,
            record_usage: !self.no_usage_tracking,
            ..AuthConfig::default()
        }
    }

    fn access_config(&self) -> AccessConfig {
        AccessConfig {
            max_nodes: self.max_nodes,
            timeout: Duration::from_millis(self.traversal_timeout_ms),
            snapshot_retries: self.snapshot_retries,
            cache_enabled: !self.no_cache,
            cache_capacity: self.cache_capacity,
            ..AccessConfig::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error("database: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Warden(#[from] WardenError),
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    if let Err(e) = run(Args::parse()).await {
        error!(error = %e, "Warden server failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    info!("Starting Warden server...");

    let cluster = ClusterId::new(args.cluster.clone())?;
    let manager = DbManager::connect(&args.db_config()).await?;
    manager.migrate().await?;

    let db = manager.client().clone();
    let graph = SurrealGraphStore::new(db.clone(), cluster.clone());
    let users = SurrealUserRepository::new(graph.clone());
    let root = users.ensure_system_user().await?;
    info!(uuid = %root.uuid, "System user ready");

    let auth_config = args.auth_config(cluster.clone());
    let _resolver = IdentityResolver::new(
        users.clone(),
        SurrealApiClientRepository::new(db.clone(), cluster.clone()),
        SurrealAuthorizationRepository::new(db, cluster),
        auth_config,
    );
    let access_config = args.access_config();
    info!(
        max_nodes = access_config.max_nodes,
        timeout_ms = access_config.timeout.as_millis() as u64,
        cache = access_config.cache_enabled,
        "Access engine configured"
    );
    let _engine = AccessEngine::new(graph.clone(), users, access_config);

    let prune_every = Duration::from_secs(args.lock_prune_secs.max(1));
    let pruner = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_every);
        loop {
            ticker.tick().await;
            graph.prune_locks();
        }
    });

    info!("Warden server ready");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    pruner.abort();

    info!("Warden server stopped.");
    Ok(())
}
