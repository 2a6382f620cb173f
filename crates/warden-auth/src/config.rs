//! Identity configuration.

use warden_core::ClusterId;
use warden_core::models::authorization::SCOPE_ALL;

/// Configuration for token issuing and identity resolution.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Prefix of every UUID minted by this cluster.
    pub cluster: ClusterId,
    /// Token that resolves to the system user without a database lookup of
    /// the authorization. `None` disables it.
    pub system_root_token: Option<String>,
    /// Scopes given to tokens issued without explicit scopes.
    pub default_scopes: Vec<String>,
    /// Lifetime of issued tokens in seconds. `None` issues tokens that
    /// never expire.
    pub token_lifetime_secs: Option<u64>,
    /// Record `last_used_at` and the client address on every resolution.
    pub record_usage: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterId::default(),
            system_root_token: None,
            default_scopes: vec![SCOPE_ALL.into()],
            token_lifetime_secs: None,
            record_usage: true,
        }
    }
}
