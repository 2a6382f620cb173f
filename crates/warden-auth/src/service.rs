//! Token service — issuing and revoking API client authorizations.

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use warden_core::error::WardenResult;
use warden_core::models::authorization::{ApiClientAuthorization, CreateAuthorization};
use warden_core::repository::AuthorizationRepository;

use crate::config::AuthConfig;
use crate::token;

/// Input for issuing a token.
#[derive(Debug, Default)]
pub struct IssueToken {
    pub user_uuid: String,
    pub api_client_uuid: Option<String>,
    /// Defaults to the configured scopes.
    pub scopes: Option<Vec<String>>,
    /// Overrides the configured lifetime.
    pub expires_at: Option<DateTime<Utc>>,
    pub default_owner_uuid: Option<String>,
    pub ip_address: Option<String>,
}

/// A freshly issued token. The raw token is only ever available here.
#[derive(Debug)]
pub struct IssuedToken {
    pub authorization: ApiClientAuthorization,
    /// `v2/<uuid>/<secret>`.
    pub token: String,
    /// The bare secret, which also works as a V1 token.
    pub secret: String,
}

/// Generic over the repository so the auth layer has no dependency on the
/// database crate.
pub struct TokenService<A: AuthorizationRepository> {
    authorizations: A,
    config: AuthConfig,
}

impl<A: AuthorizationRepository> TokenService<A> {
    pub fn new(authorizations: A, config: AuthConfig) -> Self {
        Self {
            authorizations,
            config,
        }
    }

    pub async fn issue(&self, input: IssueToken, now: DateTime<Utc>) -> WardenResult<IssuedToken> {
        let secret = token::generate_secret();
        let expires_at = input.expires_at.or_else(|| {
            self.config
                .token_lifetime_secs
                .map(|secs| now + Duration::seconds(secs as i64))
        });

        let authorization = self
            .authorizations
            .create(CreateAuthorization {
                uuid: None,
                user_uuid: input.user_uuid,
                api_client_uuid: input.api_client_uuid,
                token_hash: token::hash_token(&secret),
                scopes: input
                    .scopes
                    .unwrap_or_else(|| self.config.default_scopes.clone()),
                expires_at,
                default_owner_uuid: input.default_owner_uuid,
                created_by_ip_address: input.ip_address,
            })
            .await?;

        info!(
            authorization = %authorization.uuid,
            user = %authorization.user_uuid,
            "Token issued"
        );
        Ok(IssuedToken {
            token: token::format_v2(&authorization.uuid, &secret),
            secret,
            authorization,
        })
    }

    /// Soft-invalidate one token by moving its expiry to `now`.
    pub async fn revoke(&self, authorization_uuid: &str, now: DateTime<Utc>) -> WardenResult<()> {
        self.authorizations.expire(authorization_uuid, now).await?;
        info!(authorization = authorization_uuid, "Token revoked");
        Ok(())
    }

    /// Revoke every still-valid token of a user. Returns how many were
    /// revoked.
    pub async fn revoke_all(&self, user_uuid: &str, now: DateTime<Utc>) -> WardenResult<u64> {
        let count = self
            .authorizations
            .expire_all_for_user(user_uuid, now)
            .await?;
        info!(user = user_uuid, count, "Tokens revoked");
        Ok(count)
    }
}
