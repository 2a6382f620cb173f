//! Identity resolution: presented token to acting user and client.
//!
//! Resolution is done once per request and never cached across requests;
//! authorizations may expire or be revoked between two calls.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use warden_core::error::WardenError;
use warden_core::ids;
use warden_core::models::authorization::{ApiClientAuthorization, SCOPE_ALL};
use warden_core::repository::{ApiClientRepository, AuthorizationRepository, UserRepository};
use warden_core::{Identity, RequestContext};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::token::{self, TokenFormat, TokenSources};

/// Resolves bearer tokens against the identity repositories.
///
/// The authorization repository is cloned into a background task for the
/// usage bookkeeping write, hence the `Clone + 'static` bound.
pub struct IdentityResolver<U, C, A>
where
    U: UserRepository,
    C: ApiClientRepository,
    A: AuthorizationRepository + Clone + 'static,
{
    users: U,
    clients: C,
    authorizations: A,
    config: AuthConfig,
}

impl<U, C, A> IdentityResolver<U, C, A>
where
    U: UserRepository,
    C: ApiClientRepository,
    A: AuthorizationRepository + Clone + 'static,
{
    pub fn new(users: U, clients: C, authorizations: A, config: AuthConfig) -> Self {
        Self {
            users,
            clients,
            authorizations,
            config,
        }
    }

    /// Resolve `token` as of `now`.
    ///
    /// Unknown, malformed, expired and orphaned tokens all yield
    /// [`AuthError::Unauthenticated`]. Only a failing backend yields
    /// [`AuthError::Backend`].
    pub async fn resolve(
        &self,
        token: &str,
        now: DateTime<Utc>,
        remote_addr: Option<&str>,
    ) -> Result<Identity, AuthError> {
        if self
            .config
            .system_root_token
            .as_deref()
            .is_some_and(|root| token::secrets_match(token, root))
        {
            return self.system_identity(token).await;
        }

        let Some(format) = TokenFormat::parse(token) else {
            debug!("Rejected malformed token");
            return Err(AuthError::Unauthenticated);
        };

        let authorization = self.lookup(format).await?;
        if !authorization.is_valid_at(now) {
            debug!(authorization = %authorization.uuid, "Rejected expired token");
            return Err(AuthError::Unauthenticated);
        }

        let user = self
            .users
            .get_by_uuid(&authorization.user_uuid)
            .await
            .map_err(|e| {
                if matches!(e, WardenError::NotFound { .. }) {
                    debug!(authorization = %authorization.uuid, "Rejected orphaned token");
                }
                AuthError::from_lookup(e)
            })?;

        let api_client = match authorization.api_client_uuid.as_deref() {
            Some(uuid) => match self.clients.get_by_uuid(uuid).await {
                Ok(client) => Some(client),
                Err(WardenError::NotFound { .. }) => None,
                Err(e) => return Err(AuthError::Backend(e)),
            },
            None => None,
        };
        let trusted = api_client.as_ref().is_some_and(|c| c.is_trusted);

        if self.config.record_usage {
            self.record_usage(&authorization.uuid, now, remote_addr);
        }

        Ok(Identity {
            user,
            api_client,
            authorization,
            trusted,
        })
    }

    /// Build the per-request context from whatever token the request
    /// carries. Missing or invalid tokens give an anonymous context; only
    /// backend failures are returned as errors.
    pub async fn resolve_context(
        &self,
        sources: TokenSources<'_>,
        now: DateTime<Utc>,
        remote_addr: Option<&str>,
    ) -> Result<RequestContext, AuthError> {
        let owned_addr = remote_addr.map(str::to_string);
        let Some(token) = token::extract_token(sources) else {
            return Ok(RequestContext::anonymous(owned_addr, now));
        };

        match self.resolve(token, now, remote_addr).await {
            Ok(identity) => Ok(RequestContext::authenticated(identity, owned_addr, now)),
            Err(AuthError::Unauthenticated) => Ok(RequestContext::anonymous(owned_addr, now)),
            Err(e) => Err(e),
        }
    }

    async fn lookup(&self, format: TokenFormat<'_>) -> Result<ApiClientAuthorization, AuthError> {
        let hash = token::hash_token(format.secret());
        match format {
            TokenFormat::V1 { .. } => self
                .authorizations
                .get_by_token_hash(&hash)
                .await
                .map_err(AuthError::from_lookup),
            TokenFormat::V2 {
                authorization_uuid, ..
            } => {
                let authorization = self
                    .authorizations
                    .get_by_uuid(authorization_uuid)
                    .await
                    .map_err(AuthError::from_lookup)?;
                if !token::digests_match(&authorization.token_hash, &hash) {
                    debug!(authorization = authorization_uuid, "Rejected token secret mismatch");
                    return Err(AuthError::Unauthenticated);
                }
                Ok(authorization)
            }
        }
    }

    async fn system_identity(&self, token: &str) -> Result<Identity, AuthError> {
        let cluster = &self.config.cluster;
        let user = self
            .users
            .get_by_uuid(&ids::system_user_uuid(cluster))
            .await
            .map_err(AuthError::from_lookup)?;

        Ok(Identity {
            authorization: ApiClientAuthorization {
                uuid: ids::well_known_uuid(cluster, "ApiClientAuthorization"),
                user_uuid: user.uuid.clone(),
                api_client_uuid: None,
                token_hash: token::hash_token(token),
                scopes: vec![SCOPE_ALL.into()],
                expires_at: None,
                default_owner_uuid: None,
                created_by_ip_address: None,
                last_used_at: None,
                last_used_by_ip_address: None,
                created_at: user.created_at,
            },
            user,
            api_client: None,
            trusted: true,
        })
    }

    /// Best-effort `last_used_at` update off the request path.
    fn record_usage(&self, authorization_uuid: &str, now: DateTime<Utc>, remote_addr: Option<&str>) {
        let authorizations = self.authorizations.clone();
        let uuid = authorization_uuid.to_string();
        let ip = remote_addr.map(str::to_string);
        tokio::spawn(async move {
            if let Err(e) = authorizations.touch(&uuid, now, ip).await {
                warn!(authorization = %uuid, error = %e, "Failed to record token usage");
            }
        });
    }
}
