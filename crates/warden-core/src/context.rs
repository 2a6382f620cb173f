//! Request-scoped identity context.
//!
//! The resolved identity is an immutable value created once per request and
//! passed explicitly to everything that needs it. Nothing here is global.

use chrono::{DateTime, Utc};

use crate::models::api_client::ApiClient;
use crate::models::authorization::ApiClientAuthorization;
use crate::models::user::User;

/// Who is making a request and through which client.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user: User,
    pub api_client: Option<ApiClient>,
    pub authorization: ApiClientAuthorization,
    /// Whether the client may act with the user's full authority.
    pub trusted: bool,
}

impl Identity {
    pub fn user_uuid(&self) -> &str {
        &self.user.uuid
    }

    /// Whether this identity may make a `method path` request. Trusted
    /// clients may make any; everyone else is held to the token's scopes.
    pub fn allows(&self, method: &str, path: &str) -> bool {
        self.trusted || self.authorization.scopes_allow(method, path)
    }
}

/// Everything a handler knows about the request it is serving.
#[derive(Debug, Clone)]
pub struct RequestContext {
    identity: Option<Identity>,
    remote_addr: Option<String>,
    received_at: DateTime<Utc>,
    include_trash: bool,
}

impl RequestContext {
    pub fn authenticated(
        identity: Identity,
        remote_addr: Option<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: Some(identity),
            remote_addr,
            received_at,
            include_trash: false,
        }
    }

    pub fn anonymous(remote_addr: Option<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            identity: None,
            remote_addr,
            received_at,
            include_trash: false,
        }
    }

    /// Same request, but trashed objects stay visible.
    pub fn with_include_trash(mut self, include_trash: bool) -> Self {
        self.include_trash = include_trash;
        self
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn user_uuid(&self) -> Option<&str> {
        self.identity.as_ref().map(Identity::user_uuid)
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn include_trash(&self) -> bool {
        self.include_trash
    }

    pub fn is_anonymous(&self) -> bool {
        self.identity.is_none()
    }
}
