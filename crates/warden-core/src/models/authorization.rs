//! API client authorization (token) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AssignUuid;

/// Scope that allows every request.
pub const SCOPE_ALL: &str = "all";

/// A credential binding a user to an API client.
///
/// Only a SHA-256 digest of the secret is stored. Authorizations are never
/// deleted on expiry; the expiry check invalidates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiClientAuthorization {
    pub uuid: String,
    pub user_uuid: String,
    pub api_client_uuid: Option<String>,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub default_owner_uuid: Option<String>,
    pub created_by_ip_address: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_by_ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiClientAuthorization {
    /// Valid iff there is no expiry or the expiry is after `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }

    /// Whether the token's scopes permit `method path`.
    ///
    /// A scope matches when it is `all`, equals the request string, or ends
    /// in `/` and prefixes it. `HEAD` requests also match `GET` scopes.
    pub fn scopes_allow(&self, method: &str, path: &str) -> bool {
        if method.eq_ignore_ascii_case("HEAD") {
            return self.scope_matches(&format!("HEAD {path}"))
                || self.scope_matches(&format!("GET {path}"));
        }
        self.scope_matches(&format!("{} {path}", method.to_ascii_uppercase()))
    }

    fn scope_matches(&self, request: &str) -> bool {
        self.scopes.iter().any(|scope| {
            scope == SCOPE_ALL
                || scope == request
                || (scope.ends_with('/') && request.starts_with(scope.as_str()))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuthorization {
    pub uuid: Option<String>,
    pub user_uuid: String,
    pub api_client_uuid: Option<String>,
    pub token_hash: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub default_owner_uuid: Option<String>,
    pub created_by_ip_address: Option<String>,
}

impl AssignUuid for CreateAuthorization {
    fn uuid_target(&mut self) -> Option<(&'static str, &mut Option<String>)> {
        Some(("ApiClientAuthorization", &mut self.uuid))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn authorization(scopes: &[&str]) -> ApiClientAuthorization {
        ApiClientAuthorization {
            uuid: "zzzzz-gj3su-000000000000001".into(),
            user_uuid: "zzzzz-tpzed-000000000000001".into(),
            api_client_uuid: None,
            token_hash: String::new(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            expires_at: None,
            default_owner_uuid: None,
            created_by_ip_address: None,
            last_used_at: None,
            last_used_by_ip_address: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn expiry_is_exclusive() {
        let expiry = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut auth = authorization(&["all"]);
        assert!(auth.is_valid_at(expiry));

        auth.expires_at = Some(expiry);
        assert!(auth.is_valid_at(expiry - Duration::seconds(1)));
        assert!(!auth.is_valid_at(expiry));
        assert!(!auth.is_valid_at(expiry + Duration::days(1)));
    }

    #[test]
    fn all_scope_allows_everything() {
        let auth = authorization(&["all"]);
        assert!(auth.scopes_allow("POST", "/arvados/v1/links"));
    }

    #[test]
    fn exact_and_prefix_scopes() {
        let auth = authorization(&[
            "GET /arvados/v1/users/current",
            "GET /arvados/v1/collections/",
        ]);
        assert!(auth.scopes_allow("GET", "/arvados/v1/users/current"));
        assert!(auth.scopes_allow("get", "/arvados/v1/collections/zzzzz-4zz18-000000000000001"));
        assert!(!auth.scopes_allow("POST", "/arvados/v1/collections/x"));
        assert!(!auth.scopes_allow("GET", "/arvados/v1/users"));
    }

    #[test]
    fn head_falls_back_to_get() {
        let auth = authorization(&["GET /arvados/v1/collections/"]);
        assert!(auth.scopes_allow("HEAD", "/arvados/v1/collections/x"));
    }

    #[test]
    fn token_hash_is_not_serialized() {
        let mut auth = authorization(&["all"]);
        auth.token_hash = "secret-digest".into();
        let json = serde_json::to_string(&auth).unwrap();
        assert!(!json.contains("secret-digest"));
    }
}
