//! API client domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AssignUuid;

/// An application acting on a user's behalf. Trusted clients act with the
/// user's full authority; untrusted ones are limited by token scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiClient {
    pub uuid: String,
    pub name: String,
    pub url_prefix: String,
    pub is_trusted: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiClient {
    pub uuid: Option<String>,
    pub name: String,
    pub url_prefix: String,
    pub is_trusted: bool,
}

impl AssignUuid for CreateApiClient {
    fn uuid_target(&mut self) -> Option<(&'static str, &mut Option<String>)> {
        Some(("ApiClient", &mut self.uuid))
    }
}
