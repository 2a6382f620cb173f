//! User domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AssignUuid;

/// A user. Users are never deleted, only deactivated. Their ownership edge
/// lives with the rest of the ownership graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uuid: String,
    pub email: String,
    pub username: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub default_owner_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    /// Preassigned UUID (federated or well-known users); minted when absent.
    pub uuid: Option<String>,
    /// Owner of the user record. Defaults to the system user.
    pub owner_uuid: Option<String>,
    pub email: String,
    pub username: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub default_owner_uuid: Option<String>,
}

impl CreateUser {
    pub fn active(email: impl Into<String>) -> Self {
        Self {
            uuid: None,
            owner_uuid: None,
            email: email.into(),
            username: None,
            is_active: true,
            is_admin: false,
            default_owner_uuid: None,
        }
    }
}

impl AssignUuid for CreateUser {
    fn uuid_target(&mut self) -> Option<(&'static str, &mut Option<String>)> {
        Some(("User", &mut self.uuid))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub username: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    /// `Some(Some(val))` = set, `Some(None)` = clear, `None` = no change.
    pub default_owner_uuid: Option<Option<String>>,
}
