//! Link domain model: explicit directed edges between objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::permission::PermissionLevel;
use crate::ids::AssignUuid;

/// `link_class` of links that may grant access.
pub const PERMISSION_LINK_CLASS: &str = "permission";

/// Link name reserved for favorites.
pub const STAR_LINK_NAME: &str = "star";

/// A stored link, in its wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub uuid: String,
    pub owner_uuid: String,
    pub tail_uuid: String,
    pub head_uuid: String,
    pub link_class: String,
    pub name: String,
    pub properties: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// What a link means, decided once from its class and name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// A permission grant at the given level.
    Grant(PermissionLevel),
    /// A favorite marker. Never grants access.
    Favorite,
    /// Any other link.
    Other,
}

impl Link {
    pub fn kind(&self) -> LinkKind {
        if self.name == STAR_LINK_NAME {
            return LinkKind::Favorite;
        }
        if self.link_class != PERMISSION_LINK_CLASS {
            return LinkKind::Other;
        }
        match PermissionLevel::from_link_name(&self.name) {
            Some(level) => LinkKind::Grant(level),
            None => LinkKind::Other,
        }
    }

    /// The level this link grants from tail to head, if any.
    pub fn grant(&self) -> Option<PermissionLevel> {
        match self.kind() {
            LinkKind::Grant(level) => Some(level),
            LinkKind::Favorite | LinkKind::Other => None,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.tail_uuid == self.head_uuid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLink {
    /// Preassigned UUID; minted on creation when absent.
    pub uuid: Option<String>,
    pub owner_uuid: String,
    pub tail_uuid: String,
    pub head_uuid: String,
    pub link_class: String,
    pub name: String,
    pub properties: Option<serde_json::Value>,
}

impl CreateLink {
    /// A `permission` link granting `level` from `tail_uuid` to `head_uuid`.
    pub fn permission(
        owner_uuid: impl Into<String>,
        tail_uuid: impl Into<String>,
        head_uuid: impl Into<String>,
        level: PermissionLevel,
    ) -> Self {
        Self {
            uuid: None,
            owner_uuid: owner_uuid.into(),
            tail_uuid: tail_uuid.into(),
            head_uuid: head_uuid.into(),
            link_class: PERMISSION_LINK_CLASS.into(),
            name: level.link_name().into(),
            properties: None,
        }
    }
}

impl AssignUuid for CreateLink {
    fn uuid_target(&mut self) -> Option<(&'static str, &mut Option<String>)> {
        Some(("Link", &mut self.uuid))
    }
}

/// Role-group membership.
///
/// Stored as two permission links written and removed together: the user
/// gets `level` on the group, and the group gets `can_read` on the user.
/// Reachability treats them as two independent directed edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub user_uuid: String,
    pub group_uuid: String,
    pub level: PermissionLevel,
    pub user_to_group_link_uuid: String,
    pub group_to_user_link_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMembership {
    pub owner_uuid: String,
    pub user_uuid: String,
    pub group_uuid: String,
    pub level: PermissionLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(link_class: &str, name: &str) -> Link {
        Link {
            uuid: "zzzzz-o0j2j-000000000000001".into(),
            owner_uuid: "zzzzz-tpzed-000000000000000".into(),
            tail_uuid: "zzzzz-tpzed-000000000000001".into(),
            head_uuid: "zzzzz-j7d0g-000000000000001".into(),
            link_class: link_class.into(),
            name: name.into(),
            properties: serde_json::json!({}),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn permission_links_grant() {
        assert_eq!(
            link("permission", "can_write").grant(),
            Some(PermissionLevel::Write)
        );
    }

    #[test]
    fn star_never_grants() {
        assert_eq!(link("permission", "star").kind(), LinkKind::Favorite);
        assert_eq!(link("star", "star").grant(), None);
    }

    #[test]
    fn non_permission_class_never_grants() {
        assert_eq!(link("tag", "can_manage").grant(), None);
        assert_eq!(link("permission", "can_fly").grant(), None);
    }
}
