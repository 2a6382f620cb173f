//! Resource domain model: every object that has an owner.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{self, AssignUuid};

/// Path prefix of the object API that token scopes are written against.
pub const API_PREFIX: &str = "/arvados/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    User,
    Group,
    Collection,
    ContainerRequest,
    Container,
    Workflow,
    /// Links are owned like any other object; their edge data lives
    /// alongside in [`crate::models::link::Link`].
    Link,
}

static KINDS_BY_INFIX: LazyLock<HashMap<String, ResourceKind>> = LazyLock::new(|| {
    ResourceKind::ALL
        .iter()
        .map(|kind| (ids::class_uuid_prefix(kind.class_name()), *kind))
        .collect()
});

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        Self::User,
        Self::Group,
        Self::Collection,
        Self::ContainerRequest,
        Self::Container,
        Self::Workflow,
        Self::Link,
    ];

    /// Class name the UUID infix is derived from.
    pub fn class_name(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
            Self::Collection => "Collection",
            Self::ContainerRequest => "ContainerRequest",
            Self::Container => "Container",
            Self::Workflow => "Workflow",
            Self::Link => "Link",
        }
    }

    /// Collection path of this kind in the object API, e.g.
    /// `/arvados/v1/container_requests`.
    pub fn api_path(self) -> String {
        let plural = match self {
            Self::User => "users",
            Self::Group => "groups",
            Self::Collection => "collections",
            Self::ContainerRequest => "container_requests",
            Self::Container => "containers",
            Self::Workflow => "workflows",
            Self::Link => "links",
        };
        format!("{API_PREFIX}/{plural}")
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.class_name() == s)
    }

    /// Kind implied by a UUID's infix.
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        ids::uuid_infix(uuid).and_then(|infix| KINDS_BY_INFIX.get(infix).copied())
    }

    /// Whether `uuid` carries this kind's infix.
    pub fn matches_uuid(self, uuid: &str) -> bool {
        Self::from_uuid(uuid) == Some(self)
    }

    /// Whether objects of this kind can own other objects.
    pub fn can_own(self) -> bool {
        matches!(self, Self::User | Self::Group)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupClass {
    Project,
    Role,
    Filter,
}

impl GroupClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Role => "role",
            Self::Filter => "filter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "role" => Some(Self::Role),
            "filter" => Some(Self::Filter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uuid: String,
    pub kind: ResourceKind,
    pub owner_uuid: String,
    pub name: String,
    pub group_class: Option<GroupClass>,
    pub is_trashed: bool,
    pub trash_at: Option<DateTime<Utc>>,
    pub delete_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Resource {
    /// Whether this resource's own trash state hides it at `now`.
    pub fn is_trashed_at(&self, now: DateTime<Utc>) -> bool {
        self.is_trashed
            || self.trash_at.is_some_and(|t| t <= now)
            || self.delete_at.is_some_and(|t| t <= now)
    }

    /// The next instant after `now` at which the trash state flips on its
    /// own, if one is scheduled.
    pub fn next_trash_transition(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        [self.trash_at, self.delete_at]
            .into_iter()
            .flatten()
            .filter(|t| *t > now)
            .min()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResource {
    /// Preassigned UUID; minted on creation when absent.
    pub uuid: Option<String>,
    pub kind: ResourceKind,
    /// Filled from the default owner when absent.
    pub owner_uuid: Option<String>,
    pub name: String,
    pub group_class: Option<GroupClass>,
    pub trash_at: Option<DateTime<Utc>>,
    pub delete_at: Option<DateTime<Utc>>,
}

impl CreateResource {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            uuid: None,
            kind,
            owner_uuid: None,
            name: name.into(),
            group_class: None,
            trash_at: None,
            delete_at: None,
        }
    }

    pub fn project(name: impl Into<String>) -> Self {
        Self {
            group_class: Some(GroupClass::Project),
            ..Self::new(ResourceKind::Group, name)
        }
    }

    pub fn owned_by(mut self, owner_uuid: impl Into<String>) -> Self {
        self.owner_uuid = Some(owner_uuid.into());
        self
    }
}

impl AssignUuid for CreateResource {
    fn uuid_target(&mut self) -> Option<(&'static str, &mut Option<String>)> {
        Some((self.kind.class_name(), &mut self.uuid))
    }
}

/// Change to a resource's trash state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrashUpdate {
    pub is_trashed: Option<bool>,
    /// `Some(Some(t))` = set, `Some(None)` = clear, `None` = no change.
    pub trash_at: Option<Option<DateTime<Utc>>>,
    /// `Some(Some(t))` = set, `Some(None)` = clear, `None` = no change.
    pub delete_at: Option<Option<DateTime<Utc>>>,
}

impl TrashUpdate {
    pub fn trash() -> Self {
        Self {
            is_trashed: Some(true),
            ..Default::default()
        }
    }

    pub fn untrash() -> Self {
        Self {
            is_trashed: Some(false),
            trash_at: Some(None),
            delete_at: Some(None),
        }
    }
}
