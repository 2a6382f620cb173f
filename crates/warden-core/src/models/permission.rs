//! Permission levels and how permission links map onto them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Access levels, totally ordered: a grant at one level implies every
/// lower level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read,
    Write,
    Manage,
}

impl PermissionLevel {
    pub const ALL: [PermissionLevel; 3] = [Self::Read, Self::Write, Self::Manage];

    /// Level granted by a permission link name, if the name is a grant.
    ///
    /// `can_login` is a read-level grant. Anything else (including `star`)
    /// grants nothing.
    pub fn from_link_name(name: &str) -> Option<Self> {
        match name {
            "can_read" | "can_login" => Some(Self::Read),
            "can_write" => Some(Self::Write),
            "can_manage" => Some(Self::Manage),
            _ => None,
        }
    }

    /// Canonical link name for this level.
    pub fn link_name(self) -> &'static str {
        match self {
            Self::Read => "can_read",
            Self::Write => "can_write",
            Self::Manage => "can_manage",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Manage => "manage",
        };
        f.write_str(s)
    }
}
