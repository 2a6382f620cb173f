//! Visible-set cache keyed by graph revision.
//!
//! An entry is only served while the graph is at the revision it was
//! computed at and before the earliest scheduled trash transition it saw,
//! so a revoked link or trashed project is never honored from cache.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use warden_core::models::permission::PermissionLevel;

use crate::engine::TrashPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_uuid: String,
    pub level: PermissionLevel,
    pub trash: TrashPolicy,
}

#[derive(Debug)]
struct CacheEntry {
    revision: u64,
    computed_at: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
    uuids: Arc<HashSet<String>>,
}

impl CacheEntry {
    fn serves(&self, revision: u64, now: DateTime<Utc>) -> bool {
        self.revision == revision
            && now >= self.computed_at
            && self.valid_until.is_none_or(|until| now < until)
    }
}

pub struct VisibilityCache {
    entries: DashMap<CacheKey, CacheEntry>,
    capacity: usize,
}

impl VisibilityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    pub fn get(
        &self,
        key: &CacheKey,
        revision: u64,
        now: DateTime<Utc>,
    ) -> Option<Arc<HashSet<String>>> {
        let entry = self.entries.get(key)?;
        if entry.serves(revision, now) {
            return Some(Arc::clone(&entry.uuids));
        }
        drop(entry);
        self.entries
            .remove_if(key, |_, entry| entry.revision != revision);
        None
    }

    pub fn insert(
        &self,
        key: CacheKey,
        revision: u64,
        computed_at: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
        uuids: Arc<HashSet<String>>,
    ) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.retain(|_, entry| entry.revision == revision);
            if self.entries.len() >= self.capacity {
                debug!(capacity = self.capacity, "Visibility cache full; clearing");
                self.entries.clear();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                revision,
                computed_at,
                valid_until,
                uuids,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
