//! Trash-aware visibility filtering.
//!
//! A resource is trashed for visibility purposes when its own flag is set,
//! when its `trash_at` or `delete_at` has passed, or when any resource on
//! its owner chain is trashed by those rules. Inherited trash is computed
//! from the graph on demand and never stored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use warden_core::error::{WardenError, WardenResult};
use warden_core::models::resource::Resource;
use warden_core::repository::GraphStore;

/// Where a resource's trash state comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashState {
    /// The resource itself or the ancestor whose state applies.
    pub source_uuid: String,
    /// When the state takes effect; `None` for the explicit trash flag.
    pub at: Option<DateTime<Utc>>,
}

impl TrashState {
    pub fn is_trashed_at(&self, now: DateTime<Utc>) -> bool {
        self.at.is_none_or(|at| at <= now)
    }
}

/// Trash state of an owner chain, folded from the root down.
#[derive(Debug, Clone, Copy, Default)]
struct ChainState {
    trashed: bool,
    next_transition: Option<DateTime<Utc>>,
}

impl ChainState {
    fn extend(self, resource: &Resource, now: DateTime<Utc>) -> Self {
        Self {
            trashed: self.trashed || resource.is_trashed_at(now),
            next_transition: earliest(self.next_transition, resource.next_trash_transition(now)),
        }
    }
}

pub(crate) fn earliest(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Result of filtering, with the earliest future moment at which the
/// answer could change without a graph write.
#[derive(Debug, Default)]
pub(crate) struct Filtered {
    pub(crate) kept: Vec<Resource>,
    pub(crate) next_transition: Option<DateTime<Utc>>,
}

/// Owner-chain state is memoized for the lifetime of the filter, so a
/// filter serves one query at one `now`.
pub struct TrashFilter<'a, G: GraphStore> {
    graph: &'a G,
    max_depth: usize,
    memo: HashMap<String, ChainState>,
}

impl<'a, G: GraphStore> TrashFilter<'a, G> {
    pub fn new(graph: &'a G, max_depth: usize) -> Self {
        Self {
            graph,
            max_depth,
            memo: HashMap::new(),
        }
    }

    /// Drop trashed candidates.
    ///
    /// A candidate under a trashed ancestor survives only when it is shared
    /// directly: some permission link grants access to it from a tail that
    /// is not itself trashed.
    pub async fn filter_visible(
        &mut self,
        candidates: Vec<Resource>,
        now: DateTime<Utc>,
    ) -> WardenResult<Vec<Resource>> {
        let (kept, inherited) = self.partition(candidates, now).await?;
        let mut visible = kept.kept;

        for resource in inherited {
            if self.directly_shared(&resource, now).await? {
                visible.push(resource);
            }
        }
        Ok(visible)
    }

    /// Like [`TrashFilter::filter_visible`], but the caller decides which
    /// candidates under a trashed ancestor count as directly shared.
    pub(crate) async fn filter_visible_with(
        &mut self,
        candidates: Vec<Resource>,
        now: DateTime<Utc>,
        shared: impl Fn(&Resource) -> bool,
    ) -> WardenResult<Filtered> {
        let (mut filtered, inherited) = self.partition(candidates, now).await?;
        filtered
            .kept
            .extend(inherited.into_iter().filter(|r| shared(r)));
        Ok(filtered)
    }

    /// Whether a single resource is visible as far as trash is concerned,
    /// given the caller's notion of direct sharing.
    pub(crate) async fn is_visible_with(
        &mut self,
        resource: &Resource,
        now: DateTime<Utc>,
        shared: bool,
    ) -> WardenResult<(bool, Option<DateTime<Utc>>)> {
        let chain = self.chain_state(&resource.owner_uuid, &resource.uuid, now).await?;
        let next = earliest(chain.next_transition, resource.next_trash_transition(now));
        if resource.is_trashed_at(now) {
            return Ok((false, next));
        }
        Ok((!chain.trashed || shared, next))
    }

    /// Trash state that applies to `uuid`, looking at the resource and its
    /// owner chain. An explicit flag anywhere on the chain wins; otherwise
    /// the earliest `trash_at`/`delete_at`, past or future, is reported.
    pub async fn effective_trash(&self, uuid: &str) -> WardenResult<Option<TrashState>> {
        let resource = self.graph.get_resource(uuid).await?;
        let ancestors = self.graph.ancestors_of(uuid, self.max_depth).await?;

        let mut scheduled: Option<TrashState> = None;
        for node in std::iter::once(&resource).chain(ancestors.iter()) {
            if node.is_trashed {
                return Ok(Some(TrashState {
                    source_uuid: node.uuid.clone(),
                    at: None,
                }));
            }
            let Some(at) = earliest(node.trash_at, node.delete_at) else {
                continue;
            };
            if scheduled.as_ref().is_none_or(|s| s.at.is_some_and(|t| at < t)) {
                scheduled = Some(TrashState {
                    source_uuid: node.uuid.clone(),
                    at: Some(at),
                });
            }
        }
        Ok(scheduled)
    }

    /// Split candidates into those kept outright and those excluded only by
    /// an ancestor. Candidates trashed in their own right are dropped.
    async fn partition(
        &mut self,
        candidates: Vec<Resource>,
        now: DateTime<Utc>,
    ) -> WardenResult<(Filtered, Vec<Resource>)> {
        let mut filtered = Filtered::default();
        let mut inherited = Vec::new();

        for resource in candidates {
            let chain = self
                .chain_state(&resource.owner_uuid, &resource.uuid, now)
                .await?;
            filtered.next_transition = earliest(
                filtered.next_transition,
                earliest(chain.next_transition, resource.next_trash_transition(now)),
            );

            if resource.is_trashed_at(now) {
                continue;
            }
            if chain.trashed {
                inherited.push(resource);
            } else {
                filtered.kept.push(resource);
            }
        }
        Ok((filtered, inherited))
    }

    async fn directly_shared(&self, resource: &Resource, now: DateTime<Utc>) -> WardenResult<bool> {
        let links = self.graph.permission_links_to(&resource.uuid).await?;
        let tails: Vec<String> = links
            .iter()
            .filter(|l| l.grant().is_some() && !l.is_self_loop())
            .map(|l| l.tail_uuid.clone())
            .collect();
        let tails = self.graph.get_resources(&tails).await?;
        Ok(tails.iter().any(|tail| !tail.is_trashed_at(now)))
    }

    /// Trash state of the chain starting at `owner_uuid`, memoized per
    /// filter. `self_uuid` stops the walk at self-owned roots.
    async fn chain_state(
        &mut self,
        owner_uuid: &str,
        self_uuid: &str,
        now: DateTime<Utc>,
    ) -> WardenResult<ChainState> {
        if owner_uuid == self_uuid {
            return Ok(ChainState::default());
        }

        let mut pending: Vec<Resource> = Vec::new();
        let mut cursor = owner_uuid.to_string();
        let mut base = ChainState::default();

        for _ in 0..self.max_depth {
            if let Some(state) = self.memo.get(&cursor) {
                base = *state;
                break;
            }
            let node = match self.graph.get_resource(&cursor).await {
                Ok(node) => node,
                Err(WardenError::NotFound { .. }) => break,
                Err(e) => return Err(e),
            };
            let is_root = node.owner_uuid == node.uuid;
            cursor = node.owner_uuid.clone();
            pending.push(node);
            if is_root {
                break;
            }
        }

        for node in pending.into_iter().rev() {
            base = base.extend(&node, now);
            self.memo.insert(node.uuid, base);
        }
        Ok(base)
    }
}
