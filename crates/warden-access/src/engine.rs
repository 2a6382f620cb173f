//! Permission reachability.
//!
//! A user reaches objects by breadth-first traversal over two kinds of
//! edge: ownership, from an owner down to what it owns, and permission
//! links, from tail to head. The level carried along a path is the lowest
//! level of its edges; a node's level is the highest over all paths that
//! reach it. Ownership edges count as `manage`.
//!
//! Arriving at a node does not always let the walk continue from it. A
//! group passes on whatever level reached it. A user passes it on only when
//! the edge that arrived was itself `manage`, so a read grant on a user
//! does not reach what that user owns or is granted. Other objects are
//! leaves.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use warden_core::RequestContext;
use warden_core::error::{WardenError, WardenResult};
use warden_core::models::permission::PermissionLevel;
use warden_core::models::resource::{Resource, ResourceKind};
use warden_core::models::user::User;
use warden_core::repository::{GraphStore, UserRepository};

use crate::cache::{CacheKey, VisibilityCache};
use crate::config::AccessConfig;
use crate::trash::{TrashFilter, earliest};

/// Whether trashed objects take part in a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TrashPolicy {
    #[default]
    Exclude,
    Include,
}

impl TrashPolicy {
    pub fn from_include_trash(include_trash: bool) -> Self {
        if include_trash {
            Self::Include
        } else {
            Self::Exclude
        }
    }
}

/// How a traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOutcome {
    /// Every reachable node was expanded.
    Complete,
    /// The sought node was reached. The traversal can be resumed.
    Found,
    /// `max_nodes` expansions were spent with nodes still queued.
    BudgetExceeded { visited: usize },
    TimedOut,
}

impl TraversalOutcome {
    /// The traversal stopped before it could give a complete answer.
    pub fn is_exhausted(self) -> bool {
        matches!(self, Self::BudgetExceeded { .. } | Self::TimedOut)
    }
}

/// Raw traversal result: the level at which each node is reached, before
/// inherited trash is applied.
#[derive(Debug, Clone)]
pub struct Reach {
    pub levels: HashMap<String, PermissionLevel>,
    pub outcome: TraversalOutcome,
}

/// One traversal's answer with the earliest moment a scheduled trash time
/// could change it.
struct Pass<T> {
    value: T,
    outcome: TraversalOutcome,
    horizon: Option<DateTime<Utc>>,
}

struct Snapshot<T> {
    pass: Pass<T>,
    /// Revision the answer is consistent with; `None` if every attempt
    /// overlapped a write.
    revision: Option<u64>,
}

/// Breadth-first walk state.
struct Walk<'a, G: GraphStore> {
    graph: &'a G,
    required: PermissionLevel,
    policy: TrashPolicy,
    now: DateTime<Utc>,
    budget: usize,
    expanded: usize,
    levels: HashMap<String, PermissionLevel>,
    /// Best level each node passes on to its out-edges.
    onward: HashMap<String, PermissionLevel>,
    reached: HashMap<String, Resource>,
    /// Nodes some reached tail grants access to by a link of its own.
    direct: HashSet<String>,
    horizon: Option<DateTime<Utc>>,
    queue: VecDeque<(String, PermissionLevel)>,
    target: Option<String>,
    target_hit: bool,
}

impl<'a, G: GraphStore> Walk<'a, G> {
    fn start(
        graph: &'a G,
        origin: Resource,
        required: PermissionLevel,
        policy: TrashPolicy,
        now: DateTime<Utc>,
        budget: usize,
    ) -> Self {
        let mut walk = Self {
            graph,
            required,
            policy,
            now,
            budget,
            expanded: 0,
            levels: HashMap::new(),
            onward: HashMap::new(),
            reached: HashMap::new(),
            direct: HashSet::new(),
            horizon: None,
            queue: VecDeque::new(),
            target: None,
            target_hit: false,
        };
        walk.levels
            .insert(origin.uuid.clone(), PermissionLevel::Manage);
        walk.onward
            .insert(origin.uuid.clone(), PermissionLevel::Manage);
        walk.queue
            .push_back((origin.uuid.clone(), PermissionLevel::Manage));
        walk.reached.insert(origin.uuid.clone(), origin);
        walk
    }

    fn seeking(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    /// Expand queued nodes until the queue drains, the budget runs out or
    /// the target is reached.
    async fn run(&mut self) -> WardenResult<TraversalOutcome> {
        while let Some((uuid, level)) = self.queue.pop_front() {
            if self.onward.get(&uuid).is_some_and(|best| *best > level) {
                continue;
            }
            if self.expanded >= self.budget {
                self.queue.push_front((uuid, level));
                return Ok(TraversalOutcome::BudgetExceeded {
                    visited: self.expanded,
                });
            }
            self.expanded += 1;
            self.expand(&uuid, level).await?;
            if std::mem::take(&mut self.target_hit) {
                return Ok(TraversalOutcome::Found);
            }
        }
        Ok(TraversalOutcome::Complete)
    }

    /// Follow the out-edges of a node that passes on `level`.
    async fn expand(&mut self, uuid: &str, level: PermissionLevel) -> WardenResult<()> {
        for child in self.graph.children_of(uuid).await? {
            if child.uuid != uuid {
                self.offer(child, level, PermissionLevel::Manage, false);
            }
        }

        let mut grants: HashMap<String, PermissionLevel> = HashMap::new();
        for link in self.graph.permission_links_from(uuid).await? {
            if link.is_self_loop() {
                continue;
            }
            let Some(grant) = link.grant() else {
                continue;
            };
            if level.min(grant) < self.required {
                continue;
            }
            let best = grants.entry(link.head_uuid).or_insert(grant);
            *best = (*best).max(grant);
        }
        if grants.is_empty() {
            return Ok(());
        }

        let heads: Vec<String> = grants.keys().cloned().collect();
        for head in self.graph.get_resources(&heads).await? {
            if let Some(grant) = grants.get(&head.uuid).copied() {
                self.offer(head, level.min(grant), grant, true);
            }
        }
        Ok(())
    }

    /// Record an arrival at `resource` with `level`, over an edge worth
    /// `edge` on its own.
    fn offer(
        &mut self,
        resource: Resource,
        level: PermissionLevel,
        edge: PermissionLevel,
        via_link: bool,
    ) {
        self.horizon = earliest(self.horizon, resource.next_trash_transition(self.now));
        let is_target = self.target.as_deref() == Some(resource.uuid.as_str());

        if via_link && self.direct.insert(resource.uuid.clone()) && is_target {
            self.target_hit = true;
        }
        if self.policy == TrashPolicy::Exclude && resource.is_trashed_at(self.now) {
            return;
        }

        let passes_on = match resource.kind {
            ResourceKind::Group => true,
            ResourceKind::User => edge == PermissionLevel::Manage,
            _ => false,
        };
        if passes_on && !self.onward.get(&resource.uuid).is_some_and(|best| *best >= level) {
            self.onward.insert(resource.uuid.clone(), level);
            self.queue.push_back((resource.uuid.clone(), level));
        }

        if self.levels.get(&resource.uuid).is_some_and(|best| *best >= level) {
            return;
        }
        self.target_hit |= is_target;
        self.levels.insert(resource.uuid.clone(), level);
        self.reached.insert(resource.uuid.clone(), resource);
    }
}

/// Answers access questions for users against the ownership graph.
///
/// Admin status is read from the user repository on every query and never
/// cached. Visible sets of other users are cached against the graph
/// revision they were computed at.
pub struct AccessEngine<G: GraphStore, U: UserRepository> {
    graph: G,
    users: U,
    config: AccessConfig,
    cache: VisibilityCache,
}

impl<G: GraphStore, U: UserRepository> AccessEngine<G, U> {
    pub fn new(graph: G, users: U, config: AccessConfig) -> Self {
        let capacity = if config.cache_enabled {
            config.cache_capacity
        } else {
            0
        };
        Self {
            graph,
            users,
            config,
            cache: VisibilityCache::new(capacity),
        }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Whether `user_uuid` has at least `level` on `resource_uuid` at `now`,
    /// with trashed objects excluded.
    pub async fn can_access(
        &self,
        user_uuid: &str,
        resource_uuid: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
    ) -> WardenResult<bool> {
        self.can_access_with(user_uuid, resource_uuid, level, now, TrashPolicy::Exclude)
            .await
    }

    /// Unknown users and resources are denied, never reported as errors.
    /// Only a failing backend is.
    pub async fn can_access_with(
        &self,
        user_uuid: &str,
        resource_uuid: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
        policy: TrashPolicy,
    ) -> WardenResult<bool> {
        let Some(user) = self.find_user(user_uuid).await? else {
            return Ok(false);
        };
        if user.uuid == resource_uuid {
            return Ok(true);
        }
        let Some(target) = found(self.graph.get_resource(resource_uuid).await)? else {
            return Ok(false);
        };
        if policy == TrashPolicy::Exclude && target.is_trashed_at(now) {
            return Ok(false);
        }

        if user.is_admin {
            return match policy {
                TrashPolicy::Include => Ok(true),
                TrashPolicy::Exclude => Ok(!self
                    .trash_filter()
                    .filter_visible(vec![target], now)
                    .await?
                    .is_empty()),
            };
        }

        let Some(origin) = found(self.graph.get_resource(&user.uuid).await)? else {
            return Ok(false);
        };
        let snapshot = self
            .consistently(|| self.decide(&origin, &target, level, now, policy))
            .await?;

        if snapshot.pass.outcome.is_exhausted() {
            warn!(
                user = %user.uuid,
                resource = %target.uuid,
                %level,
                outcome = ?snapshot.pass.outcome,
                "Reachability traversal exhausted; denying"
            );
            return Ok(false);
        }
        Ok(snapshot.pass.value)
    }

    /// Every object `user_uuid` reaches at `level` or above at `now`, with
    /// trashed objects excluded.
    pub async fn visible_set(
        &self,
        user_uuid: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
    ) -> WardenResult<HashSet<String>> {
        self.visible_set_with(user_uuid, level, now, TrashPolicy::Exclude)
            .await
    }

    /// Unknown users see nothing. An exhausted traversal yields the empty
    /// set and is not cached.
    pub async fn visible_set_with(
        &self,
        user_uuid: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
        policy: TrashPolicy,
    ) -> WardenResult<HashSet<String>> {
        let Some(user) = self.find_user(user_uuid).await? else {
            return Ok(HashSet::new());
        };
        if user.is_admin {
            return self.admin_visible_set(now, policy).await;
        }
        let Some(origin) = found(self.graph.get_resource(&user.uuid).await)? else {
            return Ok(HashSet::new());
        };

        let key = CacheKey {
            user_uuid: user.uuid.clone(),
            level,
            trash: policy,
        };
        if let Some(revision) = self.graph.revision() {
            if let Some(hit) = self.cache.get(&key, revision, now) {
                debug!(user = %user.uuid, %level, revision, "Visible set served from cache");
                return Ok(Arc::unwrap_or_clone(hit));
            }
        }

        let snapshot = self
            .consistently(|| self.collect_visible(&origin, level, now, policy))
            .await?;

        if snapshot.pass.outcome.is_exhausted() {
            warn!(
                user = %user.uuid,
                %level,
                outcome = ?snapshot.pass.outcome,
                "Reachability traversal exhausted; returning empty visible set"
            );
            return Ok(HashSet::new());
        }

        let visible = snapshot.pass.value;
        if let Some(revision) = snapshot.revision {
            self.cache.insert(
                key,
                revision,
                now,
                snapshot.pass.horizon,
                Arc::new(visible.clone()),
            );
        }
        Ok(visible)
    }

    /// Visible set of the request's user at the request's time, honoring
    /// the request's trash preference. Anonymous requests see nothing.
    pub async fn visible_resources(
        &self,
        ctx: &RequestContext,
        level: PermissionLevel,
    ) -> WardenResult<HashSet<String>> {
        let Some(user_uuid) = ctx.user_uuid() else {
            return Ok(HashSet::new());
        };
        self.visible_set_with(
            user_uuid,
            level,
            ctx.received_at(),
            TrashPolicy::from_include_trash(ctx.include_trash()),
        )
        .await
    }

    /// Require `level` on `uuid` for the request's user.
    ///
    /// A denial is reported as [`WardenError::NotFound`], the same as a
    /// missing object.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        level: PermissionLevel,
    ) -> WardenResult<()> {
        self.check_with(
            ctx,
            uuid,
            level,
            TrashPolicy::from_include_trash(ctx.include_trash()),
        )
        .await
    }

    pub async fn check_with(
        &self,
        ctx: &RequestContext,
        uuid: &str,
        level: PermissionLevel,
        policy: TrashPolicy,
    ) -> WardenResult<()> {
        let allowed = match ctx.user_uuid() {
            Some(user_uuid) => {
                self.can_access_with(user_uuid, uuid, level, ctx.received_at(), policy)
                    .await?
            }
            None => false,
        };
        if !allowed {
            debug!(user = ?ctx.user_uuid(), resource = %uuid, %level, "Access denied");
            return Err(WardenError::not_found("object", uuid));
        }
        Ok(())
    }

    /// The level at which `user_uuid` reaches each node, before inherited
    /// trash is applied. Only nodes reached at `level` or above are listed.
    pub async fn reach(
        &self,
        user_uuid: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
        policy: TrashPolicy,
    ) -> WardenResult<Reach> {
        let origin = match self.find_user(user_uuid).await? {
            Some(user) => found(self.graph.get_resource(&user.uuid).await)?,
            None => None,
        };
        let Some(origin) = origin else {
            return Ok(Reach {
                levels: HashMap::new(),
                outcome: TraversalOutcome::Complete,
            });
        };

        let mut walk = Walk::start(&self.graph, origin, level, policy, now, self.config.max_nodes);
        let outcome = match tokio::time::timeout(self.config.timeout, walk.run()).await {
            Ok(outcome) => outcome?,
            Err(_) => TraversalOutcome::TimedOut,
        };
        Ok(Reach {
            levels: walk.levels,
            outcome,
        })
    }

    fn trash_filter(&self) -> TrashFilter<'_, G> {
        TrashFilter::new(&self.graph, self.config.max_ancestor_depth)
    }

    async fn find_user(&self, uuid: &str) -> WardenResult<Option<User>> {
        found(self.users.get_by_uuid(uuid).await)
    }

    /// Run `pass` until two revision readings bracketing it agree, at most
    /// `snapshot_retries` extra times. Each attempt runs under the
    /// traversal timeout.
    async fn consistently<T, F, Fut>(&self, mut pass: F) -> WardenResult<Snapshot<T>>
    where
        T: Default,
        F: FnMut() -> Fut,
        Fut: Future<Output = WardenResult<Pass<T>>>,
    {
        let mut attempt = 0;
        loop {
            let before = self.graph.revision();
            let result = match tokio::time::timeout(self.config.timeout, pass()).await {
                Ok(result) => result?,
                Err(_) => Pass {
                    value: T::default(),
                    outcome: TraversalOutcome::TimedOut,
                    horizon: None,
                },
            };
            let after = self.graph.revision();
            let revision = before.filter(|_| before == after);

            if revision.is_some() || result.outcome.is_exhausted() {
                return Ok(Snapshot {
                    pass: result,
                    revision,
                });
            }
            if attempt >= self.config.snapshot_retries {
                warn!(
                    attempts = attempt + 1,
                    "Every traversal overlapped a graph write; answer not cached"
                );
                return Ok(Snapshot {
                    pass: result,
                    revision: None,
                });
            }
            attempt += 1;
            debug!(attempt, "Graph changed during traversal; retrying");
        }
    }

    async fn decide(
        &self,
        origin: &Resource,
        target: &Resource,
        level: PermissionLevel,
        now: DateTime<Utc>,
        policy: TrashPolicy,
    ) -> WardenResult<Pass<bool>> {
        let mut walk = Walk::start(
            &self.graph,
            origin.clone(),
            level,
            policy,
            now,
            self.config.max_nodes,
        )
        .seeking(&target.uuid);
        let mut filter = self.trash_filter();

        loop {
            let outcome = walk.run().await?;
            if outcome != TraversalOutcome::Found {
                return Ok(Pass {
                    value: false,
                    outcome,
                    horizon: walk.horizon,
                });
            }
            if policy == TrashPolicy::Include {
                return Ok(Pass {
                    value: true,
                    outcome,
                    horizon: walk.horizon,
                });
            }

            // Reached, but it may sit under a trashed ancestor. Keep going in
            // case a direct link turns up later.
            let shared = walk.direct.contains(&target.uuid);
            let (visible, next) = filter.is_visible_with(target, now, shared).await?;
            if visible {
                return Ok(Pass {
                    value: true,
                    outcome,
                    horizon: earliest(walk.horizon, next),
                });
            }
        }
    }

    async fn collect_visible(
        &self,
        origin: &Resource,
        level: PermissionLevel,
        now: DateTime<Utc>,
        policy: TrashPolicy,
    ) -> WardenResult<Pass<HashSet<String>>> {
        let mut walk = Walk::start(
            &self.graph,
            origin.clone(),
            level,
            policy,
            now,
            self.config.max_nodes,
        );
        let outcome = walk.run().await?;
        if outcome.is_exhausted() {
            return Ok(Pass {
                value: HashSet::new(),
                outcome,
                horizon: None,
            });
        }

        let Walk {
            reached,
            direct,
            horizon,
            ..
        } = walk;
        let candidates: Vec<Resource> = reached.into_values().collect();

        if policy == TrashPolicy::Include {
            return Ok(Pass {
                value: candidates.into_iter().map(|r| r.uuid).collect(),
                outcome,
                horizon,
            });
        }

        let filtered = self
            .trash_filter()
            .filter_visible_with(candidates, now, |r| direct.contains(&r.uuid))
            .await?;
        Ok(Pass {
            value: filtered.kept.into_iter().map(|r| r.uuid).collect(),
            outcome,
            horizon: earliest(horizon, filtered.next_transition),
        })
    }

    /// Admins see every existing object; trash still applies.
    async fn admin_visible_set(
        &self,
        now: DateTime<Utc>,
        policy: TrashPolicy,
    ) -> WardenResult<HashSet<String>> {
        let uuids = self.graph.all_resource_uuids().await?;
        let resources = self.graph.get_resources(&uuids).await?;
        let resources = match policy {
            TrashPolicy::Include => resources,
            TrashPolicy::Exclude => self.trash_filter().filter_visible(resources, now).await?,
        };
        Ok(resources.into_iter().map(|r| r.uuid).collect())
    }
}

/// Turn a lookup miss into `None`, keeping backend errors.
fn found<T>(result: WardenResult<T>) -> WardenResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(WardenError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
