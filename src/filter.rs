//! The visibility filter façade.
//!
//! Owns the relation store and the decision cache, wires in the external
//! collaborators (state provider, feature config, overlay mapper, background
//! executor), and exposes the programmatic surface the surrounding service
//! calls: `should_filter`, the package lifecycle entry points, runtime
//! grants, and the whitelist/dump diagnostics.
//!
//! Lock discipline: the package-manager lock (owned by the provider) is
//! always outermost, the relation-store lock comes next, and the cache lock
//! is a leaf — no other lock is ever acquired while it is held. Queries read
//! the cache without touching the other two; the uncached fallback runs
//! under the provider lock after the cache lock has been released.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cache::{DecisionCache, Lookup};
use crate::config::{DeviceConfig, FeatureConfig};
use crate::dump;
use crate::exec::Executor;
use crate::ids::{AppId, FIRST_APP_ID, Uid, UserId, app_id_of, is_privileged, uid};
use crate::overlay::OverlayActorMapper;
use crate::package::{PackageRef, Setting};
use crate::provider::{PackageMap, Snapshot, StateProvider, identities, with_state};
use crate::store::{EdgeMap, RelationStore};

/// Build-time switch that logs every blocked verdict regardless of the
/// per-identity opt-in.
const DEBUG_LOGGING: bool = false;

/// The package visibility filter.
///
/// One instance serves the whole process. Mutation entry points must be
/// called in the same order the authoritative package table changes; the
/// table itself is updated first, then the filter is informed.
pub struct VisibilityFilter {
    /// The visibility relation graph; mutated only under the provider lock.
    store: RwLock<RelationStore>,
    /// The materialized decision cache; absent until system-ready.
    cache: Mutex<Option<DecisionCache>>,
    /// Owner of the authoritative package table.
    provider: Arc<dyn StateProvider>,
    /// Dynamic feature switches.
    config: Arc<dyn FeatureConfig>,
    /// Overlay-actor collaborator.
    overlay: Arc<dyn OverlayActorMapper>,
    /// Where the asynchronous cache rebuild runs.
    executor: Arc<dyn Executor>,
    /// Set once `on_system_ready` has been called.
    system_ready: AtomicBool,
}

impl VisibilityFilter {
    /// Create a filter wired to its collaborators, reading the device
    /// configuration once.
    #[must_use]
    pub fn new(
        provider: Arc<dyn StateProvider>,
        config: Arc<dyn FeatureConfig>,
        overlay: Arc<dyn OverlayActorMapper>,
        executor: Arc<dyn Executor>,
        device: &DeviceConfig,
    ) -> Self {
        Self {
            store: RwLock::new(RelationStore::new(
                &device.force_queryable_packages,
                device.system_apps_queryable,
            )),
            cache: Mutex::new(None),
            provider,
            config,
            overlay,
            executor,
            system_ready: AtomicBool::new(false),
        }
    }

    /// Whether the caller behind `caller_uid` must *not* see `target` in
    /// `target_user`.
    ///
    /// After system-ready this resolves in the decision cache; a miss there
    /// means the caller is unknown and visibility is denied. Before
    /// system-ready the relation store is walked directly under the provider
    /// lock. Callers must not hold any lock ordered after the provider lock.
    pub fn should_filter(
        &self,
        caller_uid: Uid,
        caller: Option<&Setting>,
        target: &Setting,
        target_user: UserId,
    ) -> bool {
        let caller_app = app_id_of(caller_uid);
        let target_app = target.app_id;
        if is_privileged(caller_app) || is_privileged(target_app) || caller_app == target_app {
            return false;
        }
        let target_uid = uid(target_user, target_app);

        if let Some(filtered) = self.cached_verdict(caller_uid, target_uid) {
            if filtered {
                self.log_blocked(caller_uid, target_uid);
            }
            return filtered;
        }

        let filtered = with_state(&*self.provider, |packages, _users| {
            self.drain_recompute(packages);
            self.verdict_uncached(caller_uid, caller, target, target_user, None)
        });
        if filtered {
            self.log_blocked(caller_uid, target_uid);
        }
        filtered
    }

    /// Record that `visible_uid` interacted with `recipient_uid`, granting
    /// the recipient visibility of it from now on.
    ///
    /// Returns `true` when the grant is new. Equal uids are a no-op. The
    /// effect is observable as soon as the call returns.
    pub fn grant_implicit_access(&self, recipient_uid: Uid, visible_uid: Uid) -> bool {
        if recipient_uid == visible_uid {
            return false;
        }
        let newly = self.write_store().grant_implicit(recipient_uid, visible_uid);
        if newly {
            if let Some(cache) = self.lock_cache().as_mut() {
                cache.set(recipient_uid, visible_uid, false);
            }
            tracing::debug!(
                recipient = recipient_uid,
                visible = visible_uid,
                "implicit access granted"
            );
        }
        newly
    }

    /// Incorporate a newly installed package, or a replacement for an
    /// existing one.
    ///
    /// The authoritative table must already contain the record. A replace is
    /// a remove followed by an add against the same state.
    pub fn add_package(&self, pkg: &PackageRef, is_replace: bool) {
        with_state(&*self.provider, |packages, users| {
            if is_replace {
                self.remove_package_locked(pkg, packages, users);
            }
            self.write_store().add_package(pkg, packages);
            self.overlay.package_added(pkg);
            self.config.update_package_state(pkg, false);
            if self.cache_ready() {
                let rows = self.rows_for_app(pkg.app_id, packages, users);
                self.apply_rows(rows);
            }
        });
    }

    /// Drop a removed package from the relation store and the cache.
    ///
    /// The authoritative table must no longer contain the record. Surviving
    /// shared-user siblings are re-added and their cache rows recomputed.
    pub fn remove_package(&self, pkg: &PackageRef) {
        with_state(&*self.provider, |packages, users| {
            self.remove_package_locked(pkg, packages, users);
        });
    }

    /// Mark the system ready and start the asynchronous cache rebuild on the
    /// background executor.
    pub fn on_system_ready(self: &Arc<Self>) {
        self.config.on_system_ready();
        self.system_ready.store(true, Ordering::Release);
        let filter = Arc::clone(self);
        self.executor
            .execute(Box::new(move || filter.rebuild_cache()));
    }

    /// React to the active-user set changing: rebuild the entire cache
    /// synchronously, if one exists.
    pub fn on_users_changed(&self) {
        with_state(&*self.provider, |packages, users| {
            if self.cache_ready() {
                let rebuilt = self.build_cache(packages, users, false);
                self.publish_cache(rebuilt);
                tracing::debug!(users = users.len(), "rebuilt cache for user change");
            }
        });
    }

    /// React to the compatibility flag of `package_name` flipping: recompute
    /// every cache row touching that package's identity.
    pub fn on_compat_change(&self, package_name: &str) {
        with_state(&*self.provider, |packages, users| {
            let Some(pkg) = packages.get(package_name) else {
                return;
            };
            if self.cache_ready() {
                let rows = self.rows_for_app(pkg.app_id, packages, users);
                self.apply_rows(rows);
            }
        });
    }

    /// Per-user lists of identities allowed to see `target`, or `None` when
    /// the target is force-queryable and therefore visible to all.
    ///
    /// Walks every installed identity at or above [`FIRST_APP_ID`]; each
    /// returned list is sorted and deduplicated. Callers supply the package
    /// table from within the provider lock.
    pub fn visibility_whitelist(
        &self,
        target: &Setting,
        users: &[UserId],
        packages: &PackageMap,
    ) -> Option<BTreeMap<UserId, Vec<AppId>>> {
        if self.read_store().is_force_queryable(target.app_id) {
            return None;
        }
        self.drain_recompute(packages);
        let ids = identities(packages);
        let mut app_ids: Vec<AppId> = ids
            .keys()
            .copied()
            .filter(|id| *id >= FIRST_APP_ID)
            .collect();
        app_ids.sort_unstable();
        app_ids.dedup();

        let mut whitelist = BTreeMap::new();
        for &user in users {
            let mut visible = Vec::new();
            for &app_id in &app_ids {
                let caller = ids.get(&app_id);
                if !self.decide(uid(user, app_id), caller, target, user) {
                    visible.push(app_id);
                }
            }
            whitelist.insert(user, visible);
        }
        Some(whitelist)
    }

    /// Write the diagnostic report: switch state, force-queryable set, and
    /// per-caller target lists for every relation map.
    pub fn dump_queries(
        &self,
        w: &mut dyn io::Write,
        filter_app_id: Option<AppId>,
        users: &[UserId],
    ) -> io::Result<()> {
        let store = self.read_store();
        dump::write_report(
            w,
            &store,
            &*self.config,
            self.system_ready.load(Ordering::Acquire),
            filter_app_id,
            users,
        )
    }

    /// Whether a decision cache has been published.
    pub fn cache_ready(&self) -> bool {
        self.lock_cache().is_some()
    }

    /// Whether component edges are stale pending a recompute.
    pub fn pending_recompute(&self) -> bool {
        self.read_store().recompute_required()
    }

    /// Full decision precedence against a table already guarded by the
    /// caller: privileged short-circuit, then cache, then the uncached walk.
    /// The recompute sentinel must have been drained.
    fn decide(
        &self,
        caller_uid: Uid,
        caller: Option<&Setting>,
        target: &Setting,
        target_user: UserId,
    ) -> bool {
        let caller_app = app_id_of(caller_uid);
        if is_privileged(caller_app) || is_privileged(target.app_id) || caller_app == target.app_id
        {
            return false;
        }
        let target_uid = uid(target_user, target.app_id);
        self.cached_verdict(caller_uid, target_uid).unwrap_or_else(|| {
            self.verdict_uncached(caller_uid, caller, target, target_user, None)
        })
    }

    /// Cache lookup with the deny-on-doubt anomaly policy; `None` when no
    /// cache has been published yet.
    fn cached_verdict(&self, caller_uid: Uid, target_uid: Uid) -> Option<bool> {
        let guard = self.lock_cache();
        let cache = guard.as_ref()?;
        Some(match cache.get(caller_uid, target_uid) {
            Lookup::Hit(filtered) => filtered,
            Lookup::MissingRow => {
                tracing::error!(
                    caller = caller_uid,
                    target = target_uid,
                    "no cache row for caller uid; denying visibility"
                );
                true
            }
            Lookup::MissingEntry => {
                tracing::warn!(
                    caller = caller_uid,
                    target = target_uid,
                    "no cache entry for pair; denying visibility"
                );
                true
            }
        })
    }

    /// The exhaustive uncached decision chain, in fixed order.
    ///
    /// Callers either drained the recompute sentinel beforehand or pass the
    /// freshly computed component edges as `component_override`.
    fn verdict_uncached(
        &self,
        caller_uid: Uid,
        caller: Option<&Setting>,
        target: &Setting,
        target_user: UserId,
        component_override: Option<&EdgeMap>,
    ) -> bool {
        if !self.config.is_globally_enabled() {
            return false;
        }
        let Some(caller) = caller else {
            tracing::error!(caller = caller_uid, "no setting for above-threshold caller uid");
            return true;
        };
        if !caller.members.is_empty()
            && caller
                .members
                .iter()
                .all(|p| !self.config.package_is_enabled(p))
        {
            return false;
        }
        if !target.has_manifest() {
            return true;
        }
        if target.is_static_shared_library() {
            return false;
        }
        let caller_app = caller.app_id;
        let target_app = target.app_id;
        if is_privileged(caller_app) || is_privileged(target_app) || caller_app == target_app {
            return false;
        }
        if caller.requests_query_all_packages() {
            return false;
        }
        let target_uid = uid(target_user, target_app);
        {
            let store = self.read_store();
            if store.is_force_queryable(target_app) {
                return false;
            }
            if store.queries_package(caller_app, target_app) {
                return false;
            }
            let component_hit = component_override.map_or_else(
                || store.queries_component(caller_app, target_app),
                |edges| edges.get(&caller_app).is_some_and(|t| t.contains(&target_app)),
            );
            if component_hit {
                return false;
            }
            if store.queries_implicitly(caller_uid, target_uid) {
                return false;
            }
        }
        for caller_pkg in &caller.members {
            for target_pkg in &target.members {
                if self.overlay.is_valid_actor(&caller_pkg.name, &target_pkg.name) {
                    return false;
                }
            }
        }
        if cfg!(feature = "debug-allow-all") {
            tracing::debug!(
                caller = caller_uid,
                target = target_uid,
                "visibility would be blocked"
            );
            return false;
        }
        true
    }

    /// Removal body shared by `remove_package` and the replace path.
    fn remove_package_locked(&self, pkg: &PackageRef, packages: &PackageMap, users: &[UserId]) {
        let siblings = self.write_store().remove_package(pkg, packages, users);
        self.overlay.package_removed(pkg);
        self.config.update_package_state(pkg, true);
        if self.cache_ready() {
            if let Some(cache) = self.lock_cache().as_mut() {
                cache.remove_app(pkg.app_id);
            }
            if !siblings.is_empty() {
                let rows = self.rows_for_app(pkg.app_id, packages, users);
                self.apply_rows(rows);
            }
        }
    }

    /// The asynchronous rebuild protocol: snapshot under the provider lock,
    /// compute without it, re-validate, publish or retry synchronously once.
    fn rebuild_cache(&self) {
        let snapshot = with_state(&*self.provider, |packages, users| {
            Snapshot::capture(packages, users)
        });
        let fresh = self.build_cache(&snapshot.packages, &snapshot.users, true);
        with_state(&*self.provider, move |packages, users| {
            if snapshot.matches(packages) && snapshot.users.as_slice() == users {
                self.publish_cache(fresh);
            } else {
                tracing::info!("package state changed during async cache rebuild, retrying synchronously");
                let rebuilt = self.build_cache(packages, users, false);
                self.publish_cache(rebuilt);
            }
        });
    }

    /// Evaluate every ordered pair of distinct identities across every
    /// ordered pair of users.
    ///
    /// With `allow_override` the component recompute (if pending) is done
    /// into a scratch map and the store is left untouched; the path that
    /// holds the provider lock drains the sentinel for real instead.
    fn build_cache(
        &self,
        packages: &PackageMap,
        users: &[UserId],
        allow_override: bool,
    ) -> DecisionCache {
        let override_edges = if self.read_store().recompute_required() {
            if allow_override {
                Some(self.read_store().compute_component_edges(packages))
            } else {
                self.drain_recompute(packages);
                None
            }
        } else {
            None
        };
        let ids = identities(packages);
        let mut cache = DecisionCache::new();
        for (&caller_id, caller) in &ids {
            for (&target_id, target) in &ids {
                if caller_id == target_id {
                    continue;
                }
                for &caller_user in users {
                    for &target_user in users {
                        let caller_uid = uid(caller_user, caller_id);
                        let target_uid = uid(target_user, target_id);
                        let filtered = self.verdict_uncached(
                            caller_uid,
                            Some(caller),
                            target,
                            target_user,
                            override_edges.as_ref(),
                        );
                        cache.set(caller_uid, target_uid, filtered);
                    }
                }
            }
        }
        cache
    }

    /// Fresh cache rows touching `app_id`, in both directions, for every
    /// user pair.
    fn rows_for_app(
        &self,
        app_id: AppId,
        packages: &PackageMap,
        users: &[UserId],
    ) -> Vec<(Uid, Uid, bool)> {
        self.drain_recompute(packages);
        let ids = identities(packages);
        let Some(subject) = ids.get(&app_id) else {
            return Vec::new();
        };
        let mut rows = Vec::new();
        for (&other_id, other) in &ids {
            if other_id == app_id {
                continue;
            }
            for &caller_user in users {
                for &target_user in users {
                    let subject_uid = uid(caller_user, app_id);
                    let other_uid = uid(target_user, other_id);
                    rows.push((
                        subject_uid,
                        other_uid,
                        self.verdict_uncached(subject_uid, Some(subject), other, target_user, None),
                    ));
                    let other_caller_uid = uid(caller_user, other_id);
                    let subject_target_uid = uid(target_user, app_id);
                    rows.push((
                        other_caller_uid,
                        subject_target_uid,
                        self.verdict_uncached(
                            other_caller_uid,
                            Some(other),
                            subject,
                            target_user,
                            None,
                        ),
                    ));
                }
            }
        }
        rows
    }

    /// Apply precomputed rows under the cache lock, if a cache exists.
    fn apply_rows(&self, rows: Vec<(Uid, Uid, bool)>) {
        if let Some(cache) = self.lock_cache().as_mut() {
            for (caller, target, filtered) in rows {
                cache.set(caller, target, filtered);
            }
        }
    }

    /// Swap in a freshly built cache.
    fn publish_cache(&self, cache: DecisionCache) {
        let pairs = cache.pair_count();
        *self.lock_cache() = Some(cache);
        tracing::debug!(pairs, "published decision cache");
    }

    /// Rebuild component edges in place when the sentinel is set. Must be
    /// called under the provider lock.
    fn drain_recompute(&self, packages: &PackageMap) {
        if self.read_store().recompute_required() {
            self.write_store().recompute_component_edges(packages);
        }
    }

    /// Blocked-verdict log line, suppressed unless opted in.
    fn log_blocked(&self, caller_uid: Uid, target_uid: Uid) {
        if DEBUG_LOGGING || self.config.is_logging_enabled(app_id_of(caller_uid)) {
            tracing::info!(caller = caller_uid, target = target_uid, "BLOCKED");
        }
    }

    /// Read-lock the relation store, recovering from poisoning.
    fn read_store(&self) -> RwLockReadGuard<'_, RelationStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write-lock the relation store, recovering from poisoning.
    fn write_store(&self) -> RwLockWriteGuard<'_, RelationStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the cache slot, recovering from poisoning.
    fn lock_cache(&self) -> MutexGuard<'_, Option<DecisionCache>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
