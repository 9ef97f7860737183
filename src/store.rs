//! The normalized graph of pairwise visibility relations.
//!
//! Four redundant views of "who sees whom" are kept for lookup speed: the
//! force-queryable set, manifest-driven package-name edges, intent/authority
//! component edges, and runtime-granted implicit edges keyed by uid. The
//! store also owns the union of protected-broadcast declarations and the
//! sentinel that marks component edges as stale whenever that union grows.
//!
//! All mutation happens while the caller holds the package-manager lock; the
//! store itself is wrapped in an `RwLock` by the filter so queries can read
//! it concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ids::{AppId, Uid, UserId, uid};
use crate::intent::intent_matches_filter;
use crate::manifest::ComponentKind;
use crate::package::{PLATFORM_PACKAGE, PackageRef, PackageSetting};
use crate::provider::PackageMap;

/// Adjacency map from a caller identity to the identities it may observe.
pub type EdgeMap = HashMap<AppId, HashSet<AppId>>;

/// The in-memory visibility relation store.
#[derive(Debug, Default)]
pub struct RelationStore {
    /// Identities visible to every caller, unconditionally.
    force_queryable: HashSet<AppId>,
    /// Edges from manifest package-name queries, install provenance, and
    /// instrumentation.
    queries_via_package: EdgeMap,
    /// Edges from `<queries>` intents and provider authorities.
    queries_via_component: EdgeMap,
    /// Runtime-granted edges, scoped to concrete uids rather than app ids.
    implicitly_queryable: HashMap<Uid, HashSet<Uid>>,
    /// Union of protected-broadcast actions across installed packages.
    protected_broadcasts: HashSet<String>,
    /// Set when `protected_broadcasts` grew (or shrank on removal) and
    /// component edges may be stale; drained by a full recompute on the next
    /// evaluation that needs them.
    component_recompute_required: bool,
    /// Signing fingerprint of the platform package, once it has been added.
    platform_fingerprint: Option<String>,
    /// Package names the device configuration marks force-queryable.
    device_force_queryable: HashSet<String>,
    /// Whether the device marks every system package force-queryable.
    system_apps_queryable: bool,
}

impl RelationStore {
    /// Create an empty store with the device's construction-time inputs.
    #[must_use]
    pub fn new(device_force_queryable: &[String], system_apps_queryable: bool) -> Self {
        Self {
            device_force_queryable: device_force_queryable.iter().cloned().collect(),
            system_apps_queryable,
            ..Default::default()
        }
    }

    /// Whether `app_id` is visible to every caller.
    #[must_use]
    pub fn is_force_queryable(&self, app_id: AppId) -> bool {
        self.force_queryable.contains(&app_id)
    }

    /// The force-queryable set.
    #[must_use]
    pub const fn force_queryable(&self) -> &HashSet<AppId> {
        &self.force_queryable
    }

    /// Whether a package-name/installer/instrumentation edge exists.
    #[must_use]
    pub fn queries_package(&self, caller: AppId, target: AppId) -> bool {
        self.queries_via_package
            .get(&caller)
            .is_some_and(|t| t.contains(&target))
    }

    /// Whether a component edge exists. Callers must have drained the
    /// recompute sentinel (or consult an override) before trusting this.
    #[must_use]
    pub fn queries_component(&self, caller: AppId, target: AppId) -> bool {
        self.queries_via_component
            .get(&caller)
            .is_some_and(|t| t.contains(&target))
    }

    /// Whether a runtime grant from `caller` to `target` exists.
    #[must_use]
    pub fn queries_implicitly(&self, caller: Uid, target: Uid) -> bool {
        self.implicitly_queryable
            .get(&caller)
            .is_some_and(|t| t.contains(&target))
    }

    /// The package-name edge rows, for diagnostics.
    #[must_use]
    pub const fn package_edges(&self) -> &EdgeMap {
        &self.queries_via_package
    }

    /// The component edge rows, for diagnostics.
    #[must_use]
    pub const fn component_edges(&self) -> &EdgeMap {
        &self.queries_via_component
    }

    /// The runtime-grant rows, for diagnostics.
    #[must_use]
    pub const fn implicit_edges(&self) -> &HashMap<Uid, HashSet<Uid>> {
        &self.implicitly_queryable
    }

    /// Whether component edges are stale and need a recompute.
    #[must_use]
    pub const fn recompute_required(&self) -> bool {
        self.component_recompute_required
    }

    /// Record a runtime grant. Returns `true` when the edge is new.
    pub fn grant_implicit(&mut self, recipient: Uid, visible: Uid) -> bool {
        self.implicitly_queryable
            .entry(recipient)
            .or_default()
            .insert(visible)
    }

    /// Incorporate a newly installed (or replaced) package.
    pub fn add_package(&mut self, pkg: &PackageRef, packages: &PackageMap) {
        if pkg.name == PLATFORM_PACKAGE {
            self.platform_fingerprint = Some(pkg.signing_fingerprint.clone());
            for other in packages.values() {
                if other.name != pkg.name && self.platform_signed(other) {
                    self.force_queryable.insert(other.app_id);
                }
            }
        }

        if let Some(manifest) = &pkg.manifest {
            let mut grew = false;
            for action in &manifest.protected_broadcasts {
                grew |= self.protected_broadcasts.insert(action.clone());
            }
            if grew {
                tracing::debug!(pkg = %pkg.name, "protected broadcasts grew, component edges marked stale");
                self.component_recompute_required = true;
            }
        }

        if self.computes_force_queryable(pkg) || self.platform_signed(pkg) {
            self.force_queryable.insert(pkg.app_id);
        }

        for other in packages.values() {
            if other.name == pkg.name
                || other.app_id == pkg.app_id
                || other.manifest.is_none()
            {
                continue;
            }
            if !self.component_recompute_required {
                if !self.is_force_queryable(pkg.app_id)
                    && can_query_via_components(other, pkg, &self.protected_broadcasts)
                {
                    add_edge(&mut self.queries_via_component, other.app_id, pkg.app_id);
                }
                if !self.is_force_queryable(other.app_id)
                    && can_query_via_components(pkg, other, &self.protected_broadcasts)
                {
                    add_edge(&mut self.queries_via_component, pkg.app_id, other.app_id);
                }
            }
            if !self.is_force_queryable(pkg.app_id)
                && (can_query_via_package(other, pkg) || can_query_as_installer(other, pkg))
            {
                add_edge(&mut self.queries_via_package, other.app_id, pkg.app_id);
            }
            if !self.is_force_queryable(other.app_id)
                && (can_query_via_package(pkg, other) || can_query_as_installer(pkg, other))
            {
                add_edge(&mut self.queries_via_package, pkg.app_id, other.app_id);
            }
            if pkg_instruments(pkg, other) || pkg_instruments(other, pkg) {
                add_edge(&mut self.queries_via_package, pkg.app_id, other.app_id);
                add_edge(&mut self.queries_via_package, other.app_id, pkg.app_id);
            }
        }
        tracing::debug!(pkg = %pkg.name, app_id = pkg.app_id, "added package relations");
    }

    /// Drop a departing package from every relation and re-add surviving
    /// shared-user siblings so the edges they carry are restored.
    ///
    /// Returns the re-added siblings so the cache rows for the shared
    /// identity can be recomputed.
    pub fn remove_package(
        &mut self,
        pkg: &PackageRef,
        packages: &PackageMap,
        users: &[UserId],
    ) -> Vec<PackageRef> {
        for &user in users {
            let departing = uid(user, pkg.app_id);
            self.implicitly_queryable.remove(&departing);
            self.implicitly_queryable.retain(|_, visible| {
                visible.remove(&departing);
                !visible.is_empty()
            });
        }

        // The component pass is pointless while a recompute is pending; the
        // rebuild starts from a cleared map anyway.
        if self.component_recompute_required {
            self.queries_via_component.remove(&pkg.app_id);
        } else {
            remove_app_edges(&mut self.queries_via_component, pkg.app_id);
        }
        remove_app_edges(&mut self.queries_via_package, pkg.app_id);

        self.force_queryable.remove(&pkg.app_id);

        if pkg
            .manifest
            .as_ref()
            .is_some_and(|m| !m.protected_broadcasts.is_empty())
        {
            let mut rebuilt = HashSet::new();
            for other in packages.values() {
                if other.name == pkg.name {
                    continue;
                }
                if let Some(m) = &other.manifest {
                    rebuilt.extend(m.protected_broadcasts.iter().cloned());
                }
            }
            if rebuilt.len() < self.protected_broadcasts.len() {
                // Receiver matches suppressed by the departed declarations may
                // now be valid; edges are wrongly absent until a recompute.
                tracing::debug!(pkg = %pkg.name, "protected broadcasts shrank, component edges marked stale");
                self.component_recompute_required = true;
            }
            self.protected_broadcasts = rebuilt;
        }

        let mut siblings = Vec::new();
        if let Some(shared) = &pkg.shared_user {
            for other in packages.values() {
                if other.name != pkg.name && other.shared_user.as_deref() == Some(shared) {
                    siblings.push(Arc::clone(other));
                }
            }
            for sibling in &siblings {
                self.add_package(sibling, packages);
            }
        }
        tracing::debug!(pkg = %pkg.name, app_id = pkg.app_id, siblings = siblings.len(), "removed package relations");
        siblings
    }

    /// Compute fresh component edges for the whole table without touching the
    /// store.
    ///
    /// Used both by [`Self::recompute_component_edges`] and by the
    /// asynchronous cache rebuild, which must not publish a recompute based
    /// on a snapshot that may already be stale.
    #[must_use]
    pub fn compute_component_edges(&self, packages: &PackageMap) -> EdgeMap {
        let mut edges = EdgeMap::new();
        for caller in packages.values() {
            let Some(caller_manifest) = &caller.manifest else {
                continue;
            };
            if caller_manifest.requests_query_all_packages() {
                continue;
            }
            for target in packages.values() {
                if caller.app_id == target.app_id
                    || target.manifest.is_none()
                    || self.is_force_queryable(target.app_id)
                {
                    continue;
                }
                if can_query_via_components(caller, target, &self.protected_broadcasts) {
                    add_edge(&mut edges, caller.app_id, target.app_id);
                }
            }
        }
        edges
    }

    /// Rebuild the component edge map from scratch and clear the sentinel.
    pub fn recompute_component_edges(&mut self, packages: &PackageMap) {
        self.queries_via_component = self.compute_component_edges(packages);
        self.component_recompute_required = false;
        tracing::debug!(
            rows = self.queries_via_component.len(),
            "recomputed component edges"
        );
    }

    /// Whether a newly added package must be marked force-queryable.
    fn computes_force_queryable(&self, pkg: &PackageSetting) -> bool {
        let manifest_force = pkg.manifest.as_ref().is_some_and(|m| m.force_queryable);
        self.force_queryable.contains(&pkg.app_id)
            || pkg.force_queryable_override
            || (manifest_force && self.platform_equivalent_signed(pkg))
            || (pkg.is_system
                && (self.system_apps_queryable
                    || manifest_force
                    || self.device_force_queryable.contains(&pkg.name)))
    }

    /// Whether `pkg` is a system package carrying the platform signature.
    ///
    /// Strict fingerprint equality; rotation history is not consulted.
    fn platform_signed(&self, pkg: &PackageSetting) -> bool {
        pkg.is_system && self.platform_equivalent_signed(pkg)
    }

    /// Whether `pkg` is signed with the platform's signing identity.
    fn platform_equivalent_signed(&self, pkg: &PackageSetting) -> bool {
        self.platform_fingerprint.as_deref() == Some(pkg.signing_fingerprint.as_str())
    }
}

/// Insert a directed edge.
fn add_edge(map: &mut EdgeMap, caller: AppId, target: AppId) {
    map.entry(caller).or_default().insert(target);
}

/// Remove `app_id` as key and as value, pruning rows that become empty so a
/// later add restores the map bit-for-bit.
fn remove_app_edges(map: &mut EdgeMap, app_id: AppId) {
    map.remove(&app_id);
    map.retain(|_, targets| {
        targets.remove(&app_id);
        !targets.is_empty()
    });
}

/// Whether `caller`'s manifest names `target` in its `<queries>` packages.
#[must_use]
pub fn can_query_via_package(caller: &PackageSetting, target: &PackageSetting) -> bool {
    caller
        .manifest
        .as_ref()
        .is_some_and(|m| m.queries.packages.iter().any(|n| n == &target.name))
}

/// Whether `caller` may observe `target` because it is recorded as the
/// package that installed it.
///
/// Directional: the installer sees the installee, never the reverse. The
/// initiating package qualifies only while it is itself still installed.
#[must_use]
pub fn can_query_as_installer(caller: &PackageSetting, target: &PackageSetting) -> bool {
    let source = &target.install_source;
    if source.installer_package.as_deref() == Some(caller.name.as_str()) {
        return true;
    }
    !source.initiating_uninstalled
        && source.initiating_package.as_deref() == Some(caller.name.as_str())
}

/// Whether any of `caller`'s `<queries>` intents or provider authorities
/// resolve against an exported component of `target`.
///
/// Receiver matches are disqualified when the matched action is a protected
/// broadcast; activity, service, and provider matches are not.
#[must_use]
pub fn can_query_via_components(
    caller: &PackageSetting,
    target: &PackageSetting,
    protected_broadcasts: &HashSet<String>,
) -> bool {
    let (Some(caller_manifest), Some(target_manifest)) = (&caller.manifest, &target.manifest)
    else {
        return false;
    };
    for intent in &caller_manifest.queries.intents {
        for component in &target_manifest.components {
            if !component.exported {
                continue;
            }
            if !component.filters.iter().any(|f| intent_matches_filter(intent, f)) {
                continue;
            }
            if component.kind == ComponentKind::Receiver {
                let suppressed = intent
                    .action
                    .as_ref()
                    .is_some_and(|a| protected_broadcasts.contains(a));
                if suppressed {
                    continue;
                }
            }
            return true;
        }
    }
    if !caller_manifest.queries.provider_authorities.is_empty() {
        for component in &target_manifest.components {
            if component.kind == ComponentKind::Provider
                && component.exported
                && component.authorities.as_ref().is_some_and(|authorities| {
                    authorities.split(';').any(|a| {
                        caller_manifest
                            .queries
                            .provider_authorities
                            .iter()
                            .any(|q| q == a)
                    })
                })
            {
                return true;
            }
        }
    }
    false
}

/// Whether any instrumentation entry of `a` targets `b`.
#[must_use]
pub fn pkg_instruments(a: &PackageSetting, b: &PackageSetting) -> bool {
    a.manifest
        .as_ref()
        .is_some_and(|m| m.instrumentation_targets.iter().any(|t| t == &b.name))
}
