//! Access to the authoritative package table.
//!
//! The filter never owns the package table. A [`StateProvider`] exposes it
//! through [`StateProvider::run_with_state`], which runs a callback while
//! holding the package-manager lock; every read of the table happens inside
//! that callback. Nothing read there may be retained past the callback
//! except through a [`Snapshot`], which can later detect concurrent mutation
//! by reference identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::ids::{AppId, UserId};
use crate::package::{PackageRef, PackageSetting, Setting};

/// The authoritative package table, keyed by package name.
pub type PackageMap = HashMap<String, PackageRef>;

/// Owner of the package-manager lock.
///
/// Implementations hold their lock for the duration of the callback. The
/// filter calls this from queries (uncached fallback), from mutation entry
/// points, and twice per asynchronous cache rebuild.
pub trait StateProvider: Send + Sync {
    /// Invoke `cb` with the package table and the active users while holding
    /// the package-manager lock.
    fn run_with_state(&self, cb: &mut dyn FnMut(&PackageMap, &[UserId]));
}

/// Run `cb` under the provider lock and return its result.
///
/// Thin adapter over the object-safe callback shape of
/// [`StateProvider::run_with_state`].
pub fn with_state<R>(
    provider: &dyn StateProvider,
    cb: impl FnOnce(&PackageMap, &[UserId]) -> R,
) -> R {
    let mut cb = Some(cb);
    let mut out = None;
    provider.run_with_state(&mut |packages, users| {
        if let Some(cb) = cb.take() {
            out = Some(cb(packages, users));
        }
    });
    out.expect("state provider must invoke the callback")
}

/// A shallow copy of the package table and active users, captured under the
/// provider lock.
///
/// Package records are externally-owned immutables behind [`Arc`], so holding
/// the clones is safe; [`Snapshot::matches`] later detects any concurrent
/// swap or install by comparing key sets and reference identity.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Cloned handles to every installed package.
    pub packages: PackageMap,
    /// Active users at capture time.
    pub users: Vec<UserId>,
}

impl Snapshot {
    /// Capture the current state.
    #[must_use]
    pub fn capture(packages: &PackageMap, users: &[UserId]) -> Self {
        Self {
            packages: packages.clone(),
            users: users.to_vec(),
        }
    }

    /// Whether the captured table is still current: same key set, and every
    /// entry is the very same record (not an equal-looking replacement).
    #[must_use]
    pub fn matches(&self, current: &PackageMap) -> bool {
        self.packages.len() == current.len()
            && self
                .packages
                .iter()
                .all(|(name, pkg)| current.get(name).is_some_and(|c| Arc::ptr_eq(c, pkg)))
    }
}

/// Group a package table into one [`Setting`] per distinct [`AppId`].
///
/// Packages sharing an identity collapse into a single shared-user setting.
#[must_use]
pub fn identities(packages: &PackageMap) -> HashMap<AppId, Setting> {
    let mut grouped: HashMap<AppId, Vec<PackageRef>> = HashMap::new();
    for pkg in packages.values() {
        grouped.entry(pkg.app_id).or_default().push(Arc::clone(pkg));
    }
    grouped
        .into_iter()
        .map(|(app_id, members)| {
            let shared = members.iter().find_map(|p| p.shared_user.clone());
            let setting = match shared {
                Some(name) => Setting::shared(&name, members),
                None => Setting {
                    app_id,
                    shared_user: None,
                    members,
                },
            };
            (app_id, setting)
        })
        .collect()
}

/// Internal state of [`MemoryStateProvider`].
#[derive(Default)]
struct MemoryState {
    /// The package table.
    packages: PackageMap,
    /// Active users.
    users: Vec<UserId>,
}

/// Mutex-backed in-memory package table implementing [`StateProvider`].
///
/// Suitable for hosts that own their package store outright, and the provider
/// used throughout the test suite. Callers mutate the table first (install,
/// remove, replace) and then inform the filter; the filter re-acquires the
/// lock through [`StateProvider::run_with_state`].
#[derive(Default)]
pub struct MemoryStateProvider {
    /// The package-manager lock and the state it guards.
    inner: Mutex<MemoryState>,
}

impl MemoryStateProvider {
    /// Create an empty table with the given active users.
    #[must_use]
    pub fn new(users: Vec<UserId>) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                packages: PackageMap::new(),
                users,
            }),
        }
    }

    /// Insert or replace a package record, returning the shared handle.
    pub fn install(&self, pkg: PackageSetting) -> PackageRef {
        let pkg = Arc::new(pkg);
        let mut state = self.lock();
        state.packages.insert(pkg.name.clone(), Arc::clone(&pkg));
        pkg
    }

    /// Remove a package record by name, returning it if present.
    pub fn uninstall(&self, name: &str) -> Option<PackageRef> {
        self.lock().packages.remove(name)
    }

    /// Replace the active-user list.
    pub fn set_users(&self, users: Vec<UserId>) {
        self.lock().users = users;
    }

    /// Acquire the inner lock, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateProvider for MemoryStateProvider {
    fn run_with_state(&self, cb: &mut dyn FnMut(&PackageMap, &[UserId])) {
        let state = self.lock();
        cb(&state.packages, &state.users);
    }
}
