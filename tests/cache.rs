//! Decision-cache lifecycle: rebuild protocol, incremental maintenance,
//! anomaly policy.

#[allow(dead_code)]
mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use common::{Harness, pkg, queries_package};
use pkgvis::config::{DeviceConfig, DeviceFeatureConfig};
use pkgvis::exec::{ImmediateExecutor, TokioExecutor};
use pkgvis::ids::{UserId, uid};
use pkgvis::overlay::NoOverlay;
use pkgvis::provider::{MemoryStateProvider, PackageMap, StateProvider};
use pkgvis::{Setting, VisibilityFilter};

#[test]
fn cache_matches_uncached_verdicts() {
    let h = Harness::new(vec![0, 1]);
    let a = h.install(pkg("A", 10_100));
    let b = h.install(queries_package(pkg("B", 10_101), "A"));
    let c = h.install(pkg("C", 10_102));

    let pairs = [(&a, &b), (&b, &a), (&a, &c), (&c, &a), (&b, &c), (&c, &b)];
    let mut uncached = Vec::new();
    for (caller, target) in pairs {
        for user in [0, 1] {
            uncached.push(h.filtered(caller, target, user));
        }
    }

    h.filter.on_system_ready();
    assert!(h.filter.cache_ready());

    let mut cached = Vec::new();
    for (caller, target) in pairs {
        for user in [0, 1] {
            cached.push(h.filtered(caller, target, user));
        }
    }
    assert_eq!(cached, uncached);
}

#[test]
fn unknown_caller_is_a_hard_miss_after_ready() {
    let h = Harness::new(vec![0]);
    let a = h.install(pkg("A", 10_100));
    h.filter.on_system_ready();

    let target = Setting::package(a);
    assert!(h.filter.should_filter(uid(0, 10_999), None, &target, 0));
}

#[test]
fn incremental_add_fills_rows_in_both_directions() {
    let h = Harness::new(vec![0]);
    let a = h.install(pkg("A", 10_100));
    h.filter.on_system_ready();

    let c = h.install(queries_package(pkg("C", 10_102), "A"));
    assert!(!h.filtered(&c, &a, 0));
    assert!(h.filtered(&a, &c, 0));
}

#[test]
fn removal_evicts_rows() {
    let h = Harness::new(vec![0]);
    let a = h.install(pkg("A", 10_100));
    let b = h.install(queries_package(pkg("B", 10_101), "A"));
    h.filter.on_system_ready();
    assert!(!h.filtered(&b, &a, 0));

    h.uninstall(&b);
    // The departed identity now misses the cache entirely; visibility is
    // denied in both directions.
    assert!(h.filtered(&b, &a, 0));
    assert!(h.filtered(&a, &b, 0));
}

#[test]
fn grant_updates_exactly_one_cell() {
    let h = Harness::new(vec![0, 1]);
    let a = h.install(pkg("A", 10_100));
    let b = h.install(pkg("B", 10_101));
    h.filter.on_system_ready();

    assert!(h.filter.grant_implicit_access(uid(0, 10_100), uid(0, 10_101)));
    assert!(!h.filtered(&a, &b, 0));
    assert!(h.filtered(&b, &a, 0));

    let a_setting = Setting::package(a);
    let b_setting = Setting::package(b);
    assert!(
        h.filter
            .should_filter(uid(1, 10_100), Some(&a_setting), &b_setting, 1)
    );
}

#[test]
fn users_changed_rebuilds_for_new_users() {
    let h = Harness::new(vec![0]);
    let a = h.install(pkg("A", 10_100));
    let b = h.install(queries_package(pkg("B", 10_101), "A"));
    h.filter.on_system_ready();

    // A user the cache has never seen is a hard miss.
    let a_setting = Setting::package(a);
    let b_setting = Setting::package(b.clone());
    assert!(
        h.filter
            .should_filter(uid(1, 10_101), Some(&b_setting), &a_setting, 1)
    );

    h.provider.set_users(vec![0, 1]);
    h.filter.on_users_changed();
    assert!(
        !h.filter
            .should_filter(uid(1, 10_101), Some(&b_setting), &a_setting, 1)
    );
}

#[test]
fn compat_change_recomputes_touched_rows() {
    let h = Harness::new(vec![0]);
    let a = h.install(pkg("A", 10_100));
    let b = h.install(pkg("B", 10_101));
    h.filter.on_system_ready();
    assert!(h.filtered(&b, &a, 0));

    // Excluding B from filtering flips its caller rows to visible.
    h.config.set_package_enabled("B", false);
    h.filter.on_compat_change("B");
    assert!(!h.filtered(&b, &a, 0));
    assert!(h.filtered(&a, &b, 0));

    h.config.set_package_enabled("B", true);
    h.filter.on_compat_change("B");
    assert!(h.filtered(&b, &a, 0));
}

/// Serves a different package table on each `run_with_state` call, to force
/// the asynchronous rebuild's snapshot validation to fail.
struct SwappingProvider {
    states: Mutex<Vec<(PackageMap, Vec<UserId>)>>,
    calls: AtomicUsize,
}

impl SwappingProvider {
    fn new(states: Vec<(PackageMap, Vec<UserId>)>) -> Self {
        Self {
            states: Mutex::new(states),
            calls: AtomicUsize::new(0),
        }
    }
}

impl StateProvider for SwappingProvider {
    fn run_with_state(&self, cb: &mut dyn FnMut(&PackageMap, &[UserId])) {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let (packages, users) = &states[call.min(states.len() - 1)];
        cb(packages, users);
    }
}

fn table(pkgs: &[pkgvis::PackageRef]) -> PackageMap {
    pkgs.iter()
        .map(|p| (p.name.clone(), Arc::clone(p)))
        .collect::<HashMap<_, _>>()
}

#[test]
fn invalidated_async_rebuild_retries_synchronously() {
    let a = Arc::new(pkg("A", 10_100));
    let b_old = Arc::new(pkg("B", 10_101));
    let mut b = pkg("B", 10_101);
    common::manifest_of(&mut b)
        .requested_permissions
        .push(pkgvis::manifest::QUERY_ALL_PACKAGES.to_string());
    let b_new = Arc::new(b);

    // The two add calls and the validation pass see the current table; the
    // rebuild's snapshot pass sees a stale one where B lacked the
    // query-all-packages permission.
    let current = table(&[a.clone(), b_new.clone()]);
    let stale = table(&[a.clone(), b_old]);
    let provider = Arc::new(SwappingProvider::new(vec![
        (current.clone(), vec![0]),
        (current.clone(), vec![0]),
        (stale, vec![0]),
        (current, vec![0]),
    ]));
    let filter = Arc::new(VisibilityFilter::new(
        provider,
        Arc::new(DeviceFeatureConfig::new()),
        Arc::new(NoOverlay),
        Arc::new(ImmediateExecutor),
        &DeviceConfig::default(),
    ));
    filter.add_package(&a, false);
    filter.add_package(&b_new, false);

    filter.on_system_ready();
    assert!(filter.cache_ready());

    // The published cache must reflect the state seen at validation time
    // (B holds the permission), not the invalidated snapshot.
    let a_setting = Setting::package(a);
    let b_setting = Setting::package(b_new);
    assert!(!filter.should_filter(uid(0, 10_101), Some(&b_setting), &a_setting, 0));
    assert!(filter.should_filter(uid(0, 10_100), Some(&a_setting), &b_setting, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_rebuild_publishes_off_thread() {
    let provider = Arc::new(MemoryStateProvider::new(vec![0]));
    let filter = Arc::new(VisibilityFilter::new(
        provider.clone(),
        Arc::new(DeviceFeatureConfig::new()),
        Arc::new(NoOverlay),
        Arc::new(TokioExecutor::current()),
        &DeviceConfig::default(),
    ));
    let a = provider.install(pkg("A", 10_100));
    filter.add_package(&a, false);

    filter.on_system_ready();
    for _ in 0..500 {
        if filter.cache_ready() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(filter.cache_ready());
}
