//! Visibility whitelist and diagnostic dump content.

#[allow(dead_code)]
mod common;

use std::io::Write as _;

use common::{Harness, pkg, queries_package};
use pkgvis::config::{DeviceConfig, FeatureConfig};
use pkgvis::ids::uid;
use pkgvis::provider::with_state;
use pkgvis::Setting;

fn dump(h: &Harness, filter_app_id: Option<u32>) -> String {
    let mut out = Vec::new();
    h.filter
        .dump_queries(&mut out, filter_app_id, &[0])
        .expect("dump to a vec cannot fail");
    String::from_utf8(out).expect("dump output is utf-8")
}

#[test]
fn whitelist_lists_allowed_callers_per_user() {
    let h = Harness::new(vec![0, 1]);
    let a = h.install(pkg("A", 10_100));
    let _b = h.install(queries_package(pkg("B", 10_101), "A"));
    let _c = h.install(pkg("C", 10_102));

    let target = Setting::package(a);
    let whitelist = with_state(&*h.provider, |packages, users| {
        h.filter.visibility_whitelist(&target, users, packages)
    })
    .expect("ordinary targets get an explicit whitelist");

    // The target itself and the declaring caller, for every user; C is out.
    assert_eq!(whitelist.len(), 2);
    for user in [0, 1] {
        assert_eq!(whitelist.get(&user), Some(&vec![10_100, 10_101]));
    }
}

#[test]
fn whitelist_is_absent_for_force_queryable_targets() {
    let h = Harness::new(vec![0]);
    let mut a = pkg("A", 10_100);
    a.force_queryable_override = true;
    let a = h.install(a);
    h.install(pkg("B", 10_101));

    let target = Setting::package(a);
    let whitelist = with_state(&*h.provider, |packages, users| {
        h.filter.visibility_whitelist(&target, users, packages)
    });
    assert!(whitelist.is_none());
}

#[test]
fn dump_reports_switch_edges_and_grants() {
    let h = Harness::new(vec![0]);
    let mut f = pkg("F", 10_200);
    f.force_queryable_override = true;
    h.install(f);
    h.install(pkg("A", 10_100));
    h.install(queries_package(pkg("B", 10_101), "A"));
    h.filter.grant_implicit_access(uid(0, 10_100), uid(0, 10_101));
    h.config.enable_logging(10_101, true);

    let report = dump(&h, None);
    assert!(report.contains("queries enabled: true"));
    assert!(report.contains("force queryable: [10200]"));
    assert!(report.contains("10101 -> [10100]"));
    assert!(report.contains("0/10100 -> [\"0/10101\"]"));
    assert!(report.contains("logging enabled app ids: [10101]"));
}

#[test]
fn dump_can_be_restricted_to_one_app_id() {
    let h = Harness::new(vec![0]);
    h.install(pkg("A", 10_100));
    h.install(queries_package(pkg("B", 10_101), "A"));
    h.install(queries_package(pkg("C", 10_102), "A"));

    let report = dump(&h, Some(10_101));
    assert!(report.contains("10101 -> [10100]"));
    assert!(!report.contains("10102 ->"));
}

#[test]
fn device_config_loads_from_json() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("visibility.json");
    let mut file = std::fs::File::create(&path).expect("create config");
    file.write_all(br#"{"force_queryable_packages":["vendor.core"],"system_apps_queryable":true}"#)
        .expect("write config");

    let config = DeviceConfig::load_from_disk(&path);
    assert_eq!(config.force_queryable_packages, vec!["vendor.core"]);
    assert!(config.system_apps_queryable);
}

#[test]
fn missing_or_malformed_device_config_yields_defaults() {
    pkgvis::logging::init("warn");
    let dir = tempfile::tempdir().expect("temp dir");

    let config = DeviceConfig::load_from_disk(&dir.path().join("absent.json"));
    assert!(config.force_queryable_packages.is_empty());
    assert!(!config.system_apps_queryable);

    let path = dir.path().join("broken.json");
    std::fs::write(&path, "not json").expect("write config");
    let config = DeviceConfig::load_from_disk(&path);
    assert!(config.force_queryable_packages.is_empty());
}
