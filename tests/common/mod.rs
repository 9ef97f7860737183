//! Shared builders and harness for the integration suites.

use std::sync::Arc;

use pkgvis::config::{DeviceConfig, DeviceFeatureConfig};
use pkgvis::exec::ImmediateExecutor;
use pkgvis::ids::{AppId, UserId, uid};
use pkgvis::manifest::{
    ComponentInfo, ComponentKind, IntentFilterSpec, ManifestView, QueryIntent,
};
use pkgvis::overlay::NoOverlay;
use pkgvis::package::InstallSource;
use pkgvis::provider::MemoryStateProvider;
use pkgvis::{PackageRef, PackageSetting, Setting, VisibilityFilter};

/// A filter wired to the in-memory provider, the default feature config, and
/// the inline executor.
pub struct Harness {
    pub provider: Arc<MemoryStateProvider>,
    pub config: Arc<DeviceFeatureConfig>,
    pub filter: Arc<VisibilityFilter>,
}

impl Harness {
    pub fn new(users: Vec<UserId>) -> Self {
        Self::with_device(users, &DeviceConfig::default())
    }

    pub fn with_device(users: Vec<UserId>, device: &DeviceConfig) -> Self {
        let provider = Arc::new(MemoryStateProvider::new(users));
        let config = Arc::new(DeviceFeatureConfig::new());
        let filter = Arc::new(VisibilityFilter::new(
            provider.clone(),
            config.clone(),
            Arc::new(NoOverlay),
            Arc::new(ImmediateExecutor),
            device,
        ));
        Self {
            provider,
            config,
            filter,
        }
    }

    /// Install into the provider table, then inform the filter.
    pub fn install(&self, pkg: PackageSetting) -> PackageRef {
        let pkg = self.provider.install(pkg);
        self.filter.add_package(&pkg, false);
        pkg
    }

    /// Replace an installed package with a new record of the same name.
    pub fn replace(&self, pkg: PackageSetting) -> PackageRef {
        let pkg = self.provider.install(pkg);
        self.filter.add_package(&pkg, true);
        pkg
    }

    /// Remove from the provider table, then inform the filter.
    pub fn uninstall(&self, pkg: &PackageRef) {
        self.provider.uninstall(&pkg.name);
        self.filter.remove_package(pkg);
    }

    /// Single-package caller asking about a single-package target.
    pub fn filtered(&self, caller: &PackageRef, target: &PackageRef, user: UserId) -> bool {
        let caller_setting = Setting::package(Arc::clone(caller));
        let target_setting = Setting::package(Arc::clone(target));
        self.filter.should_filter(
            uid(user, caller.app_id),
            Some(&caller_setting),
            &target_setting,
            user,
        )
    }
}

/// Minimal ordinary package with an empty manifest.
pub fn pkg(name: &str, app_id: AppId) -> PackageSetting {
    PackageSetting {
        name: name.to_string(),
        app_id,
        is_system: false,
        is_static_shared_library: false,
        signing_fingerprint: format!("sig:{name}"),
        install_source: InstallSource::default(),
        shared_user: None,
        force_queryable_override: false,
        manifest: Some(ManifestView::default()),
    }
}

/// System package carrying an explicit signing fingerprint.
pub fn system_pkg(name: &str, app_id: AppId, fingerprint: &str) -> PackageSetting {
    let mut p = pkg(name, app_id);
    p.is_system = true;
    p.signing_fingerprint = fingerprint.to_string();
    p
}

/// Mutable access to a builder package's manifest.
pub fn manifest_of(pkg: &mut PackageSetting) -> &mut ManifestView {
    pkg.manifest.as_mut().expect("builder packages carry a manifest")
}

/// Add a `<queries><package/>` declaration.
pub fn queries_package(mut pkg: PackageSetting, target: &str) -> PackageSetting {
    manifest_of(&mut pkg).queries.packages.push(target.to_string());
    pkg
}

/// Add a `<queries><intent/>` declaration for a bare action.
pub fn queries_action(mut pkg: PackageSetting, action: &str) -> PackageSetting {
    manifest_of(&mut pkg).queries.intents.push(QueryIntent {
        action: Some(action.to_string()),
        ..Default::default()
    });
    pkg
}

/// Add an exported component with a single-action intent filter.
pub fn exports_component(
    mut pkg: PackageSetting,
    kind: ComponentKind,
    name: &str,
    action: &str,
) -> PackageSetting {
    manifest_of(&mut pkg).components.push(ComponentInfo {
        kind,
        name: name.to_string(),
        exported: true,
        filters: vec![IntentFilterSpec {
            actions: vec![action.to_string()],
            ..Default::default()
        }],
        authorities: None,
    });
    pkg
}

/// Declare a protected broadcast action.
pub fn protects_broadcast(mut pkg: PackageSetting, action: &str) -> PackageSetting {
    manifest_of(&mut pkg)
        .protected_broadcasts
        .push(action.to_string());
    pkg
}
