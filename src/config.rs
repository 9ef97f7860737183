//! Feature switches and device configuration.
//!
//! Two kinds of configuration feed the filter. [`DeviceConfig`] is read once
//! at construction: the device's force-queryable package list and its
//! "all system apps queryable" flag. [`FeatureConfig`] is consulted
//! dynamically: the master switch, the compat-driven per-package disable
//! toggle, and the per-identity verdict-logging opt-in.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::ids::AppId;
use crate::package::PackageSetting;

/// Dynamic feature switches consulted on the query and mutation paths.
pub trait FeatureConfig: Send + Sync {
    /// Master switch; when off, the uncached path never filters.
    fn is_globally_enabled(&self) -> bool;

    /// Per-package disable driven by the compatibility framework.
    fn package_is_enabled(&self, pkg: &PackageSetting) -> bool;

    /// Whether blocked-verdict logging is enabled for a caller identity.
    fn is_logging_enabled(&self, app_id: AppId) -> bool;

    /// Toggle blocked-verdict logging for a caller identity.
    fn enable_logging(&self, app_id: AppId, enabled: bool);

    /// Observe a package entering or leaving the system, so per-package
    /// state can be kept current.
    fn update_package_state(&self, pkg: &PackageSetting, removed: bool);

    /// Observe the system becoming ready.
    fn on_system_ready(&self);
}

/// Default [`FeatureConfig`] backed by atomics and small name sets.
///
/// Hosts flip the per-package toggle when the compatibility flag for a
/// package changes, then call the filter's compat-change entry point so the
/// affected cache rows are recomputed.
pub struct DeviceFeatureConfig {
    /// Master switch, default on.
    enabled: AtomicBool,
    /// Names of packages the compat framework has excluded from filtering.
    disabled_packages: RwLock<HashSet<String>>,
    /// Identities opted into blocked-verdict logging.
    logging: RwLock<HashSet<AppId>>,
}

impl Default for DeviceFeatureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFeatureConfig {
    /// Create with the master switch on and no per-package exclusions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disabled_packages: RwLock::new(HashSet::new()),
            logging: RwLock::new(HashSet::new()),
        }
    }

    /// Flip the master switch.
    pub fn set_globally_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Record the compat flag for `name`; `enabled = false` excludes the
    /// package from filtering.
    pub fn set_package_enabled(&self, name: &str, enabled: bool) {
        let mut disabled = write_lock(&self.disabled_packages);
        if enabled {
            disabled.remove(name);
        } else {
            disabled.insert(name.to_string());
        }
    }
}

impl FeatureConfig for DeviceFeatureConfig {
    fn is_globally_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn package_is_enabled(&self, pkg: &PackageSetting) -> bool {
        !read_lock(&self.disabled_packages).contains(&pkg.name)
    }

    fn is_logging_enabled(&self, app_id: AppId) -> bool {
        read_lock(&self.logging).contains(&app_id)
    }

    fn enable_logging(&self, app_id: AppId, enabled: bool) {
        let mut logging = write_lock(&self.logging);
        if enabled {
            logging.insert(app_id);
        } else {
            logging.remove(&app_id);
        }
    }

    fn update_package_state(&self, pkg: &PackageSetting, removed: bool) {
        if removed {
            write_lock(&self.disabled_packages).remove(&pkg.name);
        }
    }

    fn on_system_ready(&self) {
        tracing::debug!(
            enabled = self.is_globally_enabled(),
            "visibility filtering feature ready"
        );
    }
}

/// Construction-time device inputs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Package names the device marks visible to every caller.
    #[serde(default)]
    pub force_queryable_packages: Vec<String>,
    /// Whether every system package is visible to every caller.
    #[serde(default)]
    pub system_apps_queryable: bool,
}

impl DeviceConfig {
    /// Load the device configuration from a JSON file if one exists.
    ///
    /// Malformed or missing input is ignored and defaults are returned, so a
    /// bad config file can never keep the service from starting.
    #[must_use]
    pub fn load_from_disk(path: &Path) -> Self {
        if let Ok(s) = fs::read_to_string(path)
            && let Ok(config) = serde_json::from_str::<Self>(&s)
        {
            return config;
        }
        tracing::debug!(path = %path.display(), "no usable device config, using defaults");
        Self::default()
    }
}

/// Read-lock a set, recovering from poisoning.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Write-lock a set, recovering from poisoning.
fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
