//! Package records and identity groupings as supplied by the package store.
//!
//! A [`PackageSetting`] is owned by the surrounding service and treated as
//! immutable once handed to the filter; replacing a package swaps in a fresh
//! record rather than mutating the old one, which is what lets the
//! asynchronous cache rebuild validate its snapshot by reference identity.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::AppId;
use crate::manifest::ManifestView;

/// Reserved name of the platform package.
///
/// Its arrival pins the platform signing fingerprint and retroactively
/// promotes platform-signed system packages to force-queryable.
pub const PLATFORM_PACKAGE: &str = "platform";

/// Who installed a package, as recorded at install time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstallSource {
    /// Installer of record, if any.
    pub installer_package: Option<String>,
    /// Package that initiated the install session, if any.
    pub initiating_package: Option<String>,
    /// Whether the initiating package has since been uninstalled.
    pub initiating_uninstalled: bool,
}

/// Immutable record for one installed package.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageSetting {
    /// Unique package name.
    pub name: String,
    /// Identity the package runs as; shared-user members share one.
    pub app_id: AppId,
    /// Whether the package ships on the system image.
    pub is_system: bool,
    /// Whether the package is a static shared library (visibility for those
    /// is handled by a separate mechanism, never by this filter).
    pub is_static_shared_library: bool,
    /// Fingerprint of the package's signing identity.
    pub signing_fingerprint: String,
    /// Install provenance.
    #[serde(default)]
    pub install_source: InstallSource,
    /// Shared-user name, when the package opted into one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_user: Option<String>,
    /// Install-time override forcing global visibility.
    #[serde(default)]
    pub force_queryable_override: bool,
    /// Parsed manifest view; absent while a package record exists without
    /// usable manifest data (e.g. mid-uninstall).
    pub manifest: Option<ManifestView>,
}

/// Shared, immutable handle to a package record.
pub type PackageRef = Arc<PackageSetting>;

/// The identity a visibility query is asked about: one package, or all
/// members of a shared user.
///
/// Members always agree on `app_id`; a single-package identity simply has one
/// member.
#[derive(Clone, Debug)]
pub struct Setting {
    /// Identity of the whole group.
    pub app_id: AppId,
    /// Shared-user name when this identity is a shared user.
    pub shared_user: Option<String>,
    /// Member package records.
    pub members: Vec<PackageRef>,
}

impl Setting {
    /// Identity for a single package.
    #[must_use]
    pub fn package(pkg: PackageRef) -> Self {
        Self {
            app_id: pkg.app_id,
            shared_user: pkg.shared_user.clone(),
            members: vec![pkg],
        }
    }

    /// Identity for a shared user and its member packages.
    ///
    /// `members` must be non-empty and agree on `app_id`; the first member's
    /// identity is used.
    #[must_use]
    pub fn shared(name: &str, members: Vec<PackageRef>) -> Self {
        let app_id = members.first().map_or(0, |p| p.app_id);
        Self {
            app_id,
            shared_user: Some(name.to_string()),
            members,
        }
    }

    /// Whether any member still carries a usable manifest view.
    #[must_use]
    pub fn has_manifest(&self) -> bool {
        self.members.iter().any(|p| p.manifest.is_some())
    }

    /// Whether any member is a static shared library.
    #[must_use]
    pub fn is_static_shared_library(&self) -> bool {
        self.members.iter().any(|p| p.is_static_shared_library)
    }

    /// Whether any member requests the query-all-packages permission.
    #[must_use]
    pub fn requests_query_all_packages(&self) -> bool {
        self.members.iter().any(|p| {
            p.manifest
                .as_ref()
                .is_some_and(ManifestView::requests_query_all_packages)
        })
    }
}
