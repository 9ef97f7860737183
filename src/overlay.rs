//! Overlay-actor collaborator.
//!
//! The overlay subsystem may designate a package as a valid actor on a
//! target it overlays; such an actor is granted visibility even with no
//! declared relation. The filter only consumes the narrow query below and
//! keeps the mapper informed of package lifecycle.

use crate::package::PackageSetting;

/// Mapping from overlay actors to the targets they may act on.
pub trait OverlayActorMapper: Send + Sync {
    /// Observe a package being added to the system.
    fn package_added(&self, _pkg: &PackageSetting) {}

    /// Observe a package being removed from the system.
    fn package_removed(&self, _pkg: &PackageSetting) {}

    /// Whether `caller_package` is a valid overlay actor on
    /// `target_package`.
    fn is_valid_actor(&self, caller_package: &str, target_package: &str) -> bool;
}

/// Mapper for systems without overlay support; nothing is ever an actor.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOverlay;

impl OverlayActorMapper for NoOverlay {
    fn is_valid_actor(&self, _caller_package: &str, _target_package: &str) -> bool {
        false
    }
}
