//! Parsed manifest view of a package.
//!
//! The filter never parses manifests itself; the surrounding service hands it
//! this already-parsed, externally-owned view. Only the pieces that influence
//! visibility are carried: declared components with their intent filters,
//! the package's `<queries>` declarations, protected-broadcast declarations,
//! instrumentation targets, and requested permissions.

use serde::{Deserialize, Serialize};

/// Permission that makes every installed package visible to the caller.
pub const QUERY_ALL_PACKAGES: &str = "QUERY_ALL_PACKAGES";

/// Kind of a declared component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    /// UI entry point matched by activity intents.
    Activity,
    /// Broadcast receiver; matches are additionally gated by the
    /// protected-broadcast set.
    Receiver,
    /// Long-running service component.
    Service,
    /// Content provider addressed by authority.
    Provider,
}

/// An intent filter declared on a component.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntentFilterSpec {
    /// Action names the filter accepts.
    pub actions: Vec<String>,
    /// Categories the filter declares.
    pub categories: Vec<String>,
    /// Data schemes the filter accepts.
    pub schemes: Vec<String>,
    /// MIME types the filter accepts; `*/*` and `type/*` wildcards allowed.
    pub mime_types: Vec<String>,
}

/// A single declared component with its visibility-relevant attributes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// What kind of component this is.
    pub kind: ComponentKind,
    /// Component class name, unique within the package.
    pub name: String,
    /// Whether other packages may address the component at all.
    pub exported: bool,
    /// Intent filters attached to the component.
    pub filters: Vec<IntentFilterSpec>,
    /// Semicolon-separated authority list; providers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorities: Option<String>,
}

/// An intent pattern from a `<queries>` declaration.
///
/// Unlike [`IntentFilterSpec`] this is a single concrete pattern: at most one
/// action, one scheme, and one MIME type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryIntent {
    /// Action the caller wants to resolve, if any.
    pub action: Option<String>,
    /// Categories the caller will set on the intent.
    pub categories: Vec<String>,
    /// Data scheme of the intent, if any.
    pub scheme: Option<String>,
    /// MIME type of the intent, if any.
    pub mime_type: Option<String>,
}

/// The `<queries>` section of a manifest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueriesView {
    /// Package names the caller declares interest in.
    pub packages: Vec<String>,
    /// Intent patterns the caller declares it will resolve.
    pub intents: Vec<QueryIntent>,
    /// Provider authorities the caller declares it will address.
    pub provider_authorities: Vec<String>,
}

/// Everything the filter needs out of a parsed manifest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ManifestView {
    /// Broadcast actions this package declares as protected.
    pub protected_broadcasts: Vec<String>,
    /// Declared components.
    pub components: Vec<ComponentInfo>,
    /// The package's `<queries>` declarations.
    pub queries: QueriesView,
    /// Package names this package declares instrumentation against.
    pub instrumentation_targets: Vec<String>,
    /// Permissions the package requests.
    pub requested_permissions: Vec<String>,
    /// Whether the manifest opts the package into global visibility.
    pub force_queryable: bool,
}

impl ManifestView {
    /// Whether the package requests [`QUERY_ALL_PACKAGES`].
    #[must_use]
    pub fn requests_query_all_packages(&self) -> bool {
        self.requested_permissions
            .iter()
            .any(|p| p == QUERY_ALL_PACKAGES)
    }
}
