//! Intent-pattern matching against declared intent filters.
//!
//! This is the standard filter-resolution algorithm restricted to what
//! visibility needs: a `<queries>` intent pattern matches a component's
//! filter when its action is accepted, every category it carries is declared
//! by the filter, and its data (scheme and MIME type) satisfies the filter's
//! data constraints. Protected-broadcast gating for receivers is applied by
//! the caller, not here.

use crate::manifest::{IntentFilterSpec, QueryIntent};

/// Whether `intent` would resolve against `filter`.
#[must_use]
pub fn intent_matches_filter(intent: &QueryIntent, filter: &IntentFilterSpec) -> bool {
    matches_action(intent, filter)
        && matches_categories(intent, filter)
        && matches_data(intent, filter)
}

/// An intent with no action matches any filter; otherwise the filter must
/// list the action.
fn matches_action(intent: &QueryIntent, filter: &IntentFilterSpec) -> bool {
    intent
        .action
        .as_ref()
        .is_none_or(|a| filter.actions.iter().any(|f| f == a))
}

/// Every category carried by the intent must be declared by the filter.
fn matches_categories(intent: &QueryIntent, filter: &IntentFilterSpec) -> bool {
    intent
        .categories
        .iter()
        .all(|c| filter.categories.iter().any(|f| f == c))
}

/// Scheme/type matching.
///
/// A data-less intent only matches filters without data constraints. An
/// intent carrying a scheme needs the filter to list it; an intent carrying a
/// MIME type needs a filter type to cover it (wildcards allowed on the filter
/// side).
fn matches_data(intent: &QueryIntent, filter: &IntentFilterSpec) -> bool {
    if intent.scheme.is_none() && intent.mime_type.is_none() {
        return filter.schemes.is_empty() && filter.mime_types.is_empty();
    }
    let scheme_ok = intent
        .scheme
        .as_ref()
        .is_none_or(|s| filter.schemes.iter().any(|f| f == s));
    let type_ok = intent
        .mime_type
        .as_ref()
        .is_none_or(|t| filter.mime_types.iter().any(|f| mime_covers(f, t)));
    scheme_ok && type_ok
}

/// Whether a declared MIME type covers a requested one.
///
/// `*/*` covers everything; `base/*` covers any subtype of `base`; a request
/// of `base/*` likewise covers any declared subtype of `base`.
#[must_use]
pub fn mime_covers(declared: &str, requested: &str) -> bool {
    if declared == requested || declared == "*/*" || requested == "*/*" {
        return true;
    }
    let declared_base = declared.split_once('/');
    let requested_base = requested.split_once('/');
    match (declared_base, requested_base) {
        (Some((db, ds)), Some((rb, rs))) => db == rb && (ds == "*" || rs == "*"),
        _ => false,
    }
}
