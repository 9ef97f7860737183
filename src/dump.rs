//! Textual diagnostic report of the filter's state.
//!
//! The report carries the master-switch state, the force-queryable set, and
//! per-caller target lists for each relation map. Content is contractual;
//! exact formatting is not, so consumers must not parse it.

use std::collections::{HashMap, HashSet};
use std::io;

use crate::config::FeatureConfig;
use crate::ids::{AppId, Uid, UserId, app_id_of, user_of};
use crate::store::{EdgeMap, RelationStore};

/// Write the full report to `w`, optionally restricted to rows touching
/// `filter_app_id`.
pub fn write_report(
    w: &mut dyn io::Write,
    store: &RelationStore,
    config: &dyn FeatureConfig,
    system_ready: bool,
    filter_app_id: Option<AppId>,
    users: &[UserId],
) -> io::Result<()> {
    writeln!(w, "system ready: {system_ready}")?;
    writeln!(w, "queries enabled: {}", config.is_globally_enabled())?;
    writeln!(w, "users: {users:?}")?;

    let mut force: Vec<AppId> = store.force_queryable().iter().copied().collect();
    force.sort_unstable();
    writeln!(w, "force queryable: {force:?}")?;

    writeln!(w, "queries via package:")?;
    write_edge_map(w, store.package_edges(), filter_app_id)?;
    writeln!(w, "queries via component:")?;
    write_edge_map(w, store.component_edges(), filter_app_id)?;
    writeln!(w, "implicit queries:")?;
    write_implicit_map(w, store.implicit_edges(), filter_app_id)?;

    let mut logging: Vec<AppId> = known_app_ids(store)
        .into_iter()
        .filter(|id| config.is_logging_enabled(*id))
        .collect();
    logging.sort_unstable();
    writeln!(w, "logging enabled app ids: {logging:?}")?;
    Ok(())
}

/// One sorted `caller -> [targets]` line per row.
fn write_edge_map(
    w: &mut dyn io::Write,
    map: &EdgeMap,
    filter_app_id: Option<AppId>,
) -> io::Result<()> {
    let mut callers: Vec<AppId> = map.keys().copied().collect();
    callers.sort_unstable();
    for caller in callers {
        let Some(targets) = map.get(&caller) else {
            continue;
        };
        let mut targets: Vec<AppId> = targets.iter().copied().collect();
        if let Some(filter) = filter_app_id
            && caller != filter
        {
            targets.retain(|t| *t == filter);
        }
        if targets.is_empty() {
            continue;
        }
        targets.sort_unstable();
        writeln!(w, "  {caller} -> {targets:?}")?;
    }
    Ok(())
}

/// Runtime-grant rows, uid-keyed, formatted as `user/appId`.
fn write_implicit_map(
    w: &mut dyn io::Write,
    map: &HashMap<Uid, HashSet<Uid>>,
    filter_app_id: Option<AppId>,
) -> io::Result<()> {
    let mut callers: Vec<Uid> = map.keys().copied().collect();
    callers.sort_unstable();
    for caller in callers {
        let Some(targets) = map.get(&caller) else {
            continue;
        };
        let mut targets: Vec<Uid> = targets.iter().copied().collect();
        if let Some(filter) = filter_app_id
            && app_id_of(caller) != filter
        {
            targets.retain(|t| app_id_of(*t) == filter);
        }
        if targets.is_empty() {
            continue;
        }
        targets.sort_unstable();
        let rendered: Vec<String> = targets.iter().map(|t| format_uid(*t)).collect();
        writeln!(w, "  {} -> {rendered:?}", format_uid(caller))?;
    }
    Ok(())
}

/// Render a uid as `user/appId`.
fn format_uid(uid: Uid) -> String {
    format!("{}/{}", user_of(uid), app_id_of(uid))
}

/// Every identity mentioned anywhere in the store.
fn known_app_ids(store: &RelationStore) -> HashSet<AppId> {
    let mut ids: HashSet<AppId> = store.force_queryable().iter().copied().collect();
    for (caller, targets) in store.package_edges() {
        ids.insert(*caller);
        ids.extend(targets.iter().copied());
    }
    for (caller, targets) in store.component_edges() {
        ids.insert(*caller);
        ids.extend(targets.iter().copied());
    }
    for (caller, targets) in store.implicit_edges() {
        ids.insert(app_id_of(*caller));
        ids.extend(targets.iter().map(|t| app_id_of(*t)));
    }
    ids
}
