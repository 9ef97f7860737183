//! The materialized cross-user decision cache.
//!
//! A sparse two-level map from caller uid to target uid to the filtered
//! verdict. The cache does not exist until the system is ready; from then on
//! every installed pair for every active user is present, and a miss means
//! the caller is unknown to the system. All policy lives in the decision
//! engine; this module is purely mechanical storage.

use std::collections::HashMap;

use crate::ids::{AppId, Uid, app_id_of};

/// Outcome of a cache lookup, distinguishing the two anomaly shapes the
/// error policy treats differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The pair is cached with this verdict.
    Hit(bool),
    /// No row at all for the caller uid.
    MissingRow,
    /// A caller row exists but the target uid is absent from it.
    MissingEntry,
}

/// Sparse `caller uid -> target uid -> filtered` map.
#[derive(Clone, Debug, Default)]
pub struct DecisionCache {
    /// Outer rows keyed by caller uid.
    rows: HashMap<Uid, HashMap<Uid, bool>>,
}

impl DecisionCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the verdict for a pair.
    #[must_use]
    pub fn get(&self, caller: Uid, target: Uid) -> Lookup {
        self.rows.get(&caller).map_or(Lookup::MissingRow, |row| {
            row.get(&target)
                .map_or(Lookup::MissingEntry, |v| Lookup::Hit(*v))
        })
    }

    /// Record the verdict for a pair.
    pub fn set(&mut self, caller: Uid, target: Uid, filtered: bool) {
        self.rows.entry(caller).or_default().insert(target, filtered);
    }

    /// Drop every row and entry whose uid carries `app_id`, pruning rows
    /// that become empty.
    pub fn remove_app(&mut self, app_id: AppId) {
        self.rows.retain(|caller, row| {
            if app_id_of(*caller) == app_id {
                return false;
            }
            row.retain(|target, _| app_id_of(*target) != app_id);
            !row.is_empty()
        });
    }

    /// Number of cached pairs, for diagnostics.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.rows.values().map(HashMap::len).sum()
    }
}
