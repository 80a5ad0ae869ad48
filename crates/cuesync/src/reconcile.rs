//! Three-way reconciliation of source, cache and live remote state.
//!
//! Per identity key in the source:
//!
//! | remote | cache | source vs cache | cache vs remote | action |
//! |--------|-------|-----------------|-----------------|--------|
//! | absent | -     | -               | -               | create |
//! | found  | found | equal           | equal           | skip   |
//! | found  | found | equal           | differ          | update (remote drifted) |
//! | found  | found | differ          | equal           | update (source edited) |
//! | found  | found | differ          | differ          | update (both) |
//! | found  | absent| source vs remote decides skip or update |
//!
//! A failed live query reconciles against an empty index, so every key
//! becomes a create.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compare::{cues_equal, compare_detailed, indexes_equal, FieldDiff};
use crate::index::CueIndex;
use crate::scope::{compare_scopes, FieldConflict, MergedScope, ScopeComparison};
use crate::tree::CueTree;

pub mod reasons {
    pub const NEW_CUE: &str = "new cue";
    pub const UNCHANGED: &str = "unchanged since last transmission";
    pub const REMOTE_MODIFIED: &str = "remote modified externally, reverting to source";
    pub const SOURCE_MODIFIED: &str = "source file modified";
    pub const BOTH_MODIFIED: &str = "both source and remote modified";
    pub const MATCHES_REMOTE: &str = "matches current remote state";
    pub const DIFFERS_FROM_REMOTE: &str = "differs from current remote state";
    pub const USER_CHOSE_SOURCE: &str = "user chose source";
    pub const USER_CHOSE_REMOTE: &str = "user chose remote";
    pub const USER_SKIPPED: &str = "user chose to skip, no changes";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Skip,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Skip => "skip",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one identity key.
#[derive(Debug, Clone, PartialEq)]
pub struct CueChangeResult {
    pub has_changed: bool,
    pub action: Action,
    pub reason: String,
    /// Remote unique ID when the cue already exists.
    pub existing_id: Option<String>,
    pub modified_fields: FieldDiff,
    /// Filled in from the scope comparison when all three sides exist.
    pub field_conflicts: BTreeMap<String, FieldConflict>,
}

impl CueChangeResult {
    fn new(action: Action, reason: &str) -> Self {
        Self {
            has_changed: action != Action::Skip,
            action,
            reason: reason.to_string(),
            existing_id: None,
            modified_fields: FieldDiff::new(),
            field_conflicts: BTreeMap::new(),
        }
    }

    fn with_diff(mut self, diff: FieldDiff) -> Self {
        self.modified_fields = diff;
        self
    }

    pub fn is_remote_modified(&self) -> bool {
        self.action == Action::Update
            && (self.reason == reasons::REMOTE_MODIFIED || self.reason == reasons::BOTH_MODIFIED)
    }
}

/// A cue present in cache and remote but gone from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedCue {
    pub key: String,
    pub unique_id: String,
}

/// Everything one reconciliation pass learned.
#[derive(Debug, Clone, Default)]
pub struct ThreeWayComparison {
    pub results: BTreeMap<String, CueChangeResult>,
    pub has_cache: bool,
    pub has_remote_data: bool,
    pub cache_matches_remote: bool,
    /// Keys resolved as "keep remote".
    pub remote_chosen: BTreeSet<String>,
    /// Per key, fields resolved as "keep remote".
    pub remote_chosen_fields: BTreeMap<String, BTreeSet<String>>,
    /// Raw live state, kept to pull remote values back into the source.
    pub current: Option<CueTree>,
    pub current_index: CueIndex,
    /// Unchanged remotely since the last sync but dropped from the source.
    pub removed: Vec<RemovedCue>,
    pub scope: Option<ScopeComparison>,
    pub merged: Option<MergedScope>,
}

impl ThreeWayComparison {
    pub fn result(&self, key: &str) -> Option<&CueChangeResult> {
        self.results.get(key)
    }

    pub fn keys_with(&self, action: Action) -> impl Iterator<Item = &String> {
        self.results
            .iter()
            .filter(move |(_, r)| r.action == action)
            .map(|(k, _)| k)
    }

    pub fn is_field_remote_chosen(&self, key: &str, field: &str) -> bool {
        self.remote_chosen.contains(key)
            || self
                .remote_chosen_fields
                .get(key)
                .is_some_and(|fields| fields.contains(field))
    }

    pub fn choose_remote_field(&mut self, key: &str, field: &str) {
        self.remote_chosen_fields
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string());
    }

    pub fn summary(&self) -> ComparisonSummary {
        let mut summary = ComparisonSummary::default();
        for result in self.results.values() {
            match result.action {
                Action::Create => summary.creates += 1,
                Action::Update => summary.updates += 1,
                Action::Skip => summary.skips += 1,
            }
        }
        summary.removed = self.removed.len();
        summary
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComparisonSummary {
    pub creates: usize,
    pub updates: usize,
    pub skips: usize,
    pub removed: usize,
}

impl ComparisonSummary {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.skips
    }

    pub fn has_work(&self) -> bool {
        self.creates + self.updates > 0
    }
}

impl fmt::Display for ComparisonSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} unchanged",
            self.creates, self.updates, self.skips
        )?;
        if self.removed > 0 {
            write!(f, ", {} removed from source", self.removed)?;
        }
        Ok(())
    }
}

/// Reconcile a source tree against an optional cache and optional live
/// state. `None` for `current` means the live query failed.
pub fn reconcile(
    source: &CueTree,
    cache: Option<&CueTree>,
    current: Option<&CueTree>,
) -> ThreeWayComparison {
    let source_index = CueIndex::build(source);
    let cache_index = cache.map(CueIndex::build);
    let current_index = current.map(CueIndex::build).unwrap_or_default();

    let mut comparison = ThreeWayComparison {
        has_cache: cache.is_some(),
        has_remote_data: current.is_some(),
        current: current.cloned(),
        ..Default::default()
    };

    if let (Some(cache_tree), Some(cache_index)) = (cache, cache_index.as_ref()) {
        if current.is_some() {
            comparison.cache_matches_remote = indexes_equal(cache_index, &current_index);
            if comparison.cache_matches_remote {
                info!("Cache matches current remote state");
            } else {
                warn!("Cache differs from current remote state");
            }

            comparison.removed = removed_cues(&source_index, cache_index, &current_index);
            let scope = compare_scopes(source, &source_index, cache_index, &current_index);
            debug!(
                "Scope comparison: has_changes={}, conflicts={}",
                scope.has_changes, scope.conflict_exists
            );
            comparison.scope = Some(scope);
        } else {
            warn!(
                "Remote state unavailable; comparing against cache only ({} cached cues)",
                cache_tree.cue_count()
            );
        }
    }

    for (key, source_cue) in &source_index {
        let result = match current_index.get(key) {
            None => CueChangeResult::new(Action::Create, reasons::NEW_CUE),
            Some(current_cue) => {
                let cached = cache_index.as_ref().and_then(|c| c.get(key));
                let mut result = match cached {
                    Some(cache_cue) => {
                        let source_vs_cache = compare_detailed(source_cue, cache_cue);
                        let cache_vs_current = compare_detailed(cache_cue, current_cue);
                        classify(source_vs_cache, cache_vs_current)
                    }
                    None => {
                        let diff = compare_detailed(source_cue, current_cue);
                        if diff.is_empty() {
                            CueChangeResult::new(Action::Skip, reasons::MATCHES_REMOTE)
                        } else {
                            CueChangeResult::new(Action::Update, reasons::DIFFERS_FROM_REMOTE)
                                .with_diff(diff)
                        }
                    }
                };
                result.existing_id = current_cue.unique_id.clone();
                result
            }
        };
        debug!("{}: {} ({})", key, result.action, result.reason);
        comparison.results.insert(key.clone(), result);
    }

    link_field_conflicts(&mut comparison);
    comparison.current_index = current_index;
    comparison
}

fn classify(source_vs_cache: FieldDiff, cache_vs_current: FieldDiff) -> CueChangeResult {
    match (source_vs_cache.is_empty(), cache_vs_current.is_empty()) {
        (true, true) => CueChangeResult::new(Action::Skip, reasons::UNCHANGED),
        (true, false) => CueChangeResult::new(Action::Update, reasons::REMOTE_MODIFIED)
            .with_diff(cache_vs_current),
        (false, true) => CueChangeResult::new(Action::Update, reasons::SOURCE_MODIFIED)
            .with_diff(source_vs_cache),
        (false, false) => {
            let diff = source_vs_cache
                .into_iter()
                .map(|(field, d)| (format!("source_vs_cache_{}", field), d))
                .chain(
                    cache_vs_current
                        .into_iter()
                        .map(|(field, d)| (format!("cache_vs_current_{}", field), d)),
                )
                .collect();
            CueChangeResult::new(Action::Update, reasons::BOTH_MODIFIED).with_diff(diff)
        }
    }
}

/// Keys synced last time, untouched remotely since, and now gone from the
/// source. Remote edits to a dropped cue keep it alive.
pub(crate) fn removed_cues(
    source: &CueIndex,
    cache: &CueIndex,
    current: &CueIndex,
) -> Vec<RemovedCue> {
    cache
        .iter()
        .filter(|(key, _)| !source.contains(key))
        .filter_map(|(key, cached)| {
            let live = current.get(key)?;
            if !cues_equal(cached, live) {
                return None;
            }
            Some(RemovedCue {
                key: key.clone(),
                unique_id: live.unique_id.clone()?,
            })
        })
        .collect()
}

fn link_field_conflicts(comparison: &mut ThreeWayComparison) {
    let Some(scope) = comparison.scope.as_ref() else {
        return;
    };
    for cue_scope in scope.cue_scopes() {
        if let Some(result) = comparison.results.get_mut(&cue_scope.identifier) {
            result.field_conflicts = cue_scope.field_changes.clone();
        }
    }
}
