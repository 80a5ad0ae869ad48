//! Turning a comparison into conflicts that need a human (or a policy).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cue::Cue;
use crate::reconcile::{reasons, ThreeWayComparison};
use crate::scope::{FieldConflict, Scope, ScopeComparison};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Source and remote both moved away from the cache.
    ThreeWayDivergence,
    /// Only the remote moved; the cache no longer describes it.
    CacheStale,
    /// Only the source moved.
    SourceModified,
}

impl ConflictType {
    /// Classify from whether each side differs from the cache.
    pub fn classify(source_changed: bool, remote_changed: bool) -> Option<Self> {
        match (source_changed, remote_changed) {
            (true, true) => Some(ConflictType::ThreeWayDivergence),
            (false, true) => Some(ConflictType::CacheStale),
            (true, false) => Some(ConflictType::SourceModified),
            (false, false) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::ThreeWayDivergence => "three_way_divergence",
            ConflictType::CacheStale => "cache_stale",
            ConflictType::SourceModified => "source_modified",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CueConflict {
    /// Identity key of the conflicting cue.
    pub key: String,
    pub scope: Scope,
    pub conflict_type: ConflictType,
    /// Fields that differ on at least one side.
    pub properties: Vec<String>,
    pub field_conflicts: BTreeMap<String, FieldConflict>,
    pub description: String,
    pub resolved: bool,
    #[serde(skip)]
    pub source: Option<Cue>,
    #[serde(skip)]
    pub remote: Option<Cue>,
}

/// Conflicts only exist when there is a cache, live data, and the two
/// disagree. Anything else is a plain pending sync.
pub fn identify_conflicts(comparison: &ThreeWayComparison) -> Vec<CueConflict> {
    if !comparison.has_remote_data || !comparison.has_cache || comparison.cache_matches_remote {
        return Vec::new();
    }

    let conflicts = match &comparison.scope {
        Some(scope) => from_scopes(comparison, scope),
        None => from_results(comparison),
    };
    debug!("Identified {} conflict(s)", conflicts.len());
    conflicts
}

fn from_scopes(comparison: &ThreeWayComparison, root: &ScopeComparison) -> Vec<CueConflict> {
    root.cue_scopes()
        .into_iter()
        .filter(|scope| {
            comparison
                .result(&scope.identifier)
                .is_some_and(|r| r.is_remote_modified())
        })
        .filter_map(|scope| {
            let source_changed = scope.field_changes.values().any(|fc| fc.source_changed);
            let remote_changed = scope.field_changes.values().any(|fc| fc.remote_changed);
            let conflict_type = ConflictType::classify(source_changed, remote_changed)?;

            let properties: Vec<String> = scope.field_changes.keys().cloned().collect();
            let fields = properties.join(", ");
            let description = match conflict_type {
                ConflictType::ThreeWayDivergence => format!(
                    "{} '{}' has conflicting changes in source and remote (fields: {})",
                    scope.scope, scope.identifier, fields
                ),
                ConflictType::CacheStale => format!(
                    "{} '{}' modified in remote (fields: {})",
                    scope.scope, scope.identifier, fields
                ),
                ConflictType::SourceModified => format!(
                    "{} '{}' modified in source (fields: {})",
                    scope.scope, scope.identifier, fields
                ),
            };

            Some(CueConflict {
                key: scope.identifier.clone(),
                scope: scope.scope,
                conflict_type,
                properties,
                field_conflicts: scope.field_changes.clone(),
                description,
                resolved: false,
                source: scope.source.clone(),
                remote: scope.remote.clone(),
            })
        })
        .collect()
}

/// Without a scope tree, the per-cue verdicts are all there is.
fn from_results(comparison: &ThreeWayComparison) -> Vec<CueConflict> {
    comparison
        .results
        .iter()
        .filter(|(_, result)| result.is_remote_modified())
        .map(|(key, result)| {
            let (conflict_type, description) = if result.reason == reasons::BOTH_MODIFIED {
                (
                    ConflictType::ThreeWayDivergence,
                    format!(
                        "Cue {} has been modified in both the source file and remote since last sync",
                        key
                    ),
                )
            } else {
                (
                    ConflictType::CacheStale,
                    format!("Cue {} has been modified in remote since last sync", key),
                )
            };
            CueConflict {
                key: key.clone(),
                scope: Scope::Cue,
                conflict_type,
                properties: result.modified_fields.keys().cloned().collect(),
                field_conflicts: result.field_conflicts.clone(),
                description,
                resolved: false,
                source: None,
                remote: comparison.current_index.get(key).cloned(),
            }
        })
        .collect()
}
