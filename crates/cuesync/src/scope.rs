//! Hierarchical comparison (workspace → cue list → cue → field) and the
//! merge that folds resolution choices back into one tree.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compare::field_difference;
use crate::cue::{Cue, CueField};
use crate::index::{identity_key, position_key, CueIndex};
use crate::reconcile::{removed_cues, ThreeWayComparison};
use crate::tree::CueTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "workspace")]
    Workspace,
    #[serde(rename = "cuelist")]
    CueList,
    #[serde(rename = "cue")]
    Cue,
    #[serde(rename = "field")]
    Field,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Workspace => "workspace",
            Scope::CueList => "cuelist",
            Scope::Cue => "cue",
            Scope::Field => "field",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    None,
}

/// Where a merged value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Source,
    Cache,
    Remote,
    Custom,
}

/// One property as seen by each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub source_value: Option<String>,
    pub cache_value: Option<String>,
    pub remote_value: Option<String>,
    /// Source differs from the cache (or from remote when there is no
    /// cached copy).
    pub source_changed: bool,
    /// Remote differs from the cache.
    pub remote_changed: bool,
    pub chosen_value: Option<String>,
    pub chosen_source: Option<ValueSource>,
}

impl FieldConflict {
    /// Remote drifted from what was last sent.
    pub fn is_conflict(&self) -> bool {
        self.remote_changed
    }

    pub fn choose(&mut self, source: ValueSource) {
        self.chosen_value = match source {
            ValueSource::Source => self.source_value.clone(),
            ValueSource::Cache => self.cache_value.clone(),
            ValueSource::Remote => self.remote_value.clone(),
            ValueSource::Custom => self.chosen_value.clone(),
        };
        self.chosen_source = Some(source);
    }

    pub fn choose_custom(&mut self, value: impl Into<String>) {
        self.chosen_value = Some(value.into());
        self.chosen_source = Some(ValueSource::Custom);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeComparison {
    pub scope: Scope,
    /// Identity key for cue and list scopes.
    pub identifier: String,
    pub has_changes: bool,
    pub change_type: ChangeType,
    pub field_changes: BTreeMap<String, FieldConflict>,
    pub children: Vec<ScopeComparison>,
    pub conflict_exists: bool,
    pub resolved: bool,
    pub source: Option<Cue>,
    pub remote: Option<Cue>,
}

impl ScopeComparison {
    fn workspace() -> Self {
        Self {
            scope: Scope::Workspace,
            identifier: "workspace".to_string(),
            has_changes: false,
            change_type: ChangeType::None,
            field_changes: BTreeMap::new(),
            children: Vec::new(),
            conflict_exists: false,
            resolved: false,
            source: None,
            remote: None,
        }
    }

    /// Every cue and cue-list scope, depth first.
    pub fn cue_scopes(&self) -> Vec<&ScopeComparison> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a ScopeComparison>) {
        if matches!(self.scope, Scope::Cue | Scope::CueList) {
            out.push(self);
        }
        for child in &self.children {
            child.collect(out);
        }
    }

    pub fn find(&self, identifier: &str) -> Option<&ScopeComparison> {
        if self.scope != Scope::Workspace && self.identifier == identifier {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(identifier))
    }

    pub fn find_mut(&mut self, identifier: &str) -> Option<&mut ScopeComparison> {
        if self.scope != Scope::Workspace && self.identifier == identifier {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(identifier))
    }

    pub fn conflicting_fields(&self) -> impl Iterator<Item = &FieldConflict> {
        self.field_changes.values().filter(|fc| fc.is_conflict())
    }

    fn absorb_children(&mut self) {
        for child in &self.children {
            self.has_changes |= child.has_changes;
            self.conflict_exists |= child.conflict_exists;
        }
    }
}

/// Compare scope by scope, mirroring the source tree. Cues dropped from
/// the source but untouched remotely become `delete` scopes at workspace
/// level.
pub fn compare_scopes(
    source: &CueTree,
    source_index: &CueIndex,
    cache: &CueIndex,
    current: &CueIndex,
) -> ScopeComparison {
    let mut workspace = ScopeComparison::workspace();
    workspace.children = compare_level(&source.lists, "", cache, current);
    workspace.children.extend(compare_level(&source.cues, "", cache, current));

    for removed in removed_cues(source_index, cache, current) {
        let remote = current.get(&removed.key).cloned();
        workspace.children.push(ScopeComparison {
            scope: Scope::Cue,
            identifier: removed.key,
            has_changes: true,
            change_type: ChangeType::Delete,
            field_changes: BTreeMap::new(),
            children: Vec::new(),
            conflict_exists: false,
            resolved: false,
            source: None,
            remote,
        });
    }

    workspace.absorb_children();
    workspace.change_type = if workspace.has_changes {
        ChangeType::Update
    } else {
        ChangeType::None
    };
    workspace
}

fn compare_level<'a>(
    cues: impl IntoIterator<Item = &'a Cue>,
    parent_number: &str,
    cache: &CueIndex,
    current: &CueIndex,
) -> Vec<ScopeComparison> {
    cues.into_iter()
        .enumerate()
        .map(|(position, cue)| {
            if cue.is_list() {
                return list_scope(cue, position, cache, current);
            }
            let (key, number) = identity_key(cue, parent_number, position);
            let remote = current.get(&key);
            let cached = cache.get(&key);

            let mut scope = ScopeComparison {
                scope: Scope::Cue,
                identifier: key,
                has_changes: remote.is_none(),
                change_type: ChangeType::Create,
                field_changes: BTreeMap::new(),
                children: compare_level(&cue.cues, &number, cache, current),
                conflict_exists: false,
                resolved: false,
                source: Some(cue.flat()),
                remote: remote.cloned(),
            };

            if let Some(remote) = remote {
                scope.field_changes = field_changes(cue, cached, remote);
                scope.has_changes = !scope.field_changes.is_empty();
                scope.conflict_exists = scope.field_changes.values().any(FieldConflict::is_conflict);
                scope.change_type = if scope.has_changes {
                    ChangeType::Update
                } else {
                    ChangeType::None
                };
            }

            scope.absorb_children();
            scope
        })
        .collect()
}

/// Lists are containers: no key of their own to match, so a list scope
/// only reports what its contents report.
fn list_scope(list: &Cue, position: usize, cache: &CueIndex, current: &CueIndex) -> ScopeComparison {
    let mut scope = ScopeComparison {
        scope: Scope::CueList,
        identifier: position_key("", position, list),
        has_changes: false,
        change_type: ChangeType::None,
        field_changes: BTreeMap::new(),
        children: compare_level(&list.cues, "", cache, current),
        conflict_exists: false,
        resolved: false,
        source: Some(list.flat()),
        remote: None,
    };
    scope.absorb_children();
    if scope.has_changes {
        scope.change_type = ChangeType::Update;
    }
    scope
}

fn field_changes(source: &Cue, cached: Option<&Cue>, remote: &Cue) -> BTreeMap<String, FieldConflict> {
    CueField::ALL
        .into_iter()
        .filter_map(|field| {
            let source_changed = field_difference(field, source, cached.unwrap_or(remote)).is_some();
            let remote_changed = cached.is_some_and(|c| field_difference(field, c, remote).is_some());
            if !source_changed && !remote_changed {
                return None;
            }
            Some((
                field.key().to_string(),
                FieldConflict {
                    field: field.key().to_string(),
                    source_value: source.get(field).map(str::to_string),
                    cache_value: cached.and_then(|c| c.get(field)).map(str::to_string),
                    remote_value: remote.get(field).map(str::to_string),
                    source_changed,
                    remote_changed,
                    chosen_value: None,
                    chosen_source: None,
                },
            ))
        })
        .collect()
}

/// The resolved tree after conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedScope {
    pub scope: Scope,
    pub identifier: String,
    /// `None` at workspace level.
    pub merged: Option<Cue>,
    pub children: Vec<MergedScope>,
    /// Field → which side its merged value came from.
    pub source_fields: BTreeMap<String, ValueSource>,
    pub applied_at: DateTime<Utc>,
}

impl MergedScope {
    fn to_cue(&self) -> Cue {
        let mut cue = self.merged.clone().unwrap_or_default();
        cue.cues = self.children.iter().map(MergedScope::to_cue).collect();
        cue
    }

    /// Rebuild a `{"cues": [...]}` tree in source order.
    pub fn to_tree(&self) -> CueTree {
        match self.scope {
            Scope::Workspace => CueTree::from_cues(self.children.iter().map(MergedScope::to_cue).collect()),
            _ => CueTree::from_cues(vec![self.to_cue()]),
        }
    }
}

/// Fold resolution choices into merged data. Per field: the remote value
/// when the cue or field was resolved "keep remote", an explicit chosen
/// value if one was set, the source value otherwise. Delete scopes are
/// left out.
pub fn merge_scope(scope: &ScopeComparison, comparison: &ThreeWayComparison) -> MergedScope {
    let applied_at = Utc::now();
    merge_at(scope, comparison, applied_at)
}

fn merge_at(
    scope: &ScopeComparison,
    comparison: &ThreeWayComparison,
    applied_at: DateTime<Utc>,
) -> MergedScope {
    let children = scope
        .children
        .iter()
        .filter(|child| child.change_type != ChangeType::Delete)
        .map(|child| merge_at(child, comparison, applied_at))
        .collect();

    let mut source_fields = BTreeMap::new();
    let merged = scope.source.as_ref().map(|source| {
        let mut cue = source.clone();
        if cue.unique_id.is_none() {
            cue.unique_id = scope.remote.as_ref().and_then(|r| r.unique_id.clone());
        }

        for field in CueField::ALL {
            let key = field.key();
            let change = scope.field_changes.get(key);
            let origin = if change.is_some() && comparison.is_field_remote_chosen(&scope.identifier, key) {
                cue.set(field, change.and_then(|c| c.remote_value.clone()));
                ValueSource::Remote
            } else if let Some(chosen) = change.and_then(|c| c.chosen_source.map(|s| (s, c.chosen_value.clone()))) {
                cue.set(field, chosen.1);
                chosen.0
            } else {
                ValueSource::Source
            };
            if change.is_some() || cue.get(field).is_some() {
                source_fields.insert(key.to_string(), origin);
            }
        }
        cue
    });

    MergedScope {
        scope: scope.scope,
        identifier: scope.identifier.clone(),
        merged,
        children,
        source_fields,
        applied_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn tree(value: Value) -> CueTree {
        CueTree::from_value(&value).unwrap()
    }

    fn remote(cues: Value) -> CueTree {
        tree(json!({"data": [{"type": "Cue List", "name": "Main", "uniqueID": "L1", "cues": cues}]}))
    }

    fn scenario() -> (CueTree, CueTree, CueTree) {
        let source = tree(json!({"cues": [
            {"type": "list", "name": "Main", "cues": [
                {"type": "group", "number": "1", "name": "Scene", "cues": [
                    {"type": "audio", "name": "A", "notes": "source notes"},
                ]},
                {"type": "audio", "number": "2", "name": "Bell"},
            ]},
        ]}));
        let cache = remote(json!([
            {"type": "Group", "number": "1", "name": "Scene", "uniqueID": "G1", "cues": [
                {"type": "Audio", "name": "A", "uniqueID": "A1"},
            ]},
            {"type": "Audio", "number": "2", "name": "Bell", "uniqueID": "B1"},
        ]));
        let current = remote(json!([
            {"type": "Group", "number": "1", "name": "Scene (live)", "uniqueID": "G1", "cues": [
                {"type": "Audio", "name": "A", "uniqueID": "A1"},
            ]},
            {"type": "Audio", "number": "2", "name": "Bell", "uniqueID": "B1"},
        ]));
        (source, cache, current)
    }

    #[test]
    fn scope_tree_mirrors_source() {
        let (source, cache, current) = scenario();
        let cmp = reconcile(&source, Some(&cache), Some(&current));
        let scope = cmp.scope.as_ref().unwrap();

        assert_eq!(scope.scope, Scope::Workspace);
        assert!(scope.has_changes);
        assert!(scope.conflict_exists);

        let list = &scope.children[0];
        assert_eq!(list.scope, Scope::CueList);
        assert_eq!(list.change_type, ChangeType::Update);
        assert!(list.conflict_exists);

        let group = scope.find("1").unwrap();
        assert_eq!(group.change_type, ChangeType::Update);
        assert!(group.conflict_exists);
        let name = &group.field_changes["name"];
        assert_eq!(name.source_value.as_deref(), Some("Scene"));
        assert_eq!(name.cache_value.as_deref(), Some("Scene"));
        assert_eq!(name.remote_value.as_deref(), Some("Scene (live)"));
        assert!(name.remote_changed && !name.source_changed);

        let audio = scope.find("1@0[audio:A]").unwrap();
        assert!(!audio.conflict_exists);
        assert!(audio.field_changes["notes"].source_changed);

        assert_eq!(scope.find("2").unwrap().change_type, ChangeType::None);
    }

    #[test]
    fn flat_results_pick_up_field_conflicts() {
        let (source, cache, current) = scenario();
        let cmp = reconcile(&source, Some(&cache), Some(&current));
        assert!(cmp.result("1").unwrap().field_conflicts.contains_key("name"));
        assert!(cmp.result("2").unwrap().field_conflicts.is_empty());
    }

    #[test]
    fn merge_respects_remote_choices() {
        let (source, cache, current) = scenario();
        let mut cmp = reconcile(&source, Some(&cache), Some(&current));
        cmp.remote_chosen.insert("1".to_string());
        let merged = merge_scope(cmp.scope.as_ref().unwrap(), &cmp);

        let out = merged.to_tree();
        let list = &out.cues[0];
        let group = &list.cues[0];
        assert_eq!(group.name_str(), "Scene (live)");
        assert_eq!(group.unique_id.as_deref(), Some("G1"));
        assert_eq!(group.cues[0].notes.as_deref(), Some("source notes"));
        assert_eq!(list.cues[1].name_str(), "Bell");

        let group_scope = &merged.children[0].children[0];
        assert_eq!(group_scope.source_fields["name"], ValueSource::Remote);
        assert_eq!(group_scope.source_fields["type"], ValueSource::Source);
    }

    #[test]
    fn merge_takes_explicit_field_choices() {
        let (source, cache, current) = scenario();
        let mut cmp = reconcile(&source, Some(&cache), Some(&current));
        let mut scope = cmp.scope.take().unwrap();
        scope
            .find_mut("1")
            .unwrap()
            .field_changes
            .get_mut("name")
            .unwrap()
            .choose_custom("Scene (merged)");
        let merged = merge_scope(&scope, &cmp);

        let group = &merged.to_tree().cues[0].cues[0];
        assert_eq!(group.name_str(), "Scene (merged)");
    }

    #[test]
    fn per_field_remote_choice() {
        let (source, cache, current) = scenario();
        let mut cmp = reconcile(&source, Some(&cache), Some(&current));
        cmp.choose_remote_field("1", "name");
        let merged = merge_scope(cmp.scope.as_ref().unwrap(), &cmp);
        assert_eq!(merged.to_tree().cues[0].cues[0].name_str(), "Scene (live)");
    }

    #[test]
    fn deleted_cues_become_delete_scopes() {
        let source = tree(json!({"cues": [{"type": "audio", "number": "1", "name": "A"}]}));
        let cache = remote(json!([
            {"type": "Audio", "number": "1", "name": "A", "uniqueID": "C1"},
            {"type": "Audio", "number": "9", "name": "Gone", "uniqueID": "C9"},
        ]));
        let cmp = reconcile(&source, Some(&cache), Some(&cache));
        let scope = cmp.scope.as_ref().unwrap();
        let gone = scope.find("9").unwrap();
        assert_eq!(gone.change_type, ChangeType::Delete);

        let merged = merge_scope(scope, &cmp).to_tree();
        assert_eq!(merged.cues.len(), 1);
        assert_eq!(merged.to_value()["cues"][0]["name"], json!("A"));
    }
}
