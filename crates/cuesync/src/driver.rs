//! Applying a reconciled comparison to a live workspace.
//!
//! One [`MutationDriver`] per pass. It walks the source tree in order,
//! creating, updating or skipping each cue according to its verdict, moves
//! newly created cues under their parents, and resolves number-based cue
//! targets once every cue exists. All per-pass bookkeeping (known numbers,
//! list names, pre-existing lists) lives on the driver, never on the
//! connection.
//!
//! A skipped cue is left exactly where it is: the walk takes its known ID
//! and does not descend. Its children still have verdicts of their own, so
//! once the walk is done they are visited from the skipped parent's ID.
//! Changed children are updated in place and new ones are created and
//! placed under that parent; unchanged ones are never moved.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use cueproto::OscArg;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compare::field_difference;
use crate::cue::{Cue, CueField};
use crate::error::{SyncError, SyncResult, SyncResultExt};
use crate::index::{identity_key, keyed_cues};
use crate::reconcile::{Action, ThreeWayComparison};
use crate::remote::RemoteWorkspace;
use crate::tree::CueTree;

/// A cue that names its target by number, waiting for the second pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTarget {
    pub cue_id: String,
    pub target_number: String,
}

/// What a pass learned about remote IDs.
#[derive(Debug, Clone, Default)]
pub struct CueMapping {
    /// Full cue number → unique ID.
    pub number_to_id: BTreeMap<String, String>,
    /// Identity key → unique ID for every cue the pass visited.
    pub key_to_id: BTreeMap<String, String>,
    pub pending_targets: Vec<PendingTarget>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub moved: usize,
    pub deleted: usize,
    pub targets_resolved: usize,
    pub targets_unresolved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Clear a colliding cue's number instead of skipping the assignment.
    pub force_cue_numbers: bool,
    /// Directory relative `fileTarget` paths resolve against first.
    pub source_dir: Option<PathBuf>,
    /// Delete cues dropped from the source and untouched remotely.
    pub delete_removed: bool,
    /// List that receives top-level cues created outside any list.
    pub inbox_id: Option<String>,
}

struct Processed {
    id: Option<String>,
    action: Action,
}

pub struct MutationDriver<'a, R: RemoteWorkspace + ?Sized> {
    remote: &'a R,
    options: DriverOptions,
    /// Number → ID of every numbered cue seen, remote or created.
    known_numbers: BTreeMap<String, String>,
    list_ids: BTreeMap<String, String>,
    existing_lists: BTreeSet<String>,
    mapping: CueMapping,
    report: DriverReport,
    /// Identity key and remote ID of skipped cues whose children wait for
    /// the follow-up visit.
    held: Vec<(String, String)>,
    inbox_position: usize,
    base_path: Option<Option<String>>,
    video_stage: Option<Option<String>>,
}

impl<'a, R: RemoteWorkspace + ?Sized> MutationDriver<'a, R> {
    pub fn new(remote: &'a R, options: DriverOptions) -> Self {
        Self {
            remote,
            options,
            known_numbers: BTreeMap::new(),
            list_ids: BTreeMap::new(),
            existing_lists: BTreeSet::new(),
            mapping: CueMapping::default(),
            report: DriverReport::default(),
            held: Vec::new(),
            inbox_position: 0,
            base_path: None,
            video_stage: None,
        }
    }

    pub fn mapping(&self) -> &CueMapping {
        &self.mapping
    }

    /// Learn existing list names and cue numbers from the workspace. A
    /// failure only costs collision detection, so it is logged and ignored.
    pub async fn index_existing(&mut self) {
        match self.remote.cue_lists().await {
            Ok(tree) => self.learn_existing(&tree),
            Err(e) => warn!("Failed to index existing cues: {}", e),
        }
    }

    fn learn_existing(&mut self, tree: &CueTree) {
        fn numbers(cues: &[Cue], out: &mut BTreeMap<String, String>) {
            for cue in cues {
                if let (Some(number), Some(id)) = (&cue.number, &cue.unique_id) {
                    out.insert(number.clone(), id.clone());
                }
                numbers(&cue.cues, out);
            }
        }

        for list in &tree.lists {
            if let Some(id) = &list.unique_id {
                self.existing_lists.insert(id.clone());
                if let Some(name) = list.name.as_ref().filter(|n| !n.is_empty()) {
                    self.list_ids.insert(name.clone(), id.clone());
                }
            }
        }
        numbers(&tree.lists, &mut self.known_numbers);
        numbers(&tree.cues, &mut self.known_numbers);
        debug!(
            "Indexed {} cue list(s) and {} numbered cue(s)",
            self.list_ids.len(),
            self.known_numbers.len()
        );
    }

    /// Run the pass. Any error aborts it; nothing already sent is undone.
    pub async fn apply(&mut self, source: &CueTree, comparison: &ThreeWayComparison) -> SyncResult<DriverReport> {
        for list in &source.lists {
            self.process(list, "", 0, true, comparison).await?;
        }
        for (position, cue) in source.cues.iter().enumerate() {
            let processed = self.process(cue, "", position, true, comparison).await?;
            if let (Some(id), Action::Create) = (&processed.id, processed.action) {
                if !cue.is_list() {
                    self.file_in_inbox(id).await?;
                }
            }
        }
        self.visit_held_children(source, comparison).await?;

        self.resolve_targets().await;

        if self.options.delete_removed {
            for removed in &comparison.removed {
                match self.remote.delete_cue(&removed.unique_id).await {
                    Ok(()) => {
                        info!("Deleted cue {} (removed from source)", removed.key);
                        self.report.deleted += 1;
                    }
                    Err(e) => warn!("Failed to delete removed cue {}: {}", removed.key, e),
                }
            }
        } else if !comparison.removed.is_empty() {
            info!(
                "{} cue(s) removed from source left in place; enable delete_removed to delete them",
                comparison.removed.len()
            );
        }

        info!(
            "Applied: {} created, {} updated, {} skipped, {} moved",
            self.report.created, self.report.updated, self.report.skipped, self.report.moved
        );
        Ok(self.report)
    }

    async fn file_in_inbox(&mut self, id: &str) -> SyncResult<()> {
        let Some(inbox) = self.options.inbox_id.clone() else {
            return Ok(());
        };
        self.remote.move_cue(id, self.inbox_position, &inbox).await?;
        self.inbox_position += 1;
        self.report.moved += 1;
        Ok(())
    }

    fn process<'s>(
        &'s mut self,
        cue: &'s Cue,
        parent_number: &'s str,
        position: usize,
        at_root: bool,
        comparison: &'s ThreeWayComparison,
    ) -> BoxFuture<'s, SyncResult<Processed>> {
        async move {
            if cue.is_list() {
                return self.process_list(cue, at_root, comparison).await;
            }

            let (key, number) = identity_key(cue, parent_number, position);
            let result = comparison.result(&key);

            let (id, action) = match result.map(|r| r.action).unwrap_or(Action::Create) {
                Action::Skip => {
                    let id = result.and_then(|r| r.existing_id.clone());
                    debug!("Skipping unchanged cue [{}] {}", key, cue);
                    self.report.skipped += 1;
                    match &id {
                        Some(id) => {
                            self.remember(&key, &number, id);
                            if !cue.cues.is_empty() {
                                self.held.push((key, id.clone()));
                            }
                        }
                        None => warn!("Unchanged cue [{}] has no known remote ID", key),
                    }
                    return Ok(Processed { id, action: Action::Skip });
                }
                Action::Update => {
                    let id = result
                        .and_then(|r| r.existing_id.clone())
                        .ok_or_else(|| SyncError::MissingRemoteId(key.clone()))?;
                    info!("Updating cue [{}] {}", key, cue);
                    self.update(&id, &key, cue, comparison)
                        .await
                        .with_context(|| format!("failed to update cue {}", key))?;
                    self.report.updated += 1;
                    (id, Action::Update)
                }
                Action::Create => {
                    info!("Creating cue [{}] {}", key, cue);
                    let id = self
                        .create(cue, &number)
                        .await
                        .with_context(|| format!("failed to create cue {}", key))?;
                    self.report.created += 1;
                    (id, Action::Create)
                }
            };

            self.remember(&key, &number, &id);
            self.process_children(cue, &number, &id, comparison).await?;
            Ok(Processed { id: Some(id), action })
        }
        .boxed()
    }

    /// Lists carry no verdict. A top-level list whose name already exists
    /// is reused, any other is created.
    async fn process_list(
        &mut self,
        list: &Cue,
        at_root: bool,
        comparison: &ThreeWayComparison,
    ) -> SyncResult<Processed> {
        let reused = if at_root {
            self.list_ids.get(list.name_str()).cloned()
        } else {
            None
        };

        let (id, action) = match reused {
            Some(id) => {
                info!("Using existing cue list '{}' ({})", list.name_str(), id);
                self.report.skipped += 1;
                (id, Action::Skip)
            }
            None => {
                info!("Creating cue list '{}'", list.name_str());
                let id = self
                    .create(list, "")
                    .await
                    .with_context(|| format!("failed to create cue list {}", list.name_str()))?;
                self.report.created += 1;
                (id, Action::Create)
            }
        };

        self.process_children(list, "", &id, comparison).await?;
        Ok(Processed { id: Some(id), action })
    }

    fn remember(&mut self, key: &str, number: &str, id: &str) {
        self.mapping.key_to_id.insert(key.to_string(), id.to_string());
        if !number.is_empty() {
            self.mapping.number_to_id.insert(number.to_string(), id.to_string());
            self.known_numbers
                .entry(number.to_string())
                .or_insert_with(|| id.to_string());
        }
    }

    /// Process each child of `cue` and move the newly created ones under
    /// `parent_id` at their source index.
    async fn process_children(
        &mut self,
        cue: &Cue,
        number: &str,
        parent_id: &str,
        comparison: &ThreeWayComparison,
    ) -> SyncResult<()> {
        let parent_is_existing_list = self.existing_lists.contains(parent_id);

        for (index, child) in cue.cues.iter().enumerate() {
            let processed = self.process(child, number, index, false, comparison).await?;
            let Some(child_id) = processed.id else {
                continue;
            };
            if processed.action != Action::Create {
                continue;
            }
            if parent_is_existing_list {
                debug!("Not moving {} into existing list {}", child_id, parent_id);
                continue;
            }
            self.remote.move_cue(&child_id, index, parent_id).await?;
            self.report.moved += 1;
        }
        Ok(())
    }

    /// Visit the children of every skipped parent, and of skipped cues
    /// among those children, until none are left.
    async fn visit_held_children(&mut self, source: &CueTree, comparison: &ThreeWayComparison) -> SyncResult<()> {
        if self.held.is_empty() {
            return Ok(());
        }
        let by_key: HashMap<String, (String, &Cue)> = keyed_cues(source)
            .into_iter()
            .map(|(key, number, cue)| (key, (number, cue)))
            .collect();

        while !self.held.is_empty() {
            for (key, id) in std::mem::take(&mut self.held) {
                let Some((number, cue)) = by_key.get(&key) else {
                    warn!("Skipped cue [{}] not found in source", key);
                    continue;
                };
                debug!("Visiting children of skipped cue [{}]", key);
                self.process_children(cue, number, &id, comparison).await?;
            }
        }
        Ok(())
    }

    async fn create(&mut self, cue: &Cue, number: &str) -> SyncResult<String> {
        let cue_type = if cue.is_list() { "list".to_string() } else { cue.type_lower() };
        if cue_type.is_empty() {
            return Err(SyncError::InvalidTree(format!("cue {} has no type", cue)));
        }

        let id = self.remote.create_cue(&cue_type).await?;
        if cue.is_list() {
            self.mapping.key_to_id.entry(cue.name_str().to_string()).or_insert_with(|| id.clone());
        }

        if let Some(name) = cue.name.as_deref().filter(|n| !n.is_empty()) {
            self.remote.set_property(&id, "name", name).await?;
        }

        if !number.is_empty() {
            match self.assign_number(&id, number).await {
                Ok(()) => {}
                Err(e) if e.is_number_conflict() => warn!("Skipping cue number assignment: {}", e),
                Err(e) => return Err(e),
            }
        }

        if let Some(file) = cue.file_target.as_deref().filter(|f| !f.is_empty()) {
            let path = self.resolve_file_path(file).await?;
            self.remote.set_property(&id, "file", &path).await?;
        }

        if let Some(notes) = cue.notes.as_deref().filter(|n| !n.is_empty()) {
            self.remote.set_property(&id, "notes", notes).await?;
        }

        for (property, value) in [("duration", &cue.duration), ("preWait", &cue.pre_wait), ("postWait", &cue.post_wait)] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty() && *v != "0") {
                self.remote.set_property(&id, property, value).await?;
            }
        }

        match cue.armed.as_deref() {
            Some("true") => self.remote.set_property(&id, "armed", "1").await?,
            Some("false") => self.remote.set_property(&id, "armed", "0").await?,
            _ => {}
        }

        if let Some(color) = cue.color_name.as_deref().filter(|c| !c.is_empty() && *c != "none") {
            self.remote.set_property(&id, "colorName", color).await?;
        }

        self.apply_type_properties(&id, cue).await?;

        if let Some(target) = cue.cue_target_number.as_deref().filter(|t| !t.is_empty()) {
            self.mapping.pending_targets.push(PendingTarget {
                cue_id: id.clone(),
                target_number: target.to_string(),
            });
        }

        Ok(id)
    }

    /// Write only what differs from the live cue, leaving fields the user
    /// resolved in favour of the remote alone.
    async fn update(&mut self, id: &str, key: &str, cue: &Cue, comparison: &ThreeWayComparison) -> SyncResult<()> {
        let live = comparison.current_index.get(key);

        for field in CueField::ALL {
            if comparison.is_field_remote_chosen(key, field.key()) {
                debug!("Keeping remote {} for {}", field, key);
                continue;
            }
            let changed = match live {
                Some(live) => field_difference(field, cue, live).is_some(),
                None => cue.get(field).is_some_and(|v| !v.is_empty()),
            };
            if !changed {
                continue;
            }

            let value = cue.get(field).unwrap_or_default();
            match field {
                CueField::Type => {
                    warn!("Cue {} changed type to '{}'; QLab cannot retype a cue in place", key, value);
                }
                CueField::CueTargetNumber => {
                    if !value.is_empty() {
                        self.mapping.pending_targets.push(PendingTarget {
                            cue_id: id.to_string(),
                            target_number: value.to_string(),
                        });
                    }
                }
                CueField::FileTarget => {
                    if !value.is_empty() {
                        let path = self.resolve_file_path(value).await?;
                        self.remote.set_property(id, "file", &path).await?;
                    }
                }
                CueField::Armed => {
                    let armed = if value == "true" { "1" } else { "0" };
                    self.remote.set_property(id, "armed", armed).await?;
                }
                CueField::ColorName => {
                    let color = if value.is_empty() { "none" } else { value };
                    self.remote.set_property(id, "colorName", color).await?;
                }
                CueField::Name | CueField::Duration | CueField::Flagged | CueField::Notes => {
                    self.remote.set_property(id, field.key(), value).await?;
                }
            }
        }

        // Not part of comparison; resent as declared
        self.apply_type_properties(id, cue).await
    }

    /// Set `number` on `id`, guarding against numbers owned by another cue.
    pub async fn assign_number(&mut self, id: &str, number: &str) -> SyncResult<()> {
        if let Some(existing) = self.known_numbers.get(number).cloned() {
            if existing != id {
                if !self.options.force_cue_numbers {
                    return Err(SyncError::NumberConflict {
                        number: number.to_string(),
                        existing_id: existing,
                        new_id: id.to_string(),
                    });
                }
                warn!("Clearing number {} from cue {} to give it to {}", number, existing, id);
                self.remote.set_property(&existing, "number", "").await?;
                self.known_numbers.remove(number);
            }
        }

        self.remote.set_property(id, "number", number).await?;
        self.known_numbers.insert(number.to_string(), id.to_string());
        self.mapping.number_to_id.insert(number.to_string(), id.to_string());
        Ok(())
    }

    async fn apply_type_properties(&mut self, id: &str, cue: &Cue) -> SyncResult<()> {
        match cue.type_lower().as_str() {
            "text" => self.apply_text_properties(id, cue).await?,
            "group" => {
                if let Some(mode) = cue.mode.as_deref().and_then(|m| m.parse::<f64>().ok()) {
                    self.remote.set_property(id, "mode", &format!("{:.0}", mode)).await?;
                }
            }
            _ => {}
        }

        if cue.infinite_loop.as_deref() == Some("true") {
            self.remote.set_property(id, "infiniteLoop", "1").await?;
        }
        Ok(())
    }

    /// Stage goes first; QLab ignores format properties on a stageless
    /// text cue. Everything but the text itself is best effort.
    async fn apply_text_properties(&mut self, id: &str, cue: &Cue) -> SyncResult<()> {
        if let Some(text) = cue.text.as_deref().filter(|t| !t.is_empty()) {
            self.remote.set_property(id, "text", text).await?;
        }

        let stage = if let Some(name) = cue.stage_name.as_deref().filter(|s| !s.is_empty()) {
            Some(("stageName", name.to_string()))
        } else if let Some(stage_id) = cue.stage_id.as_deref().filter(|s| !s.is_empty()) {
            Some(("stageID", stage_id.to_string()))
        } else {
            self.default_video_stage().await.map(|stage_id| ("stageID", stage_id))
        };
        match stage {
            Some((property, value)) => {
                if let Err(e) = self.remote.set_property(id, property, &value).await {
                    warn!("Failed to set stage for text cue {}: {}", id, e);
                }
            }
            None => warn!("No video stage available for text cue {}", id),
        }

        for property in ["text/format/color", "text/format/backgroundColor"] {
            if let Some(rgba) = cue.extra_floats(property, 4) {
                let args = rgba.into_iter().map(OscArg::Float).collect();
                if let Err(e) = self.remote.set_property_args(id, property, args).await {
                    warn!("Failed to set {} for cue {}: {}", property, id, e);
                }
            }
        }

        if let Some(size) = cue.extra_f64("text/format/fontSize").filter(|s| *s > 0.0) {
            if let Err(e) = self.remote.set_property(id, "text/format/fontSize", &size.to_string()).await {
                warn!("Failed to set font size for cue {}: {}", id, e);
            }
        }

        if let Some(alignment) = cue.extra_str("text/format/alignment").filter(|a| !a.is_empty()) {
            if let Err(e) = self.remote.set_property(id, "text/format/alignment", alignment).await {
                warn!("Failed to set text alignment for cue {}: {}", id, e);
            }
        }

        if let Some(xy) = cue.extra_floats("translation", 2) {
            let args = xy.into_iter().map(OscArg::Float).collect();
            if let Err(e) = self.remote.set_property_args(id, "translation", args).await {
                warn!("Failed to set translation for cue {}: {}", id, e);
            }
        }

        if let Some(opacity) = cue
            .opacity
            .as_deref()
            .and_then(|o| o.parse::<f64>().ok())
            .filter(|o| *o > 0.0)
        {
            if let Err(e) = self.remote.set_property(id, "opacity", &opacity.to_string()).await {
                warn!("Failed to set opacity for cue {}: {}", id, e);
            }
        }
        Ok(())
    }

    async fn default_video_stage(&mut self) -> Option<String> {
        if let Some(stage) = &self.video_stage {
            return stage.clone();
        }
        let stage = match self.remote.video_stages().await {
            Ok(stages) => stages.into_iter().map(|s| s.unique_id).find(|id| !id.is_empty()),
            Err(e) => {
                warn!("Failed to list video stages: {}", e);
                None
            }
        };
        self.video_stage = Some(stage.clone());
        stage
    }

    async fn workspace_base_path(&mut self) -> SyncResult<Option<String>> {
        if let Some(path) = &self.base_path {
            return Ok(path.clone());
        }
        let path = self.remote.base_path().await?;
        self.base_path = Some(path.clone());
        Ok(path)
    }

    /// Absolute paths pass through; relative ones resolve against the
    /// source file's directory, else the workspace base path.
    pub async fn resolve_file_path(&mut self, file: &str) -> SyncResult<String> {
        let expanded = if file.starts_with('~') || file.contains('$') {
            cueconf::expand_path(file)
        } else {
            PathBuf::from(file)
        };
        if expanded.is_absolute() {
            return Ok(expanded.to_string_lossy().into_owned());
        }

        if let Some(dir) = &self.options.source_dir {
            let path = dir.join(&expanded);
            debug!("Resolved {} against source directory: {}", file, path.display());
            return Ok(path.to_string_lossy().into_owned());
        }

        match self.workspace_base_path().await {
            Ok(Some(base)) => {
                let path = Path::new(&base).join(&expanded);
                debug!("Resolved {} against workspace base path: {}", file, path.display());
                Ok(path.to_string_lossy().into_owned())
            }
            Ok(None) => Err(SyncError::FilePath {
                path: file.to_string(),
                reason: "no source directory and QLab reported no base path".to_string(),
            }),
            Err(e) => Err(SyncError::FilePath {
                path: file.to_string(),
                reason: format!("failed to get workspace base path: {}", e),
            }),
        }
    }

    /// Second pass: point cues at their targets now that every cue exists.
    async fn resolve_targets(&mut self) {
        let pending = std::mem::take(&mut self.mapping.pending_targets);
        for target in &pending {
            match self
                .remote
                .set_property(&target.cue_id, "cueTargetNumber", &target.target_number)
                .await
            {
                Ok(()) => {
                    self.report.targets_resolved += 1;
                    continue;
                }
                Err(e) => debug!("Setting cueTargetNumber on {} failed, trying ID: {}", target.cue_id, e),
            }

            let target_id = self
                .mapping
                .number_to_id
                .get(&target.target_number)
                .or_else(|| self.known_numbers.get(&target.target_number))
                .cloned();
            match target_id {
                Some(target_id) => match self.remote.set_property(&target.cue_id, "cueTargetID", &target_id).await {
                    Ok(()) => self.report.targets_resolved += 1,
                    Err(e) => {
                        warn!("Failed to set target of cue {} to {}: {}", target.cue_id, target_id, e);
                        self.report.targets_unresolved += 1;
                    }
                },
                None => {
                    warn!(
                        "Could not resolve cue target {} for cue {}",
                        target.target_number, target.cue_id
                    );
                    self.report.targets_unresolved += 1;
                }
            }
        }
        self.mapping.pending_targets = pending;
    }
}
