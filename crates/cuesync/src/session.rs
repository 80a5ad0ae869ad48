//! One sync target: a source tree, its snapshots, and a live workspace.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::conflict::{identify_conflicts, CueConflict};
use crate::cue::Cue;
use crate::driver::{DriverOptions, DriverReport, MutationDriver};
use crate::error::{SyncError, SyncResult};
use crate::index::CueIndex;
use crate::reconcile::{reconcile, ThreeWayComparison};
use crate::remote::RemoteWorkspace;
use crate::resolver::{apply_resolutions, ConflictResolver};
use crate::scope::merge_scope;
use crate::snapshot::{preserve_skipped, SnapshotStore};
use crate::tree::CueTree;

/// Identity key → property bag of values to write back into a source file.
pub type RemoteUpdates = BTreeMap<String, Map<String, Value>>;

/// Properties copied back when the remote version of a whole cue wins.
const WRITE_BACK_FIELDS: [&str; 4] = ["name", "fileTarget", "notes", "colorName"];

/// Everything a push produced.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub comparison: ThreeWayComparison,
    pub conflicts: Vec<CueConflict>,
    pub report: DriverReport,
    pub remote_updates: RemoteUpdates,
}

pub struct SyncSession {
    remote: Arc<dyn RemoteWorkspace>,
    snapshots: Arc<dyn SnapshotStore>,
    source_id: String,
    options: DriverOptions,
    save_snapshots: bool,
}

impl SyncSession {
    pub fn new(
        remote: Arc<dyn RemoteWorkspace>,
        snapshots: Arc<dyn SnapshotStore>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            snapshots,
            source_id: source_id.into(),
            options: DriverOptions::default(),
            save_snapshots: true,
        }
    }

    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Dry runs leave the snapshot history alone.
    pub fn with_snapshots(mut self, save: bool) -> Self {
        self.save_snapshots = save;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    fn load_cache(&self) -> Option<CueTree> {
        match self.snapshots.load_most_recent(&self.source_id) {
            Ok(Some(tree)) => Some(tree),
            Ok(None) => {
                info!("No snapshot for {}; first sync", self.source_id);
                None
            }
            Err(e) => {
                warn!("Failed to load snapshot for {}: {:#}", self.source_id, e);
                None
            }
        }
    }

    /// Live state, or `None` when it cannot be determined. A timed out
    /// full query falls back to the lightweight one.
    async fn query_current(&self) -> Option<CueTree> {
        match self.remote.query_state().await {
            Ok(tree) => {
                info!("Queried current workspace state ({} cues)", tree.cue_count());
                Some(tree)
            }
            Err(e) if e.is_timeout() => {
                warn!("Failed to query current workspace state: {}", e);
                info!("Attempting lightweight fallback query");
                match self.remote.query_state_lightweight().await {
                    Ok(tree) => {
                        info!("Lightweight fallback query succeeded");
                        Some(tree)
                    }
                    Err(e) => {
                        warn!("Lightweight fallback query also failed: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Failed to query current workspace state: {}", e);
                None
            }
        }
    }

    /// Compare `source` with the last snapshot and the live workspace.
    pub async fn reconcile(&self, source: &CueTree) -> ThreeWayComparison {
        self.remote.invalidate_caches().await;
        let cache = self.load_cache();
        let current = self.query_current().await;
        let comparison = reconcile(source, cache.as_ref(), current.as_ref());
        info!("Reconciled {}: {}", self.source_id, comparison.summary());
        for (key, result) in &comparison.results {
            debug!("{}: {} ({})", key, result.action, result.reason);
        }
        comparison
    }

    pub fn identify_conflicts(&self, comparison: &ThreeWayComparison) -> Vec<CueConflict> {
        identify_conflicts(comparison)
    }

    /// Ask `resolver` about every conflict and fold the answers into the
    /// comparison. Returns the conflicts, marked resolved.
    pub async fn resolve_conflicts(
        &self,
        comparison: &mut ThreeWayComparison,
        resolver: &dyn ConflictResolver,
    ) -> SyncResult<Vec<CueConflict>> {
        let mut conflicts = self.identify_conflicts(comparison);
        if conflicts.is_empty() {
            return Ok(conflicts);
        }

        info!("{} conflict(s) need resolution", conflicts.len());
        let resolutions = resolver.resolve(&conflicts).await?;
        apply_resolutions(comparison, &resolutions);
        for conflict in &mut conflicts {
            conflict.resolved = resolutions.contains_key(&conflict.key);
        }

        if let Some(scope) = &comparison.scope {
            let merged = merge_scope(scope, comparison);
            debug!("Merged result has {} top-level scope(s)", merged.children.len());
            comparison.merged = Some(merged);
        }
        Ok(conflicts)
    }

    /// Drive the workspace to match the resolved comparison, then snapshot
    /// the result. A failed snapshot is logged, not returned.
    pub async fn apply(&self, source: &CueTree, comparison: &ThreeWayComparison) -> SyncResult<DriverReport> {
        self.remote.invalidate_caches().await;
        let mut driver = MutationDriver::new(self.remote.as_ref(), self.options.clone());
        driver.index_existing().await;
        let result = driver.apply(source, comparison).await;
        self.remote.invalidate_caches().await;
        let report = result?;

        if self.save_snapshots {
            if let Err(e) = self.snapshot(comparison).await {
                warn!("Failed to save snapshot for {}: {}", self.source_id, e);
            }
        }
        Ok(report)
    }

    async fn snapshot(&self, comparison: &ThreeWayComparison) -> SyncResult<()> {
        let mut fresh = self.remote.query_state().await?;
        if comparison.has_cache {
            if let Some(cache) = self.load_cache() {
                let restored = preserve_skipped(&mut fresh, &cache, comparison);
                if restored > 0 {
                    debug!("Preserved cached state for {} skipped cue(s)", restored);
                }
            }
        }
        self.snapshots
            .save(&self.source_id, &fresh)
            .map_err(SyncError::Snapshot)
    }

    /// Values the user kept from the remote, keyed by identity key, for the
    /// caller to write back into the source file.
    pub fn extract_remote_chosen_updates(&self, comparison: &ThreeWayComparison) -> RemoteUpdates {
        extract_remote_chosen_updates(comparison)
    }

    /// Reconcile, resolve, apply and snapshot in one go.
    pub async fn transmit(&self, source: &CueTree, resolver: &dyn ConflictResolver) -> SyncResult<SyncOutcome> {
        let mut comparison = self.reconcile(source).await;
        let conflicts = self.resolve_conflicts(&mut comparison, resolver).await?;
        let report = self.apply(source, &comparison).await?;
        let remote_updates = self.extract_remote_chosen_updates(&comparison);
        Ok(SyncOutcome {
            comparison,
            conflicts,
            report,
            remote_updates,
        })
    }

    /// The live workspace as a source tree. Every cue list becomes a
    /// top-level list entry, so a pulled file pushes back unchanged.
    pub async fn receive(&self) -> SyncResult<CueTree> {
        let live = self.remote.query_state().await?;
        if live.is_empty() {
            warn!("No cues found in workspace");
        }
        Ok(CueTree::from_cues(live.lists.into_iter().chain(live.cues).collect()))
    }
}

pub fn extract_remote_chosen_updates(comparison: &ThreeWayComparison) -> RemoteUpdates {
    let mut updates = RemoteUpdates::new();
    if !comparison.has_remote_data {
        return updates;
    }
    let index: &CueIndex = &comparison.current_index;

    for key in &comparison.remote_chosen {
        let Some(live) = index.get(key) else {
            debug!("Remote-chosen cue {} not in live state", key);
            continue;
        };
        let bag = bag_for(live, WRITE_BACK_FIELDS.iter().copied());
        if !bag.is_empty() {
            updates.insert(key.clone(), bag);
        }
    }

    for (key, fields) in &comparison.remote_chosen_fields {
        let Some(live) = index.get(key) else {
            continue;
        };
        let bag = bag_for(live, fields.iter().map(String::as_str));
        if !bag.is_empty() {
            updates.entry(key.clone()).or_default().extend(bag);
        }
    }

    debug!("Extracted {} remote update(s)", updates.len());
    updates
}

fn bag_for<'a>(cue: &Cue, fields: impl Iterator<Item = &'a str>) -> Map<String, Value> {
    let value = cue.to_value();
    fields
        .filter_map(|field| {
            let v = value.get(field)?;
            v.is_string().then(|| (field.to_string(), v.clone()))
        })
        .collect()
}
