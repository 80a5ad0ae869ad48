//! Snapshots of the live workspace as it stood after the last sync.
//!
//! The snapshot is the "cache" side of reconciliation. Each sync writes a
//! new timestamped file; the newest one per source wins.
//!
//! Layout:
//! ```text
//! {cache_dir}/
//! ├── show_2026-03-01T19-30-00.json
//! └── show_2026-03-02T09-12-44.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cue::Cue;
use crate::index::{identity_key, CueIndex};
use crate::reconcile::{reasons, Action, ThreeWayComparison};
use crate::tree::CueTree;

/// Where post-sync snapshots live, keyed by source identifier (the show
/// file's stem).
pub trait SnapshotStore: Send + Sync {
    /// The most recent snapshot for `source_id`, or `Ok(None)` if there is
    /// none yet.
    fn load_most_recent(&self, source_id: &str) -> Result<Option<CueTree>>;

    /// Persist a new snapshot. Earlier ones are kept.
    fn save(&self, source_id: &str, tree: &CueTree) -> Result<()>;
}

/// The source identifier for a show file: its name without extension.
pub fn source_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "show".to_string())
}

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidates(&self, source_id: &str) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}_", source_id);
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read snapshot directory {}", self.dir.display()))?
        {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stamp) = name.strip_prefix(&prefix).and_then(|rest| rest.strip_suffix(".json")) else {
                continue;
            };
            // Guards "show" from matching "show_extra_..." snapshots
            if is_timestamp(stamp) {
                found.push(path);
            }
        }
        Ok(found)
    }
}

fn is_timestamp(stamp: &str) -> bool {
    chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H-%M-%S").is_ok()
}

impl SnapshotStore for FileSnapshotStore {
    fn load_most_recent(&self, source_id: &str) -> Result<Option<CueTree>> {
        let newest = self
            .candidates(source_id)?
            .into_iter()
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((modified, path))
            })
            .max_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.cmp(pb)));

        let Some((_, path)) = newest else {
            debug!("No snapshot for {} in {}", source_id, self.dir.display());
            return Ok(None);
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        let tree = CueTree::from_value(&value)
            .with_context(|| format!("snapshot {} is not a cue tree", path.display()))?;
        info!("Loaded snapshot from {}", path.display());
        Ok(Some(tree))
    }

    fn save(&self, source_id: &str, tree: &CueTree) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create snapshot directory {}", self.dir.display()))?;

        let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S");
        let path = self.dir.join(format!("{}_{}.json", source_id, stamp));
        let json = serde_json::to_string_pretty(&tree.to_value())?;
        fs::write(&path, json).with_context(|| format!("failed to write snapshot {}", path.display()))?;

        info!("Saved workspace snapshot to {}", path.display());
        Ok(())
    }
}

/// Process-local snapshots, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Vec<(SystemTime, CueTree)>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, source_id: &str) -> usize {
        self.snapshots
            .lock()
            .map(|s| s.get(source_id).map_or(0, Vec::len))
            .unwrap_or_default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load_most_recent(&self, source_id: &str) -> Result<Option<CueTree>> {
        let snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot store lock poisoned"))?;
        Ok(snapshots
            .get(source_id)
            .and_then(|all| all.last())
            .map(|(_, tree)| tree.clone()))
    }

    fn save(&self, source_id: &str, tree: &CueTree) -> Result<()> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot store lock poisoned"))?;
        snapshots
            .entry(source_id.to_string())
            .or_default()
            .push((SystemTime::now(), tree.clone()));
        Ok(())
    }
}

/// Put back the cached properties of every cue the user chose to skip, so
/// the next pass still sees the source change as pending. Children keep
/// their live state; each has its own verdict.
pub fn preserve_skipped(fresh: &mut CueTree, cache: &CueTree, comparison: &ThreeWayComparison) -> usize {
    let cached = CueIndex::build(cache);
    let skipped: HashMap<&str, &Cue> = comparison
        .results
        .iter()
        .filter(|(_, r)| r.action == Action::Skip && r.reason == reasons::USER_SKIPPED)
        .filter_map(|(key, _)| Some((key.as_str(), cached.get(key)?)))
        .collect();
    if skipped.is_empty() {
        return 0;
    }

    let mut restored = 0;
    for list in fresh.lists.iter_mut() {
        restore(list.cues.iter_mut(), "", &skipped, &mut restored);
    }
    restore(fresh.cues.iter_mut(), "", &skipped, &mut restored);

    if restored < skipped.len() {
        warn!(
            "Kept cached state for {} of {} skipped cue(s); the rest are gone from the workspace",
            restored,
            skipped.len()
        );
    }
    restored
}

fn restore<'a>(
    cues: impl Iterator<Item = &'a mut Cue>,
    parent_number: &str,
    skipped: &HashMap<&str, &Cue>,
    restored: &mut usize,
) {
    for (position, cue) in cues.enumerate() {
        if cue.is_list() {
            restore(cue.cues.iter_mut(), "", skipped, restored);
            continue;
        }
        let (key, number) = identity_key(cue, parent_number, position);
        if let Some(cached) = skipped.get(key.as_str()) {
            debug!("Preserving cached state for skipped cue {}", key);
            let children = std::mem::take(&mut cue.cues);
            *cue = (*cached).clone();
            cue.cues = children;
            *restored += 1;
        }
        restore(cue.cues.iter_mut(), &number, skipped, restored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile;
    use crate::resolver::{apply_resolutions, ResolutionChoice, Resolutions};
    use serde_json::json;
    use tempfile::TempDir;

    fn live(name_two: &str) -> CueTree {
        CueTree::from_value(&json!({"data": [{"type": "Cue List", "name": "Main", "uniqueID": "L1", "cues": [
            {"type": "Audio", "number": "1", "name": "Door", "uniqueID": "C1"},
            {"type": "Group", "number": "2", "name": name_two, "uniqueID": "C2", "cues": [
                {"type": "Audio", "number": "1", "name": "Inner", "uniqueID": "C3"},
            ]},
        ]}]}))
        .unwrap()
    }

    #[test]
    fn file_store_round_trip_picks_newest() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snapshots"));
        assert!(store.load_most_recent("show").unwrap().is_none());

        let old = dir.path().join("snapshots");
        fs::create_dir_all(&old).unwrap();
        fs::write(
            old.join("show_2020-01-01T00-00-00.json"),
            serde_json::to_string(&live("Old").to_value()).unwrap(),
        )
        .unwrap();
        // Same prefix, different show
        fs::write(old.join("show_extra_2030-01-01T00-00-00.json"), "{}").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        store.save("show", &live("New")).unwrap();
        let loaded = store.load_most_recent("show").unwrap().unwrap();
        assert_eq!(loaded, live("New"));
        assert!(store.load_most_recent("other").unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("show_2021-05-05T10-00-00.json"), "not json").unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let err = store.load_most_recent("show").unwrap_err();
        assert!(format!("{:#}", err).contains("failed to parse snapshot"));
    }

    #[test]
    fn memory_store_keeps_history() {
        let store = MemorySnapshotStore::new();
        store.save("show", &live("A")).unwrap();
        store.save("show", &live("B")).unwrap();
        assert_eq!(store.count("show"), 2);
        assert_eq!(store.load_most_recent("show").unwrap(), Some(live("B")));
    }

    #[test]
    fn skipped_cues_keep_their_cached_state() {
        let source = CueTree::from_value(&json!({"cues": [
            {"type": "audio", "number": "1", "name": "Door"},
            {"type": "group", "number": "2", "name": "Source Name", "cues": [
                {"type": "audio", "number": "1", "name": "Inner"},
            ]},
        ]}))
        .unwrap();
        let cache = live("Cached");
        let current = live("Live");

        let mut cmp = reconcile(&source, Some(&cache), Some(&current));
        apply_resolutions(&mut cmp, &Resolutions::from([("2".to_string(), ResolutionChoice::Skip)]));

        let mut fresh = live("Live");
        assert_eq!(preserve_skipped(&mut fresh, &cache, &cmp), 1);
        let group = &fresh.lists[0].cues[1];
        assert_eq!(group.name.as_deref(), Some("Cached"));
        assert_eq!(group.cues.len(), 1);
        assert_eq!(fresh.lists[0].cues[0].name.as_deref(), Some("Door"));
    }

    #[test]
    fn skipped_cue_in_a_later_list_is_restored() {
        let lists = |notes: &str| {
            CueTree::from_value(&json!({"data": [
                {"type": "Cue List", "name": "Preshow", "uniqueID": "L1", "cues": [
                    {"type": "Audio", "name": "Walk-in", "uniqueID": "W1"},
                ]},
                {"type": "Cue List", "name": "Show", "uniqueID": "L2", "cues": [
                    {"type": "Audio", "name": "Overture", "uniqueID": "O1", "notes": notes},
                ]},
            ]}))
            .unwrap()
        };
        let source = CueTree::from_value(&json!({"cues": [
            {"type": "list", "name": "Preshow", "cues": [{"type": "audio", "name": "Walk-in"}]},
            {"type": "list", "name": "Show", "cues": [{"type": "audio", "name": "Overture", "notes": "source"}]},
        ]}))
        .unwrap();
        let cache = lists("cached");

        let mut cmp = reconcile(&source, Some(&cache), Some(&lists("live")));
        apply_resolutions(
            &mut cmp,
            &Resolutions::from([("@0[audio:Overture]".to_string(), ResolutionChoice::Skip)]),
        );

        let mut fresh = lists("live");
        assert_eq!(preserve_skipped(&mut fresh, &cache, &cmp), 1);
        assert_eq!(fresh.lists[1].cues[0].notes.as_deref(), Some("cached"));
        assert_eq!(fresh.lists[0].cues[0].name.as_deref(), Some("Walk-in"));
    }
}
