//! The mutation driver against an in-memory workspace that behaves like
//! QLab: new cues land in the first list, moves re-parent, properties stick.
//! A second pass over the result must find nothing to do.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use cueproto::OscArg;
use cuesync::{
    reconcile, Action, Cue, CueTree, DriverOptions, MutationDriver, RemoteWorkspace, SyncError,
    SyncResult, VideoStage,
};
use pretty_assertions::assert_eq;
use serde_json::json;

#[derive(Default)]
struct Node {
    cue: Cue,
    children: Vec<String>,
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, Node>,
    lists: Vec<String>,
    next: usize,
    log: Vec<String>,
}

struct MemoryQlab {
    state: Mutex<State>,
}

impl MemoryQlab {
    fn with_list(name: &str) -> Self {
        let mut state = State::default();
        state.nodes.insert(
            "L1".into(),
            Node {
                cue: Cue::new("Cue List", name).with_id("L1"),
                children: Vec::new(),
            },
        );
        state.lists.push("L1".into());
        Self {
            state: Mutex::new(state),
        }
    }

    fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    fn tree(&self) -> CueTree {
        fn build(state: &State, id: &str) -> Cue {
            let node = &state.nodes[id];
            let mut cue = node.cue.clone();
            cue.cues = node.children.iter().map(|c| build(state, c)).collect();
            cue
        }
        let state = self.state.lock().unwrap();
        CueTree::from_lists(state.lists.iter().map(|id| build(&state, id)).collect())
    }
}

#[async_trait]
impl RemoteWorkspace for MemoryQlab {
    async fn create_cue(&self, cue_type: &str) -> SyncResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let id = format!("Q{}", state.next);
        let cue = Cue::new(cue_type, "").with_id(&id);
        state.nodes.insert(id.clone(), Node { cue, children: Vec::new() });
        if cue_type == "list" {
            state.lists.push(id.clone());
        } else {
            let first = state.lists[0].clone();
            state.nodes.get_mut(&first).unwrap().children.push(id.clone());
        }
        state.log.push(format!("new {} -> {}", cue_type, id));
        Ok(id)
    }

    async fn set_property(&self, cue_id: &str, property: &str, value: &str) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("set {} {}={}", cue_id, property, value));
        let node = state
            .nodes
            .get_mut(cue_id)
            .ok_or_else(|| SyncError::InvalidTree(format!("no cue {}", cue_id)))?;
        let value = Some(value.to_string()).filter(|v| !v.is_empty());
        let cue = &mut node.cue;
        match property {
            "name" => cue.name = value,
            "number" => cue.number = value,
            "file" => cue.file_target = value,
            "notes" => cue.notes = value,
            "duration" => cue.duration = value,
            "armed" => cue.armed = value,
            "colorName" => cue.color_name = value,
            "cueTargetNumber" => cue.cue_target_number = value,
            "cueTargetID" => cue.cue_target_id = value,
            _ => {}
        }
        Ok(())
    }

    async fn set_property_args(&self, cue_id: &str, property: &str, args: Vec<OscArg>) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("set {} {} x{}", cue_id, property, args.len()));
        Ok(())
    }

    async fn move_cue(&self, cue_id: &str, index: usize, parent_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("move {} {} {}", cue_id, index, parent_id));
        for node in state.nodes.values_mut() {
            node.children.retain(|c| c != cue_id);
        }
        let parent = state
            .nodes
            .get_mut(parent_id)
            .ok_or_else(|| SyncError::InvalidTree(format!("no parent {}", parent_id)))?;
        let index = index.min(parent.children.len());
        parent.children.insert(index, cue_id.to_string());
        Ok(())
    }

    async fn delete_cue(&self, cue_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("delete {}", cue_id));
        state.nodes.remove(cue_id);
        for node in state.nodes.values_mut() {
            node.children.retain(|c| c != cue_id);
        }
        Ok(())
    }

    async fn query_state(&self) -> SyncResult<CueTree> {
        Ok(self.tree())
    }

    async fn query_state_lightweight(&self) -> SyncResult<CueTree> {
        Ok(self.tree())
    }

    async fn cue_lists(&self) -> SyncResult<CueTree> {
        Ok(self.tree())
    }

    async fn video_stages(&self) -> SyncResult<Vec<VideoStage>> {
        Ok(Vec::new())
    }

    async fn base_path(&self) -> SyncResult<Option<String>> {
        Ok(None)
    }
}

fn show() -> CueTree {
    CueTree::from_value(&json!({"cues": [
        {"type": "cue list", "name": "Main", "cues": [
            {"type": "audio", "number": "1", "name": "Door", "fileTarget": "audio/door.wav"},
            {"type": "group", "number": "2", "name": "Scene", "cues": [
                {"type": "audio", "number": "1", "name": "Inner", "notes": "quiet"},
                {"type": "start", "number": "2", "name": "Go door", "cueTargetNumber": "1"},
            ]},
            {"type": "memo", "name": "Note"},
        ]},
    ]}))
    .unwrap()
}

fn options() -> DriverOptions {
    DriverOptions {
        source_dir: Some(PathBuf::from("/show")),
        ..Default::default()
    }
}

#[tokio::test]
async fn first_pass_builds_the_tree_and_second_is_a_no_op() {
    let qlab = MemoryQlab::with_list("Main");
    let source = show();

    let cmp = reconcile(&source, None, Some(&qlab.tree()));
    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    let report = driver.apply(&source, &cmp).await.unwrap();

    assert_eq!(report.created, 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.moved, 2);
    assert_eq!(report.targets_resolved, 1);

    let live = qlab.tree();
    let main = &live.lists[0];
    let names: Vec<&str> = main.cues.iter().map(Cue::name_str).collect();
    assert_eq!(names, vec!["Door", "Scene", "Note"]);
    let scene = &main.cues[1];
    let inner: Vec<(&str, &str)> = scene.cues.iter().map(|c| (c.number_str(), c.name_str())).collect();
    assert_eq!(inner, vec![("2.1", "Inner"), ("2.2", "Go door")]);
    assert_eq!(main.cues[0].file_target.as_deref(), Some("/show/audio/door.wav"));
    assert_eq!(scene.cues[1].cue_target_number.as_deref(), Some("1"));
    assert_eq!(driver.mapping().number_to_id["2.1"], scene.cues[0].unique_id.clone().unwrap());

    // Nothing left to do on the next pass
    qlab.clear_log();
    let again = reconcile(&source, None, Some(&live));
    for key in ["1", "2", "2.1", "2.2", "@2[memo:Note]"] {
        assert_eq!(again.result(key).unwrap().action, Action::Skip, "{}", key);
    }
    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    let report = driver.apply(&source, &again).await.unwrap();
    assert_eq!((report.created, report.updated, report.moved), (0, 0, 0));
    assert!(qlab.log().is_empty(), "unexpected writes: {:?}", qlab.log());
}

#[tokio::test]
async fn updates_touch_only_changed_fields() {
    let qlab = MemoryQlab::with_list("Main");
    let source = show();
    let cmp = reconcile(&source, None, Some(&qlab.tree()));
    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    driver.apply(&source, &cmp).await.unwrap();
    let before = qlab.tree();

    let edited = CueTree::from_value(&json!({"cues": [
        {"type": "cue list", "name": "Main", "cues": [
            {"type": "audio", "number": "1", "name": "Front door", "fileTarget": "audio/door.wav"},
            {"type": "group", "number": "2", "name": "Scene", "cues": [
                {"type": "audio", "number": "1", "name": "Inner", "notes": "loud"},
                {"type": "start", "number": "2", "name": "Go door", "cueTargetNumber": "1"},
            ]},
            {"type": "memo", "name": "Note"},
        ]},
    ]}))
    .unwrap();

    qlab.clear_log();
    let cmp = reconcile(&edited, Some(&before), Some(&before));
    assert_eq!(cmp.result("1").unwrap().action, Action::Update);
    assert_eq!(cmp.result("2.1").unwrap().action, Action::Update);

    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    let report = driver.apply(&edited, &cmp).await.unwrap();
    assert_eq!(report.updated, 2);

    let id_one = before.lists[0].cues[0].unique_id.clone().unwrap();
    let id_inner = before.lists[0].cues[1].cues[0].unique_id.clone().unwrap();
    assert_eq!(
        qlab.log(),
        vec![
            format!("set {} name=Front door", id_one),
            format!("set {} notes=loud", id_inner),
        ]
    );
}

#[tokio::test]
async fn update_without_remote_id_aborts() {
    let qlab = MemoryQlab::with_list("Main");
    let source = CueTree::from_value(&json!({"cues": [{"type": "audio", "number": "7", "name": "X"}]})).unwrap();
    let mut cmp = reconcile(&source, None, None);
    let result = cmp.results.get_mut("7").unwrap();
    result.action = Action::Update;
    result.existing_id = None;

    let mut driver = MutationDriver::new(&qlab, options());
    let err = driver.apply(&source, &cmp).await.unwrap_err();
    assert!(matches!(err, SyncError::MissingRemoteId(ref key) if key == "7"));
    assert!(qlab.log().is_empty());
}

#[tokio::test]
async fn removed_cues_are_deleted_only_when_asked() {
    let qlab = MemoryQlab::with_list("Main");
    let source = show();
    let cmp = reconcile(&source, None, Some(&qlab.tree()));
    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    driver.apply(&source, &cmp).await.unwrap();
    let snapshot = qlab.tree();

    let trimmed = CueTree::from_value(&json!({"cues": [
        {"type": "cue list", "name": "Main", "cues": [
            {"type": "audio", "number": "1", "name": "Door", "fileTarget": "audio/door.wav"},
        ]},
    ]}))
    .unwrap();
    let cmp = reconcile(&trimmed, Some(&snapshot), Some(&snapshot));
    let removed: Vec<&str> = cmp.removed.iter().map(|r| r.key.as_str()).collect();
    assert!(removed.contains(&"2"));
    assert!(removed.contains(&"@2[memo:Note]"));

    qlab.clear_log();
    let mut keep = MutationDriver::new(&qlab, options());
    keep.index_existing().await;
    keep.apply(&trimmed, &cmp).await.unwrap();
    assert!(!qlab.log().iter().any(|l| l.starts_with("delete")));

    let mut prune = MutationDriver::new(
        &qlab,
        DriverOptions {
            delete_removed: true,
            ..options()
        },
    );
    prune.index_existing().await;
    let report = prune.apply(&trimmed, &cmp).await.unwrap();
    assert_eq!(report.deleted, cmp.removed.len());
    assert_eq!(qlab.tree().lists[0].cues.len(), 1);
}

#[tokio::test]
async fn unchanged_group_stays_put_while_its_children_are_reconciled() {
    let qlab = MemoryQlab::with_list("Main");
    let source = show();
    let cmp = reconcile(&source, None, Some(&qlab.tree()));
    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    driver.apply(&source, &cmp).await.unwrap();
    let before = qlab.tree();

    let edited = CueTree::from_value(&json!({"cues": [
        {"type": "cue list", "name": "Main", "cues": [
            {"type": "audio", "number": "1", "name": "Door", "fileTarget": "audio/door.wav"},
            {"type": "group", "number": "2", "name": "Scene", "cues": [
                {"type": "audio", "number": "1", "name": "Inner", "notes": "loud"},
                {"type": "start", "number": "2", "name": "Go door", "cueTargetNumber": "1"},
                {"type": "memo", "name": "Cue light"},
            ]},
            {"type": "memo", "name": "Note"},
        ]},
    ]}))
    .unwrap();

    qlab.clear_log();
    let cmp = reconcile(&edited, Some(&before), Some(&before));
    assert_eq!(cmp.result("2").unwrap().action, Action::Skip);
    assert_eq!(cmp.result("2.1").unwrap().action, Action::Update);
    assert_eq!(cmp.result("2@2[memo:Cue light]").unwrap().action, Action::Create);

    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    let report = driver.apply(&edited, &cmp).await.unwrap();
    assert_eq!((report.created, report.updated, report.moved), (1, 1, 1));

    let scene_id = before.lists[0].cues[1].unique_id.clone().unwrap();
    let id_inner = before.lists[0].cues[1].cues[0].unique_id.clone().unwrap();
    let log = qlab.log();
    assert!(!log.iter().any(|l| l.starts_with(&format!("set {} ", scene_id))), "{:?}", log);
    assert!(log.contains(&format!("set {} notes=loud", id_inner)));

    let live = qlab.tree();
    let scene = &live.lists[0].cues[1];
    let names: Vec<&str> = scene.cues.iter().map(Cue::name_str).collect();
    assert_eq!(names, vec!["Inner", "Go door", "Cue light"]);
    let light_id = scene.cues[2].unique_id.clone().unwrap();
    assert!(log.contains(&format!("move {} 2 {}", light_id, scene_id)));
    assert_eq!(driver.mapping().key_to_id["2@2[memo:Cue light]"], light_id);
}

#[tokio::test]
async fn positions_restart_in_each_list() {
    let qlab = MemoryQlab::with_list("Preshow");
    let source = CueTree::from_value(&json!({"cues": [
        {"type": "cue list", "name": "Preshow", "cues": [
            {"type": "audio", "name": "Walk-in"},
        ]},
        {"type": "cue list", "name": "Show", "cues": [
            {"type": "audio", "name": "Overture"},
        ]},
    ]}))
    .unwrap();

    let cmp = reconcile(&source, None, Some(&qlab.tree()));
    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    let report = driver.apply(&source, &cmp).await.unwrap();
    assert_eq!(report.created, 3);

    let live = qlab.tree();
    let contents: Vec<Vec<&str>> = live
        .lists
        .iter()
        .map(|l| l.cues.iter().map(Cue::name_str).collect())
        .collect();
    assert_eq!(contents, vec![vec!["Walk-in"], vec!["Overture"]]);

    qlab.clear_log();
    let again = reconcile(&source, None, Some(&live));
    assert_eq!(again.result("@0[audio:Walk-in]").unwrap().action, Action::Skip);
    assert_eq!(again.result("@0[audio:Overture]").unwrap().action, Action::Skip);

    let mut driver = MutationDriver::new(&qlab, options());
    driver.index_existing().await;
    let report = driver.apply(&source, &again).await.unwrap();
    assert_eq!((report.created, report.updated, report.moved), (0, 0, 0));
    assert!(qlab.log().is_empty(), "unexpected writes: {:?}", qlab.log());
}
