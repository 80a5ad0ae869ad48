//! Reconciliation behaviour end to end, from JSON trees to verdicts and
//! resolved conflicts.

use cuesync::reconcile::reasons;
use cuesync::{
    apply_resolutions, identify_conflicts, reconcile, Action, ConflictType, CueIndex, CueTree,
    ResolutionChoice, Resolutions,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn tree(value: Value) -> CueTree {
    CueTree::from_value(&value).unwrap()
}

/// Wraps cues the way QLab reports them.
fn remote(cues: Value) -> CueTree {
    tree(json!({"data": [{"type": "Cue List", "name": "Main", "uniqueID": "L1", "cues": cues}]}))
}

fn audio(number: &str, name: &str, id: &str) -> Value {
    json!({"type": "Audio", "number": number, "name": name, "uniqueID": id, "fileTarget": "/media/a.wav"})
}

#[test]
fn identical_trees_are_a_no_op() {
    let source = tree(json!({"workspace": {"cues": [
        {"type": "audio", "number": "1", "name": "Door", "fileTarget": "sounds/a.wav", "armed": "true"},
        {"type": "group", "number": 2, "name": "Scene", "cues": [
            {"type": "audio", "number": "1", "name": "Inner", "colorName": "none", "duration": "0"},
        ]},
    ]}}));
    let current = remote(json!([
        audio("1", "Door", "C1"),
        {"type": "Group", "number": "2", "name": "Scene", "uniqueID": "C2", "cues": [
            {"type": "Audio", "number": "1", "name": "Inner", "uniqueID": "C3", "colorName": "", "duration": ""},
        ]},
    ]));

    let cmp = reconcile(&source, None, Some(&current));
    let verdicts: Vec<(&str, Action)> = cmp.results.iter().map(|(k, r)| (k.as_str(), r.action)).collect();
    assert_eq!(
        verdicts,
        vec![("1", Action::Skip), ("2", Action::Skip), ("2.1", Action::Skip)]
    );
    assert!(cmp.results.values().all(|r| r.modified_fields.is_empty()));
    assert_eq!(cmp.result("2.1").unwrap().existing_id.as_deref(), Some("C3"));
}

#[test]
fn every_three_way_case_is_classified() {
    let source = tree(json!({"cues": [
        {"type": "audio", "number": "1", "name": "Same"},
        {"type": "audio", "number": "2", "name": "Same"},
        {"type": "audio", "number": "3", "name": "Edited"},
        {"type": "audio", "number": "4", "name": "Edited"},
    ]}));
    let cache = remote(json!([
        {"type": "Audio", "number": "1", "name": "Same", "uniqueID": "C1"},
        {"type": "Audio", "number": "2", "name": "Same", "uniqueID": "C2"},
        {"type": "Audio", "number": "3", "name": "Same", "uniqueID": "C3"},
        {"type": "Audio", "number": "4", "name": "Same", "uniqueID": "C4"},
    ]));
    let current = remote(json!([
        {"type": "Audio", "number": "1", "name": "Same", "uniqueID": "C1"},
        {"type": "Audio", "number": "2", "name": "Live", "uniqueID": "C2"},
        {"type": "Audio", "number": "3", "name": "Same", "uniqueID": "C3"},
        {"type": "Audio", "number": "4", "name": "Live", "uniqueID": "C4"},
    ]));

    let cmp = reconcile(&source, Some(&cache), Some(&current));
    let outcome = |key: &str| {
        let r = cmp.result(key).unwrap();
        (r.action, r.reason.clone())
    };
    assert_eq!(outcome("1"), (Action::Skip, reasons::UNCHANGED.to_string()));
    assert_eq!(outcome("2"), (Action::Update, reasons::REMOTE_MODIFIED.to_string()));
    assert_eq!(outcome("3"), (Action::Update, reasons::SOURCE_MODIFIED.to_string()));
    assert_eq!(outcome("4"), (Action::Update, reasons::BOTH_MODIFIED.to_string()));

    let both = &cmp.result("4").unwrap().modified_fields;
    assert_eq!(both["source_vs_cache_name"], "'Edited' -> 'Same'");
    assert_eq!(both["cache_vs_current_name"], "'Same' -> 'Live'");
    assert_eq!(cmp.result("2").unwrap().modified_fields["name"], "'Same' -> 'Live'");
}

#[test]
fn failed_query_still_reconciles() {
    let source = tree(json!({"cues": [
        {"type": "audio", "number": "1", "name": "A"},
        {"type": "memo", "name": ""},
    ]}));
    let cache = remote(json!([audio("1", "A", "C1")]));

    let cmp = reconcile(&source, Some(&cache), None);
    assert!(!cmp.has_remote_data);
    assert!(cmp.current_index.is_empty());
    assert_eq!(cmp.results.len(), 2);
    assert!(cmp.results.values().all(|r| r.action == Action::Create));
    assert!(identify_conflicts(&cmp).is_empty());
}

#[test]
fn anonymous_cues_match_by_position() {
    let source = tree(json!({"cues": [
        {"type": "cue list", "name": "Preshow", "cues": [
            {"type": "group", "cues": [
                {"type": "audio", "name": "A"},
                {"type": "audio", "name": "B"},
            ]},
        ]},
    ]}));
    let current = tree(json!({"data": [{"type": "Cue List", "name": "Preshow", "uniqueID": "L9", "cues": [
        {"type": "Group", "uniqueID": "G-live", "cues": [
            {"type": "Audio", "name": "A", "uniqueID": "A-live"},
            {"type": "Audio", "name": "B", "uniqueID": "B-live"},
        ]},
    ]}]}));

    let cmp = reconcile(&source, None, Some(&current));
    for (key, id) in [("@0[group:]", "G-live"), ("@0[audio:A]", "A-live"), ("@1[audio:B]", "B-live")] {
        let result = cmp.result(key).unwrap_or_else(|| panic!("no result for {}", key));
        assert_eq!(result.action, Action::Skip, "{}", key);
        assert_eq!(result.existing_id.as_deref(), Some(id));
    }
    // Lists are containers, matched by name when applied
    assert_eq!(cmp.results.len(), 3);
    assert!(!cmp.summary().has_work());
}

#[test]
fn unchanged_multi_list_show_is_a_no_op() {
    let source = tree(json!({"cues": [
        {"type": "cue list", "name": "Preshow", "cues": [
            {"type": "audio", "name": "Walk-in"},
            {"type": "memo", "name": "House open"},
        ]},
        {"type": "cue list", "name": "Show", "cues": [
            {"type": "audio", "name": "Overture"},
            {"type": "audio", "number": "1", "name": "Door"},
        ]},
    ]}));
    let current = tree(json!({"data": [
        {"type": "Cue List", "name": "Preshow", "uniqueID": "L1", "cues": [
            {"type": "Audio", "name": "Walk-in", "uniqueID": "W1"},
            {"type": "Memo", "name": "House open", "uniqueID": "M1"},
        ]},
        {"type": "Cue List", "name": "Show", "uniqueID": "L2", "cues": [
            {"type": "Audio", "name": "Overture", "uniqueID": "O1"},
            {"type": "Audio", "number": "1", "name": "Door", "uniqueID": "D1"},
        ]},
    ]}));

    let cmp = reconcile(&source, Some(&current), Some(&current));
    let verdicts: Vec<(&str, Action, Option<&str>)> = cmp
        .results
        .iter()
        .map(|(k, r)| (k.as_str(), r.action, r.existing_id.as_deref()))
        .collect();
    assert_eq!(
        verdicts,
        vec![
            ("1", Action::Skip, Some("D1")),
            ("@0[audio:Overture]", Action::Skip, Some("O1")),
            ("@0[audio:Walk-in]", Action::Skip, Some("W1")),
            ("@1[memo:House open]", Action::Skip, Some("M1")),
        ]
    );
    assert!(!cmp.summary().has_work());
    assert!(cmp.removed.is_empty());
    assert!(identify_conflicts(&cmp).is_empty());
}

#[test]
fn numeric_spellings_share_identity() {
    let source = tree(json!({"cues": [
        {"type": "audio", "number": "1.0", "name": "A"},
        {"type": "audio", "number": 3, "name": "C"},
    ]}));
    let current = remote(json!([
        {"type": "Audio", "number": 1.0, "name": "A", "uniqueID": "C1"},
        {"type": "Audio", "number": "3", "name": "C", "uniqueID": "C3"},
    ]));
    let keys: Vec<String> = CueIndex::build(&current).keys().cloned().collect();
    assert_eq!(keys, vec!["1.0", "3"]);

    let cmp = reconcile(&source, None, Some(&current));
    assert!(cmp.results.values().all(|r| r.action == Action::Skip));
}

#[test]
fn conflicts_resolve_into_verdicts() {
    let source = tree(json!({"cues": [
        {"type": "audio", "number": "1", "name": "Door (source)"},
        {"type": "audio", "number": "2", "name": "Bell"},
        {"type": "audio", "number": "3", "name": "Rain"},
    ]}));
    let cache = remote(json!([
        {"type": "Audio", "number": "1", "name": "Door", "uniqueID": "C1"},
        {"type": "Audio", "number": "2", "name": "Bell", "uniqueID": "C2"},
        {"type": "Audio", "number": "3", "name": "Rain", "uniqueID": "C3"},
    ]));
    let current = remote(json!([
        {"type": "Audio", "number": "1", "name": "Door (live)", "uniqueID": "C1"},
        {"type": "Audio", "number": "2", "name": "Bell (live)", "uniqueID": "C2"},
        {"type": "Audio", "number": "3", "name": "Rain", "uniqueID": "C3"},
    ]));

    let mut cmp = reconcile(&source, Some(&cache), Some(&current));
    let conflicts = identify_conflicts(&cmp);
    let kinds: Vec<(&str, ConflictType)> = conflicts.iter().map(|c| (c.key.as_str(), c.conflict_type)).collect();
    assert_eq!(
        kinds,
        vec![("1", ConflictType::ThreeWayDivergence), ("2", ConflictType::CacheStale)]
    );

    apply_resolutions(
        &mut cmp,
        &Resolutions::from([
            ("1".to_string(), ResolutionChoice::KeepRemote),
            ("2".to_string(), ResolutionChoice::UseSource),
        ]),
    );
    let one = cmp.result("1").unwrap();
    assert_eq!((one.action, one.reason.as_str()), (Action::Skip, reasons::USER_CHOSE_REMOTE));
    assert!(cmp.remote_chosen.contains("1"));
    let two = cmp.result("2").unwrap();
    assert_eq!((two.action, two.reason.as_str()), (Action::Update, reasons::USER_CHOSE_SOURCE));
    assert!(!cmp.remote_chosen.contains("2"));
    assert_eq!(cmp.result("3").unwrap().action, Action::Skip);
}
