//! Field-level cue comparison.

use std::collections::BTreeMap;
use std::path::Path;

use crate::cue::{Cue, CueField};
use crate::index::CueIndex;

/// Field name → `"'old' -> 'new'"`.
pub type FieldDiff = BTreeMap<String, String>;

/// Whether two normalised values of `field` mean the same thing.
pub fn field_equivalent(field: CueField, a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match field {
        // Operational state, never content
        CueField::Armed | CueField::Flagged => true,
        CueField::Duration => is_zero_duration(a) && is_zero_duration(b),
        CueField::Type => a.eq_ignore_ascii_case(b),
        CueField::FileTarget => !a.is_empty() && !b.is_empty() && basename(a) == basename(b),
        CueField::ColorName => is_no_color(a) && is_no_color(b),
        _ => false,
    }
}

fn is_zero_duration(value: &str) -> bool {
    value.is_empty() || value == "0"
}

fn is_no_color(value: &str) -> bool {
    value.is_empty() || value == "none"
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// The difference in one field between `a` and `b`, if there is one.
pub fn field_difference(field: CueField, a: &Cue, b: &Cue) -> Option<String> {
    let (raw_a, raw_b) = (a.get(field), b.get(field));
    let va = raw_a.unwrap_or_default();
    let vb = raw_b.unwrap_or_default();

    if va.is_empty() && vb.is_empty() {
        return None;
    }
    // QLab leaves these out for cue types without them
    if field.requires_both() && (raw_a.is_none() || raw_b.is_none()) {
        return None;
    }
    if field_equivalent(field, va, vb) {
        return None;
    }
    Some(format!("'{}' -> '{}'", va, vb))
}

pub fn compare_detailed(a: &Cue, b: &Cue) -> FieldDiff {
    CueField::ALL
        .into_iter()
        .filter_map(|field| Some((field.key().to_string(), field_difference(field, a, b)?)))
        .collect()
}

pub fn cues_equal(a: &Cue, b: &Cue) -> bool {
    CueField::ALL
        .into_iter()
        .all(|field| field_difference(field, a, b).is_none())
}

/// Same key set and every shared cue equal.
pub fn indexes_equal(a: &CueIndex, b: &CueIndex) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, cue)| b.get(key).is_some_and(|other| cues_equal(cue, other)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn cue(value: serde_json::Value) -> Cue {
        Cue::from_value(value).unwrap()
    }

    #[test]
    fn equivalence_policy() {
        assert!(compare_detailed(&cue(json!({"armed": "true"})), &cue(json!({"armed": ""}))).is_empty());
        assert!(compare_detailed(&cue(json!({"flagged": true})), &cue(json!({"flagged": false}))).is_empty());
        assert!(compare_detailed(&cue(json!({"colorName": ""})), &cue(json!({"colorName": "none"}))).is_empty());
        assert!(compare_detailed(&cue(json!({"duration": "0"})), &cue(json!({"duration": ""}))).is_empty());
        assert!(compare_detailed(&cue(json!({"type": "Audio"})), &cue(json!({"type": "audio"}))).is_empty());
    }

    #[test]
    fn differences_are_quoted() {
        let diff = compare_detailed(
            &cue(json!({"name": "Old", "type": "audio"})),
            &cue(json!({"name": "New", "type": "Audio"})),
        );
        assert_eq!(
            diff,
            BTreeMap::from([("name".to_string(), "'Old' -> 'New'".to_string())])
        );
    }

    #[test]
    fn optional_remote_fields_need_both_sides() {
        let source = cue(json!({"fileTarget": "audio/door.wav", "cueTargetNumber": "3"}));
        let remote = cue(json!({}));
        assert!(compare_detailed(&source, &remote).is_empty());

        let remote = cue(json!({"fileTarget": "/Volumes/show/audio/door.wav", "cueTargetNumber": "3"}));
        assert!(compare_detailed(&source, &remote).is_empty());

        let remote = cue(json!({"fileTarget": "/Volumes/show/audio/bell.wav", "cueTargetNumber": "4"}));
        let diff = compare_detailed(&source, &remote);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff["cueTargetNumber"], "'3' -> '4'");
    }

    #[test]
    fn file_target_against_empty_differs() {
        let diff = compare_detailed(
            &cue(json!({"fileTarget": "a.wav"})),
            &cue(json!({"fileTarget": ""})),
        );
        assert_eq!(diff["fileTarget"], "'a.wav' -> ''");
    }

    #[test]
    fn both_empty_is_never_a_difference() {
        let diff = compare_detailed(&cue(json!({"notes": ""})), &cue(json!({})));
        assert!(diff.is_empty());
        assert!(cues_equal(&cue(json!({"notes": ""})), &cue(json!({}))));
    }

    #[test]
    fn unmodelled_fields_are_ignored() {
        assert!(cues_equal(
            &cue(json!({"name": "A", "preWait": 1, "text": "hello"})),
            &cue(json!({"name": "A", "preWait": 2})),
        ));
    }
}
