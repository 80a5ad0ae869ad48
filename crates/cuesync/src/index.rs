//! Flattening show trees into identity-keyed maps.
//!
//! A cue is identified by its number when it has one. A relative child
//! number (no `.`) is joined onto the nearest numbered ancestor; a number
//! containing `.` is taken as absolute. Unnumbered cues are identified by
//! position: `{parent}@{index}[{type}:{name}]`, or `@{index}[..]` under an
//! unnumbered parent. Positional identity is best effort. Reordering or
//! renaming unnumbered siblings changes it, and identical anonymous cues
//! in the same slot of different parents collide (the later one wins).
//!
//! Cue lists are containers on both sides. A list gets no key; its
//! contents are keyed as if at the root, positions counted from 0 within
//! that list.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::cue::Cue;
use crate::tree::CueTree;

/// Join a cue number onto its parent's full number.
pub fn full_number(parent_number: &str, number: &str) -> String {
    if parent_number.is_empty() || number.is_empty() || number.contains('.') {
        number.to_string()
    } else {
        format!("{}.{}", parent_number, number)
    }
}

/// Key for an unnumbered cue at `position` under a parent numbered
/// `parent_number` (empty for unnumbered parents and the root).
pub fn position_key(parent_number: &str, position: usize, cue: &Cue) -> String {
    format!(
        "{}@{}[{}:{}]",
        parent_number,
        position,
        cue.type_lower(),
        cue.name_str()
    )
}

/// The identity key of `cue` and the number its children inherit.
pub fn identity_key(cue: &Cue, parent_number: &str, position: usize) -> (String, String) {
    let number = full_number(parent_number, cue.number_str());
    if number.is_empty() {
        (position_key(parent_number, position, cue), number)
    } else {
        (number.clone(), number)
    }
}

/// Every non-list cue in `tree` with its identity key and full number,
/// parents before children.
pub fn keyed_cues(tree: &CueTree) -> Vec<(String, String, &Cue)> {
    fn walk<'a>(cues: &'a [Cue], parent_number: &str, out: &mut Vec<(String, String, &'a Cue)>) {
        for (position, cue) in cues.iter().enumerate() {
            if cue.is_list() {
                walk(&cue.cues, "", out);
                continue;
            }
            let (key, number) = identity_key(cue, parent_number, position);
            out.push((key, number.clone(), cue));
            walk(&cue.cues, &number, out);
        }
    }

    let mut out = Vec::new();
    for group in tree.sibling_groups() {
        walk(group, "", &mut out);
    }
    out
}

/// Identity key → cue properties (children stripped), deterministic order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueIndex {
    entries: BTreeMap<String, Cue>,
}

impl CueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(tree: &CueTree) -> Self {
        let mut index = Self::new();
        for (key, _, cue) in keyed_cues(tree) {
            index.entries.insert(key, cue.flat());
        }
        index
    }

    pub fn get(&self, key: &str) -> Option<&Cue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Cue> {
        self.entries.iter()
    }

    pub fn insert(&mut self, key: String, cue: Cue) {
        self.entries.insert(key, cue);
    }

    /// Number → unique ID for every numbered cue carrying an ID.
    pub fn numbers_to_ids(&self) -> BTreeMap<String, String> {
        self.entries
            .values()
            .filter_map(|cue| Some((cue.number.clone()?, cue.unique_id.clone()?)))
            .collect()
    }
}

impl<'a> IntoIterator for &'a CueIndex {
    type Item = (&'a String, &'a Cue);
    type IntoIter = btree_map::Iter<'a, String, Cue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
