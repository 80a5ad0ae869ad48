//! Whole show trees in the shapes they arrive in.
//!
//! Show files put everything under `cues` (optionally wrapped in
//! `workspace`). QLab answers `/cueLists` with `data: [list, ...]`, where
//! each list holds its `cues`. Cue lists on either side are containers:
//! they take no identity key of their own, and positions inside each list
//! start again at 0.

use serde_json::{json, Value};

use crate::cue::Cue;
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueTree {
    /// Cue lists as QLab reports them.
    pub lists: Vec<Cue>,
    /// Top-level cues, including any cue lists a show file declares.
    pub cues: Vec<Cue>,
}

impl CueTree {
    pub fn from_cues(cues: Vec<Cue>) -> Self {
        Self {
            lists: Vec::new(),
            cues,
        }
    }

    pub fn from_lists(lists: Vec<Cue>) -> Self {
        Self {
            lists,
            cues: Vec::new(),
        }
    }

    /// Accepts `{cues}`, `{workspace: {cues}}`, `{data: [lists]}` and
    /// `{data: {cueLists, cues}}`.
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(SyncError::InvalidTree(format!(
                "expected an object, got {}",
                kind(value)
            )));
        };

        if let Some(cues) = object.get("cues") {
            return Ok(Self::from_cues(parse_cues(cues)?));
        }
        if let Some(cues) = object.get("workspace").and_then(|w| w.get("cues")) {
            return Ok(Self::from_cues(parse_cues(cues)?));
        }
        match object.get("data") {
            Some(Value::Array(_)) => {
                let lists = parse_cues(&object["data"])?;
                Ok(Self::from_lists(lists))
            }
            Some(Value::Object(data)) => {
                let lists = match data.get("cueLists") {
                    Some(lists) => parse_cues(lists)?,
                    None => Vec::new(),
                };
                let cues = match data.get("cues") {
                    Some(cues) => parse_cues(cues)?,
                    None => Vec::new(),
                };
                Ok(Self { lists, cues })
            }
            _ => Ok(Self::default()),
        }
    }

    /// Sibling sequences positions are counted within: the contents of
    /// each reported list, then the top-level cues.
    pub fn sibling_groups(&self) -> impl Iterator<Item = &[Cue]> {
        self.lists
            .iter()
            .map(|list| list.cues.as_slice())
            .chain(std::iter::once(self.cues.as_slice()))
    }

    /// Every list's contents followed by top-level cues, in one sequence.
    pub fn roots(&self) -> Vec<&Cue> {
        self.lists
            .iter()
            .flat_map(|list| list.cues.iter())
            .chain(self.cues.iter())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(|l| l.cues.is_empty()) && self.cues.is_empty()
    }

    /// Cues in the tree, not counting lists on either side.
    pub fn cue_count(&self) -> usize {
        fn count(cues: &[Cue]) -> usize {
            cues.iter()
                .map(|cue| if cue.is_list() { count(&cue.cues) } else { cue.count() })
                .sum()
        }
        self.sibling_groups().map(count).sum()
    }

    /// Serialise in a shape [`CueTree::from_value`] reads back unchanged.
    pub fn to_value(&self) -> Value {
        match (self.lists.is_empty(), self.cues.is_empty()) {
            (false, true) => json!({ "data": self.lists }),
            (true, _) => json!({ "cues": self.cues }),
            (false, false) => json!({ "data": { "cueLists": self.lists, "cues": self.cues } }),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Cue> {
        fn walk<'a>(cues: &'a [Cue], id: &str) -> Option<&'a Cue> {
            cues.iter().find_map(|cue| {
                if cue.unique_id.as_deref() == Some(id) {
                    Some(cue)
                } else {
                    walk(&cue.cues, id)
                }
            })
        }
        walk(&self.lists, id).or_else(|| walk(&self.cues, id))
    }

    /// Every unique ID in the tree, depth first. Lists included.
    pub fn unique_ids(&self) -> Vec<String> {
        fn walk(cues: &[Cue], out: &mut Vec<String>) {
            for cue in cues {
                if let Some(id) = &cue.unique_id {
                    out.push(id.clone());
                }
                walk(&cue.cues, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.lists, &mut out);
        walk(&self.cues, &mut out);
        out
    }
}

fn parse_cues(value: &Value) -> SyncResult<Vec<Cue>> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| {
                Cue::from_value(item.clone()).map_err(|e| SyncError::InvalidTree(e.to_string()))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(SyncError::InvalidTree(format!(
            "expected a cue array, got {}",
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
