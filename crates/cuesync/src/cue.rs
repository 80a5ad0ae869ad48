//! Typed cue records.
//!
//! QLab and hand-written show files disagree on value types: numbers arrive
//! as strings, floats or integers, booleans as `true` or `"true"`. Every
//! modelled property is normalised to a string on the way in so the three
//! sides of a comparison speak the same language. Anything not modelled is
//! kept verbatim in [`Cue::extra`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of a show tree: a cue, a group, or a cue list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    #[serde(
        rename = "uniqueID",
        default,
        deserialize_with = "loose::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub unique_id: Option<String>,

    #[serde(
        rename = "type",
        default,
        deserialize_with = "loose::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cue_type: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Normalised with [`normalize_cue_number`].
    #[serde(default, deserialize_with = "loose::number", skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub file_target: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub color_name: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub cue_target_number: Option<String>,

    #[serde(
        rename = "cueTargetID",
        default,
        deserialize_with = "loose::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cue_target_id: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub pre_wait: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub post_wait: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub armed: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub flagged: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,

    #[serde(
        rename = "stageID",
        default,
        deserialize_with = "loose::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub stage_id: Option<String>,

    /// Group mode. QLab reports a number.
    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub infinite_loop: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub opacity: Option<String>,

    #[serde(default, deserialize_with = "loose::string", skip_serializing_if = "Option::is_none")]
    pub list_name: Option<String>,

    #[serde(default, deserialize_with = "loose::children", skip_serializing_if = "Vec::is_empty")]
    pub cues: Vec<Cue>,

    /// Properties not modelled above, e.g. `text/format/color`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cue {
    pub fn new(cue_type: &str, name: &str) -> Self {
        Self {
            cue_type: Some(cue_type.to_string()).filter(|s| !s.is_empty()),
            name: Some(name.to_string()).filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }

    pub fn with_number(mut self, number: &str) -> Self {
        self.number = Some(number.to_string()).filter(|s| !s.is_empty());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.unique_id = Some(id.to_string());
        self
    }

    pub fn with_children(mut self, cues: Vec<Cue>) -> Self {
        self.cues = cues;
        self
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        // Only string-keyed maps of strings and values; cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The cue's type, lowercased. QLab capitalises, show files usually don't.
    pub fn type_lower(&self) -> String {
        self.cue_type.as_deref().unwrap_or_default().to_lowercase()
    }

    pub fn is_list(&self) -> bool {
        matches!(self.type_lower().as_str(), "list" | "cue list" | "cuelist")
    }

    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn number_str(&self) -> &str {
        self.number.as_deref().unwrap_or_default()
    }

    /// A copy without children, as stored in an index.
    pub fn flat(&self) -> Cue {
        Cue {
            cues: Vec::new(),
            ..self.clone()
        }
    }

    pub fn get(&self, field: CueField) -> Option<&str> {
        match field {
            CueField::Name => self.name.as_deref(),
            CueField::Type => self.cue_type.as_deref(),
            CueField::FileTarget => self.file_target.as_deref(),
            CueField::Duration => self.duration.as_deref(),
            CueField::CueTargetNumber => self.cue_target_number.as_deref(),
            CueField::Armed => self.armed.as_deref(),
            CueField::ColorName => self.color_name.as_deref(),
            CueField::Flagged => self.flagged.as_deref(),
            CueField::Notes => self.notes.as_deref(),
        }
    }

    pub fn set(&mut self, field: CueField, value: Option<String>) {
        let slot = match field {
            CueField::Name => &mut self.name,
            CueField::Type => &mut self.cue_type,
            CueField::FileTarget => &mut self.file_target,
            CueField::Duration => &mut self.duration,
            CueField::CueTargetNumber => &mut self.cue_target_number,
            CueField::Armed => &mut self.armed,
            CueField::ColorName => &mut self.color_name,
            CueField::Flagged => &mut self.flagged,
            CueField::Notes => &mut self.notes,
        };
        *slot = value;
    }

    /// A numeric entry of [`Cue::extra`].
    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        match self.extra.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// An array entry of [`Cue::extra`] with exactly `len` numbers, e.g. an
    /// RGBA colour. Non-numeric elements read as zero.
    pub fn extra_floats(&self, key: &str, len: usize) -> Option<Vec<f32>> {
        let items = self.extra.get(key)?.as_array()?;
        if items.len() != len {
            return None;
        }
        Some(
            items
                .iter()
                .map(|v| v.as_f64().unwrap_or_default() as f32)
                .collect(),
        )
    }

    /// Total number of cues in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.cues.iter().map(Cue::count).sum::<usize>()
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(number) = &self.number {
            write!(f, "[{}] ", number)?;
        }
        write!(
            f,
            "{} ({})",
            self.name_str(),
            self.cue_type.as_deref().unwrap_or("?")
        )
    }
}

/// Fields the comparator looks at. Everything else is carried but never
/// decides whether a cue changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CueField {
    Name,
    Type,
    FileTarget,
    Duration,
    CueTargetNumber,
    Armed,
    ColorName,
    Flagged,
    Notes,
}

impl CueField {
    pub const ALL: [CueField; 9] = [
        CueField::Name,
        CueField::Type,
        CueField::FileTarget,
        CueField::Duration,
        CueField::CueTargetNumber,
        CueField::Armed,
        CueField::ColorName,
        CueField::Flagged,
        CueField::Notes,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            CueField::Name => "name",
            CueField::Type => "type",
            CueField::FileTarget => "fileTarget",
            CueField::Duration => "duration",
            CueField::CueTargetNumber => "cueTargetNumber",
            CueField::Armed => "armed",
            CueField::ColorName => "colorName",
            CueField::Flagged => "flagged",
            CueField::Notes => "notes",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Fields QLab omits for cue types that don't support them. These are
    /// only compared when both sides define them.
    pub fn requires_both(&self) -> bool {
        matches!(self, CueField::FileTarget | CueField::CueTargetNumber)
    }
}

impl fmt::Display for CueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Normalise a loosely typed property value. `null` is absent.
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string()),
        }),
        other => Some(other.to_string()),
    }
}

/// Normalise a cue number into its identity string.
///
/// Whole floats in `[0, 999]` keep one decimal place (`1.0` stays `"1.0"`),
/// other floats use the shortest form, integers have no decimal point.
/// `"1.0"` and `3` are therefore different identities even where they are
/// numerically close.
pub fn normalize_cue_number(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) if n.is_f64() => n.as_f64().map(|f| {
            if f.fract() == 0.0 && (0.0..=999.0).contains(&f) {
                format!("{:.1}", f)
            } else {
                f.to_string()
            }
        }),
        other => normalize_value(other),
    }
}

mod loose {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::Cue;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.as_ref().and_then(super::normalize_value))
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value
            .as_ref()
            .and_then(super::normalize_cue_number)
            .filter(|n| !n.is_empty()))
    }

    /// Non-object entries are dropped, a non-array is treated as no children.
    pub fn children<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Cue>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        let Some(Value::Array(items)) = value else {
            return Ok(Vec::new());
        };
        items
            .into_iter()
            .filter(Value::is_object)
            .map(serde_json::from_value)
            .collect::<Result<Vec<Cue>, _>>()
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn number_of(value: Value) -> Option<String> {
        Cue::from_value(json!({ "number": value })).unwrap().number
    }

    #[test]
    fn cue_number_formats() {
        assert_eq!(number_of(json!("1.0")).as_deref(), Some("1.0"));
        assert_eq!(number_of(json!(1.0)).as_deref(), Some("1.0"));
        assert_eq!(number_of(json!(1.00000)).as_deref(), Some("1.0"));
        assert_eq!(number_of(json!(3)).as_deref(), Some("3"));
        assert_eq!(number_of(json!(2.5)).as_deref(), Some("2.5"));
        assert_eq!(number_of(json!(1000.0)).as_deref(), Some("1000"));
        assert_eq!(number_of(json!("")), None);
        assert_eq!(number_of(Value::Null), None);
    }

    #[test]
    fn loose_properties_become_strings() {
        let cue = Cue::from_value(json!({
            "uniqueID": "ABC",
            "type": "Audio",
            "armed": true,
            "flagged": false,
            "duration": 10.5,
            "mode": 2,
            "colorName": "none",
        }))
        .unwrap();

        assert_eq!(cue.unique_id.as_deref(), Some("ABC"));
        assert_eq!(cue.cue_type.as_deref(), Some("Audio"));
        assert_eq!(cue.armed.as_deref(), Some("true"));
        assert_eq!(cue.flagged.as_deref(), Some("false"));
        assert_eq!(cue.duration.as_deref(), Some("10.5"));
        assert_eq!(cue.mode.as_deref(), Some("2"));
        assert_eq!(cue.type_lower(), "audio");
    }

    #[test]
    fn unknown_properties_are_kept() {
        let cue = Cue::from_value(json!({
            "type": "text",
            "text/format/color": [1.0, 0.5, 0.0, 1.0],
            "text/format/fontSize": 48,
            "translation": [10, -20],
        }))
        .unwrap();

        assert_eq!(
            cue.extra_floats("text/format/color", 4),
            Some(vec![1.0, 0.5, 0.0, 1.0])
        );
        assert_eq!(cue.extra_floats("translation", 2), Some(vec![10.0, -20.0]));
        assert_eq!(cue.extra_floats("translation", 4), None);
        assert_eq!(cue.extra_f64("text/format/fontSize"), Some(48.0));

        let back = cue.to_value();
        assert_eq!(back["text/format/color"], json!([1.0, 0.5, 0.0, 1.0]));
        assert_eq!(back["type"], json!("text"));
    }

    #[test]
    fn children_tolerate_junk() {
        let cue = Cue::from_value(json!({
            "type": "group",
            "cues": [{"type": "audio", "name": "A"}, "junk", 7, {"type": "audio"}],
        }))
        .unwrap();
        assert_eq!(cue.cues.len(), 2);
        assert_eq!(cue.count(), 3);
        assert!(cue.flat().cues.is_empty());

        let none = Cue::from_value(json!({"type": "group", "cues": null})).unwrap();
        assert!(none.cues.is_empty());
    }

    #[test]
    fn serialises_with_qlab_keys() {
        let cue = Cue::new("audio", "Door").with_number("1.0").with_id("X1");
        assert_eq!(
            cue.to_value(),
            json!({"uniqueID": "X1", "type": "audio", "name": "Door", "number": "1.0"})
        );
    }

    #[test]
    fn field_accessors_round_trip() {
        let mut cue = Cue::default();
        for field in CueField::ALL {
            cue.set(field, Some(field.key().to_string()));
            assert_eq!(cue.get(field), Some(field.key()));
            assert_eq!(CueField::from_key(field.key()), Some(field));
        }
        assert!(CueField::FileTarget.requires_both());
        assert!(!CueField::Name.requires_both());
    }

    #[test]
    fn list_detection_ignores_case() {
        assert!(Cue::new("list", "Main").is_list());
        assert!(Cue::new("Cue List", "Main").is_list());
        assert!(!Cue::new("group", "Main").is_list());
    }
}
