//! Record filtering for loop expansion.
//!
//! A loop element may carry a single condition that restricts which related
//! records it repeats over. Comparison is per field kind: select kinds match
//! on option id or label, checkboxes on truthiness, everything else on the
//! flattened display text. `contains` is case-insensitive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::field::{is_truthy, FieldDescriptor, FieldKind, FieldValueCodec};
use crate::ids::FieldId;
use crate::store::RecordRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

/// A single condition over one field of the looped records.
///
/// The field may be addressed by id or by name; id wins when both are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterCondition {
    pub fn equals(field_id: impl Into<FieldId>, value: Value) -> Self {
        Self {
            field_id: Some(field_id.into()),
            field_name: None,
            operator: FilterOperator::Equals,
            value,
        }
    }

    /// Resolve the condition's target field among the given descriptors.
    fn target<'a>(&self, fields: &'a [FieldDescriptor]) -> Option<&'a FieldDescriptor> {
        if let Some(id) = &self.field_id {
            if let Some(d) = fields.iter().find(|d| &d.id == id) {
                return Some(d);
            }
        }
        if let Some(name) = &self.field_name {
            return fields.iter().find(|d| &d.name == name);
        }
        None
    }

    /// Keep the records matching this condition. An unresolvable target field
    /// keeps everything; filtering must never silently empty a document.
    pub fn apply(
        &self,
        records: Vec<RecordRef>,
        fields: &[FieldDescriptor],
        codec: &FieldValueCodec,
    ) -> Vec<RecordRef> {
        let Some(field) = self.target(fields) else {
            debug!(
                field_id = ?self.field_id,
                field_name = ?self.field_name,
                "filter target field not found, keeping all records"
            );
            return records;
        };
        records
            .into_iter()
            .filter(|r| self.matches(r.values.get(&field.id).unwrap_or(&Value::Null), field, codec))
            .collect()
    }

    pub fn matches(&self, raw: &Value, field: &FieldDescriptor, codec: &FieldValueCodec) -> bool {
        match self.operator {
            FilterOperator::Equals => self.compare(raw, field, codec),
            FilterOperator::NotEquals => !self.compare(raw, field, codec),
            FilterOperator::Contains => self.contains(raw, field, codec),
            FilterOperator::NotContains => !self.contains(raw, field, codec),
        }
    }

    fn contains(&self, raw: &Value, field: &FieldDescriptor, codec: &FieldValueCodec) -> bool {
        let haystack = codec.normalize(raw, field.kind, field).to_lowercase();
        let needle = expected_texts(&self.value)
            .into_iter()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        !needle.is_empty() && haystack.contains(&needle)
    }

    fn compare(&self, raw: &Value, field: &FieldDescriptor, codec: &FieldValueCodec) -> bool {
        let expected = expected_texts(&self.value);
        match field.kind {
            FieldKind::SingleSelect | FieldKind::MultiSelect => {
                select_identities(raw, field).iter().any(|(id, label)| {
                    expected.iter().any(|e| {
                        e == id
                            || e == label
                            || field
                                .option_by_id(e)
                                .is_some_and(|o| o.id.as_str() == id)
                    })
                })
            }
            FieldKind::Checkbox => is_truthy(raw) == is_truthy(&self.value),
            FieldKind::Number | FieldKind::Currency | FieldKind::Percent => {
                match (raw.as_f64(), self.value.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => {
                        let display = codec.normalize(raw, field.kind, field);
                        expected.iter().any(|e| display.trim() == e.trim())
                    }
                }
            }
            _ => {
                let display = codec.normalize(raw, field.kind, field);
                expected.iter().any(|e| display.trim() == e.trim())
            }
        }
    }
}

/// (option id, label) pairs present in a raw select value, in order.
fn select_identities(raw: &Value, field: &FieldDescriptor) -> Vec<(String, String)> {
    fn one(v: &Value, field: &FieldDescriptor, out: &mut Vec<(String, String)>) {
        match v {
            Value::String(s) => {
                let label = field
                    .option_by_id(s)
                    .map(|o| o.label.clone())
                    .unwrap_or_else(|| s.clone());
                out.push((s.clone(), label));
            }
            Value::Object(map) => {
                let id = map
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let label = map
                    .get("text")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| field.option_by_id(&id).map(|o| o.label.clone()))
                    .unwrap_or_default();
                out.push((id, label));
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    match raw {
        Value::Array(items) => {
            for item in items {
                one(item, field, &mut out);
            }
        }
        other => one(other, field, &mut out),
    }
    out
}

/// Comparable texts carried by a condition value. An object condition (the
/// original filter UI stores `{id, text}` picks) contributes both.
fn expected_texts(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Null => vec![String::new()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Object(map) => {
            let mut out = Vec::new();
            for key in ["id", "text", "name"] {
                if let Some(s) = map.get(key).and_then(Value::as_str) {
                    if !s.is_empty() {
                        out.push(s.to_string());
                    }
                }
            }
            out
        }
        Value::Array(items) => items.iter().flat_map(expected_texts).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::SelectOption;
    use crate::ids::{RecordId, TableId};
    use serde_json::json;
    use std::collections::HashMap;

    fn record(id: &str, field: &str, value: Value) -> RecordRef {
        let mut values = HashMap::new();
        values.insert(FieldId::from(field), value);
        RecordRef {
            id: RecordId::from(id),
            table_id: TableId::from("tbl1"),
            values,
        }
    }

    fn select_field() -> FieldDescriptor {
        FieldDescriptor::new("fldSel", "Kind", FieldKind::SingleSelect).with_options(vec![
            SelectOption::new("optA", "Raw"),
            SelectOption::new("optB", "Finished"),
        ])
    }

    #[test]
    fn equals_on_select_matches_id_and_label() {
        let codec = FieldValueCodec::default();
        let fields = vec![select_field()];
        let records = vec![
            record("rec1", "fldSel", json!({"id": "optA", "text": "Raw"})),
            record("rec2", "fldSel", json!({"id": "optB", "text": "Finished"})),
            record("rec3", "fldSel", json!("optA")),
        ];

        let by_id = FilterCondition::equals("fldSel", json!("optA"));
        let kept = by_id.apply(records.clone(), &fields, &codec);
        assert_eq!(kept.len(), 2);

        // The original filter UI stores the picked option as an object.
        let by_object = FilterCondition::equals("fldSel", json!({"id": "optA"}));
        let kept = by_object.apply(records.clone(), &fields, &codec);
        assert_eq!(kept.len(), 2);

        let by_label = FilterCondition::equals("fldSel", json!("Finished"));
        let kept = by_label.apply(records, &fields, &codec);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id.as_str(), "rec2");
    }

    #[test]
    fn equals_on_text_compares_trimmed_display() {
        let codec = FieldValueCodec::default();
        let fields = vec![FieldDescriptor::new("fldT", "Name", FieldKind::PlainText)];
        let records = vec![
            record("rec1", "fldT", json!("alpha ")),
            record("rec2", "fldT", json!("beta")),
        ];
        let cond = FilterCondition::equals("fldT", json!("alpha"));
        let kept = cond.apply(records, &fields, &codec);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id.as_str(), "rec1");
    }

    #[test]
    fn contains_is_case_insensitive() {
        let codec = FieldValueCodec::default();
        let fields = vec![FieldDescriptor::new("fldT", "Name", FieldKind::PlainText)];
        let records = vec![
            record("rec1", "fldT", json!("Citric Acid")),
            record("rec2", "fldT", json!("Sodium Benzoate")),
        ];
        let cond = FilterCondition {
            field_id: Some(FieldId::from("fldT")),
            field_name: None,
            operator: FilterOperator::Contains,
            value: json!("citric"),
        };
        let kept = cond.apply(records.clone(), &fields, &codec);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id.as_str(), "rec1");

        let negated = FilterCondition {
            operator: FilterOperator::NotContains,
            ..cond
        };
        let kept = negated.apply(records, &fields, &codec);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id.as_str(), "rec2");
    }

    #[test]
    fn checkbox_matches_on_truthiness() {
        let codec = FieldValueCodec::default();
        let fields = vec![FieldDescriptor::new("fldC", "Done", FieldKind::Checkbox)];
        let records = vec![
            record("rec1", "fldC", json!(true)),
            record("rec2", "fldC", json!("是")),
            record("rec3", "fldC", json!(false)),
        ];
        let cond = FilterCondition::equals("fldC", json!(true));
        assert_eq!(cond.apply(records, &fields, &codec).len(), 2);
    }

    #[test]
    fn unknown_target_field_keeps_everything() {
        let codec = FieldValueCodec::default();
        let fields = vec![FieldDescriptor::new("fldT", "Name", FieldKind::PlainText)];
        let records = vec![record("rec1", "fldT", json!("x"))];
        let cond = FilterCondition::equals("fldMissing", json!("x"));
        assert_eq!(cond.apply(records, &fields, &codec).len(), 1);
    }

    #[test]
    fn field_name_fallback_resolves_target() {
        let codec = FieldValueCodec::default();
        let fields = vec![FieldDescriptor::new("fldT", "Name", FieldKind::PlainText)];
        let records = vec![
            record("rec1", "fldT", json!("x")),
            record("rec2", "fldT", json!("y")),
        ];
        let cond = FilterCondition {
            field_id: None,
            field_name: Some("Name".to_string()),
            operator: FilterOperator::Equals,
            value: json!("y"),
        };
        let kept = cond.apply(records, &fields, &codec);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id.as_str(), "rec2");
    }
}
