//! Cascading option narrowing.
//!
//! When a select field's choices depend on another field of the same record
//! (pick a product, then pick one of *that product's* grades), a cascade rule
//! pairs the target field with its source. The resolver narrows the target's
//! options to those consistent with the source value by scanning the target's
//! source table. Narrowing is fail-open throughout: any lookup problem, an
//! unmatched source or missing metadata falls back to the full option list,
//! because an over-restricted picker blocks the user while an unfiltered one
//! merely shows too much.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::field::{FieldDescriptor, FieldKind, SelectOption};
use crate::ids::{FieldId, RecordId, TableId};
use crate::resolve::SessionContext;
use crate::store::{RecordRef, RecordStore};

/// Options offered for a field, with the narrowing applied (or not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub options: Vec<SelectOption>,
    /// Whether a cascade rule actually narrowed the list.
    pub narrowed: bool,
}

pub struct CascadeOptionResolver {
    store: Arc<dyn RecordStore>,
    ctx: Arc<SessionContext>,
}

impl CascadeOptionResolver {
    pub fn new(store: Arc<dyn RecordStore>, ctx: Arc<SessionContext>) -> Self {
        Self { store, ctx }
    }

    /// Options for `target_field` of the given record. With no cascade rule
    /// (or no way to evaluate one) this is the field's full option list.
    pub async fn options_for(
        &self,
        table: &TableId,
        record: &RecordId,
        target_field: &FieldId,
    ) -> ResolvedOptions {
        let fields = match self.ctx.field_metadata(self.store.as_ref(), table).await {
            Ok(fields) => fields,
            Err(err) => {
                warn!(table = %table, error = %err, "field metadata unavailable, no options");
                return ResolvedOptions {
                    options: Vec::new(),
                    narrowed: false,
                };
            }
        };
        let Some(target) = fields.iter().find(|d| &d.id == target_field) else {
            return ResolvedOptions {
                options: Vec::new(),
                narrowed: false,
            };
        };

        let full = ResolvedOptions {
            options: target.options.clone(),
            narrowed: false,
        };

        let Some(rule) = self.ctx.cascade_rule_for(target_field) else {
            return full;
        };
        let Some(source_table) = target.related_table_id.clone() else {
            debug!(field = %target_field, "cascade target has no source table, unfiltered");
            return full;
        };

        let source_value = match self
            .store
            .cell_value(table, record, &rule.source_field_id)
            .await
        {
            Ok(v) => v,
            Err(err) => {
                warn!(field = %rule.source_field_id, error = %err, "cascade source read failed, unfiltered");
                return full;
            }
        };
        if source_value.is_null() {
            return full;
        }

        match self
            .narrowed_options(&source_table, target, &rule.source_field_id, &source_value)
            .await
        {
            Some(options) if !options.is_empty() => ResolvedOptions {
                options,
                narrowed: true,
            },
            _ => full,
        }
    }

    /// Scan the source table for records whose source-field value matches,
    /// and collect their labels as the narrowed option set.
    async fn narrowed_options(
        &self,
        source_table: &TableId,
        target: &FieldDescriptor,
        source_field: &FieldId,
        source_value: &Value,
    ) -> Option<Vec<SelectOption>> {
        let source_fields = match self
            .ctx
            .field_metadata(self.store.as_ref(), source_table)
            .await
        {
            Ok(fields) => fields,
            Err(err) => {
                warn!(table = %source_table, error = %err, "cascade source metadata failed, unfiltered");
                return None;
            }
        };
        let records = match self.store.list_records(source_table).await {
            Ok(records) => records,
            Err(err) => {
                warn!(table = %source_table, error = %err, "cascade source scan failed, unfiltered");
                return None;
            }
        };

        // Mirror fields of the target: same field id in the source table.
        let match_field = source_fields.iter().find(|d| &d.id == source_field)?;
        let label_field = source_fields
            .iter()
            .find(|d| d.kind == FieldKind::PlainText)?;

        let codec = self.ctx.codec();
        let wanted = value_identities(source_value, match_field);
        if wanted.is_empty() {
            return None;
        }

        let mut options = Vec::new();
        for record in &records {
            let candidate = record.value(&match_field.id);
            let identities = value_identities(candidate, match_field);
            if identities.iter().any(|i| wanted.contains(i)) {
                let label = codec.normalize(record.value(&label_field.id), label_field.kind, label_field);
                if label.is_empty() {
                    continue;
                }
                push_option(&mut options, target, record, label);
            }
        }
        debug!(
            table = %source_table,
            matched = options.len(),
            "cascade narrowing computed"
        );
        Some(options)
    }
}

/// Keep the target's declared option id when the label matches one,
/// otherwise mint the record id as the option id. Duplicate labels collapse.
fn push_option(
    options: &mut Vec<SelectOption>,
    target: &FieldDescriptor,
    record: &RecordRef,
    label: String,
) {
    if options.iter().any(|o| o.label == label) {
        return;
    }
    let option = match target.option_by_label(&label) {
        Some(existing) => existing.clone(),
        None => SelectOption::new(record.id.as_str(), label),
    };
    options.push(option);
}

/// Comparable identities of a loose value: option ids, labels and strings,
/// arrays flattened.
fn value_identities(raw: &Value, field: &FieldDescriptor) -> Vec<String> {
    fn one(v: &Value, field: &FieldDescriptor, out: &mut Vec<String>) {
        match v {
            Value::String(s) if !s.is_empty() => {
                out.push(s.clone());
                if let Some(option) = field.option_by_id(s) {
                    out.push(option.label.clone());
                }
            }
            Value::Number(n) => out.push(n.to_string()),
            Value::Object(map) => {
                for key in ["id", "text", "name", "recordId", "record_id"] {
                    if let Some(s) = map.get(key).and_then(Value::as_str) {
                        if !s.is_empty() {
                            out.push(s.to_string());
                        }
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    one(item, field, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    one(raw, field, &mut out);
    out
}
