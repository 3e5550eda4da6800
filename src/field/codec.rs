//! Conversion between loosely-typed external field values and display text.
//!
//! The store hands us `serde_json::Value` in a number of historical shapes
//! (bare scalars, `{text, name, link, ...}` objects, arrays of either). All of
//! that is flattened here, once, per field kind. `normalize` and `denormalize`
//! are intentionally not exact inverses: round-trip identity holds only for
//! `PlainText` and `Number`. Structured ("rich") values are reduced to plain
//! text, which loses markup — accepted information loss.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FieldDescriptor, FieldKind};
use crate::error::EditError;

/// Upper bound on the JSON dump used as a last-resort display form.
const JSON_FALLBACK_LIMIT: usize = 100;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("url regex is valid")
    })
}

/// One piece of a rich field value: either plain text or a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RichSegment {
    Text { text: String },
    Link { text: String, url: String },
}

impl RichSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Link {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// Converts external field values to and from display text, per field kind.
///
/// The currency symbol and the date-time pattern are rendering conventions of
/// the hosting product, so they are fields rather than constants.
#[derive(Debug, Clone)]
pub struct FieldValueCodec {
    currency_symbol: String,
    datetime_format: String,
    date_format: String,
}

impl Default for FieldValueCodec {
    fn default() -> Self {
        Self {
            currency_symbol: "¥".to_string(),
            datetime_format: "%Y-%m-%d %H:%M:%S".to_string(),
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

impl FieldValueCodec {
    pub fn new(currency_symbol: impl Into<String>) -> Self {
        Self {
            currency_symbol: currency_symbol.into(),
            ..Self::default()
        }
    }

    // -----------------------------------------------------------------------
    // normalize: external value -> display text
    // -----------------------------------------------------------------------

    /// Render a raw external value as display text. Pure and total: every
    /// input maps to a string, `null` maps to `""`.
    pub fn normalize(&self, raw: &Value, kind: FieldKind, descriptor: &FieldDescriptor) -> String {
        if raw.is_null() {
            return String::new();
        }

        // Select and URL kinds resolve their own object shapes before the
        // generic object fallback gets a chance to mangle them.
        match kind {
            FieldKind::SingleSelect => return self.single_select_text(raw, descriptor),
            FieldKind::MultiSelect => return self.multi_select_text(raw, descriptor),
            FieldKind::Url => return url_display_text(raw),
            _ => {}
        }

        if let Value::Object(map) = raw {
            return object_display_text(map);
        }

        match kind {
            FieldKind::PlainText | FieldKind::Email | FieldKind::Phone | FieldKind::Barcode => {
                match raw {
                    Value::Array(items) => join_nonempty(
                        items.iter().map(|v| match v {
                            Value::Object(map) => first_of(map, &["text", "name", "value"]),
                            other => scalar_text(other),
                        }),
                        "\n",
                    ),
                    other => scalar_text(other),
                }
            }

            FieldKind::Number => scalar_text(raw),

            FieldKind::Currency => match raw.as_f64() {
                Some(n) => format!("{}{:.2}", self.currency_symbol, n),
                None => scalar_text(raw),
            },

            FieldKind::Percent => match raw.as_f64() {
                Some(n) => format!("{:.2}%", n * 100.0),
                None => scalar_text(raw),
            },

            FieldKind::DateTime | FieldKind::CreatedTime | FieldKind::ModifiedTime => match raw {
                Value::Number(_) => raw
                    .as_i64()
                    .and_then(|ms| self.format_timestamp(ms, &self.datetime_format))
                    .unwrap_or_default(),
                Value::String(s) => s.clone(),
                _ => String::new(),
            },

            FieldKind::Checkbox => {
                if is_truthy(raw) {
                    "✓".to_string()
                } else {
                    String::new()
                }
            }

            FieldKind::Person | FieldKind::CreatedUser | FieldKind::ModifiedUser => match raw {
                Value::Array(items) => join_nonempty(
                    items.iter().map(|v| match v {
                        Value::Object(map) => first_of(map, &["name", "en_name", "id"]),
                        other => scalar_text(other),
                    }),
                    ", ",
                ),
                other => scalar_text(other),
            },

            FieldKind::Attachment => match raw {
                Value::Array(items) => {
                    let names: Vec<String> = items
                        .iter()
                        .filter_map(|v| v.as_object())
                        .map(|map| first_of(map, &["name", "filename"]))
                        .filter(|s| !s.is_empty())
                        .collect();
                    if names.is_empty() {
                        if items.is_empty() {
                            String::new()
                        } else {
                            format!("{} attachments", items.len())
                        }
                    } else {
                        names.join(", ")
                    }
                }
                _ => "1 attachment".to_string(),
            },

            FieldKind::RelationOne | FieldKind::RelationMany => match raw {
                Value::Array(items) => join_nonempty(
                    items.iter().map(|v| match v {
                        Value::Object(map) => first_of(map, &["text", "name", "id"]),
                        other => scalar_text(other),
                    }),
                    ", ",
                ),
                other => scalar_text(other),
            },

            FieldKind::Location => scalar_text(raw),

            FieldKind::GroupChat => match raw {
                Value::Array(items) => join_nonempty(
                    items.iter().map(|v| match v {
                        Value::Object(map) => first_of(map, &["name", "en_name"]),
                        other => scalar_text(other),
                    }),
                    ", ",
                ),
                other => scalar_text(other),
            },

            FieldKind::Formula | FieldKind::Lookup => match raw {
                Value::Array(items) => join_nonempty(
                    items
                        .iter()
                        .map(|v| self.normalize(v, FieldKind::PlainText, descriptor)),
                    ", ",
                ),
                other => scalar_text(other),
            },

            // Select/URL kinds handled above; remaining kinds fall through to
            // the generic scalar/array rendering.
            _ => match raw {
                Value::Array(items) => join_nonempty(
                    items.iter().map(|v| match v {
                        Value::Object(map) => first_of(map, &["text", "name", "label"]),
                        other => scalar_text(other),
                    }),
                    ", ",
                ),
                other => scalar_text(other),
            },
        }
    }

    fn single_select_text(&self, raw: &Value, descriptor: &FieldDescriptor) -> String {
        match raw {
            // A bare string may be an option id; fall back to the raw string.
            Value::String(s) => descriptor
                .option_by_id(s)
                .map(|o| o.label.clone())
                .unwrap_or_else(|| s.clone()),
            Value::Object(map) => {
                let text = first_of(map, &["text", "name"]);
                if !text.is_empty() {
                    return text;
                }
                map.get("id")
                    .and_then(Value::as_str)
                    .and_then(|id| descriptor.option_by_id(id))
                    .map(|o| o.label.clone())
                    .unwrap_or_default()
            }
            _ => String::new(),
        }
    }

    fn multi_select_text(&self, raw: &Value, descriptor: &FieldDescriptor) -> String {
        match raw {
            Value::Array(items) => join_nonempty(
                items.iter().map(|v| self.single_select_text(v, descriptor)),
                ", ",
            ),
            _ => String::new(),
        }
    }

    fn format_timestamp(&self, ms: i64, pattern: &str) -> Option<String> {
        DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.format(pattern).to_string())
    }

    /// Date-only rendering (`YYYY-MM-DD`) used by table columns that hide the
    /// time-of-day portion.
    pub fn normalize_date_only(
        &self,
        raw: &Value,
        kind: FieldKind,
        descriptor: &FieldDescriptor,
    ) -> String {
        if let Some(ms) = raw.as_i64() {
            if let Some(s) = self.format_timestamp(ms, &self.date_format) {
                return s;
            }
        }
        let display = self.normalize(raw, kind, descriptor);
        // Keep the leading YYYY-MM-DD of an already-formatted value.
        if display.len() >= 10 && display.is_char_boundary(10) {
            let head = &display[..10];
            if NaiveDate::parse_from_str(head, &self.date_format).is_ok() {
                return head.to_string();
            }
        }
        display
    }

    // -----------------------------------------------------------------------
    // denormalize: display text -> external value (editable kinds only)
    // -----------------------------------------------------------------------

    /// Map edited display text back to the external value shape the store
    /// expects. Only editable kinds are supported; select resolution prefers
    /// option id, then the first label match.
    pub fn denormalize(
        &self,
        display: &str,
        kind: FieldKind,
        descriptor: &FieldDescriptor,
    ) -> Result<Value, EditError> {
        if kind.is_read_only() {
            return Err(EditError::ReadOnlyField {
                field_id: descriptor.id.clone(),
                kind,
            });
        }

        match kind {
            FieldKind::PlainText
            | FieldKind::Email
            | FieldKind::Phone
            | FieldKind::Barcode
            | FieldKind::Url => Ok(Value::String(display.to_string())),

            FieldKind::Number | FieldKind::Currency | FieldKind::Percent => {
                let cleaned = display
                    .trim()
                    .trim_start_matches(self.currency_symbol.as_str())
                    .trim_end_matches('%')
                    .trim();
                let n = cleaned.parse::<f64>().unwrap_or(0.0);
                Ok(Value::from(n))
            }

            FieldKind::DateTime => Ok(self.parse_datetime(display.trim())),

            FieldKind::SingleSelect => Ok(self.resolve_option(display.trim(), descriptor)),

            FieldKind::MultiSelect => {
                let parts: Vec<Value> = display
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| self.resolve_option(s, descriptor))
                    .collect();
                Ok(Value::Array(parts))
            }

            FieldKind::Checkbox => Ok(Value::Bool(is_truthy(&Value::String(
                display.to_string(),
            )))),

            other => Err(EditError::UnsupportedKind(other)),
        }
    }

    /// External shape of a checkbox state. Checkboxes never round-trip
    /// through text.
    pub fn checkbox_value(&self, checked: bool) -> Value {
        Value::Bool(checked)
    }

    /// Resolve an edited select value to an option object. Id wins over
    /// label; an unmatched string is written back as-is.
    fn resolve_option(&self, input: &str, descriptor: &FieldDescriptor) -> Value {
        let option = descriptor
            .option_by_id(input)
            .or_else(|| descriptor.option_by_label(input));
        match option {
            Some(o) => {
                let mut map = Map::new();
                map.insert("id".to_string(), Value::String(o.id.as_str().to_string()));
                map.insert("text".to_string(), Value::String(o.label.clone()));
                Value::Object(map)
            }
            None => Value::String(input.to_string()),
        }
    }

    fn parse_datetime(&self, s: &str) -> Value {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, &self.datetime_format) {
            return Value::from(dt.and_utc().timestamp_millis());
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, &self.date_format) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return Value::from(dt.and_utc().timestamp_millis());
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Value::from(dt.timestamp_millis());
        }
        Value::Null
    }

    // -----------------------------------------------------------------------
    // Rich segments
    // -----------------------------------------------------------------------

    /// Split a field value into text/link segments, preserving order.
    ///
    /// Detection rules, in order: (a) a plain string containing an
    /// `http(s)://` substring, (b) a structured item carrying a `link`/`url`
    /// attribute, (c) an array of either.
    pub fn parse_rich_segments(&self, raw: &Value, kind: FieldKind) -> Vec<RichSegment> {
        if value_is_blank(raw) {
            return vec![RichSegment::text("")];
        }

        if let Value::String(s) = raw {
            return split_string_links(s);
        }

        if kind == FieldKind::Url {
            match raw {
                Value::Array(items) => {
                    let mut segments = Vec::new();
                    for (i, item) in items.iter().enumerate() {
                        match item {
                            Value::Object(map) => {
                                let text = first_of(map, &["text", "name", "link", "url"]);
                                let url = first_of(map, &["link", "url"]);
                                if url.is_empty() {
                                    segments.push(RichSegment::text(text));
                                } else {
                                    segments.push(RichSegment::link(text, url));
                                }
                            }
                            other => segments.push(RichSegment::text(scalar_text(other))),
                        }
                        if i + 1 < items.len() {
                            segments.push(RichSegment::text(", "));
                        }
                    }
                    return segments;
                }
                Value::Object(map) => {
                    let text = first_of(map, &["text", "name", "link", "url"]);
                    let url = first_of(map, &["link", "url"]);
                    if url.is_empty() {
                        return vec![RichSegment::text(text)];
                    }
                    return vec![RichSegment::link(text, url)];
                }
                _ => {}
            }
        }

        if let Value::Array(items) = raw {
            let mut segments = Vec::new();
            for item in items {
                if value_is_blank(item) {
                    continue;
                }
                match item {
                    Value::String(s) => segments.extend(split_string_links(s)),
                    Value::Object(map) => {
                        let typed_url = map.get("type").and_then(Value::as_str) == Some("url");
                        let link = map.get("link").and_then(Value::as_str).unwrap_or("");
                        if !link.is_empty() {
                            let text = if typed_url {
                                first_of_or(map, &["text"], link)
                            } else {
                                first_of_or(map, &["text", "name"], link)
                            };
                            segments.push(RichSegment::link(text, link));
                        } else {
                            let text = first_of(map, &["text", "name", "value"]);
                            if !text.is_empty() {
                                segments.extend(split_string_links(&text));
                            }
                        }
                    }
                    other => segments.push(RichSegment::text(scalar_text(other))),
                }
            }
            if segments.is_empty() {
                // Fall back to the flattened display form so the value still
                // shows up somewhere.
                let desc = FieldDescriptor::new("", "", kind);
                return vec![RichSegment::text(self.normalize(raw, kind, &desc))];
            }
            return segments;
        }

        let desc = FieldDescriptor::new("", "", kind);
        vec![RichSegment::text(self.normalize(raw, kind, &desc))]
    }

    // -----------------------------------------------------------------------
    // Edit seeds
    // -----------------------------------------------------------------------

    /// Plain-text form of a value for seeding an editor input. Unlike
    /// `normalize` this never adds formatting decoration (labels, currency
    /// symbols stay, but multi-line text values concatenate without
    /// separators, matching what the user last typed).
    pub fn editable_text(&self, raw: &Value, kind: FieldKind, descriptor: &FieldDescriptor) -> String {
        if raw.is_null() {
            return String::new();
        }
        match kind {
            FieldKind::Url => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|v| match v {
                        Value::Object(map) => first_of(map, &["text", "name", "link", "url"]),
                        other => scalar_text(other),
                    })
                    .collect::<Vec<_>>()
                    .join(""),
                Value::Object(map) => first_of(map, &["text", "name", "link", "url"]),
                other => scalar_text(other),
            },

            FieldKind::PlainText | FieldKind::Email | FieldKind::Phone | FieldKind::Barcode => {
                match raw {
                    Value::Array(items) => items
                        .iter()
                        .map(|v| match v {
                            Value::Object(map) => first_of(map, &["text", "name", "value"]),
                            other => scalar_text(other),
                        })
                        .collect::<Vec<_>>()
                        .join(""),
                    Value::Object(map) => first_of(map, &["text", "name", "value"]),
                    other => scalar_text(other),
                }
            }

            FieldKind::Number | FieldKind::Currency | FieldKind::Percent => match raw {
                Value::Number(_) => scalar_text(raw),
                Value::Array(items) => match items.first() {
                    Some(Value::Object(map)) => first_of(map, &["text", "value", "name"]),
                    Some(other) => scalar_text(other),
                    None => String::new(),
                },
                other => scalar_text(other),
            },

            FieldKind::SingleSelect | FieldKind::MultiSelect => {
                self.normalize(raw, kind, descriptor)
            }

            _ => self.normalize(raw, kind, descriptor),
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Loose truthiness, matching the store's historical checkbox shapes: bools,
/// numbers, yes-strings, and arrays/objects wrapping either.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let v = s.trim().to_lowercase();
            matches!(v.as_str(), "是" | "√" | "✓" | "true" | "1" | "yes")
        }
        Value::Array(items) => items.first().is_some_and(is_truthy),
        Value::Object(map) => {
            let text = first_of(map, &["text", "name", "value"]);
            is_truthy(&Value::String(text))
        }
    }
}

fn value_is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// First non-empty string (or number, stringified) among the given keys.
fn first_of(map: &Map<String, Value>, keys: &[&str]) -> String {
    for key in keys {
        match map.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    String::new()
}

fn first_of_or(map: &Map<String, Value>, keys: &[&str], fallback: &str) -> String {
    let found = first_of(map, keys);
    if found.is_empty() {
        fallback.to_string()
    } else {
        found
    }
}

/// Display form of an arbitrary object value: the well-known text keys, then
/// the first non-blank string/number property, then truncated JSON.
fn object_display_text(map: &Map<String, Value>) -> String {
    let known = first_of(map, &["text", "name", "en_name", "title", "label"]);
    if !known.is_empty() {
        return known;
    }
    for value in map.values() {
        match value {
            Value::String(s) if !s.trim().is_empty() => return s.clone(),
            Value::Number(n) => return n.to_string(),
            _ => {}
        }
    }
    if map.is_empty() {
        return String::new();
    }
    let json = serde_json::to_string(map).unwrap_or_default();
    if json.chars().count() > JSON_FALLBACK_LIMIT {
        let head: String = json.chars().take(JSON_FALLBACK_LIMIT).collect();
        format!("{head}...")
    } else {
        json
    }
}

fn url_display_text(raw: &Value) -> String {
    match raw {
        Value::Array(items) => join_nonempty(
            items.iter().map(|v| match v {
                Value::Object(map) => first_of(map, &["text", "name", "link", "url"]),
                other => scalar_text(other),
            }),
            "\n",
        ),
        Value::Object(map) => first_of(map, &["text", "name", "link", "url"]),
        other => scalar_text(other),
    }
}

fn join_nonempty(parts: impl Iterator<Item = String>, sep: &str) -> String {
    parts
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Split a plain string into text/link segments around `http(s)://` URLs.
fn split_string_links(text: &str) -> Vec<RichSegment> {
    if text.is_empty() {
        return vec![RichSegment::text("")];
    }
    let re = url_regex();
    let mut segments = Vec::new();
    let mut last = 0;
    for m in re.find_iter(text) {
        if m.start() > last {
            segments.push(RichSegment::text(&text[last..m.start()]));
        }
        segments.push(RichSegment::link(m.as_str(), m.as_str()));
        last = m.end();
    }
    if segments.is_empty() {
        return vec![RichSegment::text(text)];
    }
    if last < text.len() {
        segments.push(RichSegment::text(&text[last..]));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> FieldValueCodec {
        FieldValueCodec::default()
    }

    fn desc(kind: FieldKind) -> FieldDescriptor {
        FieldDescriptor::new("fld1", "Field", kind)
    }

    fn select_desc() -> FieldDescriptor {
        FieldDescriptor::new("fld1", "Method", FieldKind::SingleSelect).with_options(vec![
            SelectOption::new("optA", "HPLC"),
            SelectOption::new("optB", "GC-MS"),
        ])
    }

    use crate::field::SelectOption;

    #[test]
    fn normalize_null_is_empty_for_every_kind() {
        let c = codec();
        for kind in [
            FieldKind::PlainText,
            FieldKind::Number,
            FieldKind::Currency,
            FieldKind::Percent,
            FieldKind::DateTime,
            FieldKind::SingleSelect,
            FieldKind::MultiSelect,
            FieldKind::Checkbox,
            FieldKind::Person,
            FieldKind::Attachment,
            FieldKind::Url,
            FieldKind::RelationMany,
            FieldKind::Formula,
        ] {
            assert_eq!(c.normalize(&Value::Null, kind, &desc(kind)), "");
        }
    }

    #[test]
    fn normalize_scalar_kinds() {
        let c = codec();
        assert_eq!(c.normalize(&json!("hello"), FieldKind::PlainText, &desc(FieldKind::PlainText)), "hello");
        assert_eq!(c.normalize(&json!(5.0), FieldKind::Number, &desc(FieldKind::Number)), "5.0");
        assert_eq!(c.normalize(&json!(12.5), FieldKind::Currency, &desc(FieldKind::Currency)), "¥12.50");
        assert_eq!(c.normalize(&json!(0.375), FieldKind::Percent, &desc(FieldKind::Percent)), "37.50%");
        assert_eq!(c.normalize(&json!(true), FieldKind::Checkbox, &desc(FieldKind::Checkbox)), "✓");
        assert_eq!(c.normalize(&json!(false), FieldKind::Checkbox, &desc(FieldKind::Checkbox)), "");
    }

    #[test]
    fn normalize_datetime_from_millis() {
        let c = codec();
        let out = c.normalize(&json!(0), FieldKind::DateTime, &desc(FieldKind::DateTime));
        assert_eq!(out, "1970-01-01 00:00:00");
    }

    #[test]
    fn normalize_select_resolves_option_labels() {
        let c = codec();
        let d = select_desc();
        assert_eq!(c.normalize(&json!("optA"), FieldKind::SingleSelect, &d), "HPLC");
        assert_eq!(c.normalize(&json!({"id": "optB"}), FieldKind::SingleSelect, &d), "GC-MS");
        assert_eq!(c.normalize(&json!({"text": "Manual"}), FieldKind::SingleSelect, &d), "Manual");
        // Unknown ids fall back to the raw string.
        assert_eq!(c.normalize(&json!("optZ"), FieldKind::SingleSelect, &d), "optZ");
    }

    #[test]
    fn normalize_multi_select_joins_labels() {
        let c = codec();
        let mut d = select_desc();
        d.kind = FieldKind::MultiSelect;
        let raw = json!([{"id": "optA"}, {"text": "Other"}]);
        assert_eq!(c.normalize(&raw, FieldKind::MultiSelect, &d), "HPLC, Other");
    }

    #[test]
    fn normalize_text_array_joins_lines() {
        let c = codec();
        let raw = json!([{"text": "line one"}, {"text": "line two"}]);
        assert_eq!(
            c.normalize(&raw, FieldKind::PlainText, &desc(FieldKind::PlainText)),
            "line one\nline two"
        );
    }

    #[test]
    fn normalize_relation_joins_labels() {
        let c = codec();
        let raw = json!([{"text": "Rec A"}, {"text": "Rec B"}]);
        assert_eq!(
            c.normalize(&raw, FieldKind::RelationMany, &desc(FieldKind::RelationMany)),
            "Rec A, Rec B"
        );
    }

    #[test]
    fn normalize_attachments() {
        let c = codec();
        let d = desc(FieldKind::Attachment);
        assert_eq!(
            c.normalize(&json!([{"name": "a.pdf"}, {"name": "b.png"}]), FieldKind::Attachment, &d),
            "a.pdf, b.png"
        );
        assert_eq!(
            c.normalize(&json!([{"size": 10}, {"size": 20}]), FieldKind::Attachment, &d),
            "2 attachments"
        );
    }

    #[test]
    fn normalize_object_fallback_ladder() {
        let c = codec();
        let d = desc(FieldKind::Person);
        assert_eq!(c.normalize(&json!({"en_name": "Ada"}), FieldKind::Person, &d), "Ada");
        assert_eq!(c.normalize(&json!({}), FieldKind::Person, &d), "");
    }

    #[test]
    fn date_only_rendering() {
        let c = codec();
        let d = desc(FieldKind::DateTime);
        assert_eq!(c.normalize_date_only(&json!(0), FieldKind::DateTime, &d), "1970-01-01");
        assert_eq!(
            c.normalize_date_only(&json!("2024-03-01 10:22:33"), FieldKind::DateTime, &d),
            "2024-03-01"
        );
    }

    #[test]
    fn denormalize_round_trips_plain_text_and_number() {
        let c = codec();
        let d = desc(FieldKind::PlainText);
        let raw = json!("some value");
        let display = c.normalize(&raw, FieldKind::PlainText, &d);
        assert_eq!(c.denormalize(&display, FieldKind::PlainText, &d).unwrap(), raw);

        let d = desc(FieldKind::Number);
        for raw in [json!(5.0), json!(5.5), json!(-0.25)] {
            let display = c.normalize(&raw, FieldKind::Number, &d);
            assert_eq!(c.denormalize(&display, FieldKind::Number, &d).unwrap(), raw);
        }
    }

    #[test]
    fn denormalize_select_prefers_id_over_label() {
        let c = codec();
        let d = select_desc();
        // "optA" is both a valid id and (hypothetically) a label; id wins.
        let v = c.denormalize("optA", FieldKind::SingleSelect, &d).unwrap();
        assert_eq!(v["id"], "optA");
        let v = c.denormalize("GC-MS", FieldKind::SingleSelect, &d).unwrap();
        assert_eq!(v["id"], "optB");
        // Unmatched input is written back as a raw string.
        let v = c.denormalize("Unknown", FieldKind::SingleSelect, &d).unwrap();
        assert_eq!(v, json!("Unknown"));
    }

    #[test]
    fn denormalize_datetime_accepts_date_only() {
        let c = codec();
        let d = desc(FieldKind::DateTime);
        let v = c.denormalize("1970-01-01", FieldKind::DateTime, &d).unwrap();
        assert_eq!(v, json!(0));
        assert_eq!(c.denormalize("not a date", FieldKind::DateTime, &d).unwrap(), Value::Null);
    }

    #[test]
    fn denormalize_rejects_read_only_kinds() {
        let c = codec();
        let d = desc(FieldKind::Formula);
        assert!(c.denormalize("x", FieldKind::Formula, &d).is_err());
    }

    #[test]
    fn rich_segments_from_plain_string_with_url() {
        let c = codec();
        let segments =
            c.parse_rich_segments(&json!("see https://example.com/doc for details"), FieldKind::PlainText);
        assert_eq!(
            segments,
            vec![
                RichSegment::text("see "),
                RichSegment::link("https://example.com/doc", "https://example.com/doc"),
                RichSegment::text(" for details"),
            ]
        );
    }

    #[test]
    fn rich_segments_from_url_array_with_separators() {
        let c = codec();
        let raw = json!([
            {"text": "Doc A", "link": "https://a.example"},
            {"text": "plain"}
        ]);
        let segments = c.parse_rich_segments(&raw, FieldKind::Url);
        assert_eq!(
            segments,
            vec![
                RichSegment::link("Doc A", "https://a.example"),
                RichSegment::text(", "),
                RichSegment::text("plain"),
            ]
        );
    }

    #[test]
    fn rich_segments_from_structured_array() {
        let c = codec();
        let raw = json!([
            {"type": "url", "link": "https://b.example", "text": "B"},
            {"text": "tail"}
        ]);
        let segments = c.parse_rich_segments(&raw, FieldKind::PlainText);
        assert_eq!(
            segments,
            vec![RichSegment::link("B", "https://b.example"), RichSegment::text("tail")]
        );
    }

    #[test]
    fn truthiness_ladder() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!("✓")));
        assert!(is_truthy(&json!([{"text": "是"}])));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("no")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn editable_text_concatenates_segmented_text() {
        let c = codec();
        let d = desc(FieldKind::PlainText);
        let raw = json!([{"text": "part one "}, {"text": "part two"}]);
        assert_eq!(c.editable_text(&raw, FieldKind::PlainText, &d), "part one part two");
    }
}
