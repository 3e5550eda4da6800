//! Declarative document templates.
//!
//! A template is an ordered list of elements. Elements are pure data: they
//! name fields and relations but never carry record values, so the same
//! template renders against any record of the root table. Templates
//! round-trip through JSON for persistence.

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::filter::FilterCondition;
use crate::ids::FieldId;

/// Reserved element id for the document title slot.
pub const TITLE_ELEMENT_ID: &str = "title";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub elements: Vec<TemplateElement>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            elements: Vec::new(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<TemplateElement>) -> Self {
        self.elements = elements;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        let template: Self = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    pub fn to_json(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural validation: loops nest at most one level deep, and
    /// authored table rows only reference declared columns.
    pub fn validate(&self) -> Result<(), TemplateError> {
        fn check(element: &TemplateElement, in_loop: bool) -> Result<(), TemplateError> {
            match &element.body {
                ElementBody::Loop(cfg) => {
                    if in_loop {
                        return Err(TemplateError::NestedLoop {
                            element_id: element.id.clone(),
                        });
                    }
                    for child in &cfg.children {
                        check(child, true)?;
                    }
                }
                ElementBody::Table(cfg) => {
                    for row in &cfg.rows {
                        for cell in &row.cells {
                            if cfg.column(&cell.column_id).is_none() {
                                return Err(TemplateError::UnknownColumn {
                                    element_id: element.id.clone(),
                                    column_id: cell.column_id.clone(),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        }
        for element in &self.elements {
            check(element, false)?;
        }
        Ok(())
    }

    pub fn element(&self, id: &str) -> Option<&TemplateElement> {
        fn find<'a>(elements: &'a [TemplateElement], id: &str) -> Option<&'a TemplateElement> {
            for e in elements {
                if e.id == id {
                    return Some(e);
                }
                if let ElementBody::Loop(cfg) = &e.body {
                    if let Some(found) = find(&cfg.children, id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        find(&self.elements, id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateElement {
    pub id: String,
    #[serde(flatten)]
    pub body: ElementBody,
}

impl TemplateElement {
    pub fn new(id: impl Into<String>, body: ElementBody) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }

    /// An element with a freshly minted id, for templates built in code.
    pub fn generated(body: ElementBody) -> Self {
        Self {
            id: format!("el_{}", uuid::Uuid::new_v4().simple()),
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementBody {
    Text(TextConfig),
    Field(FieldConfig),
    Loop(LoopConfig),
    Table(TableConfig),
    Image(ImageConfig),
    Link(LinkConfig),
}

// ---------------------------------------------------------------------------
// Static text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextConfig {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<TextAlign>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

// ---------------------------------------------------------------------------
// Field binding
// ---------------------------------------------------------------------------

/// Binds an element to one field of the current record (or of a related
/// record when `field_path` walks a relation first).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    /// Relation path to the field, e.g. `["fldSupplier", "fldContact"]`:
    /// every segment but the last names a relation field to follow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_path: Vec<FieldId>,
    /// Marks this element as the document title slot; its display text is
    /// composed with the session's title policy.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_title_slot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_prefix: Option<String>,
    /// Display text to substitute when the field value is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_label: Option<String>,
}

impl FieldConfig {
    pub fn for_field(field_id: impl Into<FieldId>) -> Self {
        Self {
            field_id: Some(field_id.into()),
            field_path: Vec::new(),
            is_title_slot: false,
            label_prefix: None,
            empty_label: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Repeats its children once per related record. The relation may be named
/// by field id or by field name; id wins when both are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_field_id: Option<FieldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterCondition>,
    pub children: Vec<TemplateElement>,
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    pub columns: Vec<TableColumn>,
    #[serde(default, rename = "dataSource")]
    pub source: TableSource,
    /// Author-provided rows for static tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<TableRow>,
    /// Whether cells bound to editable fields accept writes.
    #[serde(default)]
    pub writeback: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableSource {
    /// Rows authored directly in the template.
    #[default]
    Static,
    /// One row per record of the enclosing loop's record set.
    Loop,
    /// Legacy single-row form: the declared columns flatten into one row
    /// resolved from the current record.
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumn {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    /// Render only the date portion of a date-time value.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub date_only: bool,
    /// Concatenate several field values into one cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat: Option<ConcatSpec>,
}

impl TableColumn {
    pub fn bound(id: impl Into<String>, label: impl Into<String>, field_id: impl Into<FieldId>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            field_id: Some(field_id.into()),
            date_only: false,
            concat: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcatSpec {
    pub field_ids: Vec<FieldId>,
    #[serde(default = "default_concat_separator")]
    pub separator: String,
}

fn default_concat_separator() -> String {
    " ".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCell {
    pub column_id: String,
    pub content: CellContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CellContent {
    /// Fixed text authored into the template.
    Literal { text: String },
    /// Bound to a field of the current record.
    Field { field_id: FieldId },
}

// ---------------------------------------------------------------------------
// Images and links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Attachment field supplying the image(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    /// Fixed URL when the image is not record-bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A hyperlink, usually bound to a URL-bearing field of the current record.
/// A fixed `url` serves templates that link somewhere record-independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

impl TableConfig {
    pub fn column(&self, id: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.id == id)
    }
}

impl LoopConfig {
    /// Whether a child, by id, is a loop-sourced table.
    pub fn is_loop_table(child: &TemplateElement) -> bool {
        matches!(
            &child.body,
            ElementBody::Table(cfg) if matches!(cfg.source, TableSource::Loop)
        )
    }
}

pub fn literal_cell(column_id: impl Into<String>, text: impl Into<String>) -> TableCell {
    TableCell {
        column_id: column_id.into(),
        content: CellContent::Literal { text: text.into() },
    }
}

pub fn field_cell(column_id: impl Into<String>, field_id: impl Into<FieldId>) -> TableCell {
    TableCell {
        column_id: column_id.into(),
        content: CellContent::Field {
            field_id: field_id.into(),
        },
    }
}
