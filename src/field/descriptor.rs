//! Field descriptors — the typed view of a table's columns.

use serde::{Deserialize, Serialize};

use crate::ids::{FieldId, OptionId, TableId};

/// Semantic type of a record attribute. Closed enumeration: the engine never
/// sees a kind outside this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    PlainText,
    Number,
    Currency,
    Percent,
    DateTime,
    SingleSelect,
    MultiSelect,
    Checkbox,
    Person,
    Attachment,
    Url,
    Email,
    Phone,
    Barcode,
    Location,
    GroupChat,
    /// Reference to a single record in another table.
    RelationOne,
    /// Reference to many records in another table.
    RelationMany,
    Formula,
    Lookup,
    AutoNumber,
    CreatedTime,
    ModifiedTime,
    CreatedUser,
    ModifiedUser,
}

impl FieldKind {
    /// Derived/computed kinds are never editable, regardless of any
    /// allow-list entry.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::Formula
                | Self::Lookup
                | Self::AutoNumber
                | Self::CreatedTime
                | Self::ModifiedTime
                | Self::CreatedUser
                | Self::ModifiedUser
        )
    }

    pub fn is_relation(self) -> bool {
        matches!(self, Self::RelationOne | Self::RelationMany)
    }

    pub fn is_select(self) -> bool {
        matches!(self, Self::SingleSelect | Self::MultiSelect)
    }

    /// Kinds whose values edit as plain strings.
    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Self::PlainText | Self::Email | Self::Phone | Self::Barcode | Self::Url
        )
    }
}

/// One choice of a select field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: OptionId,
    pub label: String,
}

impl SelectOption {
    pub fn new(id: impl Into<OptionId>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Metadata for one field of a table, as reported by the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub name: String,
    pub kind: FieldKind,
    /// Declared options for select kinds; empty otherwise.
    #[serde(default)]
    pub options: Vec<SelectOption>,
    /// For relation kinds, the table the field points at. Also set on select
    /// kinds whose option list is sourced from another table (cascading).
    #[serde(default)]
    pub related_table_id: Option<TableId>,
}

impl FieldDescriptor {
    pub fn new(id: impl Into<FieldId>, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            options: Vec::new(),
            related_table_id: None,
        }
    }

    pub fn with_options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_related_table(mut self, table: impl Into<TableId>) -> Self {
        self.related_table_id = Some(table.into());
        self
    }

    pub fn option_by_id(&self, id: &str) -> Option<&SelectOption> {
        self.options.iter().find(|o| o.id.as_str() == id)
    }

    /// First declared option with the given label. When several options share
    /// a label the first one wins; there is no defined tie-break.
    pub fn option_by_label(&self, label: &str) -> Option<&SelectOption> {
        self.options.iter().find(|o| o.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_kinds_are_read_only() {
        for kind in [
            FieldKind::Formula,
            FieldKind::Lookup,
            FieldKind::AutoNumber,
            FieldKind::CreatedTime,
            FieldKind::ModifiedTime,
            FieldKind::CreatedUser,
            FieldKind::ModifiedUser,
        ] {
            assert!(kind.is_read_only(), "{kind:?} must be read-only");
        }
        assert!(!FieldKind::PlainText.is_read_only());
        assert!(!FieldKind::Checkbox.is_read_only());
    }

    #[test]
    fn option_lookup_prefers_first_label_match() {
        let desc = FieldDescriptor::new("fld1", "Method", FieldKind::SingleSelect).with_options(vec![
            SelectOption::new("optA", "HPLC"),
            SelectOption::new("optB", "HPLC"),
        ]);
        assert_eq!(desc.option_by_label("HPLC").unwrap().id.as_str(), "optA");
        assert_eq!(desc.option_by_id("optB").unwrap().label, "HPLC");
    }
}
