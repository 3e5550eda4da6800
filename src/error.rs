//! Error taxonomy for the binding engine.
//!
//! Resolution itself never surfaces errors — unresolvable template references
//! degrade to inline diagnostic nodes. Everything that *can* fail (store I/O,
//! write-back, undo application, template loading) returns an explicit error
//! from this module so callers can present user-visible feedback without a
//! global error boundary.

use thiserror::Error;

use crate::field::FieldKind;
use crate::ids::{FieldId, TableId};

/// Top-level error type for the crate.
#[derive(Error, Debug)]
pub enum DocError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Edit error: {0}")]
    Edit(#[from] EditError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Failures reported by the external record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Table '{0}' not found")]
    TableNotFound(TableId),

    #[error("Record '{record_id}' not found in table '{table_id}'")]
    RecordNotFound { table_id: TableId, record_id: String },

    #[error("Field '{field_id}' not found in table '{table_id}'")]
    FieldNotFound { table_id: TableId, field_id: FieldId },

    #[error("Field '{0}' is not a relation field")]
    NotARelationField(FieldId),

    #[error("Store backend failure: {0}")]
    Backend(String),
}

/// Failures in the edit / write-back pipeline.
///
/// A failed write leaves the displayed value unchanged; there is no automatic
/// retry. Undo failures leave the action on the undo stack.
#[derive(Error, Debug)]
pub enum EditError {
    #[error("Field '{field_id}' not found in table '{table_id}'")]
    UnknownField { table_id: TableId, field_id: FieldId },

    #[error("Field '{field_id}' has read-only kind {kind:?}")]
    ReadOnlyField { field_id: FieldId, kind: FieldKind },

    #[error("Field '{field_id}' is not on the edit allow-list")]
    EditNotAllowed { field_id: FieldId },

    #[error("Field kind {0:?} does not support text editing")]
    UnsupportedKind(FieldKind),

    #[error("Write-back of field '{field_id}' failed: {source}")]
    WriteBack {
        field_id: FieldId,
        #[source]
        source: StoreError,
    },

    #[error("Undo/redo write for field '{field_id}' failed: {source}")]
    HistoryApply {
        field_id: FieldId,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Edit history state is corrupted")]
    HistoryPoisoned,
}

/// Template load/validation failures.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Loop element '{element_id}' contains a nested loop; only one level of nesting is supported")]
    NestedLoop { element_id: String },

    #[error("Table cell in element '{element_id}' references column '{column_id}' which is not declared")]
    UnknownColumn { element_id: String, column_id: String },

    #[error("Template deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
