//! Record store abstraction.
//!
//! Resolution and editing never talk to a concrete backend; they go through
//! `RecordStore`. Values cross this boundary as `serde_json::Value` in
//! whatever shape the backend produces, and the field codec makes sense of
//! them on the way in.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::field::FieldDescriptor;
use crate::ids::{FieldId, RecordId, TableId};

/// A record snapshot: id, owning table and a loose value per field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: RecordId,
    pub table_id: TableId,
    #[serde(default)]
    pub values: HashMap<FieldId, Value>,
}

impl RecordRef {
    pub fn new(id: impl Into<RecordId>, table_id: impl Into<TableId>) -> Self {
        Self {
            id: id.into(),
            table_id: table_id.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, field_id: impl Into<FieldId>, value: Value) -> Self {
        self.values.insert(field_id.into(), value);
        self
    }

    pub fn value(&self, field_id: &FieldId) -> &Value {
        self.values.get(field_id).unwrap_or(&Value::Null)
    }
}

/// Records reached by following a relation field, together with the field
/// metadata of their table.
#[derive(Debug, Clone)]
pub struct RelatedRecords {
    pub table_id: TableId,
    pub records: Vec<RecordRef>,
    pub fields: Vec<FieldDescriptor>,
}

impl RelatedRecords {
    pub fn empty(table_id: impl Into<TableId>) -> Self {
        Self {
            table_id: table_id.into(),
            records: Vec::new(),
            fields: Vec::new(),
        }
    }
}

/// Backend access used by resolution and editing.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Field metadata of a table, in the backend's column order.
    async fn field_metadata(&self, table: &TableId) -> Result<Vec<FieldDescriptor>, StoreError>;

    /// A full record snapshot.
    async fn get_record(&self, table: &TableId, record: &RecordId)
        -> Result<RecordRef, StoreError>;

    /// A single cell, in the backend's raw shape. Missing cells come back as
    /// `Value::Null`, not as an error.
    async fn cell_value(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
    ) -> Result<Value, StoreError>;

    /// Write one cell. The canonical committed value must be observed by a
    /// subsequent `cell_value` read, not inferred from the argument.
    async fn write_field(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Records linked from a relation field of the given record, with the
    /// related table's field metadata. A non-relation field is an error.
    async fn fetch_related(
        &self,
        table: &TableId,
        record: &RecordId,
        relation_field: &FieldId,
    ) -> Result<RelatedRecords, StoreError>;

    /// All records of a table. Used by the cascade resolver to scan a source
    /// table for matching options.
    async fn list_records(&self, table: &TableId) -> Result<Vec<RecordRef>, StoreError>;
}

/// Per-cell comment counts attached to resolved field nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentStats {
    pub total: u32,
    pub unresolved: u32,
}

impl CommentStats {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Comment lookup, separate from the store so backends without comments can
/// skip it.
#[async_trait]
pub trait CommentIndex: Send + Sync {
    async fn stats(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
    ) -> Result<CommentStats, StoreError>;
}

/// A `CommentIndex` that reports no comments anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoComments;

#[async_trait]
impl CommentIndex for NoComments {
    async fn stats(
        &self,
        _table: &TableId,
        _record: &RecordId,
        _field: &FieldId,
    ) -> Result<CommentStats, StoreError> {
        Ok(CommentStats::default())
    }
}
