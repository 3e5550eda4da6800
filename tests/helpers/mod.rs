//! In-memory store fixture shared by the integration tests.
//!
//! `MemoryStore` implements `RecordStore` over plain hash maps, records every
//! write for assertions, and can be armed to fail writes or to park them on a
//! semaphore so a test can hold a write in flight. `MemoryComments` serves
//! canned comment stats.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use docbind::{
    CommentIndex, CommentStats, FieldDescriptor, FieldId, RecordId, RecordRef, RecordStore,
    RelatedRecords, StoreError, TableId,
};

#[derive(Default)]
struct TableData {
    fields: Vec<FieldDescriptor>,
    records: Vec<RecordRef>,
}

/// A write observed by the fixture, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedWrite {
    pub table: TableId,
    pub record: RecordId,
    pub field: FieldId,
    pub value: Value,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<TableId, TableData>>,
    /// Relation contents: (table, record, relation field) -> related table + record ids.
    relations: Mutex<HashMap<(TableId, RecordId, FieldId), (TableId, Vec<RecordId>)>>,
    writes: Mutex<Vec<ObservedWrite>>,
    fail_writes: Mutex<bool>,
    write_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(
        &self,
        table: impl Into<TableId>,
        fields: Vec<FieldDescriptor>,
        records: Vec<RecordRef>,
    ) {
        let mut tables = self.tables.lock().unwrap();
        tables.insert(table.into(), TableData { fields, records });
    }

    pub fn link(
        &self,
        table: impl Into<TableId>,
        record: impl Into<RecordId>,
        field: impl Into<FieldId>,
        related_table: impl Into<TableId>,
        related: Vec<&str>,
    ) {
        let mut relations = self.relations.lock().unwrap();
        relations.insert(
            (table.into(), record.into(), field.into()),
            (
                related_table.into(),
                related.into_iter().map(RecordId::from).collect(),
            ),
        );
    }

    pub fn writes(&self) -> Vec<ObservedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    /// Park every write on the semaphore until the test adds permits.
    pub fn gate_writes(&self, gate: Arc<Semaphore>) {
        *self.write_gate.lock().unwrap() = Some(gate);
    }

    pub fn raw_value(&self, table: &str, record: &str, field: &str) -> Value {
        let tables = self.tables.lock().unwrap();
        tables
            .get(&TableId::from(table))
            .and_then(|t| {
                t.records
                    .iter()
                    .find(|r| r.id.as_str() == record)
                    .map(|r| r.value(&FieldId::from(field)).clone())
            })
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn field_metadata(&self, table: &TableId) -> Result<Vec<FieldDescriptor>, StoreError> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|t| t.fields.clone())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }

    async fn get_record(
        &self,
        table: &TableId,
        record: &RecordId,
    ) -> Result<RecordRef, StoreError> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))?
            .records
            .iter()
            .find(|r| &r.id == record)
            .cloned()
            .ok_or_else(|| StoreError::RecordNotFound {
                table_id: table.clone(),
                record_id: record.as_str().to_string(),
            })
    }

    async fn cell_value(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
    ) -> Result<Value, StoreError> {
        Ok(self.get_record(table, record).await?.value(field).clone())
    }

    async fn write_field(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
        value: Value,
    ) -> Result<(), StoreError> {
        let gate = self.write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(StoreError::Backend("write gate closed".into())),
            }
        }
        if *self.fail_writes.lock().unwrap() {
            return Err(StoreError::Backend("write rejected by fixture".into()));
        }
        let mut tables = self.tables.lock().unwrap();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))?;
        let rec = data
            .records
            .iter_mut()
            .find(|r| &r.id == record)
            .ok_or_else(|| StoreError::RecordNotFound {
                table_id: table.clone(),
                record_id: record.as_str().to_string(),
            })?;
        rec.values.insert(field.clone(), value.clone());
        self.writes.lock().unwrap().push(ObservedWrite {
            table: table.clone(),
            record: record.clone(),
            field: field.clone(),
            value,
        });
        Ok(())
    }

    async fn fetch_related(
        &self,
        table: &TableId,
        record: &RecordId,
        relation_field: &FieldId,
    ) -> Result<RelatedRecords, StoreError> {
        let link = {
            let relations = self.relations.lock().unwrap();
            relations
                .get(&(table.clone(), record.clone(), relation_field.clone()))
                .cloned()
        };
        let Some((related_table, ids)) = link else {
            // An unlinked relation is an empty set, not an error.
            return Ok(RelatedRecords::empty(table.as_str()));
        };
        let tables = self.tables.lock().unwrap();
        let data = tables
            .get(&related_table)
            .ok_or_else(|| StoreError::TableNotFound(related_table.clone()))?;
        let records = ids
            .iter()
            .filter_map(|id| data.records.iter().find(|r| &r.id == id).cloned())
            .collect();
        Ok(RelatedRecords {
            table_id: related_table.clone(),
            records,
            fields: data.fields.clone(),
        })
    }

    async fn list_records(&self, table: &TableId) -> Result<Vec<RecordRef>, StoreError> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|t| t.records.clone())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }
}

#[derive(Default)]
pub struct MemoryComments {
    stats: Mutex<HashMap<(RecordId, FieldId), CommentStats>>,
}

impl MemoryComments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &self,
        record: impl Into<RecordId>,
        field: impl Into<FieldId>,
        total: u32,
        unresolved: u32,
    ) {
        self.stats
            .lock()
            .unwrap()
            .insert((record.into(), field.into()), CommentStats { total, unresolved });
    }
}

#[async_trait]
impl CommentIndex for MemoryComments {
    async fn stats(
        &self,
        _table: &TableId,
        record: &RecordId,
        field: &FieldId,
    ) -> Result<CommentStats, StoreError> {
        Ok(self
            .stats
            .lock()
            .unwrap()
            .get(&(record.clone(), field.clone()))
            .copied()
            .unwrap_or_default())
    }
}
