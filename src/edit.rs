//! Field editing and write-back.
//!
//! Edits flow through three phases: `begin_edit` captures the state being
//! edited, `commit_edit` decides whether anything actually changed and
//! performs the write, and the undo/redo entry points replay history. Writes
//! to the same cell coalesce: while one write is in flight, later commits
//! replace a queued value instead of piling up, and the in-flight writer
//! drains the queue before finishing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::EditError;
use crate::field::{is_truthy, FieldDescriptor, FieldKind};
use crate::ids::{FieldId, RecordId, TableId};
use crate::resolve::SessionContext;
use crate::store::RecordStore;
use crate::undo::{UndoRedoLog, UndoStep, UndoableAction};

/// What the user typed or picked, by editor surface.
#[derive(Debug, Clone)]
pub enum EditInput {
    Text(String),
    /// Option id or label of a single-select choice.
    Select(String),
    /// Option ids or labels of a multi-select choice.
    MultiSelect(Vec<String>),
    Checkbox(bool),
}

/// State captured when an edit starts, compared against on commit.
#[derive(Debug, Clone)]
pub struct EditSession {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub owner_table: TableId,
    pub kind: FieldKind,
    /// Plain-text form of the value at edit start, used to seed the editor
    /// and to detect no-op commits.
    pub old_display: String,
    pub old_raw: Value,
    descriptor: FieldDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

/// One tracked change to a cell, observable while the write is in flight.
#[derive(Debug, Clone)]
pub struct FieldChange {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub owner_table: TableId,
    pub old_raw: Value,
    pub new_raw: Value,
    pub status: SyncStatus,
    pub at: DateTime<Utc>,
}

/// Result of a commit attempt.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The input matched the current value; nothing was written.
    Unchanged,
    /// The value was written; `committed` is the canonical value re-read
    /// from the store for this commit's own write. Later coalesced values
    /// may land afterwards.
    Written { committed: Value },
    /// A write to the same cell was already in flight; this value replaced
    /// the queued one and will land when the writer drains it.
    Coalesced,
}

/// Result of an undo or redo request.
#[derive(Debug, Clone)]
pub enum UndoOutcome {
    Applied {
        record_id: RecordId,
        field_id: FieldId,
    },
    /// The history stack was empty.
    Nothing,
}

struct PendingSlot {
    change: FieldChange,
    syncing: bool,
    queued: Option<Value>,
}

pub struct EditCoordinator {
    store: Arc<dyn RecordStore>,
    ctx: Arc<SessionContext>,
    log: Mutex<UndoRedoLog>,
    pending: Mutex<HashMap<(RecordId, FieldId), PendingSlot>>,
}

impl EditCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, ctx: Arc<SessionContext>) -> Self {
        Self {
            store,
            ctx,
            log: Mutex::new(UndoRedoLog::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Edit lifecycle
    // -----------------------------------------------------------------------

    /// Start editing a cell. Fails fast if the field is unknown, of a
    /// derived kind, or outside the session's allow-list.
    pub async fn begin_edit(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
    ) -> Result<EditSession, EditError> {
        let fields = self.ctx.field_metadata(self.store.as_ref(), table).await?;
        let descriptor = fields
            .iter()
            .find(|d| &d.id == field)
            .cloned()
            .ok_or_else(|| EditError::UnknownField {
                table_id: table.clone(),
                field_id: field.clone(),
            })?;
        if descriptor.kind.is_read_only() {
            return Err(EditError::ReadOnlyField {
                field_id: field.clone(),
                kind: descriptor.kind,
            });
        }
        if !self.ctx.edit_allowed(field) {
            return Err(EditError::EditNotAllowed {
                field_id: field.clone(),
            });
        }

        let old_raw = self.store.cell_value(table, record, field).await?;
        let old_display = self
            .ctx
            .codec()
            .editable_text(&old_raw, descriptor.kind, &descriptor);
        Ok(EditSession {
            record_id: record.clone(),
            field_id: field.clone(),
            owner_table: table.clone(),
            kind: descriptor.kind,
            old_display,
            old_raw,
            descriptor,
        })
    }

    /// Commit an edit. Unchanged input performs zero writes; changed input
    /// writes through the store, re-reads the canonical value and records an
    /// undoable action.
    pub async fn commit_edit(
        &self,
        session: &EditSession,
        input: EditInput,
    ) -> Result<CommitOutcome, EditError> {
        let Some(new_raw) = self.value_if_changed(session, &input)? else {
            debug!(
                record = %session.record_id,
                field = %session.field_id,
                "commit is a no-op, skipping write"
            );
            return Ok(CommitOutcome::Unchanged);
        };

        let key = (session.record_id.clone(), session.field_id.clone());
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| EditError::HistoryPoisoned)?;
            if let Some(slot) = pending.get_mut(&key) {
                if slot.syncing {
                    slot.queued = Some(new_raw.clone());
                    slot.change.new_raw = new_raw;
                    slot.change.at = Utc::now();
                    return Ok(CommitOutcome::Coalesced);
                }
            }
            pending.insert(
                key.clone(),
                PendingSlot {
                    change: FieldChange {
                        record_id: session.record_id.clone(),
                        field_id: session.field_id.clone(),
                        owner_table: session.owner_table.clone(),
                        old_raw: session.old_raw.clone(),
                        new_raw: new_raw.clone(),
                        status: SyncStatus::Pending,
                        at: Utc::now(),
                    },
                    syncing: true,
                    queued: None,
                },
            );
        }

        let result = self.drain_writes(session, new_raw).await;
        match result {
            Ok(committed) => Ok(CommitOutcome::Written { committed }),
            Err(err) => {
                if let Ok(mut pending) = self.pending.lock() {
                    if let Some(slot) = pending.get_mut(&key) {
                        slot.syncing = false;
                        slot.queued = None;
                        slot.change.status = SyncStatus::Failed;
                    }
                }
                Err(err)
            }
        }
    }

    /// Write the value, then keep writing whatever got queued meanwhile.
    /// Each landed write records its own undo action so history replays the
    /// intermediate values too. A failure on the caller's own write is an
    /// error; a failure on a queued write marks the slot failed but leaves
    /// the caller's landed commit intact.
    async fn drain_writes(
        &self,
        session: &EditSession,
        first: Value,
    ) -> Result<Value, EditError> {
        let key = (session.record_id.clone(), session.field_id.clone());
        let own = self.write_and_read_back(session, first).await?;
        self.record_action(session, session.old_raw.clone(), own.clone())?;

        let mut prior = own.clone();
        loop {
            let queued = {
                let mut pending = self
                    .pending
                    .lock()
                    .map_err(|_| EditError::HistoryPoisoned)?;
                match pending.get_mut(&key) {
                    Some(slot) => match slot.queued.take() {
                        Some(next) => Some(next),
                        None => {
                            pending.remove(&key);
                            None
                        }
                    },
                    None => None,
                }
            };
            let Some(next) = queued else {
                return Ok(own);
            };
            match self.write_and_read_back(session, next).await {
                Ok(committed) => {
                    self.record_action(session, prior.clone(), committed.clone())?;
                    prior = committed;
                }
                Err(err) => {
                    warn!(
                        record = %session.record_id,
                        field = %session.field_id,
                        error = %err,
                        "queued write failed, keeping the landed value"
                    );
                    if let Ok(mut pending) = self.pending.lock() {
                        if let Some(slot) = pending.get_mut(&key) {
                            slot.syncing = false;
                            slot.queued = None;
                            slot.change.status = SyncStatus::Failed;
                        }
                    }
                    return Ok(own);
                }
            }
        }
    }

    async fn write_and_read_back(
        &self,
        session: &EditSession,
        value: Value,
    ) -> Result<Value, EditError> {
        self.store
            .write_field(
                &session.owner_table,
                &session.record_id,
                &session.field_id,
                value.clone(),
            )
            .await
            .map_err(|source| EditError::WriteBack {
                field_id: session.field_id.clone(),
                source,
            })?;

        // The store may canonicalize on write; the committed value is what
        // comes back, not what went in.
        match self
            .store
            .cell_value(&session.owner_table, &session.record_id, &session.field_id)
            .await
        {
            Ok(committed) => {
                self.ctx.bump_epoch();
                Ok(committed)
            }
            Err(err) => {
                warn!(
                    field = %session.field_id,
                    error = %err,
                    "re-read after write failed, assuming written value"
                );
                self.ctx.bump_epoch();
                Ok(value)
            }
        }
    }

    fn record_action(
        &self,
        session: &EditSession,
        old_value: Value,
        new_value: Value,
    ) -> Result<(), EditError> {
        let mut log = self.log.lock().map_err(|_| EditError::HistoryPoisoned)?;
        log.push(UndoableAction {
            record_id: session.record_id.clone(),
            field_id: session.field_id.clone(),
            owner_table: session.owner_table.clone(),
            old_value,
            new_value,
            is_relation_edit: session.descriptor.kind.is_relation(),
            related_table_id: session.descriptor.related_table_id.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Changed-detection per input surface. Returns the raw value to write,
    /// or `None` when the input matches the current state.
    fn value_if_changed(
        &self,
        session: &EditSession,
        input: &EditInput,
    ) -> Result<Option<Value>, EditError> {
        let codec = self.ctx.codec();
        match input {
            EditInput::Text(text) => {
                if text.trim() == session.old_display.trim() {
                    return Ok(None);
                }
                let raw = codec.denormalize(text, session.kind, &session.descriptor)?;
                Ok(Some(raw))
            }
            EditInput::Select(choice) => {
                let raw = codec.denormalize(choice, session.kind, &session.descriptor)?;
                if select_identity(&raw) == select_identity(&session.old_raw) {
                    return Ok(None);
                }
                Ok(Some(raw))
            }
            EditInput::MultiSelect(choices) => {
                let joined = choices.join(", ");
                let raw = codec.denormalize(&joined, session.kind, &session.descriptor)?;
                let new_ids: Vec<String> = match &raw {
                    Value::Array(items) => items.iter().filter_map(select_identity).collect(),
                    _ => select_identity(&raw).into_iter().collect(),
                };
                let old_ids: Vec<String> = match &session.old_raw {
                    Value::Array(items) => items.iter().filter_map(select_identity).collect(),
                    other => select_identity(other).into_iter().collect(),
                };
                if new_ids == old_ids {
                    return Ok(None);
                }
                Ok(Some(raw))
            }
            EditInput::Checkbox(checked) => {
                if *checked == is_truthy(&session.old_raw) {
                    return Ok(None);
                }
                Ok(Some(codec.checkbox_value(*checked)))
            }
        }
    }

    /// In-flight and failed changes, most recent first.
    pub fn pending_changes(&self) -> Vec<FieldChange> {
        let Ok(pending) = self.pending.lock() else {
            return Vec::new();
        };
        let mut changes: Vec<FieldChange> =
            pending.values().map(|slot| slot.change.clone()).collect();
        changes.sort_by(|a, b| b.at.cmp(&a.at));
        changes
    }

    // -----------------------------------------------------------------------
    // Undo / redo
    // -----------------------------------------------------------------------

    pub async fn undo(&self) -> Result<UndoOutcome, EditError> {
        let step = {
            let log = self.log.lock().map_err(|_| EditError::HistoryPoisoned)?;
            log.peek_undo()
        };
        match step {
            UndoStep::Nothing => Ok(UndoOutcome::Nothing),
            UndoStep::Apply {
                record_id,
                field_id,
                owner_table,
                value,
            } => {
                self.apply_history(&owner_table, &record_id, &field_id, value)
                    .await?;
                let mut log = self.log.lock().map_err(|_| EditError::HistoryPoisoned)?;
                log.commit_undo();
                Ok(UndoOutcome::Applied {
                    record_id,
                    field_id,
                })
            }
        }
    }

    pub async fn redo(&self) -> Result<UndoOutcome, EditError> {
        let step = {
            let log = self.log.lock().map_err(|_| EditError::HistoryPoisoned)?;
            log.peek_redo()
        };
        match step {
            UndoStep::Nothing => Ok(UndoOutcome::Nothing),
            UndoStep::Apply {
                record_id,
                field_id,
                owner_table,
                value,
            } => {
                self.apply_history(&owner_table, &record_id, &field_id, value)
                    .await?;
                let mut log = self.log.lock().map_err(|_| EditError::HistoryPoisoned)?;
                log.commit_redo();
                Ok(UndoOutcome::Applied {
                    record_id,
                    field_id,
                })
            }
        }
    }

    /// The compensating write for a history step. Failure leaves the entry
    /// on its stack so the user can retry.
    async fn apply_history(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
        value: Value,
    ) -> Result<(), EditError> {
        self.store
            .write_field(table, record, field, value)
            .await
            .map_err(|source| EditError::HistoryApply {
                field_id: field.clone(),
                source,
            })?;
        self.ctx.bump_epoch();
        Ok(())
    }

    pub fn undo_depth(&self) -> usize {
        self.log.lock().map(|l| l.undo_depth()).unwrap_or(0)
    }

    pub fn redo_depth(&self) -> usize {
        self.log.lock().map(|l| l.redo_depth()).unwrap_or(0)
    }
}

/// Identity of a select value for change detection: option id when present,
/// otherwise the bare text.
fn select_identity(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::Array(items) => items.first().and_then(select_identity),
        _ => None,
    }
}
