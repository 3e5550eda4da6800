//! Undo/redo history for field edits.
//!
//! The log stores value-level actions, not keystrokes: one entry per
//! committed write, holding the raw external values before and after. The
//! log itself never touches the store; the edit coordinator peeks an action,
//! performs the compensating write, and commits the pop only when that write
//! succeeded.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::ids::{FieldId, RecordId, TableId};

/// Maximum retained history depth per stack. The oldest undo entry is
/// evicted when the cap is reached.
pub const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct UndoableAction {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub owner_table: TableId,
    pub old_value: Value,
    pub new_value: Value,
    /// True for relation-field edits, whose compensating write also
    /// invalidates resolved loops over the relation.
    pub is_relation_edit: bool,
    pub related_table_id: Option<TableId>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct UndoRedoLog {
    undo: VecDeque<UndoableAction>,
    redo: VecDeque<UndoableAction>,
}

/// What a peeked step would write when applied.
#[derive(Debug, Clone)]
pub enum UndoStep {
    /// Write `value` to the named cell, then call the matching commit.
    Apply {
        record_id: RecordId,
        field_id: FieldId,
        owner_table: TableId,
        value: Value,
    },
    /// The stack is empty; applying is a no-op.
    Nothing,
}

impl UndoRedoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed edit. Any redoable history is invalidated: after a
    /// fresh edit there is nothing to redo.
    pub fn push(&mut self, action: UndoableAction) {
        if self.undo.len() == HISTORY_CAP {
            self.undo.pop_front();
        }
        debug!(
            record = %action.record_id,
            field = %action.field_id,
            "edit recorded, redo history cleared"
        );
        self.undo.push_back(action);
        self.redo.clear();
    }

    /// What undoing now would write. The entry stays on the stack until
    /// `commit_undo` confirms the write landed.
    pub fn peek_undo(&self) -> UndoStep {
        match self.undo.back() {
            Some(action) => UndoStep::Apply {
                record_id: action.record_id.clone(),
                field_id: action.field_id.clone(),
                owner_table: action.owner_table.clone(),
                value: action.old_value.clone(),
            },
            None => UndoStep::Nothing,
        }
    }

    pub fn peek_redo(&self) -> UndoStep {
        match self.redo.back() {
            Some(action) => UndoStep::Apply {
                record_id: action.record_id.clone(),
                field_id: action.field_id.clone(),
                owner_table: action.owner_table.clone(),
                value: action.new_value.clone(),
            },
            None => UndoStep::Nothing,
        }
    }

    /// Move the top undo entry to the redo stack after its compensating
    /// write succeeded.
    pub fn commit_undo(&mut self) {
        if let Some(action) = self.undo.pop_back() {
            if self.redo.len() == HISTORY_CAP {
                self.redo.pop_front();
            }
            self.redo.push_back(action);
        }
    }

    pub fn commit_redo(&mut self) {
        if let Some(action) = self.redo.pop_back() {
            if self.undo.len() == HISTORY_CAP {
                self.undo.pop_front();
            }
            self.undo.push_back(action);
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
