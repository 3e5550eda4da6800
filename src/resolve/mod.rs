//! Template resolution.
//!
//! The engine binds a template to one root record and produces a flat,
//! ordered list of resolved nodes. Loop expansion is flattened at this stage;
//! renderers downstream never see loops, only nodes tagged with the loop
//! scope they came from.

mod context;
mod engine;

pub use context::{CascadeRule, SessionContext, TitlePolicy};
pub use engine::ResolutionEngine;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::field::{FieldKind, RichSegment};
use crate::ids::{FieldId, RecordId, TableId};
use crate::store::CommentStats;

/// A fully resolved document: what the template produced for one root record
/// at one refresh epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedDocument {
    pub epoch: u64,
    pub root_record: RecordId,
    pub nodes: Vec<ResolvedNode>,
}

impl ResolvedDocument {
    /// Nodes belonging to one loop repetition, in document order.
    pub fn scope_nodes<'a>(
        &'a self,
        loop_element_id: &'a str,
        record: &'a RecordId,
    ) -> impl Iterator<Item = &'a ResolvedNode> {
        self.nodes.iter().filter(move |n| {
            n.scope
                .as_ref()
                .is_some_and(|s| s.loop_element_id == loop_element_id && &s.record_id == record)
        })
    }

    pub fn node(&self, element_id: &str) -> Option<&ResolvedNode> {
        self.nodes.iter().find(|n| n.element_id == element_id)
    }
}

/// Where a node came from when it was produced inside a loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopScope {
    pub loop_element_id: String,
    pub record_id: RecordId,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNode {
    pub element_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<LoopScope>,
    #[serde(default, skip_serializing_if = "CommentStats::is_empty")]
    pub comments: CommentStats,
    pub body: ResolvedBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResolvedBody {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<crate::template::TextStyle>,
    },
    Title {
        text: String,
    },
    Field(FieldNode),
    Table(TableNode),
    Image {
        urls: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Link {
        url: String,
        text: String,
    },
    /// A diagnostic stand-in for an element that could not be resolved.
    Placeholder {
        message: String,
    },
}

/// A field bound into the document, with everything a renderer or editor
/// needs: display text, segments, raw value and edit permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldNode {
    pub field_id: FieldId,
    pub owner_table: TableId,
    pub record_id: RecordId,
    pub kind: FieldKind,
    pub label: String,
    pub display: String,
    pub raw: Value,
    pub segments: Vec<RichSegment>,
    pub editable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableNode {
    pub columns: Vec<ResolvedColumn>,
    pub rows: Vec<TableRowNode>,
    pub writeback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedColumn {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRowNode {
    /// Set for record-backed rows, absent for authored static rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    pub cells: Vec<CellNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellNode {
    pub column_id: String,
    pub display: String,
    /// Present when the cell is bound to a writable field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldCellInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCellInfo {
    pub field_id: FieldId,
    pub owner_table: TableId,
    pub record_id: RecordId,
    pub kind: FieldKind,
    pub editable: bool,
}
