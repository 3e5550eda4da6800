//! docbind: declarative document templates over a typed record store.
//!
//! A template is an ordered list of elements (text, field bindings, loops,
//! tables, images, links). The resolution engine binds a template to one
//! root record of an external store and produces a flat, renderer-agnostic
//! node list; loops over relation fields are expanded and flattened at this
//! stage. Around resolution sit the editing pipeline (write-back with
//! coalescing and canonical re-read), a capped undo/redo history, the
//! field-value codec that tames the store's loose value shapes, and a
//! cascading option resolver for dependent select fields.
//!
//! Store access goes through the [`store::RecordStore`] trait; nothing in
//! the crate talks to a concrete backend.

pub mod cascade;
pub mod edit;
pub mod error;
pub mod field;
pub mod filter;
pub mod ids;
pub mod resolve;
pub mod store;
pub mod template;
pub mod undo;

pub use cascade::{CascadeOptionResolver, ResolvedOptions};
pub use edit::{CommitOutcome, EditCoordinator, EditInput, EditSession, FieldChange, SyncStatus, UndoOutcome};
pub use error::{DocError, EditError, StoreError, TemplateError};
pub use field::{FieldDescriptor, FieldKind, FieldValueCodec, RichSegment, SelectOption};
pub use filter::{FilterCondition, FilterOperator};
pub use ids::{FieldId, OptionId, RecordId, TableId};
pub use resolve::{
    CascadeRule, FieldNode, LoopScope, ResolutionEngine, ResolvedBody, ResolvedDocument,
    ResolvedNode, SessionContext, TitlePolicy,
};
pub use store::{CommentIndex, CommentStats, NoComments, RecordRef, RecordStore, RelatedRecords};
pub use template::{
    CellContent, ConcatSpec, ElementBody, FieldConfig, ImageConfig, LinkConfig, LoopConfig,
    TableCell, TableColumn, TableConfig, TableRow, TableSource, Template, TemplateElement,
    TextConfig, TextStyle, TITLE_ELEMENT_ID,
};
pub use undo::{UndoRedoLog, UndoableAction, HISTORY_CAP};
