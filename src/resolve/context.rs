//! Per-session resolution state.
//!
//! Everything a resolution run needs beyond the store itself lives here:
//! the root table, the edit allow-list, title synthesis policy, cascade
//! rules, the field codec, a metadata cache and the refresh epoch. One
//! `SessionContext` per open document; nothing is process-global.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::StoreError;
use crate::field::{FieldDescriptor, FieldValueCodec};
use crate::ids::{FieldId, TableId};
use crate::store::RecordStore;

/// How the document title is synthesized.
#[derive(Debug, Clone)]
pub struct TitlePolicy {
    /// Template element the title lands in.
    pub element_id: String,
    /// Field whose display text leads the title.
    pub version_field_id: Option<FieldId>,
    /// Fixed suffix appended after the version text.
    pub suffix: String,
}

/// One cascade rule: when the source field of a record changes, the target
/// field's selectable options narrow to those consistent with the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeRule {
    pub target_field_id: FieldId,
    pub source_field_id: FieldId,
}

pub struct SessionContext {
    root_table: TableId,
    codec: FieldValueCodec,
    edit_allowlist: HashSet<FieldId>,
    title_policy: Option<TitlePolicy>,
    cascade_rules: Vec<CascadeRule>,
    epoch: AtomicU64,
    metadata_cache: Mutex<HashMap<TableId, Arc<Vec<FieldDescriptor>>>>,
}

impl SessionContext {
    pub fn new(root_table: impl Into<TableId>) -> Self {
        Self {
            root_table: root_table.into(),
            codec: FieldValueCodec::default(),
            edit_allowlist: HashSet::new(),
            title_policy: None,
            cascade_rules: Vec::new(),
            epoch: AtomicU64::new(0),
            metadata_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_codec(mut self, codec: FieldValueCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Name the fields that may be edited. A session without an allow-list
    /// permits no edits; a writable kind alone never does.
    pub fn with_edit_allowlist(mut self, fields: impl IntoIterator<Item = FieldId>) -> Self {
        self.edit_allowlist = fields.into_iter().collect();
        self
    }

    pub fn with_title_policy(mut self, policy: TitlePolicy) -> Self {
        self.title_policy = Some(policy);
        self
    }

    pub fn with_cascade_rules(mut self, rules: Vec<CascadeRule>) -> Self {
        self.cascade_rules = rules;
        self
    }

    pub fn root_table(&self) -> &TableId {
        &self.root_table
    }

    pub fn codec(&self) -> &FieldValueCodec {
        &self.codec
    }

    pub fn title_policy(&self) -> Option<&TitlePolicy> {
        self.title_policy.as_ref()
    }

    pub fn cascade_rules(&self) -> &[CascadeRule] {
        &self.cascade_rules
    }

    pub fn cascade_rule_for(&self, target: &FieldId) -> Option<&CascadeRule> {
        self.cascade_rules
            .iter()
            .find(|r| &r.target_field_id == target)
    }

    /// Whether an edit on the field is permitted: only fields the allow-list
    /// names are editable. Kind checks happen separately in the edit
    /// coordinator.
    pub fn edit_allowed(&self, field: &FieldId) -> bool {
        self.edit_allowlist.contains(field)
    }

    // -- refresh epoch ------------------------------------------------------

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advance the refresh epoch and drop cached metadata. Documents resolved
    /// under an older epoch are stale.
    pub fn bump_epoch(&self) -> u64 {
        if let Ok(mut cache) = self.metadata_cache.lock() {
            cache.clear();
        }
        let next = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(epoch = next, "session epoch advanced");
        next
    }

    // -- metadata cache -----------------------------------------------------

    /// Field metadata for a table, cached for the current epoch.
    pub async fn field_metadata(
        &self,
        store: &dyn RecordStore,
        table: &TableId,
    ) -> Result<Arc<Vec<FieldDescriptor>>, StoreError> {
        if let Ok(cache) = self.metadata_cache.lock() {
            if let Some(fields) = cache.get(table) {
                return Ok(Arc::clone(fields));
            }
        }
        let fields = Arc::new(store.field_metadata(table).await?);
        if let Ok(mut cache) = self.metadata_cache.lock() {
            cache.insert(table.clone(), Arc::clone(&fields));
        }
        Ok(fields)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("root_table", &self.root_table)
            .field("epoch", &self.epoch())
            .field("cascade_rules", &self.cascade_rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_allowlist_denies_every_field() {
        let ctx = SessionContext::new("tbl1");
        assert!(!ctx.edit_allowed(&FieldId::from("fldAny")));
    }

    #[test]
    fn allowlist_restricts_edits() {
        let ctx =
            SessionContext::new("tbl1").with_edit_allowlist([FieldId::from("fldA")]);
        assert!(ctx.edit_allowed(&FieldId::from("fldA")));
        assert!(!ctx.edit_allowed(&FieldId::from("fldB")));
    }

    #[test]
    fn epoch_advances_monotonically() {
        let ctx = SessionContext::new("tbl1");
        assert_eq!(ctx.epoch(), 0);
        assert_eq!(ctx.bump_epoch(), 1);
        assert_eq!(ctx.bump_epoch(), 2);
        assert_eq!(ctx.epoch(), 2);
    }
}
