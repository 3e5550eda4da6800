//! The resolution engine: template + root record -> resolved nodes.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DocError;
use crate::field::FieldDescriptor;
use crate::ids::{FieldId, RecordId};
use crate::store::{CommentIndex, CommentStats, RecordRef, RecordStore, RelatedRecords};
use crate::template::{
    CellContent, ElementBody, FieldConfig, ImageConfig, LinkConfig, LoopConfig, TableConfig,
    TableSource, Template, TemplateElement,
};

use super::{
    CellNode, FieldCellInfo, FieldNode, LoopScope, ResolvedBody, ResolvedColumn, ResolvedDocument,
    ResolvedNode, SessionContext, TableNode, TableRowNode,
};

pub struct ResolutionEngine {
    store: Arc<dyn RecordStore>,
    comments: Arc<dyn CommentIndex>,
    ctx: Arc<SessionContext>,
}

impl ResolutionEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        comments: Arc<dyn CommentIndex>,
        ctx: Arc<SessionContext>,
    ) -> Self {
        Self {
            store,
            comments,
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Resolve a template against one root record. Elements that cannot be
    /// resolved produce a single placeholder node each; resolution itself
    /// only fails on backend errors for the root record.
    pub async fn resolve(
        &self,
        template: &Template,
        root_record: &RecordId,
    ) -> Result<ResolvedDocument, DocError> {
        template.validate().map_err(DocError::from)?;

        let root_table = self.ctx.root_table().clone();
        let fields = self
            .ctx
            .field_metadata(self.store.as_ref(), &root_table)
            .await?;
        let record = self.store.get_record(&root_table, root_record).await?;

        let mut nodes = Vec::new();
        for element in &template.elements {
            match &element.body {
                ElementBody::Loop(cfg) => {
                    self.resolve_loop(element, cfg, &record, &fields, &mut nodes)
                        .await;
                }
                _ => {
                    self.resolve_leaf(element, &record, &fields, None, &mut nodes)
                        .await;
                }
            }
        }

        debug!(
            record = %root_record,
            nodes = nodes.len(),
            epoch = self.ctx.epoch(),
            "template resolved"
        );
        Ok(ResolvedDocument {
            epoch: self.ctx.epoch(),
            root_record: root_record.clone(),
            nodes,
        })
    }

    // -----------------------------------------------------------------------
    // Non-loop elements
    // -----------------------------------------------------------------------

    async fn resolve_leaf(
        &self,
        element: &TemplateElement,
        record: &RecordRef,
        fields: &[FieldDescriptor],
        scope: Option<LoopScope>,
        out: &mut Vec<ResolvedNode>,
    ) {
        let body = match &element.body {
            ElementBody::Text(cfg) => {
                if self.is_title_element(&element.id) {
                    let text = self.compose_title(None, None, record, fields);
                    out.push(node(
                        element,
                        scope,
                        CommentStats::default(),
                        ResolvedBody::Title { text },
                    ));
                    return;
                }
                ResolvedBody::Text {
                    content: cfg.content.clone(),
                    style: cfg.style.clone(),
                }
            }
            ElementBody::Field(cfg) => {
                if cfg.is_title_slot || self.is_title_element(&element.id) {
                    let bound = cfg.field_path.first().or(cfg.field_id.as_ref()).cloned();
                    let lead = self.field_display(cfg, record, fields);
                    let text = self.compose_title(lead, bound.as_ref(), record, fields);
                    out.push(node(
                        element,
                        scope,
                        CommentStats::default(),
                        ResolvedBody::Title { text },
                    ));
                    return;
                }
                let (body, comments) = self.resolve_field(cfg, record, fields).await;
                out.push(node(element, scope, comments, body));
                return;
            }
            ElementBody::Table(cfg) => match cfg.source {
                TableSource::Static => self.resolve_static_table(cfg, record, fields),
                // Legacy one-row form: every declared column resolves against
                // the current record.
                TableSource::Dynamic => {
                    let related = RelatedRecords {
                        table_id: record.table_id.clone(),
                        records: vec![record.clone()],
                        fields: fields.to_vec(),
                    };
                    self.record_table(cfg, &related)
                }
                // A loop-sourced table is only meaningful inside a loop,
                // where the loop resolver handles it directly.
                TableSource::Loop => ResolvedBody::Placeholder {
                    message: format!("element '{}': loop table outside a loop", element.id),
                },
            },
            ElementBody::Image(cfg) => self.resolve_image(cfg, record, fields),
            ElementBody::Link(cfg) => self.resolve_link(cfg, record, fields),
            ElementBody::Loop(_) => ResolvedBody::Placeholder {
                message: format!("element '{}': nested loop is not supported", element.id),
            },
        };
        out.push(node(element, scope, CommentStats::default(), body));
    }

    fn is_title_element(&self, element_id: &str) -> bool {
        self.ctx
            .title_policy()
            .is_some_and(|p| p.element_id == element_id)
    }

    /// Title text: the element's own bound display (if any), then the
    /// policy's version field, then the fixed suffix. When the element is
    /// bound to the version field itself, the version is not repeated.
    fn compose_title(
        &self,
        lead: Option<String>,
        lead_field: Option<&FieldId>,
        record: &RecordRef,
        fields: &[FieldDescriptor],
    ) -> String {
        let policy = self.ctx.title_policy();
        let version = policy
            .and_then(|p| p.version_field_id.as_ref())
            .filter(|id| lead_field != Some(*id))
            .and_then(|id| fields.iter().find(|d| &d.id == id))
            .map(|d| self.ctx.codec().normalize(record.value(&d.id), d.kind, d))
            .unwrap_or_default();
        let suffix = policy.map(|p| p.suffix.as_str()).unwrap_or_default();
        format!("{}{version}{suffix}", lead.unwrap_or_default())
    }

    /// Display text of a field element's direct binding, if resolvable.
    fn field_display(
        &self,
        cfg: &FieldConfig,
        record: &RecordRef,
        fields: &[FieldDescriptor],
    ) -> Option<String> {
        let field_id = cfg.field_path.first().or(cfg.field_id.as_ref())?;
        let d = fields.iter().find(|d| &d.id == field_id)?;
        Some(self.ctx.codec().normalize(record.value(&d.id), d.kind, d))
    }

    // -----------------------------------------------------------------------
    // Field elements
    // -----------------------------------------------------------------------

    async fn resolve_field(
        &self,
        cfg: &FieldConfig,
        record: &RecordRef,
        fields: &[FieldDescriptor],
    ) -> (ResolvedBody, CommentStats) {
        // A relation path walks to another record first; the terminal segment
        // is the field actually rendered.
        let (target_record, target_fields, field_id) = if cfg.field_path.len() > 1 {
            match self.walk_path(record, fields, &cfg.field_path).await {
                Ok(found) => found,
                Err(message) => {
                    return (
                        ResolvedBody::Placeholder { message },
                        CommentStats::default(),
                    )
                }
            }
        } else {
            let Some(field_id) = cfg.field_path.first().or(cfg.field_id.as_ref()).cloned() else {
                return (
                    ResolvedBody::Placeholder {
                        message: "field element without a field binding".to_string(),
                    },
                    CommentStats::default(),
                );
            };
            (record.clone(), fields.to_vec(), field_id)
        };

        let Some(descriptor) = target_fields.iter().find(|d| d.id == field_id) else {
            return (
                ResolvedBody::Placeholder {
                    message: format!("field '{field_id}' not found"),
                },
                CommentStats::default(),
            );
        };

        let raw = target_record.value(&descriptor.id).clone();
        let codec = self.ctx.codec();
        let mut display = codec.normalize(&raw, descriptor.kind, descriptor);
        if display.is_empty() {
            if let Some(empty_label) = &cfg.empty_label {
                display = empty_label.clone();
            }
        }
        let segments = codec.parse_rich_segments(&raw, descriptor.kind);
        let label = match &cfg.label_prefix {
            Some(prefix) => format!("{prefix}{}", descriptor.name),
            None => descriptor.name.clone(),
        };
        let editable = !descriptor.kind.is_read_only() && self.ctx.edit_allowed(&descriptor.id);

        let comments = match self
            .comments
            .stats(&target_record.table_id, &target_record.id, &descriptor.id)
            .await
        {
            Ok(stats) => stats,
            Err(err) => {
                warn!(field = %descriptor.id, error = %err, "comment lookup failed");
                CommentStats::default()
            }
        };

        (
            ResolvedBody::Field(FieldNode {
                field_id: descriptor.id.clone(),
                owner_table: target_record.table_id.clone(),
                record_id: target_record.id.clone(),
                kind: descriptor.kind,
                label,
                display,
                raw,
                segments,
                editable,
            }),
            comments,
        )
    }

    /// Follow a relation path; every segment but the last must be a relation
    /// field, and each hop takes the first linked record.
    async fn walk_path(
        &self,
        record: &RecordRef,
        fields: &[FieldDescriptor],
        path: &[FieldId],
    ) -> Result<(RecordRef, Vec<FieldDescriptor>, FieldId), String> {
        let mut current = record.clone();
        let mut current_fields = fields.to_vec();
        for segment in &path[..path.len() - 1] {
            let Some(descriptor) = current_fields.iter().find(|d| &d.id == segment) else {
                return Err(format!("field '{segment}' not found"));
            };
            if !descriptor.kind.is_relation() {
                return Err(format!("field '{segment}' is not a relation"));
            }
            let related = self
                .store
                .fetch_related(&current.table_id, &current.id, segment)
                .await
                .map_err(|e| format!("relation '{segment}': {e}"))?;
            let Some(first) = related.records.into_iter().next() else {
                return Err(format!("relation '{segment}' has no linked records"));
            };
            current = first;
            current_fields = related.fields;
        }
        let last = path[path.len() - 1].clone();
        Ok((current, current_fields, last))
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn resolve_loop(
        &self,
        element: &TemplateElement,
        cfg: &LoopConfig,
        record: &RecordRef,
        fields: &[FieldDescriptor],
        out: &mut Vec<ResolvedNode>,
    ) {
        let Some(relation) = resolve_relation_field(cfg, fields) else {
            out.push(node(
                element,
                None,
                CommentStats::default(),
                ResolvedBody::Placeholder {
                    message: format!("element '{}': relation field not found", element.id),
                },
            ));
            return;
        };

        // A failed relation fetch degrades to zero related records.
        let related = match self
            .store
            .fetch_related(&record.table_id, &record.id, &relation.id)
            .await
        {
            Ok(mut related) => {
                if let Some(filter) = &cfg.filter {
                    related.records =
                        filter.apply(related.records, &related.fields, self.ctx.codec());
                }
                related
            }
            Err(err) => {
                warn!(
                    relation = %relation.id,
                    error = %err,
                    "relation fetch failed, expanding loop over zero records"
                );
                RelatedRecords::empty(record.table_id.as_str())
            }
        };

        let has_loop_table = cfg.children.iter().any(LoopConfig::is_loop_table);

        if related.records.is_empty() && !has_loop_table {
            // Keep surrounding layout stable: an empty loop is one visible
            // placeholder, not a silent gap.
            out.push(node(
                element,
                None,
                CommentStats::default(),
                ResolvedBody::Placeholder {
                    message: "no related records".to_string(),
                },
            ));
            return;
        }

        // Loop-sourced tables aggregate the whole record set and render once
        // at their own position (even when the set is empty). The other
        // children repeat per record, keeping child order inside each
        // repetition. Consecutive non-table children form one repeated run.
        let mut run: Vec<&TemplateElement> = Vec::new();
        for child in &cfg.children {
            if let (ElementBody::Table(table_cfg), true) =
                (&child.body, LoopConfig::is_loop_table(child))
            {
                self.expand_run(element, &run, &related, out).await;
                run.clear();
                let body = self.record_table(table_cfg, &related);
                out.push(node(child, None, CommentStats::default(), body));
            } else {
                run.push(child);
            }
        }
        self.expand_run(element, &run, &related, out).await;
    }

    /// Resolve a run of loop children once per related record, in order.
    async fn expand_run(
        &self,
        element: &TemplateElement,
        run: &[&TemplateElement],
        related: &RelatedRecords,
        out: &mut Vec<ResolvedNode>,
    ) {
        for (index, rec) in related.records.iter().enumerate() {
            for child in run {
                let scope = LoopScope {
                    loop_element_id: element.id.clone(),
                    record_id: rec.id.clone(),
                    index,
                };
                self.resolve_leaf(child, rec, &related.fields, Some(scope), out)
                    .await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    fn resolve_static_table(
        &self,
        cfg: &TableConfig,
        record: &RecordRef,
        fields: &[FieldDescriptor],
    ) -> ResolvedBody {
        let codec = self.ctx.codec();
        let rows = cfg
            .rows
            .iter()
            .map(|row| TableRowNode {
                record_id: None,
                cells: row
                    .cells
                    .iter()
                    .map(|cell| match &cell.content {
                        CellContent::Literal { text } => CellNode {
                            column_id: cell.column_id.clone(),
                            display: text.clone(),
                            field: None,
                        },
                        CellContent::Field { field_id } => {
                            match fields.iter().find(|d| &d.id == field_id) {
                                Some(d) => CellNode {
                                    column_id: cell.column_id.clone(),
                                    display: codec.normalize(record.value(&d.id), d.kind, d),
                                    field: self.cell_info(cfg, d, record),
                                },
                                None => CellNode {
                                    column_id: cell.column_id.clone(),
                                    display: String::new(),
                                    field: None,
                                },
                            }
                        }
                    })
                    .collect(),
            })
            .collect();
        ResolvedBody::Table(TableNode {
            columns: resolved_columns(cfg),
            rows,
            writeback: cfg.writeback,
        })
    }

    /// One row per record, columns resolved against the records' own table.
    fn record_table(&self, cfg: &TableConfig, related: &RelatedRecords) -> ResolvedBody {
        let codec = self.ctx.codec();
        let rows = related
            .records
            .iter()
            .map(|rec| TableRowNode {
                record_id: Some(rec.id.clone()),
                cells: cfg
                    .columns
                    .iter()
                    .map(|col| {
                        let display = if let Some(concat) = &col.concat {
                            let parts: Vec<String> = concat
                                .field_ids
                                .iter()
                                .filter_map(|fid| related.fields.iter().find(|d| &d.id == fid))
                                .map(|d| codec.normalize(rec.value(&d.id), d.kind, d))
                                .filter(|s| !s.is_empty())
                                .collect();
                            parts.join(&concat.separator)
                        } else if let Some(d) = col
                            .field_id
                            .as_ref()
                            .and_then(|fid| related.fields.iter().find(|d| &d.id == fid))
                        {
                            if col.date_only {
                                codec.normalize_date_only(rec.value(&d.id), d.kind, d)
                            } else {
                                codec.normalize(rec.value(&d.id), d.kind, d)
                            }
                        } else {
                            String::new()
                        };
                        let field = col
                            .field_id
                            .as_ref()
                            .and_then(|fid| related.fields.iter().find(|d| &d.id == fid))
                            .and_then(|d| self.cell_info(cfg, d, rec));
                        CellNode {
                            column_id: col.id.clone(),
                            display,
                            field,
                        }
                    })
                    .collect(),
            })
            .collect();
        ResolvedBody::Table(TableNode {
            columns: resolved_columns(cfg),
            rows,
            writeback: cfg.writeback,
        })
    }

    fn cell_info(
        &self,
        cfg: &TableConfig,
        descriptor: &FieldDescriptor,
        record: &RecordRef,
    ) -> Option<FieldCellInfo> {
        if !cfg.writeback {
            return None;
        }
        Some(FieldCellInfo {
            field_id: descriptor.id.clone(),
            owner_table: record.table_id.clone(),
            record_id: record.id.clone(),
            kind: descriptor.kind,
            editable: !descriptor.kind.is_read_only() && self.ctx.edit_allowed(&descriptor.id),
        })
    }

    // -----------------------------------------------------------------------
    // Images and links
    // -----------------------------------------------------------------------

    fn resolve_image(
        &self,
        cfg: &ImageConfig,
        record: &RecordRef,
        fields: &[FieldDescriptor],
    ) -> ResolvedBody {
        let urls = match (&cfg.field_id, &cfg.url) {
            (Some(field_id), _) => {
                if !fields.iter().any(|d| &d.id == field_id) {
                    return ResolvedBody::Placeholder {
                        message: format!("field '{field_id}' not found"),
                    };
                }
                attachment_urls(record.value(field_id))
            }
            (None, Some(url)) => vec![url.clone()],
            (None, None) => Vec::new(),
        };
        ResolvedBody::Image {
            urls,
            width: cfg.width,
            height: cfg.height,
        }
    }

    fn resolve_link(
        &self,
        cfg: &LinkConfig,
        record: &RecordRef,
        fields: &[FieldDescriptor],
    ) -> ResolvedBody {
        if let Some(field_id) = &cfg.field_id {
            let Some(d) = fields.iter().find(|d| &d.id == field_id) else {
                return ResolvedBody::Placeholder {
                    message: format!("field '{field_id}' not found"),
                };
            };
            let raw = record.value(&d.id);
            let url = link_target(raw).unwrap_or_default();
            let mut text = cfg
                .display_text
                .clone()
                .unwrap_or_else(|| self.ctx.codec().normalize(raw, d.kind, d));
            if text.is_empty() {
                text = url.clone();
            }
            return ResolvedBody::Link { url, text };
        }
        let url = cfg.url.clone().unwrap_or_default();
        ResolvedBody::Link {
            text: cfg.display_text.clone().unwrap_or_else(|| url.clone()),
            url,
        }
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn node(
    element: &TemplateElement,
    scope: Option<LoopScope>,
    comments: CommentStats,
    body: ResolvedBody,
) -> ResolvedNode {
    ResolvedNode {
        element_id: element.id.clone(),
        scope,
        comments,
        body,
    }
}

fn resolved_columns(cfg: &TableConfig) -> Vec<ResolvedColumn> {
    cfg.columns
        .iter()
        .map(|c| ResolvedColumn {
            id: c.id.clone(),
            label: c.label.clone(),
        })
        .collect()
}

fn resolve_relation_field<'a>(
    cfg: &LoopConfig,
    fields: &'a [FieldDescriptor],
) -> Option<&'a FieldDescriptor> {
    if let Some(id) = &cfg.relation_field_id {
        if let Some(d) = fields.iter().find(|d| &d.id == id && d.kind.is_relation()) {
            return Some(d);
        }
    }
    if let Some(name) = &cfg.relation_field_name {
        return fields
            .iter()
            .find(|d| &d.name == name && d.kind.is_relation());
    }
    None
}

/// First URL carried by a link-bearing field value.
fn link_target(raw: &Value) -> Option<String> {
    fn from_object(map: &serde_json::Map<String, Value>) -> Option<String> {
        for key in ["link", "url"] {
            if let Some(s) = map.get(key).and_then(Value::as_str) {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
        None
    }
    match raw {
        Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
            Some(s.clone())
        }
        Value::Object(map) => from_object(map),
        Value::Array(items) => items.iter().find_map(link_target),
        _ => None,
    }
}

/// Image URLs out of an attachment value: each item contributes the first of
/// its `url`, `tmpUrl` or `link` attributes.
fn attachment_urls(raw: &Value) -> Vec<String> {
    fn one(v: &Value) -> Option<String> {
        let map = v.as_object()?;
        for key in ["url", "tmpUrl", "link"] {
            if let Some(s) = map.get(key).and_then(Value::as_str) {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
        None
    }
    match raw {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        Value::Object(_) => one(raw).into_iter().collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}
