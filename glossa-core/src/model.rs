//! Annotation record model and wire types.
//!
//! Field names and enum values here are the persisted JSON contract shared
//! with every other client, so serde renames are explicit and load-bearing.
//! The one bit-exact struct is [`Anchor`]: page numbers are 1-based and the
//! x/y/width/height fractions are in [0,1] of the page's intrinsic rendered
//! size, never absolute pixels.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Model-level validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("anchor {field} fraction {value} outside [0,1]")]
    FractionOutOfRange { field: &'static str, value: f32 },
    #[error("anchor page {0} is not 1-based")]
    PageOutOfRange(u32),
    #[error("{0} annotations require an anchor")]
    MissingAnchor(AnnotationKind),
    #[error("anchored annotations must be document-scoped")]
    AnchorOutsideDocument,
    #[error("annotation cannot reply to itself")]
    SelfReference,
}

/// Opaque annotation identifier.
///
/// The server assigns the durable id on creation; until the write is
/// confirmed a client holds a temporary `local-` prefixed id minted by
/// [`AnnotationId::temp`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    const TEMP_PREFIX: &'static str = "local-";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a temporary local id for an optimistic insert.
    pub fn temp() -> Self {
        Self(format!("{}{}", Self::TEMP_PREFIX, Uuid::new_v4()))
    }

    /// Whether this id is a client-local placeholder awaiting confirmation.
    pub fn is_temp(&self) -> bool {
        self.0.starts_with(Self::TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnnotationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AnnotationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The partition an annotation belongs to. Determines which clients
/// receive it over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Scope {
    #[serde(rename = "project-wide")]
    Project,
    #[serde(rename = "collection-scoped")]
    Collection {
        #[serde(rename = "collectionId")]
        collection_id: String,
    },
    #[serde(rename = "document-scoped")]
    Document {
        #[serde(rename = "documentId")]
        document_id: String,
    },
}

impl Scope {
    pub fn document(document_id: impl Into<String>) -> Self {
        Self::Document {
            document_id: document_id.into(),
        }
    }

    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self::Collection {
            collection_id: collection_id.into(),
        }
    }

    /// The document id, when document-scoped.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Document { document_id } => Some(document_id),
            _ => None,
        }
    }

    /// Stable string key for subscription routing and log lines.
    pub fn key(&self) -> String {
        match self {
            Self::Project => "project".to_string(),
            Self::Collection { collection_id } => format!("collection:{collection_id}"),
            Self::Document { document_id } => format!("document:{document_id}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Annotation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Strikethrough,
    StickyNote,
    FreeFormNote,
}

impl AnnotationKind {
    /// Text-selection kinds are meaningless without a page region;
    /// sticky and free-form notes may be scope-only.
    pub fn requires_anchor(self) -> bool {
        matches!(self, Self::Highlight | Self::Underline | Self::Strikethrough)
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Highlight => "highlight",
            Self::Underline => "underline",
            Self::Strikethrough => "strikethrough",
            Self::StickyNote => "sticky-note",
            Self::FreeFormNote => "free-form-note",
        };
        f.write_str(s)
    }
}

/// Normalized, scale-independent location of a page region.
///
/// `x`/`y`/`width`/`height` are fractions of the page's intrinsic rendered
/// size at capture time; `page_width_px`/`page_height_px` record that raster
/// size for audit. Valid at any future zoom level by construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// 1-based page number.
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub page_width_px: f32,
    pub page_height_px: f32,
}

impl Anchor {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.page < 1 {
            return Err(ModelError::PageOutOfRange(self.page));
        }
        let fields = [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ];
        for (field, value) in fields {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ModelError::FractionOutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// Checklist entry attached to an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

impl ActionItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Open,
    Resolved,
}

/// The unit of persisted annotation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub id: AnnotationId,
    pub scope: Scope,
    pub kind: AnnotationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
    /// Free-form body. May be empty for pure highlights.
    #[serde(default)]
    pub text: String,
    /// Exact substring the anchor covers, for text-selection kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<ActionItem>,
    /// Back-reference forming a reply tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_parent_id: Option<AnnotationId>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_id: String,
}

impl AnnotationRecord {
    /// Enforce the model invariants: anchor fractions in range, anchors
    /// only on document-scoped records, anchor presence matching the kind,
    /// and no self-referential reply.
    pub fn validate(&self) -> Result<(), ModelError> {
        if let Some(anchor) = &self.anchor {
            anchor.validate()?;
            if self.scope.document_id().is_none() {
                return Err(ModelError::AnchorOutsideDocument);
            }
        } else if self.kind.requires_anchor() {
            return Err(ModelError::MissingAnchor(self.kind));
        }
        if self.thread_parent_id.as_ref() == Some(&self.id) {
            return Err(ModelError::SelfReference);
        }
        Ok(())
    }

    /// Page the record is anchored to, if any.
    pub fn page(&self) -> Option<u32> {
        self.anchor.map(|a| a.page)
    }
}

/// Creation payload: everything the server assigns is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDraft {
    pub scope: Scope,
    pub kind: AnnotationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<ActionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_parent_id: Option<AnnotationId>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: Status,
    pub author_id: String,
}

impl AnnotationDraft {
    /// A text-selection highlight over a captured anchor.
    pub fn highlight(
        document_id: impl Into<String>,
        anchor: Anchor,
        selected_text: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            scope: Scope::document(document_id),
            kind: AnnotationKind::Highlight,
            anchor: Some(anchor),
            text: String::new(),
            selected_text: Some(selected_text.into()),
            color: "#ffd54f".to_string(),
            tags: BTreeSet::new(),
            action_items: Vec::new(),
            thread_parent_id: None,
            priority: Priority::default(),
            status: Status::default(),
            author_id: author_id.into(),
        }
    }

    /// A scope-only note with no page anchor.
    pub fn note(scope: Scope, text: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            scope,
            kind: AnnotationKind::FreeFormNote,
            anchor: None,
            text: text.into(),
            selected_text: None,
            color: "#ffd54f".to_string(),
            tags: BTreeSet::new(),
            action_items: Vec::new(),
            thread_parent_id: None,
            priority: Priority::default(),
            status: Status::default(),
            author_id: author_id.into(),
        }
    }

    /// A threaded reply to an existing record. Inherits the parent's scope,
    /// so a reply always references a record in its own partition.
    pub fn reply(
        parent: &AnnotationRecord,
        text: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            scope: parent.scope.clone(),
            kind: AnnotationKind::FreeFormNote,
            anchor: None,
            text: text.into(),
            selected_text: None,
            color: "#ffd54f".to_string(),
            tags: BTreeSet::new(),
            action_items: Vec::new(),
            thread_parent_id: Some(parent.id.clone()),
            priority: Priority::default(),
            status: Status::default(),
            author_id: author_id.into(),
        }
    }

    pub fn with_kind(mut self, kind: AnnotationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if let Some(anchor) = &self.anchor {
            anchor.validate()?;
            if self.scope.document_id().is_none() {
                return Err(ModelError::AnchorOutsideDocument);
            }
        } else if self.kind.requires_anchor() {
            return Err(ModelError::MissingAnchor(self.kind));
        }
        Ok(())
    }

    /// Materialize the draft into a record under the given id and timestamp.
    pub fn into_record(self, id: AnnotationId, at: DateTime<Utc>) -> AnnotationRecord {
        AnnotationRecord {
            id,
            scope: self.scope,
            kind: self.kind,
            anchor: self.anchor,
            text: self.text,
            selected_text: self.selected_text,
            color: self.color,
            tags: self.tags,
            action_items: self.action_items,
            thread_parent_id: self.thread_parent_id,
            priority: self.priority,
            status: self.status,
            created_at: at,
            updated_at: at,
            author_id: self.author_id,
        }
    }
}

/// Partial author edit, applied locally and sent as a PATCH body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_items: Option<Vec<ActionItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Unanchored notes may be pinned or moved after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
}

impl AnnotationPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, record: &mut AnnotationRecord) {
        if let Some(text) = &self.text {
            record.text = text.clone();
        }
        if let Some(color) = &self.color {
            record.color = color.clone();
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(items) = &self.action_items {
            record.action_items = items.clone();
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(anchor) = self.anchor {
            record.anchor = Some(anchor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_anchor() -> Anchor {
        Anchor {
            page: 2,
            x: 0.25,
            y: 0.5,
            width: 0.3,
            height: 0.05,
            page_width_px: 816.0,
            page_height_px: 1056.0,
        }
    }

    #[test]
    fn test_temp_id_prefix() {
        let id = AnnotationId::temp();
        assert!(id.is_temp());
        assert!(id.as_str().starts_with("local-"));

        let server = AnnotationId::from("ann_42");
        assert!(!server.is_temp());
    }

    #[test]
    fn test_anchor_wire_field_names() {
        let json = serde_json::to_value(sample_anchor()).unwrap();
        // Bit-exact persisted layout: fractions plus the captured raster size.
        assert_eq!(json["page"], 2);
        assert!(json.get("pageWidthPx").is_some());
        assert!(json.get("pageHeightPx").is_some());
        assert!(json.get("page_width_px").is_none());
    }

    #[test]
    fn test_anchor_validate_range() {
        let mut anchor = sample_anchor();
        assert!(anchor.validate().is_ok());

        anchor.x = 1.2;
        assert_eq!(
            anchor.validate(),
            Err(ModelError::FractionOutOfRange {
                field: "x",
                value: 1.2
            })
        );

        anchor.x = 0.0;
        anchor.page = 0;
        assert_eq!(anchor.validate(), Err(ModelError::PageOutOfRange(0)));
    }

    #[test]
    fn test_scope_wire_tags() {
        let doc = serde_json::to_value(Scope::document("doc-7")).unwrap();
        assert_eq!(doc["type"], "document-scoped");
        assert_eq!(doc["documentId"], "doc-7");

        let project = serde_json::to_value(Scope::Project).unwrap();
        assert_eq!(project["type"], "project-wide");

        let coll = serde_json::to_value(Scope::collection("c-1")).unwrap();
        assert_eq!(coll["type"], "collection-scoped");
        assert_eq!(coll["collectionId"], "c-1");
    }

    #[test]
    fn test_kind_wire_values() {
        assert_eq!(
            serde_json::to_value(AnnotationKind::StickyNote).unwrap(),
            "sticky-note"
        );
        assert_eq!(
            serde_json::to_value(AnnotationKind::FreeFormNote).unwrap(),
            "free-form-note"
        );
        assert_eq!(
            serde_json::to_value(AnnotationKind::Highlight).unwrap(),
            "highlight"
        );
    }

    #[test]
    fn test_kind_anchor_requirements() {
        assert!(AnnotationKind::Highlight.requires_anchor());
        assert!(AnnotationKind::Underline.requires_anchor());
        assert!(AnnotationKind::Strikethrough.requires_anchor());
        assert!(!AnnotationKind::StickyNote.requires_anchor());
        assert!(!AnnotationKind::FreeFormNote.requires_anchor());
    }

    #[test]
    fn test_record_roundtrip_camel_case() {
        let draft = AnnotationDraft::highlight("doc-1", sample_anchor(), "quoted text", "user-9")
            .with_tag("todo");
        let record = draft.into_record(AnnotationId::from("ann_1"), Utc::now());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("selectedText").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("authorId").is_some());
        assert!(json.get("threadParentId").is_none()); // absent, not null

        let back: AnnotationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_validation() {
        let anchor = sample_anchor();
        let good = AnnotationDraft::highlight("doc-1", anchor, "t", "u")
            .into_record(AnnotationId::from("ann_1"), Utc::now());
        assert!(good.validate().is_ok());

        // Highlight without an anchor is invalid.
        let mut missing = good.clone();
        missing.anchor = None;
        assert_eq!(
            missing.validate(),
            Err(ModelError::MissingAnchor(AnnotationKind::Highlight))
        );

        // Anchored record outside a document scope is invalid.
        let mut wrong_scope = good.clone();
        wrong_scope.scope = Scope::Project;
        assert_eq!(wrong_scope.validate(), Err(ModelError::AnchorOutsideDocument));

        // A record cannot reply to itself.
        let mut cyclic = good;
        cyclic.thread_parent_id = Some(cyclic.id.clone());
        assert_eq!(cyclic.validate(), Err(ModelError::SelfReference));
    }

    #[test]
    fn test_note_without_anchor_is_valid() {
        let note = AnnotationDraft::note(Scope::Project, "remember this", "u")
            .into_record(AnnotationId::from("ann_2"), Utc::now());
        assert!(note.validate().is_ok());
        assert_eq!(note.page(), None);
    }

    #[test]
    fn test_reply_inherits_scope() {
        let root = AnnotationDraft::note(Scope::collection("c-3"), "root", "u")
            .into_record(AnnotationId::from("ann_3"), Utc::now());
        let reply = AnnotationDraft::reply(&root, "agreed", "v");
        assert_eq!(reply.scope, root.scope);
        assert_eq!(reply.thread_parent_id, Some(root.id.clone()));
    }

    #[test]
    fn test_patch_apply() {
        let mut record = AnnotationDraft::note(Scope::Project, "old", "u")
            .into_record(AnnotationId::from("ann_4"), Utc::now());

        let patch = AnnotationPatch {
            text: Some("new".to_string()),
            status: Some(Status::Resolved),
            ..AnnotationPatch::default()
        };
        assert!(!patch.is_empty());
        patch.apply_to(&mut record);

        assert_eq!(record.text, "new");
        assert_eq!(record.status, Status::Resolved);
        assert_eq!(record.priority, Priority::Normal); // untouched
    }

    #[test]
    fn test_patch_skips_absent_fields_on_wire() {
        let patch = AnnotationPatch {
            color: Some("#80cbc4".to_string()),
            ..AnnotationPatch::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert_eq!(json["color"], "#80cbc4");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Status::default(), Status::Open);
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(Scope::Project.key(), "project");
        assert_eq!(Scope::document("d").key(), "document:d");
        assert_eq!(Scope::collection("c").key(), "collection:c");
    }
}
