//! In-memory annotation store for one active scope.
//!
//! The store is the canonical owner of the working set; UI layers hold read
//! references only. All mutation entry points run on the subsystem's single
//! update path, so there is no internal locking here.
//!
//! Optimistic lifecycle: [`AnnotationStore::create`] inserts under a
//! temporary local id, and the caller later resolves it with
//! [`AnnotationStore::confirm`] (durable write succeeded) or
//! [`AnnotationStore::rollback`] (durable write rejected). The server's
//! broadcast of the same write — the echo — arrives through
//! [`AnnotationStore::apply_remote`], which is idempotent by id, so the
//! confirm/echo race resolves to exactly one record whichever lands first.

use chrono::Utc;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::model::{
    AnnotationDraft, AnnotationId, AnnotationPatch, AnnotationRecord, ModelError, Scope,
};

/// An inbound mutation received over the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Created(AnnotationRecord),
    Updated(AnnotationRecord),
    Deleted(AnnotationId),
}

impl RemoteEvent {
    pub fn id(&self) -> &AnnotationId {
        match self {
            Self::Created(record) | Self::Updated(record) => &record.id,
            Self::Deleted(id) => id,
        }
    }
}

/// Outcome of applying a remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Deleted,
    /// Duplicate create for an id already in the working set.
    AlreadyPresent,
    /// Update/delete referencing an unknown id; dropped, not an error.
    OrphanDropped,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("unknown annotation id: {0}")]
    UnknownId(AnnotationId),
    #[error("{0} is not a temporary id")]
    NotATempId(AnnotationId),
    #[error("reply parent {0} is not in the working set")]
    UnknownParent(AnnotationId),
    #[error(transparent)]
    Invalid(#[from] ModelError),
}

/// One node of a derived reply tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadNode {
    pub record: AnnotationRecord,
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    /// Total records in this subtree, the node itself included.
    pub fn len(&self) -> usize {
        1 + self.replies.iter().map(ThreadNode::len).sum::<usize>()
    }
}

/// Canonical in-memory collection of annotation records for one scope.
pub struct AnnotationStore {
    scope: Scope,
    records: FxHashMap<AnnotationId, AnnotationRecord>,
    /// Insertion order, preserved across confirm so UI rows keep their slot.
    order: Vec<AnnotationId>,
    by_page: FxHashMap<u32, Vec<AnnotationId>>,
    by_parent: FxHashMap<AnnotationId, Vec<AnnotationId>>,
    by_tag: FxHashMap<String, Vec<AnnotationId>>,
    /// temp id → server id, retained until the matching echo arrives
    /// (one reconciliation cycle) or the next full load.
    remap: FxHashMap<AnnotationId, AnnotationId>,
}

impl AnnotationStore {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            records: FxHashMap::default(),
            order: Vec::new(),
            by_page: FxHashMap::default(),
            by_parent: FxHashMap::default(),
            by_tag: FxHashMap::default(),
            remap: FxHashMap::default(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Replace the entire working set, rebuilding every derived index.
    /// Used on initial fetch and on degraded-mode manual refresh.
    pub fn load(&mut self, records: Vec<AnnotationRecord>) {
        self.records.clear();
        self.order.clear();
        self.by_page.clear();
        self.by_parent.clear();
        self.by_tag.clear();
        self.remap.clear();

        for record in records {
            if self.records.contains_key(&record.id) {
                log::warn!("load: duplicate id {} in scope fetch, keeping last", record.id);
                self.unlink(&record.id);
            }
            self.link(record);
        }
        log::debug!("loaded {} records for scope {}", self.records.len(), self.scope);
    }

    /// Optimistic insert: validates the draft, assigns a temporary local id,
    /// and inserts immediately. The caller owns the follow-up `confirm` or
    /// `rollback` once the durable write settles.
    pub fn create(&mut self, draft: AnnotationDraft) -> Result<AnnotationRecord, StoreError> {
        draft.validate()?;
        if let Some(parent) = &draft.thread_parent_id {
            if !self.records.contains_key(self.resolve(parent)) {
                return Err(StoreError::UnknownParent(parent.clone()));
            }
        }
        let record = draft.into_record(AnnotationId::temp(), Utc::now());
        self.link(record.clone());
        Ok(record)
    }

    /// Replace the temp-id entry with the server-confirmed record, keeping
    /// the entry's slot in iteration order. If the broadcast echo already
    /// inserted the server record, the temp entry is simply dropped — either
    /// way exactly one record bearing the server id remains.
    pub fn confirm(
        &mut self,
        temp_id: &AnnotationId,
        server_record: AnnotationRecord,
    ) -> Result<AnnotationRecord, StoreError> {
        if !temp_id.is_temp() {
            return Err(StoreError::NotATempId(temp_id.clone()));
        }
        if !self.records.contains_key(temp_id) {
            return Err(StoreError::UnknownId(temp_id.clone()));
        }
        let slot = self
            .order
            .iter()
            .position(|id| id == temp_id)
            .expect("indexed record missing from order");

        self.unlink_at(temp_id, slot);

        let server_id = server_record.id.clone();
        if self.records.contains_key(&server_id) {
            // Echo won the race; refresh the existing entry in place.
            log::debug!("confirm: {} already present via echo, dropping {temp_id}", server_id);
            self.replace(server_record);
        } else {
            self.link_at(server_record, slot);
        }
        self.remap.insert(temp_id.clone(), server_id.clone());

        Ok(self.records[&server_id].clone())
    }

    /// Remove an optimistic entry whose durable write was rejected.
    pub fn rollback(&mut self, temp_id: &AnnotationId) -> Result<AnnotationRecord, StoreError> {
        if !temp_id.is_temp() {
            return Err(StoreError::NotATempId(temp_id.clone()));
        }
        self.take(temp_id)
            .ok_or_else(|| StoreError::UnknownId(temp_id.clone()))
    }

    /// Apply an inbound create/update/delete from the sync channel.
    ///
    /// Idempotent by id: a duplicate create and an update/delete for an
    /// unknown id are no-ops, never errors. A create or update bearing a
    /// server id that closes an open temp-id remap ends that
    /// reconciliation cycle.
    pub fn apply_remote(&mut self, event: RemoteEvent) -> Applied {
        match event {
            RemoteEvent::Created(record) => {
                self.close_remap_cycle(&record.id);
                if self.records.contains_key(&record.id) {
                    log::debug!("apply_remote: created {} already present", record.id);
                    Applied::AlreadyPresent
                } else {
                    self.link(record);
                    Applied::Created
                }
            }
            RemoteEvent::Updated(record) => {
                self.close_remap_cycle(&record.id);
                if self.records.contains_key(&record.id) {
                    self.replace(record);
                    Applied::Updated
                } else {
                    log::debug!("apply_remote: dropping update for unknown id {}", record.id);
                    Applied::OrphanDropped
                }
            }
            RemoteEvent::Deleted(id) => {
                if self.take(&id).is_some() {
                    Applied::Deleted
                } else {
                    log::debug!("apply_remote: dropping delete for unknown id {id}");
                    Applied::OrphanDropped
                }
            }
        }
    }

    /// Local authoritative edit. The caller submits the same patch to the
    /// Persistence Gateway; the store only mutates the working set.
    pub fn update(
        &mut self,
        id: &AnnotationId,
        patch: &AnnotationPatch,
    ) -> Result<AnnotationRecord, StoreError> {
        let canonical = self.resolve(id).clone();
        let mut record = self
            .records
            .get(&canonical)
            .cloned()
            .ok_or_else(|| StoreError::UnknownId(id.clone()))?;
        patch.apply_to(&mut record);
        record.updated_at = Utc::now();
        record.validate()?;
        self.replace(record.clone());
        Ok(record)
    }

    /// Local removal. Returns the removed record for snapshot/restore.
    pub fn remove(&mut self, id: &AnnotationId) -> Result<AnnotationRecord, StoreError> {
        let canonical = self.resolve(id).clone();
        self.take(&canonical)
            .ok_or_else(|| StoreError::UnknownId(id.clone()))
    }

    /// Restore a previously removed or pre-edit record at the end of the
    /// working set (used when a durable write is rejected after an
    /// optimistic update/delete).
    pub fn restore(&mut self, record: AnnotationRecord) {
        if self.records.contains_key(&record.id) {
            self.replace(record);
        } else {
            self.link(record);
        }
    }

    /// Follow the temp→server remap so UI handles bound to a temp id keep
    /// resolving for the reconciliation cycle.
    pub fn resolve<'a>(&'a self, id: &'a AnnotationId) -> &'a AnnotationId {
        self.remap.get(id).unwrap_or(id)
    }

    pub fn get(&self, id: &AnnotationId) -> Option<&AnnotationRecord> {
        self.records.get(self.resolve(id))
    }

    pub fn contains(&self, id: &AnnotationId) -> bool {
        self.records.contains_key(self.resolve(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &AnnotationRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Anchored records on the given 1-based page.
    pub fn on_page(&self, page: u32) -> Vec<&AnnotationRecord> {
        self.by_page
            .get(&page)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn with_tag(&self, tag: &str) -> Vec<&AnnotationRecord> {
        self.by_tag
            .get(tag)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    /// Thread roots: records with no parent, plus records whose declared
    /// parent is missing from the working set (partial scope loads).
    pub fn roots(&self) -> Vec<&AnnotationRecord> {
        self.iter()
            .filter(|r| match &r.thread_parent_id {
                None => true,
                Some(parent) => !self.records.contains_key(parent),
            })
            .collect()
    }

    /// Derive the ordered reply tree under `root_id`.
    ///
    /// Walks `thread_parent_id` back-references through the children index
    /// with a visited-set guard, so defensively-cyclic data and repeated
    /// parents terminate; every record appears at most once. Replies are
    /// ordered by creation time.
    pub fn thread_of(&self, root_id: &AnnotationId) -> Option<ThreadNode> {
        let canonical = self.resolve(root_id);
        let root = self.records.get(canonical)?;
        let mut visited = FxHashSet::default();
        visited.insert(canonical.clone());
        Some(self.build_thread(root, &mut visited))
    }

    fn build_thread(
        &self,
        record: &AnnotationRecord,
        visited: &mut FxHashSet<AnnotationId>,
    ) -> ThreadNode {
        let mut children: Vec<&AnnotationRecord> = self
            .by_parent
            .get(&record.id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| visited.insert((*id).clone()))
                    .filter_map(|id| self.records.get(id))
                    .collect()
            })
            .unwrap_or_default();
        children.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        ThreadNode {
            record: record.clone(),
            replies: children
                .into_iter()
                .map(|child| self.build_thread(child, visited))
                .collect(),
        }
    }

    // ───────────────────── index bookkeeping ─────────────────────

    fn link(&mut self, record: AnnotationRecord) {
        let slot = self.order.len();
        self.link_at(record, slot);
    }

    fn link_at(&mut self, record: AnnotationRecord, slot: usize) {
        let id = record.id.clone();
        self.order.insert(slot, id.clone());
        self.index(&record);
        self.records.insert(id, record);
    }

    /// Swap a record's fields in place, keeping its order slot.
    fn replace(&mut self, record: AnnotationRecord) {
        if let Some(old) = self.records.remove(&record.id) {
            self.deindex(&old);
        }
        self.index(&record);
        self.records.insert(record.id.clone(), record);
    }

    /// Remove a record and its order slot entirely.
    fn take(&mut self, id: &AnnotationId) -> Option<AnnotationRecord> {
        let record = self.records.remove(id)?;
        self.deindex(&record);
        self.order.retain(|entry| entry != id);
        Some(record)
    }

    /// Drop index entries and the map entry, leaving `order` untouched.
    fn unlink(&mut self, id: &AnnotationId) {
        if let Some(record) = self.records.remove(id) {
            self.deindex(&record);
            self.order.retain(|entry| entry != id);
        }
    }

    fn unlink_at(&mut self, id: &AnnotationId, slot: usize) {
        if let Some(record) = self.records.remove(id) {
            self.deindex(&record);
        }
        self.order.remove(slot);
    }

    fn index(&mut self, record: &AnnotationRecord) {
        if let Some(page) = record.page() {
            self.by_page.entry(page).or_default().push(record.id.clone());
        }
        if let Some(parent) = &record.thread_parent_id {
            self.by_parent
                .entry(parent.clone())
                .or_default()
                .push(record.id.clone());
        }
        for tag in &record.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .push(record.id.clone());
        }
    }

    fn deindex(&mut self, record: &AnnotationRecord) {
        if let Some(page) = record.page() {
            if let Some(ids) = self.by_page.get_mut(&page) {
                ids.retain(|id| id != &record.id);
                if ids.is_empty() {
                    self.by_page.remove(&page);
                }
            }
        }
        if let Some(parent) = &record.thread_parent_id {
            if let Some(ids) = self.by_parent.get_mut(parent) {
                ids.retain(|id| id != &record.id);
                if ids.is_empty() {
                    self.by_parent.remove(parent);
                }
            }
        }
        for tag in &record.tags {
            if let Some(ids) = self.by_tag.get_mut(tag) {
                ids.retain(|id| id != &record.id);
                if ids.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    /// An echo for `server_id` ends the reconciliation cycle of any temp id
    /// mapped to it.
    fn close_remap_cycle(&mut self, server_id: &AnnotationId) {
        self.remap.retain(|_, mapped| mapped != server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Anchor, AnnotationKind, Status};
    use chrono::{Duration, Utc};

    fn anchor_on(page: u32) -> Anchor {
        Anchor {
            page,
            x: 0.1,
            y: 0.2,
            width: 0.3,
            height: 0.04,
            page_width_px: 816.0,
            page_height_px: 1056.0,
        }
    }

    fn doc_store() -> AnnotationStore {
        AnnotationStore::new(Scope::document("doc-1"))
    }

    fn server_record(id: &str, page: u32) -> AnnotationRecord {
        AnnotationDraft::highlight("doc-1", anchor_on(page), "quoted", "alice")
            .into_record(AnnotationId::from(id), Utc::now())
    }

    #[test]
    fn test_create_assigns_temp_id() {
        let mut store = doc_store();
        let draft = AnnotationDraft::highlight("doc-1", anchor_on(2), "quoted", "alice");
        let record = store.create(draft).unwrap();

        assert!(record.id.is_temp());
        assert_eq!(store.len(), 1);
        assert_eq!(record.anchor.unwrap().page, 2);
    }

    #[test]
    fn test_create_rejects_invalid_draft() {
        let mut store = doc_store();
        let mut draft = AnnotationDraft::highlight("doc-1", anchor_on(1), "q", "alice");
        draft.anchor = None;
        assert!(matches!(
            store.create(draft),
            Err(StoreError::Invalid(ModelError::MissingAnchor(
                AnnotationKind::Highlight
            )))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_rejects_unknown_parent() {
        let mut store = doc_store();
        let mut draft = AnnotationDraft::note(Scope::document("doc-1"), "reply", "bob");
        draft.thread_parent_id = Some(AnnotationId::from("ann_missing"));
        assert!(matches!(
            store.create(draft),
            Err(StoreError::UnknownParent(_))
        ));
    }

    #[test]
    fn test_confirm_replaces_temp_entry() {
        let mut store = doc_store();
        let temp = store
            .create(AnnotationDraft::highlight("doc-1", anchor_on(2), "q", "alice"))
            .unwrap();

        let confirmed = store.confirm(&temp.id, server_record("ann_42", 2)).unwrap();
        assert_eq!(confirmed.id.as_str(), "ann_42");
        assert_eq!(store.len(), 1);
        assert!(store.get(&AnnotationId::from("ann_42")).is_some());
        // The temp handle still resolves through the remap table.
        assert!(store.get(&temp.id).is_some());
        assert_eq!(store.resolve(&temp.id).as_str(), "ann_42");
    }

    #[test]
    fn test_confirm_preserves_order_slot() {
        let mut store = doc_store();
        store.apply_remote(RemoteEvent::Created(server_record("ann_1", 1)));
        let temp = store
            .create(AnnotationDraft::highlight("doc-1", anchor_on(2), "q", "alice"))
            .unwrap();
        store.apply_remote(RemoteEvent::Created(server_record("ann_3", 3)));

        store.confirm(&temp.id, server_record("ann_2", 2)).unwrap();
        let ids: Vec<&str> = store.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ann_1", "ann_2", "ann_3"]);
    }

    #[test]
    fn test_confirm_after_echo_leaves_single_record() {
        let mut store = doc_store();
        let temp = store
            .create(AnnotationDraft::highlight("doc-1", anchor_on(2), "q", "alice"))
            .unwrap();

        // Echo arrives first through the push channel.
        assert_eq!(
            store.apply_remote(RemoteEvent::Created(server_record("ann_42", 2))),
            Applied::Created
        );
        assert_eq!(store.len(), 2);

        // Direct response lands second; temp entry must collapse away.
        store.confirm(&temp.id, server_record("ann_42", 2)).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(&AnnotationId::from("ann_42")).is_some());
        assert!(!store.records.contains_key(&temp.id));
    }

    #[test]
    fn test_echo_after_confirm_is_noop() {
        let mut store = doc_store();
        let temp = store
            .create(AnnotationDraft::highlight("doc-1", anchor_on(2), "q", "alice"))
            .unwrap();
        store.confirm(&temp.id, server_record("ann_42", 2)).unwrap();

        assert_eq!(
            store.apply_remote(RemoteEvent::Created(server_record("ann_42", 2))),
            Applied::AlreadyPresent
        );
        assert_eq!(store.len(), 1);
        // The echo closes the reconciliation cycle: temp handle stops resolving.
        assert_eq!(store.resolve(&temp.id), &temp.id);
    }

    #[test]
    fn test_rollback_removes_optimistic_entry() {
        let mut store = doc_store();
        let temp = store
            .create(AnnotationDraft::highlight("doc-1", anchor_on(2), "q", "alice"))
            .unwrap();
        let removed = store.rollback(&temp.id).unwrap();
        assert_eq!(removed.id, temp.id);
        assert!(store.is_empty());
        assert!(store.rollback(&temp.id).is_err());
    }

    #[test]
    fn test_confirm_rejects_non_temp_id() {
        let mut store = doc_store();
        store.apply_remote(RemoteEvent::Created(server_record("ann_1", 1)));
        let err = store
            .confirm(&AnnotationId::from("ann_1"), server_record("ann_2", 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotATempId(_)));
    }

    #[test]
    fn test_apply_created_idempotent() {
        let mut store = doc_store();
        let record = server_record("ann_1", 1);

        assert_eq!(
            store.apply_remote(RemoteEvent::Created(record.clone())),
            Applied::Created
        );
        let snapshot: Vec<AnnotationRecord> = store.iter().cloned().collect();

        assert_eq!(
            store.apply_remote(RemoteEvent::Created(record)),
            Applied::AlreadyPresent
        );
        let after: Vec<AnnotationRecord> = store.iter().cloned().collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_apply_update_and_orphans() {
        let mut store = doc_store();
        store.apply_remote(RemoteEvent::Created(server_record("ann_1", 1)));

        let mut updated = server_record("ann_1", 1);
        updated.text = "edited elsewhere".to_string();
        assert_eq!(
            store.apply_remote(RemoteEvent::Updated(updated)),
            Applied::Updated
        );
        assert_eq!(store.get(&AnnotationId::from("ann_1")).unwrap().text, "edited elsewhere");

        // Unknown ids drop silently in both directions.
        assert_eq!(
            store.apply_remote(RemoteEvent::Updated(server_record("ann_ghost", 1))),
            Applied::OrphanDropped
        );
        assert_eq!(
            store.apply_remote(RemoteEvent::Deleted(AnnotationId::from("ann_ghost"))),
            Applied::OrphanDropped
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_apply_delete() {
        let mut store = doc_store();
        store.apply_remote(RemoteEvent::Created(server_record("ann_1", 1)));
        assert_eq!(
            store.apply_remote(RemoteEvent::Deleted(AnnotationId::from("ann_1"))),
            Applied::Deleted
        );
        assert!(store.is_empty());
        assert!(store.on_page(1).is_empty());
    }

    #[test]
    fn test_local_update_bumps_updated_at() {
        let mut store = doc_store();
        let mut record = server_record("ann_1", 1);
        record.updated_at = Utc::now() - Duration::minutes(5);
        let old_updated = record.updated_at;
        store.apply_remote(RemoteEvent::Created(record));

        let patch = AnnotationPatch {
            status: Some(Status::Resolved),
            ..AnnotationPatch::default()
        };
        let updated = store.update(&AnnotationId::from("ann_1"), &patch).unwrap();
        assert_eq!(updated.status, Status::Resolved);
        assert!(updated.updated_at > old_updated);

        assert!(matches!(
            store.update(&AnnotationId::from("ann_ghost"), &patch),
            Err(StoreError::UnknownId(_))
        ));
    }

    #[test]
    fn test_remove_and_restore() {
        let mut store = doc_store();
        store.apply_remote(RemoteEvent::Created(server_record("ann_1", 1)));
        let removed = store.remove(&AnnotationId::from("ann_1")).unwrap();
        assert!(store.is_empty());

        store.restore(removed);
        assert_eq!(store.len(), 1);
        assert_eq!(store.on_page(1).len(), 1);
    }

    #[test]
    fn test_load_rebuilds_indices() {
        let mut store = doc_store();
        store.apply_remote(RemoteEvent::Created(server_record("stale", 9)));

        let mut tagged = server_record("ann_1", 2);
        tagged.tags.insert("todo".to_string());
        store.load(vec![tagged, server_record("ann_2", 2)]);

        assert_eq!(store.len(), 2);
        assert!(store.get(&AnnotationId::from("stale")).is_none());
        assert_eq!(store.on_page(2).len(), 2);
        assert!(store.on_page(9).is_empty());
        assert_eq!(store.with_tag("todo").len(), 1);
    }

    #[test]
    fn test_thread_derivation_orders_replies() {
        let mut store = doc_store();
        let root = server_record("ann_root", 1);
        let base = Utc::now();

        let mut reply_late = AnnotationDraft::reply(&root, "second", "bob")
            .into_record(AnnotationId::from("ann_b"), base + Duration::seconds(10));
        reply_late.thread_parent_id = Some(root.id.clone());
        let reply_early = AnnotationDraft::reply(&root, "first", "carol")
            .into_record(AnnotationId::from("ann_a"), base + Duration::seconds(1));
        let nested = AnnotationDraft::reply(&reply_early, "nested", "dan")
            .into_record(AnnotationId::from("ann_c"), base + Duration::seconds(2));

        store.load(vec![root, reply_late, reply_early, nested]);

        let tree = store.thread_of(&AnnotationId::from("ann_root")).unwrap();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.replies[0].record.id.as_str(), "ann_a");
        assert_eq!(tree.replies[1].record.id.as_str(), "ann_b");
        assert_eq!(tree.replies[0].replies[0].record.id.as_str(), "ann_c");
    }

    #[test]
    fn test_thread_missing_parent_treated_as_root() {
        let mut store = doc_store();
        let mut stray = AnnotationDraft::note(Scope::document("doc-1"), "stray", "bob")
            .into_record(AnnotationId::from("ann_stray"), Utc::now());
        stray.thread_parent_id = Some(AnnotationId::from("ann_gone"));
        store.load(vec![server_record("ann_root", 1), stray]);

        let roots = store.roots();
        let root_ids: Vec<&str> = roots.iter().map(|r| r.id.as_str()).collect();
        assert!(root_ids.contains(&"ann_root"));
        assert!(root_ids.contains(&"ann_stray"));
    }

    #[test]
    fn test_thread_cycle_guard_terminates() {
        // Defensive: hand-built cyclic parents must not loop or duplicate.
        let mut store = doc_store();
        let base = Utc::now();
        let mut a = AnnotationDraft::note(Scope::document("doc-1"), "a", "u")
            .into_record(AnnotationId::from("ann_a"), base);
        let mut b = AnnotationDraft::note(Scope::document("doc-1"), "b", "u")
            .into_record(AnnotationId::from("ann_b"), base + Duration::seconds(1));
        a.thread_parent_id = Some(b.id.clone());
        b.thread_parent_id = Some(a.id.clone());
        store.load(vec![a, b]);

        let tree = store.thread_of(&AnnotationId::from("ann_a")).unwrap();
        assert_eq!(tree.len(), 2);
        assert!(tree.replies[0].replies.is_empty());
    }

    #[test]
    fn test_thread_of_unknown_root() {
        let store = doc_store();
        assert!(store.thread_of(&AnnotationId::from("ann_nope")).is_none());
    }
}
