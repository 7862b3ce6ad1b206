//! # glossa-core — Annotation model and store
//!
//! The canonical in-memory state of the annotation subsystem: the persisted
//! record model, the per-scope working set with optimistic mutation, and the
//! derived read-side projections.
//!
//! ```text
//! UI selection ──► glossa-geometry ──► Anchor
//!                                        │
//!                                        ▼
//!                              ┌───────────────────┐
//!  glossa-collab ──► events ──►│  AnnotationStore  │◄── create/confirm/
//!   (push channel)             │  (working set +   │    rollback (optimistic)
//!                              │   derived indices)│
//!                              └─────────┬─────────┘
//!                                        │ read-only
//!                                        ▼
//!                               threads / groupings
//! ```
//!
//! ## Modules
//!
//! - [`model`] — wire-faithful record types ([`AnnotationRecord`], the
//!   bit-exact [`Anchor`] contract, scopes, kinds, drafts, patches)
//! - [`store`] — [`AnnotationStore`]: load/create/confirm/rollback,
//!   idempotent remote apply, thread derivation with a cycle guard
//! - [`group`] — stateless page/kind/date projections

pub mod group;
pub mod model;
pub mod store;

pub use model::{
    ActionItem, Anchor, AnnotationDraft, AnnotationId, AnnotationKind, AnnotationPatch,
    AnnotationRecord, ModelError, Priority, Scope, Status,
};
pub use store::{Applied, AnnotationStore, RemoteEvent, StoreError, ThreadNode};
