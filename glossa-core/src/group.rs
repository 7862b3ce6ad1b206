//! Read-side grouping projections.
//!
//! Pure functions over the working set: no state of their own, cheap enough
//! to recompute on every render-relevant event rather than cache.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::{AnnotationKind, AnnotationRecord};

/// Anchored records grouped by 1-based page number.
pub fn by_page<'a>(
    records: impl IntoIterator<Item = &'a AnnotationRecord>,
) -> BTreeMap<u32, Vec<&'a AnnotationRecord>> {
    let mut groups: BTreeMap<u32, Vec<&AnnotationRecord>> = BTreeMap::new();
    for record in records {
        if let Some(page) = record.page() {
            groups.entry(page).or_default().push(record);
        }
    }
    groups
}

/// Records grouped by kind.
pub fn by_kind<'a>(
    records: impl IntoIterator<Item = &'a AnnotationRecord>,
) -> BTreeMap<AnnotationKind, Vec<&'a AnnotationRecord>> {
    let mut groups: BTreeMap<AnnotationKind, Vec<&AnnotationRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.kind).or_default().push(record);
    }
    groups
}

/// Records grouped by UTC creation date.
pub fn by_day<'a>(
    records: impl IntoIterator<Item = &'a AnnotationRecord>,
) -> BTreeMap<NaiveDate, Vec<&'a AnnotationRecord>> {
    let mut groups: BTreeMap<NaiveDate, Vec<&AnnotationRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.created_at.date_naive())
            .or_default()
            .push(record);
    }
    groups
}
