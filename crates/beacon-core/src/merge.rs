//! Last-write-wins reconciliation for record sets edited offline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{EmergencyContact, GroupMembership};

/// A record with a stable identity and a modification time
pub trait Mergeable: Clone {
    fn merge_key(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
}

impl Mergeable for EmergencyContact {
    fn merge_key(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Mergeable for GroupMembership {
    fn merge_key(&self) -> &str {
        &self.group_id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Merge a local set into a freshly fetched remote set.
///
/// Remote records seed the result. A local record is added when the remote
/// set lacks its key and replaces the remote one only when its timestamp is
/// strictly later, so equal timestamps keep the remote copy. The output is
/// ordered most recently updated first (key ascending on ties) and truncated
/// to `capacity`.
pub fn merge_by_updated_at<T: Mergeable>(
    local: &[T],
    remote: &[T],
    capacity: Option<usize>,
) -> Vec<T> {
    let mut merged: HashMap<&str, &T> = HashMap::with_capacity(local.len() + remote.len());
    for record in remote {
        keep_newer(&mut merged, record);
    }
    for record in local {
        keep_newer(&mut merged, record);
    }

    let mut records = merged.into_values().cloned().collect::<Vec<_>>();
    records.sort_by(|a, b| {
        b.updated_at()
            .cmp(&a.updated_at())
            .then_with(|| a.merge_key().cmp(b.merge_key()))
    });
    if let Some(capacity) = capacity {
        records.truncate(capacity);
    }
    records
}

fn keep_newer<'a, T: Mergeable>(merged: &mut HashMap<&'a str, &'a T>, record: &'a T) {
    match merged.get(record.merge_key()) {
        Some(existing) if record.updated_at() <= existing.updated_at() => {}
        _ => {
            merged.insert(record.merge_key(), record);
        }
    }
}
