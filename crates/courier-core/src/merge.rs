//! # Last-Writer-Wins Merge
//!
//! Combines the freshly fetched (authoritative) order set with the local
//! set, which may contain optimistic edits that have not reached the server.
//!
//! ## Resolution Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  id present in       │  result                                          │
//! │  ────────────────────┼─────────────────────────────────────────────────│
//! │  local only          │  keep local (created/edited offline)             │
//! │  remote only         │  take remote as-is                               │
//! │  both                │  strictly newer last-modified wins,              │
//! │                      │  local wins ties (and wins if neither has one)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Output Order
//! Remote order is preserved for every id the server knows about; local-only
//! records follow in local order. Remote records without an id are passed
//! through untouched; local records without an id cannot be matched and are
//! dropped (counted in [`MergeOutcome::dropped_without_id`]).
//!
//! ## Limitation
//! This is a single-timestamp policy, not a field-level resolver. Two
//! devices editing different fields of one order offline lose one of the
//! edits, and identical timestamps from two devices resolve to whichever
//! copy is local. True multi-device conflict resolution is out of scope.

use std::collections::HashMap;

use crate::record::SyncRecord;

/// Result of a merge with counters for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    pub records: Vec<T>,
    /// Ids present on both sides where the local copy was kept.
    pub local_wins: usize,
    /// Ids present on both sides where the remote copy was kept.
    pub remote_wins: usize,
    /// Ids only present locally.
    pub local_only: usize,
    /// Ids only present remotely.
    pub remote_only: usize,
    /// Local records that had no id.
    pub dropped_without_id: usize,
}

/// Merges `local` and `remote` by id.
///
/// Duplicate ids within one side collapse to a single record (the newest;
/// on a tie the later local copy, or the earlier remote copy).
pub fn merge<T: SyncRecord + Clone>(local: &[T], remote: &[T]) -> MergeOutcome<T> {
    let mut dropped_without_id = 0;

    // Index local by id; remember first-seen order for local-only output
    let mut local_order: Vec<String> = Vec::new();
    let mut local_by_id: HashMap<String, &T> = HashMap::new();
    for record in local {
        let Some(id) = record.record_id() else {
            dropped_without_id += 1;
            continue;
        };
        let replace = match local_by_id.get(&id) {
            Some(existing) => !is_newer(*existing, record),
            None => {
                local_order.push(id.clone());
                true
            }
        };
        if replace {
            local_by_id.insert(id, record);
        }
    }

    // Collapse remote duplicates, keeping first-seen order
    let mut remote_order: Vec<Option<String>> = Vec::new();
    let mut remote_by_id: HashMap<String, &T> = HashMap::new();
    let mut passthrough: Vec<&T> = Vec::new();
    for record in remote {
        match record.record_id() {
            Some(id) => {
                let replace = match remote_by_id.get(&id) {
                    Some(existing) => is_newer(record, *existing),
                    None => {
                        remote_order.push(Some(id.clone()));
                        true
                    }
                };
                if replace {
                    remote_by_id.insert(id, record);
                }
            }
            None => {
                remote_order.push(None);
                passthrough.push(record);
            }
        }
    }

    let mut outcome = MergeOutcome {
        records: Vec::with_capacity(local_by_id.len() + remote_by_id.len() + passthrough.len()),
        local_wins: 0,
        remote_wins: 0,
        local_only: 0,
        remote_only: 0,
        dropped_without_id,
    };

    let mut passthrough = passthrough.into_iter();
    for slot in remote_order {
        let Some(id) = slot else {
            if let Some(record) = passthrough.next() {
                outcome.records.push(record.clone());
            }
            continue;
        };

        let remote_record = remote_by_id[&id];
        match local_by_id.get(&id) {
            Some(local_record) if is_newer(remote_record, *local_record) => {
                outcome.remote_wins += 1;
                outcome.records.push(remote_record.clone());
            }
            Some(local_record) => {
                outcome.local_wins += 1;
                outcome.records.push((*local_record).clone());
            }
            None => {
                outcome.remote_only += 1;
                outcome.records.push(remote_record.clone());
            }
        }
    }

    for id in &local_order {
        if !remote_by_id.contains_key(id) {
            outcome.local_only += 1;
            outcome.records.push(local_by_id[id].clone());
        }
    }

    outcome
}

/// True if `candidate` was modified strictly after `current`.
fn is_newer<T: SyncRecord>(candidate: &T, current: &T) -> bool {
    match (candidate.modified_at(), current.modified_at()) {
        (Some(candidate), Some(current)) => candidate > current,
        (Some(_), None) => true,
        _ => false,
    }
}
