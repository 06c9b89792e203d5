//! crates/wireq-cache/src/prune.rs
//!
//! The hysteretic eviction protocol. Four passes run in strict order,
//! each widening which records are eligible;
//! pruning stops the moment the post-eviction size would clear the
//! hysteresis floor, so a single EXPIRED record is never evicted if it
//! alone would already satisfy the goal and a later pass wouldn't otherwise
//! run.

use std::path::Path;

use crate::filename::filename_for_key;
use crate::index::Index;

/// Hysteresis floor: pruning stops once `total_size + needed` drops below
/// this fraction of `max_bytes`, rather than merely below `max_bytes`
/// itself, to avoid repeatedly re-triggering on the next insert.
pub const HYSTERESIS_FACTOR: f64 = 0.9;

fn goal_met(index: &Index, needed: u64, max_bytes: u64) -> bool {
    (index.total_size() + needed) < (max_bytes as f64 * HYSTERESIS_FACTOR) as u64
}

/// Runs the four eviction passes against `index`, deleting files under
/// `root` as entries are evicted, until `total_size + needed` clears the
/// hysteresis floor or every entry has been considered.
///
/// Returns the number of entries evicted. File-deletion failures are
/// logged by the caller via the returned list of `(key, io error)` pairs;
/// this function still removes the index entry regardless — a file that
/// fails to delete must not keep counting against `total_size`.
pub fn prune_if_needed(
    index: &mut Index,
    root: &Path,
    needed: u64,
    max_bytes: u64,
    now_ms: i64,
) -> Vec<(String, std::io::Error)> {
    let mut delete_errors = Vec::new();

    if goal_met(index, needed, max_bytes) {
        return delete_errors;
    }

    let passes: [fn(&wireq_codec::CacheHeader, i64) -> bool; 4] = [
        |h, now| h.ttl < now,
        |h, now| h.is_image && h.keep_until < now,
        |h, now| h.keep_until < now,
        |_h, _now| true,
    ];

    for pass in passes {
        if goal_met(index, needed, max_bytes) {
            break;
        }
        let candidates: Vec<String> = index
            .iter_lru()
            .filter(|(_, entry)| pass(&entry.header, now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in candidates {
            if goal_met(index, needed, max_bytes) {
                break;
            }
            let Some(entry) = index.remove(&key) else {
                continue;
            };
            let path = root.join(filename_for_key(&entry.header.key));
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    delete_errors.push((key, err));
                }
            }
        }
    }

    delete_errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use tempfile::tempdir;
    use wireq_codec::CacheHeader;

    fn header(ttl: i64, is_image: bool, keep_until: i64) -> CacheHeader {
        CacheHeader {
            key: format!("key-{ttl}-{is_image}-{keep_until}"),
            etag: None,
            server_date: 0,
            ttl,
            soft_ttl: ttl,
            keep_until,
            is_image,
            response_headers: Vec::new(),
        }
    }

    fn populate(index: &mut Index, dir: &Path, key: &str, header: CacheHeader, size: u64) {
        std::fs::write(dir.join(filename_for_key(key)), vec![0u8; size as usize]).unwrap();
        index.insert(key.to_owned(), IndexEntry { header, size });
    }

    #[test]
    fn prune_clears_expired_then_images_then_one_evictable_before_meeting_goal() {
        let dir = tempdir().unwrap();
        let mut index = Index::new();
        let now = 1_000_000;

        for i in 0..3 {
            populate(
                &mut index,
                dir.path(),
                &format!("expired-{i}"),
                header(now - 1, false, now + 1_000),
                10,
            );
        }
        for i in 0..3 {
            populate(
                &mut index,
                dir.path(),
                &format!("image-{i}"),
                header(now + 1_000, true, now - 1),
                10,
            );
        }
        for i in 0..3 {
            populate(
                &mut index,
                dir.path(),
                &format!("evictable-{i}"),
                header(now + 1_000, false, now - 1),
                10,
            );
        }
        populate(
            &mut index,
            dir.path(),
            "protected",
            header(now + 1_000, false, now + 1_000),
            10,
        );

        assert_eq!(index.total_size(), 100);
        let errors = prune_if_needed(&mut index, dir.path(), 30, 100, now);
        assert!(errors.is_empty());

        // goal: total_size + 30 < 90  =>  total_size < 60
        assert!(index.total_size() < 60);
        // All EXPIRED and IMAGES gone; exactly one EVICTABLE survives;
        // the protected entry is untouched.
        assert!(index.peek("protected").is_some());
        for i in 0..3 {
            assert!(index.peek(&format!("expired-{i}")).is_none());
            assert!(index.peek(&format!("image-{i}")).is_none());
        }
        let evictable_survivors = (0..3).filter(|i| index.peek(&format!("evictable-{i}")).is_some()).count();
        assert_eq!(evictable_survivors, 1);
    }

    #[test]
    fn no_op_when_goal_already_met() {
        let dir = tempdir().unwrap();
        let mut index = Index::new();
        populate(&mut index, dir.path(), "a", header(i64::MAX - 1, false, 0), 5);
        let errors = prune_if_needed(&mut index, dir.path(), 1, 1000, 0);
        assert!(errors.is_empty());
        assert_eq!(index.total_size(), 5);
    }

    #[test]
    fn all_pass_evicts_protected_entries_under_pressure() {
        let dir = tempdir().unwrap();
        let mut index = Index::new();
        let now = 1_000;
        populate(&mut index, dir.path(), "only", header(now + 1_000, false, now + 1_000), 50);
        let errors = prune_if_needed(&mut index, dir.path(), 90, 100, now);
        assert!(errors.is_empty());
        assert!(index.peek("only").is_none());
    }
}
